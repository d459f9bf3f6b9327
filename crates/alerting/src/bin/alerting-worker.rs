//! alerting-worker: evaluates alert rules on a tick and delivers results to a webhook.
//!
//! Reads a YAML list of rules, evaluates each against its datasource over
//! HTTP, and POSTs every evaluation result to the configured webhook.
//! SIGINT/SIGTERM cancel in-flight jobs, which get the configured grace
//! period to finish.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use vigil_alerting::http::{transport_client, HttpEvaluator, WebhookResultHandler};
use vigil_alerting::{EngineMetrics, JobDispatcher, JobScheduler, RetryEngine, Rule, Ticker};
use vigil_core::{load_dotenv, parse_duration, AlertingConfig};

// ── CLI ─────────────────────────────────────────────────────────────

/// Alert evaluation worker.
#[derive(Parser, Debug)]
#[command(name = "alerting-worker", version, about)]
struct Cli {
    /// Path to a YAML file containing a list of rules.
    #[arg(long, env = "ALERTING_RULES", default_value = "config/alert-rules.yaml")]
    rules: PathBuf,

    /// Webhook receiving evaluation results.
    #[arg(long, env = "ALERTING_WEBHOOK_URL")]
    webhook_url: String,

    /// HTTP method for the webhook.
    #[arg(long, env = "ALERTING_WEBHOOK_METHOD")]
    webhook_method: Option<String>,

    /// Override ALERTING_MAX_ATTEMPTS.
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Override ALERTING_EVALUATION_TIMEOUT (e.g. "30s").
    #[arg(long, value_parser = parse_duration_arg)]
    evaluation_timeout: Option<Duration>,

    /// Override ALERTING_NOTIFICATION_TIMEOUT (e.g. "30s").
    #[arg(long, value_parser = parse_duration_arg)]
    notification_timeout: Option<Duration>,
}

fn parse_duration_arg(raw: &str) -> Result<Duration, String> {
    parse_duration(raw).ok_or_else(|| format!("invalid duration: {raw}"))
}

fn load_rules(path: &PathBuf) -> anyhow::Result<Vec<Rule>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading rules from {}", path.display()))?;
    let rules: Vec<Rule> = serde_yaml::from_str(&text)
        .with_context(|| format!("parsing rules from {}", path.display()))?;
    Ok(rules)
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    load_dotenv();
    let cli = Cli::parse();

    let mut config = AlertingConfig::from_env()?;
    if let Some(max_attempts) = cli.max_attempts {
        config.max_attempts = max_attempts;
    }
    if let Some(timeout) = cli.evaluation_timeout {
        config.evaluation_timeout = timeout;
    }
    if let Some(timeout) = cli.notification_timeout {
        config.notification_timeout = timeout;
    }
    config.validate()?;
    config.log_summary();

    let rules = load_rules(&cli.rules)?;
    info!(path = %cli.rules.display(), count = rules.len(), "loaded rules");

    let client = transport_client(config.transport_timeout)?;
    let evaluator = Arc::new(HttpEvaluator::with_client(client));
    let handler = Arc::new(WebhookResultHandler::from_config(
        cli.webhook_url,
        cli.webhook_method,
        Some(HashMap::new()),
        config.transport_timeout,
    )?);

    let engine = Arc::new(RetryEngine::new(config.clone(), evaluator, handler)?);
    let metrics = EngineMetrics::shared();
    let dispatcher = JobDispatcher::new(engine, metrics.clone());
    let queue = dispatcher.queue();

    let mut scheduler = JobScheduler::with_metrics(metrics.clone());
    scheduler.sync_rules(&rules);

    let cancel = CancellationToken::new();
    let dispatcher_handle = tokio::spawn(dispatcher.run(cancel.clone()));

    let mut wakeup = tokio::time::interval(config.tick_interval);
    wakeup.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut ticker = Ticker::new(Utc::now(), config.tick_interval);

    let shutdown = os_signal();
    tokio::pin!(shutdown);

    info!("alerting-worker started");
    loop {
        tokio::select! {
            _ = wakeup.tick() => {
                for tick in ticker.advance(Utc::now()) {
                    for job in scheduler.tick(tick) {
                        queue.enqueue(job);
                    }
                }
            }
            res = &mut shutdown => {
                if let Err(e) = res {
                    warn!(error = %e, "signal handler failed, shutting down");
                }
                info!("shutdown signal received");
                break;
            }
        }
    }

    cancel.cancel();
    drop(queue);

    let drain = config.shutdown_grace + Duration::from_secs(1);
    match tokio::time::timeout(drain, dispatcher_handle).await {
        Ok(Ok(())) => info!("dispatcher drained"),
        Ok(Err(e)) => warn!(error = %e, "dispatcher task failed"),
        Err(_) => warn!(timeout = ?drain, "dispatcher did not drain in time"),
    }

    if let Ok(m) = metrics.read() {
        info!(
            config = %config.summary(),
            metrics = %serde_json::to_string(&*m)?,
            "final alerting metrics"
        );
    }
    info!("alerting-worker exited cleanly");

    Ok(())
}

/// Wait for SIGINT or SIGTERM (Unix) or Ctrl+C (cross-platform fallback).
async fn os_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = sigint.recv() => {}
            _ = sigterm.recv() => {}
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}
