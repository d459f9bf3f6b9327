//! [`RetryEngine`]: runs one job through evaluation and result handling.
//!
//! Every attempt gets a fresh [`EvalContext`]. Evaluation is bounded by
//! `evaluation_timeout`, result handling by `notification_timeout`, and both
//! steps draw from the same `max_attempts` budget. Retries are immediate.
//!
//! Cancelling the parent token cancels the attempt in flight. The step is
//! given `shutdown_grace` to wind down, after which it is dropped and the run
//! reports [`RetryOutcome::Cancelled`]. No attempt starts after cancellation.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vigil_core::{AlertingConfig, ConfigError};

use crate::context::EvalContext;
use crate::error::{AlertError, Phase};
use crate::job::Job;
use crate::rule::{AlertState, Rule};
use crate::traits::{Evaluator, ResultHandler};

/// Terminal result of one job run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome {
    /// Evaluation and result handling both succeeded on attempt `attempts`.
    Succeeded { attempts: u32 },
    /// Every attempt failed; `error` is the one from the final attempt.
    Failed { attempts: u32, error: AlertError },
    /// The parent token fired before the run could finish.
    Cancelled { attempts: u32 },
    /// Another run already owned the job; nothing was invoked.
    Skipped { rule_id: String },
}

impl RetryOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RetryOutcome::Succeeded { .. })
    }

    /// Attempts started during the run.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Succeeded { attempts }
            | RetryOutcome::Failed { attempts, .. }
            | RetryOutcome::Cancelled { attempts } => *attempts,
            RetryOutcome::Skipped { .. } => 0,
        }
    }

    /// The error this outcome stands for, if it is not a success.
    pub fn error(&self) -> Option<AlertError> {
        match self {
            RetryOutcome::Succeeded { .. } => None,
            RetryOutcome::Failed { error, .. } => Some(error.clone()),
            RetryOutcome::Cancelled { .. } => Some(AlertError::Cancelled),
            RetryOutcome::Skipped { rule_id } => {
                Some(AlertError::AlreadyRunning(rule_id.clone()))
            }
        }
    }

    /// Short label used in logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            RetryOutcome::Succeeded { .. } => "succeeded",
            RetryOutcome::Failed { .. } => "failed",
            RetryOutcome::Cancelled { .. } => "cancelled",
            RetryOutcome::Skipped { .. } => "skipped",
        }
    }
}

/// How a single step ended.
enum StepResult<T> {
    /// Finished (or timed out) without cancellation.
    Done(Result<T, AlertError>),
    /// Finished during the grace period after cancellation.
    FinishedAfterCancel(Result<T, AlertError>),
    /// Still running when the grace period ran out.
    Abandoned,
}

/// How a single attempt ended.
enum AttemptResult {
    Succeeded(AlertState),
    Failed(AlertError),
    Cancelled,
}

/// Runs jobs through an [`Evaluator`] and a [`ResultHandler`] with retries.
///
/// Holds only read-only configuration and the two collaborators, so a single
/// engine can be shared across any number of concurrently running jobs.
pub struct RetryEngine {
    config: AlertingConfig,
    evaluator: Arc<dyn Evaluator>,
    result_handler: Arc<dyn ResultHandler>,
}

impl RetryEngine {
    /// Create an engine. Fails fast on an invalid configuration.
    pub fn new(
        config: AlertingConfig,
        evaluator: Arc<dyn Evaluator>,
        result_handler: Arc<dyn ResultHandler>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            evaluator,
            result_handler,
        })
    }

    pub fn config(&self) -> &AlertingConfig {
        &self.config
    }

    /// Run `job` to a terminal outcome.
    ///
    /// Claims the job's running flag for the duration of the call and
    /// releases it on every exit path. Returns [`RetryOutcome::Skipped`]
    /// without touching the collaborators if the job is already running.
    pub async fn run(&self, cancel: &CancellationToken, job: &Job) -> RetryOutcome {
        let rule = job.rule();
        let Some(_guard) = job.try_start() else {
            debug!(rule_id = %rule.id, "job already running, skipping");
            return RetryOutcome::Skipped {
                rule_id: rule.id.clone(),
            };
        };

        let start = Instant::now();
        job.with_last_run(|run| run.started_at = Some(Utc::now()));

        let (outcome, state) = self.run_attempts(cancel, &rule, job.last_state()).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        job.with_last_run(|run| {
            run.finished_at = Some(Utc::now());
            run.attempts = outcome.attempts();
            run.outcome = Some(outcome.label().to_string());
            run.error = match &outcome {
                RetryOutcome::Failed { error, .. } => Some(error.to_string()),
                RetryOutcome::Cancelled { .. } => Some(AlertError::Cancelled.to_string()),
                _ => None,
            };
            if let Some(state) = state {
                run.state = state;
            }
        });

        match &outcome {
            RetryOutcome::Succeeded { attempts } => info!(
                rule_id = %rule.id,
                attempts,
                duration_ms,
                "alert job completed"
            ),
            RetryOutcome::Failed { attempts, error } => warn!(
                rule_id = %rule.id,
                attempts,
                duration_ms,
                error = %error,
                "alert job failed after exhausting attempts"
            ),
            RetryOutcome::Cancelled { attempts } => info!(
                rule_id = %rule.id,
                attempts,
                duration_ms,
                "alert job cancelled"
            ),
            RetryOutcome::Skipped { .. } => {}
        }

        outcome
    }

    async fn run_attempts(
        &self,
        cancel: &CancellationToken,
        rule: &Arc<Rule>,
        prev_state: AlertState,
    ) -> (RetryOutcome, Option<AlertState>) {
        let max_attempts = self.config.max_attempts.max(1);
        let mut last_error = AlertError::Evaluation("no attempt was made".to_string());

        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                return (RetryOutcome::Cancelled { attempts: attempt - 1 }, None);
            }

            match self.attempt(cancel, rule, attempt, prev_state).await {
                AttemptResult::Succeeded(state) => {
                    return (RetryOutcome::Succeeded { attempts: attempt }, Some(state));
                }
                AttemptResult::Cancelled => {
                    return (RetryOutcome::Cancelled { attempts: attempt }, None);
                }
                AttemptResult::Failed(error) => {
                    if cancel.is_cancelled() || error == AlertError::Cancelled {
                        return (RetryOutcome::Cancelled { attempts: attempt }, None);
                    }
                    if !error.is_retryable() {
                        return (
                            RetryOutcome::Failed {
                                attempts: attempt,
                                error,
                            },
                            None,
                        );
                    }
                    warn!(
                        rule_id = %rule.id,
                        attempt,
                        max_attempts,
                        error = %error,
                        "alert attempt failed"
                    );
                    last_error = error;
                }
            }
        }

        (
            RetryOutcome::Failed {
                attempts: max_attempts,
                error: last_error,
            },
            None,
        )
    }

    async fn attempt(
        &self,
        cancel: &CancellationToken,
        rule: &Arc<Rule>,
        attempt: u32,
        prev_state: AlertState,
    ) -> AttemptResult {
        let mut ctx = EvalContext::new(
            Arc::clone(rule),
            attempt,
            cancel,
            self.config.evaluation_timeout,
            prev_state,
        );

        debug!(rule_id = %rule.id, attempt, "evaluating rule");
        let evaluated = self
            .step(
                cancel,
                &ctx,
                Phase::Evaluation,
                self.config.evaluation_timeout,
                self.evaluator.eval(&ctx),
            )
            .await;

        let output = match evaluated {
            StepResult::Done(Ok(output)) => output,
            StepResult::Done(Err(error)) => {
                ctx.set_error(error.clone());
                return AttemptResult::Failed(error);
            }
            // Result handling never starts once the run is cancelled.
            StepResult::FinishedAfterCancel(_) | StepResult::Abandoned => {
                return AttemptResult::Cancelled;
            }
        };

        ctx.set_output(output);
        ctx.rearm(self.config.notification_timeout);

        debug!(
            rule_id = %rule.id,
            attempt,
            state = ctx.new_state().as_str(),
            "handling evaluation result"
        );
        let handled = self
            .step(
                cancel,
                &ctx,
                Phase::ResultHandling,
                self.config.notification_timeout,
                self.result_handler.handle(&ctx),
            )
            .await;

        match handled {
            StepResult::Done(Ok(())) | StepResult::FinishedAfterCancel(Ok(())) => {
                AttemptResult::Succeeded(ctx.new_state())
            }
            StepResult::Done(Err(error)) => {
                ctx.set_error(error.clone());
                AttemptResult::Failed(error)
            }
            StepResult::FinishedAfterCancel(Err(_)) | StepResult::Abandoned => {
                AttemptResult::Cancelled
            }
        }
    }

    /// Drive one collaborator call under the context deadline and the parent token.
    async fn step<T, F>(
        &self,
        cancel: &CancellationToken,
        ctx: &EvalContext,
        phase: Phase,
        timeout: Duration,
        fut: F,
    ) -> StepResult<T>
    where
        F: Future<Output = Result<T, AlertError>>,
    {
        let guarded = AssertUnwindSafe(fut).catch_unwind();
        tokio::pin!(guarded);

        tokio::select! {
            biased;
            res = &mut guarded => StepResult::Done(flatten_panic(res, phase)),
            _ = tokio::time::sleep_until(ctx.deadline()) => {
                ctx.cancel();
                StepResult::Done(Err(AlertError::in_phase(
                    phase,
                    format!("{phase} timed out after {timeout:?}"),
                )))
            }
            _ = cancel.cancelled() => {
                // The attempt token is a child of `cancel`, so the collaborator
                // has already been told to stop.
                match tokio::time::timeout(self.config.shutdown_grace, &mut guarded).await {
                    Ok(res) => StepResult::FinishedAfterCancel(flatten_panic(res, phase)),
                    Err(_) => {
                        warn!(
                            rule_id = %ctx.rule().id,
                            attempt = ctx.attempt(),
                            %phase,
                            grace = ?self.config.shutdown_grace,
                            "step did not stop within grace period, abandoning"
                        );
                        StepResult::Abandoned
                    }
                }
            }
        }
    }
}

fn flatten_panic<T>(
    res: Result<Result<T, AlertError>, Box<dyn Any + Send>>,
    phase: Phase,
) -> Result<T, AlertError> {
    match res {
        Ok(inner) => inner,
        Err(payload) => {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(AlertError::in_phase(phase, format!("{phase} panicked: {msg}")))
        }
    }
}
