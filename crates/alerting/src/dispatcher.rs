//! Fans queued jobs out onto tokio tasks.
//!
//! The scheduler pushes due jobs into a bounded exec queue. The dispatcher
//! drains it and runs each job through the [`RetryEngine`] on its own task,
//! so a slow or failing job never holds up the others. Outcomes are recorded
//! in [`EngineMetrics`](crate::EngineMetrics) and logged.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::engine::{RetryEngine, RetryOutcome};
use crate::job::Job;
use crate::metrics::SharedMetrics;

/// Producer side of the exec queue.
#[derive(Clone)]
pub struct ExecQueue {
    tx: mpsc::Sender<Arc<Job>>,
    metrics: SharedMetrics,
}

impl ExecQueue {
    /// Queue a job without waiting.
    ///
    /// Returns `false` if the queue is full or the dispatcher is gone. A full
    /// queue drops the job; it will be picked up again on a later tick.
    pub fn enqueue(&self, job: Arc<Job>) -> bool {
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(TrySendError::Full(job)) => {
                warn!(rule_id = %job.rule_id(), "exec queue full, dropping job");
                if let Ok(mut m) = self.metrics.write() {
                    m.record_queue_rejection();
                }
                false
            }
            Err(TrySendError::Closed(job)) => {
                debug!(rule_id = %job.rule_id(), "exec queue closed, dropping job");
                false
            }
        }
    }
}

/// Consumer side of the exec queue.
pub struct JobDispatcher {
    engine: Arc<RetryEngine>,
    metrics: SharedMetrics,
    tx: mpsc::Sender<Arc<Job>>,
    rx: mpsc::Receiver<Arc<Job>>,
}

impl JobDispatcher {
    /// Create a dispatcher whose queue capacity comes from the engine config.
    pub fn new(engine: Arc<RetryEngine>, metrics: SharedMetrics) -> Self {
        let (tx, rx) = mpsc::channel(engine.config().queue_capacity.max(1));
        Self {
            engine,
            metrics,
            tx,
            rx,
        }
    }

    /// Handle for pushing jobs into this dispatcher.
    pub fn queue(&self) -> ExecQueue {
        ExecQueue {
            tx: self.tx.clone(),
            metrics: Arc::clone(&self.metrics),
        }
    }

    pub fn metrics(&self) -> SharedMetrics {
        Arc::clone(&self.metrics)
    }

    /// Run queued jobs until `cancel` fires or every [`ExecQueue`] is dropped.
    ///
    /// On exit, waits for the runs still in flight. Each run observes the same
    /// token and bounds its own wind-down by the engine's grace period.
    pub async fn run(self, cancel: CancellationToken) {
        let Self {
            engine,
            metrics,
            tx,
            mut rx,
        } = self;
        // Only handles given out through `queue()` keep the channel open.
        drop(tx);

        let mut in_flight: JoinSet<RetryOutcome> = JoinSet::new();
        info!("job dispatcher started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(in_flight = in_flight.len(), "job dispatcher stopping");
                    break;
                }
                next = rx.recv() => match next {
                    Some(job) => spawn_run(&mut in_flight, &engine, &metrics, &cancel, job),
                    None => {
                        debug!("exec queue closed");
                        break;
                    }
                },
                Some(res) = in_flight.join_next(), if !in_flight.is_empty() => log_join(res),
            }
        }

        while let Some(res) = in_flight.join_next().await {
            log_join(res);
        }
        info!("job dispatcher stopped");
    }

    /// Run a fixed set of jobs concurrently and return their outcomes keyed by rule id.
    pub async fn run_batch(
        &self,
        cancel: &CancellationToken,
        jobs: Vec<Arc<Job>>,
    ) -> Vec<(String, RetryOutcome)> {
        let mut in_flight: JoinSet<(String, RetryOutcome)> = JoinSet::new();
        for job in jobs {
            let engine = Arc::clone(&self.engine);
            let metrics = Arc::clone(&self.metrics);
            let cancel = cancel.clone();
            in_flight.spawn(async move {
                let outcome = execute(&engine, &metrics, &cancel, &job).await;
                (job.rule_id(), outcome)
            });
        }

        let mut outcomes = Vec::new();
        while let Some(res) = in_flight.join_next().await {
            match res {
                Ok(entry) => outcomes.push(entry),
                Err(e) => error!(error = %e, "alert job task aborted"),
            }
        }
        outcomes
    }
}

fn spawn_run(
    in_flight: &mut JoinSet<RetryOutcome>,
    engine: &Arc<RetryEngine>,
    metrics: &SharedMetrics,
    cancel: &CancellationToken,
    job: Arc<Job>,
) {
    let engine = Arc::clone(engine);
    let metrics = Arc::clone(metrics);
    let cancel = cancel.clone();
    in_flight.spawn(async move { execute(&engine, &metrics, &cancel, &job).await });
}

async fn execute(
    engine: &RetryEngine,
    metrics: &SharedMetrics,
    cancel: &CancellationToken,
    job: &Job,
) -> RetryOutcome {
    let start = Instant::now();
    let outcome = engine.run(cancel, job).await;
    if let Ok(mut m) = metrics.write() {
        m.record_run(&job.rule_id(), &outcome, start.elapsed());
    }
    outcome
}

fn log_join(res: Result<RetryOutcome, JoinError>) {
    match res {
        Ok(outcome) => debug!(outcome = outcome.label(), "alert job task finished"),
        Err(e) => error!(error = %e, "alert job task aborted"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use vigil_core::AlertingConfig;

    use crate::context::{EvalContext, EvalOutput};
    use crate::error::AlertError;
    use crate::metrics::EngineMetrics;
    use crate::rule::Rule;
    use crate::traits::{Evaluator, ResultHandler};

    struct SlowEvaluator {
        delay: Duration,
        calls: AtomicU32,
    }

    #[async_trait::async_trait]
    impl Evaluator for SlowEvaluator {
        async fn eval(&self, ctx: &EvalContext) -> Result<EvalOutput, AlertError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::select! {
                _ = tokio::time::sleep(self.delay) => Ok(EvalOutput::default()),
                _ = ctx.cancelled() => Err(AlertError::Evaluation("stopped".into())),
            }
        }
    }

    struct OkHandler;

    #[async_trait::async_trait]
    impl ResultHandler for OkHandler {
        async fn handle(&self, _ctx: &EvalContext) -> Result<(), AlertError> {
            Ok(())
        }
    }

    fn dispatcher(delay: Duration, queue_capacity: usize) -> (JobDispatcher, Arc<SlowEvaluator>) {
        let evaluator = Arc::new(SlowEvaluator {
            delay,
            calls: AtomicU32::new(0),
        });
        let config = AlertingConfig {
            evaluation_timeout: Duration::from_secs(10),
            shutdown_grace: Duration::from_millis(100),
            queue_capacity,
            ..AlertingConfig::default()
        };
        let engine = RetryEngine::new(config, evaluator.clone(), Arc::new(OkHandler)).unwrap();
        (
            JobDispatcher::new(Arc::new(engine), EngineMetrics::shared()),
            evaluator,
        )
    }

    fn job(id: &str) -> Arc<Job> {
        Arc::new(Job::new(Arc::new(Rule::new(id, 60, "http://localhost"))))
    }

    #[tokio::test]
    async fn batch_runs_jobs_concurrently() {
        let (dispatcher, evaluator) = dispatcher(Duration::from_millis(200), 16);
        let jobs: Vec<Arc<Job>> = (0..5).map(|i| job(&format!("r{i}"))).collect();

        let start = Instant::now();
        let outcomes = dispatcher.run_batch(&CancellationToken::new(), jobs).await;

        assert_eq!(outcomes.len(), 5);
        assert!(outcomes.iter().all(|(_, o)| o.is_success()));
        assert_eq!(evaluator.calls.load(Ordering::SeqCst), 5);
        assert!(
            start.elapsed() < Duration::from_millis(900),
            "jobs should overlap, took {:?}",
            start.elapsed()
        );
        let metrics = dispatcher.metrics();
        assert_eq!(metrics.read().unwrap().runs_with("succeeded"), 5);
    }

    #[tokio::test]
    async fn run_drains_queue_until_senders_drop() {
        let (dispatcher, evaluator) = dispatcher(Duration::from_millis(10), 16);
        let metrics = dispatcher.metrics();
        let queue = dispatcher.queue();

        let handle = tokio::spawn(dispatcher.run(CancellationToken::new()));
        for i in 0..3 {
            assert!(queue.enqueue(job(&format!("r{i}"))));
        }
        drop(queue);

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("dispatcher should stop once the queue closes")
            .unwrap();

        assert_eq!(evaluator.calls.load(Ordering::SeqCst), 3);
        assert_eq!(metrics.read().unwrap().runs_with("succeeded"), 3);
    }

    #[tokio::test]
    async fn cancel_stops_dispatcher_and_in_flight_runs() {
        let (dispatcher, _evaluator) = dispatcher(Duration::from_secs(30), 16);
        let metrics = dispatcher.metrics();
        let queue = dispatcher.queue();
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(dispatcher.run(cancel.clone()));
        let running = job("slow");
        assert!(queue.enqueue(running.clone()));

        while !running.is_running() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("dispatcher should stop promptly")
            .unwrap();

        assert!(!running.is_running());
        assert_eq!(metrics.read().unwrap().runs_with("cancelled"), 1);
    }

    #[tokio::test]
    async fn full_queue_rejects_job() {
        let (dispatcher, _evaluator) = dispatcher(Duration::from_millis(10), 1);
        let queue = dispatcher.queue();

        assert!(queue.enqueue(job("a")));
        assert!(!queue.enqueue(job("b")));
        assert_eq!(dispatcher.metrics().read().unwrap().queue_rejections, 1);
    }
}
