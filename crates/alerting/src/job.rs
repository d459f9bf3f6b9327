//! Schedulable unit of work wrapping a [`Rule`] plus run state.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::rule::{AlertState, Rule};

/// Bookkeeping from the most recent run of a job.
#[derive(Debug, Clone, Default, Serialize)]
pub struct JobRun {
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Attempts made by the last run.
    pub attempts: u32,
    /// Outcome label of the last run (`succeeded`, `failed`, `cancelled`).
    pub outcome: Option<String>,
    /// Last error message, cleared on success.
    pub error: Option<String>,
    /// State recorded after the last successful evaluation.
    pub state: AlertState,
}

/// A rule plus the state the scheduler and engine keep for it.
///
/// Shared as `Arc<Job>` between the scheduler, the exec queue and the task
/// running it. Only the holder of a [`RunningGuard`] may run the job.
#[derive(Debug)]
pub struct Job {
    rule: RwLock<Arc<Rule>>,
    running: AtomicBool,
    offset: AtomicU64,
    offset_wait: AtomicBool,
    last_run: Mutex<JobRun>,
}

impl Job {
    pub fn new(rule: Arc<Rule>) -> Self {
        Self {
            rule: RwLock::new(rule),
            running: AtomicBool::new(false),
            offset: AtomicU64::new(0),
            offset_wait: AtomicBool::new(false),
            last_run: Mutex::new(JobRun::default()),
        }
    }

    /// The rule currently attached to this job.
    pub fn rule(&self) -> Arc<Rule> {
        match self.rule.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Swap in an updated rule definition, keeping run state.
    pub fn set_rule(&self, rule: Arc<Rule>) {
        match self.rule.write() {
            Ok(mut guard) => *guard = rule,
            Err(poisoned) => *poisoned.into_inner() = rule,
        }
    }

    pub fn rule_id(&self) -> String {
        self.rule().id.clone()
    }

    /// Whether a run currently owns this job.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Claim the job for one run.
    ///
    /// Returns `None` if another run already holds it. The flag is cleared
    /// when the returned guard is dropped.
    pub fn try_start(&self) -> Option<RunningGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunningGuard { job: self })
    }

    /// Offset in seconds used to spread evaluations within the frequency window.
    pub fn offset(&self) -> u64 {
        self.offset.load(Ordering::Relaxed)
    }

    pub fn set_offset(&self, offset: u64) {
        self.offset.store(offset, Ordering::Relaxed);
    }

    pub fn offset_wait(&self) -> bool {
        self.offset_wait.load(Ordering::Relaxed)
    }

    pub fn set_offset_wait(&self, wait: bool) {
        self.offset_wait.store(wait, Ordering::Relaxed);
    }

    /// Snapshot of the last run bookkeeping.
    pub fn last_run(&self) -> JobRun {
        self.with_last_run(|run| run.clone())
    }

    /// State recorded after the last successful evaluation.
    pub fn last_state(&self) -> AlertState {
        self.with_last_run(|run| run.state)
    }

    pub(crate) fn with_last_run<T>(&self, f: impl FnOnce(&mut JobRun) -> T) -> T {
        match self.last_run.lock() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

/// Scoped ownership of a job's `running` flag.
#[derive(Debug)]
pub struct RunningGuard<'a> {
    job: &'a Job,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.job.running.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::new(Arc::new(Rule::new("r1", 60, "http://localhost")))
    }

    #[test]
    fn guard_sets_and_clears_running() {
        let job = job();
        assert!(!job.is_running());
        {
            let _guard = job.try_start().expect("first start should succeed");
            assert!(job.is_running());
        }
        assert!(!job.is_running());
    }

    #[test]
    fn second_start_is_rejected_while_running() {
        let job = job();
        let guard = job.try_start().unwrap();
        assert!(job.try_start().is_none());
        drop(guard);
        assert!(job.try_start().is_some());
    }

    #[test]
    fn set_rule_keeps_bookkeeping() {
        let job = job();
        job.with_last_run(|run| {
            run.attempts = 2;
            run.state = AlertState::Alerting;
        });
        job.set_rule(Arc::new(Rule::new("r1", 120, "http://other")));
        assert_eq!(job.rule().frequency, 120);
        assert_eq!(job.last_run().attempts, 2);
        assert_eq!(job.last_state(), AlertState::Alerting);
    }
}
