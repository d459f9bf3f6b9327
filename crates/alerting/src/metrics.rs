use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::engine::RetryOutcome;
use crate::error::Phase;

/// Shared handle to the engine metrics.
pub type SharedMetrics = Arc<RwLock<EngineMetrics>>;

/// Alert engine operational metrics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineMetrics {
    /// Job runs by outcome label (`succeeded`, `failed`, `cancelled`, `skipped`).
    pub runs: HashMap<String, u64>,
    /// Attempts started across all runs.
    pub attempts_total: u64,
    /// Runs that ended on an evaluation error.
    pub evaluation_failures: u64,
    /// Runs that ended on a result-handling error.
    pub handling_failures: u64,
    /// Jobs dropped because the exec queue was full.
    pub queue_rejections: u64,
    /// Average run duration by rule id.
    pub avg_run_duration: HashMap<String, Duration>,
    /// Last finished run by rule id.
    pub last_run: HashMap<String, DateTime<Utc>>,
    /// Run count by rule id, used for the rolling average.
    #[serde(skip)]
    run_counts: HashMap<String, u64>,
}

impl EngineMetrics {
    pub fn shared() -> SharedMetrics {
        Arc::new(RwLock::new(Self::default()))
    }

    /// Record a finished job run.
    pub fn record_run(&mut self, rule_id: &str, outcome: &RetryOutcome, duration: Duration) {
        *self.runs.entry(outcome.label().to_string()).or_default() += 1;
        self.attempts_total += u64::from(outcome.attempts());

        if let RetryOutcome::Failed { error, .. } = outcome {
            match error.phase() {
                Some(Phase::Evaluation) => self.evaluation_failures += 1,
                Some(Phase::ResultHandling) => self.handling_failures += 1,
                None => {}
            }
        }

        if matches!(outcome, RetryOutcome::Skipped { .. }) {
            return;
        }

        self.last_run.insert(rule_id.to_string(), Utc::now());

        let count = {
            let c = self.run_counts.entry(rule_id.to_string()).or_default();
            *c += 1;
            *c
        };
        let prev_avg = self
            .avg_run_duration
            .get(rule_id)
            .copied()
            .unwrap_or_default();

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        let new_avg = if count == 1 {
            duration
        } else {
            let prev_nanos = prev_avg.as_nanos() as f64;
            let cur_nanos = duration.as_nanos() as f64;
            let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / count as f64;
            Duration::from_nanos(avg_nanos as u64)
        };

        self.avg_run_duration.insert(rule_id.to_string(), new_avg);
    }

    /// Drop per-rule entries for a rule that is no longer scheduled.
    pub fn forget_rule(&mut self, rule_id: &str) {
        self.avg_run_duration.remove(rule_id);
        self.last_run.remove(rule_id);
        self.run_counts.remove(rule_id);
    }

    pub fn record_queue_rejection(&mut self) {
        self.queue_rejections += 1;
    }

    /// Runs recorded with the given outcome label.
    pub fn runs_with(&self, label: &str) -> u64 {
        self.runs.get(label).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AlertError;

    #[test]
    fn record_single_run() {
        let mut m = EngineMetrics::default();
        m.record_run(
            "r1",
            &RetryOutcome::Succeeded { attempts: 2 },
            Duration::from_millis(100),
        );

        assert_eq!(m.runs_with("succeeded"), 1);
        assert_eq!(m.attempts_total, 2);
        assert!(m.last_run.contains_key("r1"));
        assert_eq!(m.avg_run_duration["r1"], Duration::from_millis(100));
    }

    #[test]
    fn record_multiple_runs_averages() {
        let mut m = EngineMetrics::default();
        m.record_run("r1", &RetryOutcome::Succeeded { attempts: 1 }, Duration::from_millis(100));
        m.record_run("r1", &RetryOutcome::Succeeded { attempts: 1 }, Duration::from_millis(200));

        let avg = m.avg_run_duration["r1"].as_millis();
        assert!((140..=160).contains(&avg), "expected ~150ms, got {}ms", avg);
    }

    #[test]
    fn failures_counted_by_phase() {
        let mut m = EngineMetrics::default();
        m.record_run(
            "r1",
            &RetryOutcome::Failed {
                attempts: 3,
                error: AlertError::Evaluation("down".into()),
            },
            Duration::from_millis(10),
        );
        m.record_run(
            "r2",
            &RetryOutcome::Failed {
                attempts: 3,
                error: AlertError::ResultHandling("down".into()),
            },
            Duration::from_millis(10),
        );

        assert_eq!(m.runs_with("failed"), 2);
        assert_eq!(m.evaluation_failures, 1);
        assert_eq!(m.handling_failures, 1);
        assert_eq!(m.attempts_total, 6);
    }

    #[test]
    fn forget_rule_clears_per_rule_entries() {
        let mut m = EngineMetrics::default();
        m.record_run("r1", &RetryOutcome::Succeeded { attempts: 1 }, Duration::from_millis(100));
        m.record_run("r2", &RetryOutcome::Succeeded { attempts: 1 }, Duration::from_millis(100));

        m.forget_rule("r1");

        assert!(!m.avg_run_duration.contains_key("r1"));
        assert!(!m.last_run.contains_key("r1"));
        assert!(m.avg_run_duration.contains_key("r2"));
        // Totals are process-wide and stay.
        assert_eq!(m.runs_with("succeeded"), 2);

        // A re-added rule starts a fresh average.
        m.record_run("r1", &RetryOutcome::Succeeded { attempts: 1 }, Duration::from_millis(300));
        assert_eq!(m.avg_run_duration["r1"], Duration::from_millis(300));
    }

    #[test]
    fn skipped_runs_do_not_touch_timing() {
        let mut m = EngineMetrics::default();
        let skipped = RetryOutcome::Skipped {
            rule_id: "r1".into(),
        };
        m.record_run("r1", &skipped, Duration::from_millis(1));
        assert_eq!(m.runs_with("skipped"), 1);
        assert!(m.last_run.is_empty());
        assert!(m.avg_run_duration.is_empty());
    }
}
