//! [`JobScheduler`]: tracks one job per rule and decides which are due.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::job::Job;
use crate::metrics::SharedMetrics;
use crate::rule::Rule;

use super::offset::{is_frequency_due, is_offset_due, spread_offset};

/// Manages the jobs for all loaded rules.
///
/// Call [`sync_rules`](JobScheduler::sync_rules) whenever the rule set changes.
/// Call [`tick`](JobScheduler::tick) from the ticker loop to find which jobs
/// should be enqueued.
pub struct JobScheduler {
    jobs: HashMap<String, Arc<Job>>,
    metrics: Option<SharedMetrics>,
}

impl JobScheduler {
    /// Create a new empty scheduler.
    pub fn new() -> Self {
        Self {
            jobs: HashMap::new(),
            metrics: None,
        }
    }

    /// Create a scheduler that drops per-rule metrics when a rule is removed.
    pub fn with_metrics(metrics: SharedMetrics) -> Self {
        Self {
            jobs: HashMap::new(),
            metrics: Some(metrics),
        }
    }

    /// Synchronize jobs with the current set of rules.
    ///
    /// - Adds jobs for new rules.
    /// - Swaps the rule of existing jobs in place (running flag and
    ///   bookkeeping are preserved, so a run in flight is not duplicated).
    /// - Removes jobs (and their metrics) for rules no longer present.
    /// - Recomputes offsets over the rules ordered by id.
    pub fn sync_rules(&mut self, rules: &[Rule]) {
        let current_ids: HashSet<&str> = rules.iter().map(|r| r.id.as_str()).collect();
        let mut removed = Vec::new();
        self.jobs.retain(|id, _| {
            let keep = current_ids.contains(id.as_str());
            if !keep {
                removed.push(id.clone());
            }
            keep
        });
        if let Some(metrics) = &self.metrics {
            if let Ok(mut m) = metrics.write() {
                for id in &removed {
                    m.forget_rule(id);
                }
            }
        }
        for id in &removed {
            debug!(rule_id = %id, "unscheduled rule");
        }

        let mut ordered: Vec<&Rule> = rules.iter().collect();
        ordered.sort_by(|a, b| a.id.cmp(&b.id));
        let count = ordered.len();

        for (index, rule) in ordered.into_iter().enumerate() {
            let rule = Arc::new(rule.clone());
            let offset = spread_offset(rule.frequency, index, count);

            let job = match self.jobs.get(&rule.id) {
                Some(existing) => {
                    existing.set_rule(Arc::clone(&rule));
                    Arc::clone(existing)
                }
                None => {
                    let job = Arc::new(Job::new(Arc::clone(&rule)));
                    self.jobs.insert(rule.id.clone(), Arc::clone(&job));
                    job
                }
            };
            job.set_offset(offset);

            debug!(rule_id = %rule.id, frequency = rule.frequency, offset, "scheduled rule");
        }
    }

    /// Return the jobs due at `now`, updating offset-wait state as a side effect.
    ///
    /// Running jobs and paused rules are never returned.
    pub fn tick(&self, now: DateTime<Utc>) -> Vec<Arc<Job>> {
        let now_secs = now.timestamp().max(0) as u64;
        let mut due = Vec::new();

        for job in self.jobs.values() {
            if job.is_running() {
                continue;
            }
            let rule = job.rule();
            if rule.paused {
                continue;
            }

            if job.offset_wait() && is_offset_due(now_secs, job.offset()) {
                job.set_offset_wait(false);
                due.push(Arc::clone(job));
                continue;
            }

            if is_frequency_due(now_secs, rule.frequency) {
                if job.offset() > 0 {
                    job.set_offset_wait(true);
                } else {
                    due.push(Arc::clone(job));
                }
            }
        }

        due
    }

    /// Get a job by rule ID.
    pub fn get(&self, rule_id: &str) -> Option<Arc<Job>> {
        self.jobs.get(rule_id).cloned()
    }

    /// Number of tracked jobs.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Whether the scheduler has no jobs.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

impl Default for JobScheduler {
    fn default() -> Self {
        Self::new()
    }
}
