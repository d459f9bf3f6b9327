//! Per-attempt evaluation context.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::AlertError;
use crate::rule::{AlertState, Rule};

/// A named time series returned by the datasource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub name: String,
    /// `(value, timestamp_ms)` pairs.
    #[serde(default)]
    pub points: Vec<(f64, i64)>,
}

/// A series value that satisfied the rule condition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvalMatch {
    pub metric: String,
    pub value: Option<f64>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

/// What an evaluation produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvalOutput {
    #[serde(default)]
    pub firing: bool,
    #[serde(default)]
    pub no_data: bool,
    #[serde(default)]
    pub series: Vec<Series>,
    #[serde(default)]
    pub matches: Vec<EvalMatch>,
}

/// Carrier of everything one attempt needs: the rule, a cancellation token
/// tied to the run, the current deadline and the evaluation output.
///
/// Built fresh by the engine for every attempt and dropped when the attempt
/// ends, so retries never see state from a previous attempt.
#[derive(Debug)]
pub struct EvalContext {
    rule: Arc<Rule>,
    attempt: u32,
    cancel: CancellationToken,
    deadline: Instant,
    started_at: DateTime<Utc>,
    prev_state: AlertState,
    output: Option<EvalOutput>,
    error: Option<AlertError>,
}

impl EvalContext {
    /// Create a context whose token is a child of `parent` and whose deadline
    /// is `timeout` from now.
    pub fn new(
        rule: Arc<Rule>,
        attempt: u32,
        parent: &CancellationToken,
        timeout: Duration,
        prev_state: AlertState,
    ) -> Self {
        Self {
            rule,
            attempt,
            cancel: parent.child_token(),
            deadline: deadline_after(timeout),
            started_at: Utc::now(),
            prev_state,
            output: None,
            error: None,
        }
    }

    pub fn rule(&self) -> &Rule {
        &self.rule
    }

    /// 1-based attempt number within the job run.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Instant after which the current step is abandoned.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the current deadline.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Completes once the attempt is cancelled, either by the parent run or
    /// because the engine gave up on the current step.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn output(&self) -> Option<&EvalOutput> {
        self.output.as_ref()
    }

    pub fn error(&self) -> Option<&AlertError> {
        self.error.as_ref()
    }

    /// State before this run started.
    pub fn prev_state(&self) -> AlertState {
        self.prev_state
    }

    /// State implied by the evaluation output.
    pub fn new_state(&self) -> AlertState {
        match &self.output {
            None => AlertState::Unknown,
            Some(out) if out.no_data => AlertState::NoData,
            Some(out) if out.firing => AlertState::Alerting,
            Some(_) => AlertState::Ok,
        }
    }

    pub fn state_changed(&self) -> bool {
        self.new_state() != self.prev_state
    }

    pub fn firing(&self) -> bool {
        self.output.as_ref().is_some_and(|o| o.firing)
    }

    pub(crate) fn set_output(&mut self, output: EvalOutput) {
        self.output = Some(output);
        self.error = None;
    }

    pub(crate) fn set_error(&mut self, error: AlertError) {
        self.error = Some(error);
    }

    pub(crate) fn rearm(&mut self, timeout: Duration) {
        self.deadline = deadline_after(timeout);
    }

    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Roughly 30 years; stands in for deadlines too far out to represent.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE)
}

impl Drop for EvalContext {
    // Anything a collaborator left running for this attempt is told to stop.
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
