//! Per-job error taxonomy.

use std::fmt;

/// The step of an attempt an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Evaluation,
    ResultHandling,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Evaluation => f.write_str("evaluation"),
            Phase::ResultHandling => f.write_str("result handling"),
        }
    }
}

/// Errors that end an attempt or a job run.
///
/// Deadline expiry and transport failures both map onto the phase variant,
/// so the engine retries them the same way.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AlertError {
    /// The datasource call failed, timed out, or answered with a bad status.
    #[error("evaluation failed: {0}")]
    Evaluation(String),

    /// Recording or delivering the outcome failed or timed out.
    #[error("result handling failed: {0}")]
    ResultHandling(String),

    /// The parent cancellation token fired before the run completed.
    #[error("job run cancelled")]
    Cancelled,

    /// Another run of the same job is in progress.
    #[error("job for rule '{0}' is already running")]
    AlreadyRunning(String),
}

impl AlertError {
    /// Build the error for `phase` with the given message.
    pub fn in_phase(phase: Phase, message: impl Into<String>) -> Self {
        match phase {
            Phase::Evaluation => AlertError::Evaluation(message.into()),
            Phase::ResultHandling => AlertError::ResultHandling(message.into()),
        }
    }

    /// Whether another attempt may be made after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AlertError::Evaluation(_) | AlertError::ResultHandling(_))
    }

    /// The attempt phase this error belongs to, if any.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            AlertError::Evaluation(_) => Some(Phase::Evaluation),
            AlertError::ResultHandling(_) => Some(Phase::ResultHandling),
            _ => None,
        }
    }
}
