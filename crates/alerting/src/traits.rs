//! Capability traits the engine is built against.

use crate::context::{EvalContext, EvalOutput};
use crate::error::AlertError;

/// Performs one evaluation of a rule against its datasource.
///
/// Implementations must not outlive `ctx.deadline()`: any I/O has to either
/// watch [`EvalContext::cancelled`] or be safe to drop mid-flight.
#[async_trait::async_trait]
pub trait Evaluator: Send + Sync {
    async fn eval(&self, ctx: &EvalContext) -> Result<EvalOutput, AlertError>;
}

/// Records or delivers the outcome of a successful evaluation.
///
/// Must be safe to call again with a fresh context for the same rule: a
/// failed run is retried from evaluation, so delivery is at-least-once.
#[async_trait::async_trait]
pub trait ResultHandler: Send + Sync {
    async fn handle(&self, ctx: &EvalContext) -> Result<(), AlertError>;
}
