//! Alert job evaluation and delivery engine.
//!
//! This crate provides:
//! - [`Evaluator`] and [`ResultHandler`] traits for pluggable datasources and sinks
//! - [`RetryEngine`] running one job through evaluation and result handling
//!   under independent deadlines and a shared attempt budget
//! - [`JobScheduler`] deciding which jobs are due on each tick
//! - [`JobDispatcher`] fanning queued jobs out onto tokio tasks
//! - HTTP reference adapters for evaluation and webhook delivery

pub mod context;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod http;
pub mod job;
pub mod metrics;
pub mod rule;
pub mod scheduler;
pub mod traits;

pub use context::{EvalContext, EvalMatch, EvalOutput, Series};
pub use dispatcher::{ExecQueue, JobDispatcher};
pub use engine::{RetryEngine, RetryOutcome};
pub use error::{AlertError, Phase};
pub use job::{Job, JobRun, RunningGuard};
pub use metrics::{EngineMetrics, SharedMetrics};
pub use rule::{AlertState, Datasource, Rule};
pub use scheduler::{JobScheduler, Ticker};
pub use traits::{Evaluator, ResultHandler};
