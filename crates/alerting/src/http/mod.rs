//! HTTP reference adapters for the [`Evaluator`](crate::Evaluator) and
//! [`ResultHandler`](crate::ResultHandler) traits.
//!
//! Both adapters share a client whose connect and keep-alive timeouts come
//! from `transport_timeout`. The client has no overall request timeout: the
//! engine's evaluation and notification deadlines bound each call, and a
//! request dropped at the deadline releases its connection.

mod client;
mod evaluator;
mod webhook;

pub use client::transport_client;
pub use evaluator::HttpEvaluator;
pub use webhook::{AlertNotification, WebhookResultHandler};

/// Errors raised while constructing an HTTP adapter.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("HTTP client build failed: {0}")]
    Client(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}
