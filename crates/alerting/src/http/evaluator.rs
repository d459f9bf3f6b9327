//! Datasource evaluator speaking a minimal JSON protocol.
//!
//! The rule's datasource `query` is POSTed as JSON to the datasource URL. A
//! 2xx answer with an empty body means "evaluated, not firing"; otherwise the
//! body is read as an [`EvalOutput`].

use std::time::Duration;

use tracing::debug;

use crate::context::{EvalContext, EvalOutput};
use crate::error::AlertError;
use crate::traits::Evaluator;

use super::{transport_client, HttpError};

/// Evaluates rules by calling their datasource over HTTP.
#[derive(Debug, Clone)]
pub struct HttpEvaluator {
    client: reqwest::Client,
}

impl HttpEvaluator {
    /// Create an evaluator with its own transport-configured client.
    pub fn new(transport_timeout: Duration) -> Result<Self, HttpError> {
        Ok(Self::with_client(transport_client(transport_timeout)?))
    }

    /// Create an evaluator on a shared client (connection pooling).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl Evaluator for HttpEvaluator {
    async fn eval(&self, ctx: &EvalContext) -> Result<EvalOutput, AlertError> {
        let datasource = &ctx.rule().datasource;
        let request = self
            .client
            .post(&datasource.url)
            .json(&datasource.query)
            .send();

        let response = tokio::select! {
            res = request => res.map_err(|e| AlertError::Evaluation(format!("request failed: {e}")))?,
            _ = ctx.cancelled() => return Err(AlertError::Evaluation("request cancelled".to_string())),
        };

        let status = response.status();
        if !status.is_success() {
            return Err(AlertError::Evaluation(format!("wrong response: {status}")));
        }

        let body = tokio::select! {
            res = response.bytes() => res.map_err(|e| AlertError::Evaluation(format!("reading response failed: {e}")))?,
            _ = ctx.cancelled() => return Err(AlertError::Evaluation("request cancelled".to_string())),
        };

        debug!(
            rule_id = %ctx.rule().id,
            url = %datasource.url,
            %status,
            bytes = body.len(),
            "datasource answered"
        );

        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(EvalOutput::default());
        }
        serde_json::from_slice(&body)
            .map_err(|e| AlertError::Evaluation(format!("invalid datasource response: {e}")))
    }
}
