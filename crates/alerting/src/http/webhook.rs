//! Webhook result handler.
//!
//! Delivers evaluation results as JSON payloads to a configured webhook URL
//! with optional custom headers.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;

use crate::context::{EvalContext, EvalMatch};
use crate::error::AlertError;
use crate::rule::AlertState;
use crate::traits::ResultHandler;

use super::{transport_client, HttpError};

/// Body POSTed to the webhook for every handled evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct AlertNotification {
    pub rule_id: String,
    pub rule_name: String,
    pub prev_state: AlertState,
    pub new_state: AlertState,
    pub state_changed: bool,
    pub firing: bool,
    pub matches: Vec<EvalMatch>,
    pub attempt: u32,
    pub evaluated_at: String,
    pub notifications: Vec<String>,
}

impl AlertNotification {
    pub fn from_context(ctx: &EvalContext) -> Self {
        let rule = ctx.rule();
        Self {
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            prev_state: ctx.prev_state(),
            new_state: ctx.new_state(),
            state_changed: ctx.state_changed(),
            firing: ctx.firing(),
            matches: ctx.output().map(|o| o.matches.clone()).unwrap_or_default(),
            attempt: ctx.attempt(),
            evaluated_at: ctx.started_at().to_rfc3339(),
            notifications: rule.notifications.clone(),
        }
    }
}

/// Delivers results as JSON over HTTP to a configured endpoint.
///
/// Environment variable references (`${VAR_NAME}`) in the URL and header
/// values are resolved at construction time.
#[derive(Debug)]
pub struct WebhookResultHandler {
    /// Target URL (env vars already resolved).
    url: String,
    /// HTTP method (defaults to POST).
    method: reqwest::Method,
    /// Custom headers to include on every request.
    headers: HashMap<String, String>,
    /// Shared HTTP client (connection pooling).
    client: reqwest::Client,
}

impl WebhookResultHandler {
    /// Create a new webhook handler.
    ///
    /// Missing env vars referenced in `url` or header values produce a
    /// [`HttpError::Config`] error. `method` defaults to `POST` when `None`.
    pub fn new(
        url: String,
        method: Option<reqwest::Method>,
        headers: HashMap<String, String>,
        client: reqwest::Client,
    ) -> Result<Self, HttpError> {
        let resolved_url = expand_env(&url)?;

        let mut resolved_headers = HashMap::with_capacity(headers.len());
        for (key, value) in &headers {
            resolved_headers.insert(key.clone(), expand_env(value)?);
        }

        Ok(Self {
            url: resolved_url,
            method: method.unwrap_or(reqwest::Method::POST),
            headers: resolved_headers,
            client,
        })
    }

    /// Construct a [`WebhookResultHandler`] from config-level primitives.
    ///
    /// `method` is parsed from a string (e.g. `"POST"`, `"PUT"`). Invalid
    /// method strings produce [`HttpError::Config`].
    pub fn from_config(
        url: String,
        method: Option<String>,
        headers: Option<HashMap<String, String>>,
        transport_timeout: Duration,
    ) -> Result<Self, HttpError> {
        let parsed_method = match method {
            Some(m) => {
                let upper = m.to_uppercase();
                upper
                    .parse::<reqwest::Method>()
                    .map(Some)
                    .map_err(|_| HttpError::Config(format!("invalid HTTP method: {m}")))?
            }
            None => None,
        };

        Self::new(
            url,
            parsed_method,
            headers.unwrap_or_default(),
            transport_client(transport_timeout)?,
        )
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait::async_trait]
impl ResultHandler for WebhookResultHandler {
    async fn handle(&self, ctx: &EvalContext) -> Result<(), AlertError> {
        let payload = AlertNotification::from_context(ctx);

        let mut request = self
            .client
            .request(self.method.clone(), &self.url)
            .json(&payload);
        for (key, value) in &self.headers {
            request = request.header(key.as_str(), value.as_str());
        }

        let response = tokio::select! {
            res = request.send() => res.map_err(|e| AlertError::ResultHandling(format!("request failed: {e}")))?,
            _ = ctx.cancelled() => return Err(AlertError::ResultHandling("request cancelled".to_string())),
        };
        let status = response.status();

        if !status.is_success() {
            let body_text = tokio::select! {
                res = response.text() => res.unwrap_or_else(|_| "<unreadable body>".to_string()),
                _ = ctx.cancelled() => "<cancelled>".to_string(),
            };
            tracing::warn!(
                url = %self.url,
                %status,
                body = %body_text,
                "webhook returned non-2xx status"
            );
            return Err(AlertError::ResultHandling(format!(
                "wrong response: {status}"
            )));
        }

        tracing::debug!(
            rule_id = %payload.rule_id,
            url = %self.url,
            method = %self.method,
            %status,
            "alert result delivered"
        );

        Ok(())
    }
}

/// Expand `${NAME}` references from the process environment.
fn expand_env(input: &str) -> Result<String, HttpError> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let reference = &rest[start + 2..];
        let end = reference.find('}').ok_or_else(|| {
            HttpError::Config(format!("unclosed env var reference in: {input}"))
        })?;
        let name = &reference[..end];
        let value = std::env::var(name)
            .map_err(|_| HttpError::Config(format!("env var not found: {name}")))?;
        out.push_str(&value);
        rest = &reference[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}
