//! Alert rule definition as seen by the engine.
//!
//! The engine treats the query and condition as opaque; they are handed to
//! the [`Evaluator`](crate::Evaluator) untouched.

use serde::{Deserialize, Deserializer, Serialize};

/// Where and how a rule is evaluated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Datasource {
    /// Endpoint the evaluator talks to.
    pub url: String,
    /// Datasource-specific query payload.
    #[serde(default)]
    pub query: serde_json::Value,
}

/// A monitoring rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub name: String,
    /// Evaluation frequency in seconds. Accepts `60`, `"60s"`, `"1m"`, `"1h30m"`.
    #[serde(deserialize_with = "de_frequency")]
    pub frequency: u64,
    #[serde(default)]
    pub paused: bool,
    pub datasource: Datasource,
    #[serde(default)]
    pub condition: serde_json::Value,
    /// Notification channel identifiers, passed through to the result handler.
    #[serde(default)]
    pub notifications: Vec<String>,
}

impl Rule {
    /// Minimal rule for the given id, evaluated every `frequency` seconds.
    pub fn new(id: impl Into<String>, frequency: u64, url: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            frequency,
            paused: false,
            datasource: Datasource {
                url: url.into(),
                query: serde_json::Value::Null,
            },
            condition: serde_json::Value::Null,
            notifications: Vec::new(),
        }
    }
}

/// Alert state of a rule after an evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertState {
    #[default]
    Unknown,
    Ok,
    Alerting,
    NoData,
    Paused,
}

impl AlertState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertState::Unknown => "unknown",
            AlertState::Ok => "ok",
            AlertState::Alerting => "alerting",
            AlertState::NoData => "no_data",
            AlertState::Paused => "paused",
        }
    }
}

fn de_frequency<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Secs(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Secs(secs) => Ok(secs),
        Raw::Text(text) => vigil_core::parse_duration(&text)
            .map(|d| d.as_secs())
            .ok_or_else(|| serde::de::Error::custom(format!("invalid frequency: {text}"))),
    }
}
