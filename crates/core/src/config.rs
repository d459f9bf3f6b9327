use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_duration(
    profile: &str,
    key: &str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match profiled_env_opt(profile, key) {
        Some(raw) => parse_duration(&raw).ok_or_else(|| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw,
            reason: "expected a duration such as \"30s\", \"2m\" or \"1h30m\"".to_string(),
        }),
        None => Ok(default),
    }
}

fn profiled_env_u32(profile: &str, key: &str, default: u32) -> Result<u32, ConfigError> {
    match profiled_env_opt(profile, key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw,
            reason: "expected a non-negative integer".to_string(),
        }),
        None => Ok(default),
    }
}

/// Parse a human-readable duration string into a [`Duration`].
///
/// Supports components: `Xd` (days), `Xh` (hours), `Xm` (minutes), `Xs` (seconds).
/// Components can be combined: "2h30m", "1d12h", "90s". A bare number is
/// read as seconds. Returns `None` if the string is empty or unparseable.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let mut total_secs: u64 = 0;
    let mut num_buf = String::new();
    let mut found_unit = false;

    for ch in s.chars() {
        if ch.is_ascii_digit() {
            num_buf.push(ch);
        } else {
            let n: u64 = num_buf.parse().ok()?;
            num_buf.clear();
            let unit_secs = match ch {
                'd' => 86_400,
                'h' => 3_600,
                'm' => 60,
                's' => 1,
                _ => return None,
            };
            total_secs = total_secs.checked_add(n.checked_mul(unit_secs)?)?;
            found_unit = true;
        }
    }

    if !num_buf.is_empty() {
        // "30m15" is ambiguous.
        if found_unit {
            return None;
        }
        total_secs = num_buf.parse().ok()?;
    }

    Some(Duration::from_secs(total_secs))
}

// ── Alerting ──────────────────────────────────────────────────

/// Upper bound for every configured duration.
pub const MAX_DURATION: Duration = Duration::from_secs(7 * 86_400);

/// Settings for the alert evaluation engine.
///
/// Passed explicitly into the engine and dispatcher; nothing here is
/// process-global, so tests can run engines with different settings side by side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertingConfig {
    /// Active profile name (empty = default).
    #[serde(default)]
    pub profile: String,
    /// Upper bound for one evaluation call.
    pub evaluation_timeout: Duration,
    /// Upper bound for one result-handling call.
    pub notification_timeout: Duration,
    /// Attempts per job run, shared by evaluation and result handling.
    pub max_attempts: u32,
    /// How long an in-flight attempt may keep running after cancellation.
    pub shutdown_grace: Duration,
    /// Connect/keep-alive timeout of the HTTP adapters.
    pub transport_timeout: Duration,
    /// Scheduler tick period.
    pub tick_interval: Duration,
    /// Capacity of the job exec queue.
    pub queue_capacity: usize,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            profile: String::new(),
            evaluation_timeout: Duration::from_secs(30),
            notification_timeout: Duration::from_secs(30),
            max_attempts: 3,
            shutdown_grace: Duration::from_secs(5),
            transport_timeout: Duration::from_secs(10),
            tick_interval: Duration::from_secs(1),
            queue_capacity: 1000,
        }
    }
}

impl AlertingConfig {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `VIGIL_PROFILE` env var. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let profile = env_or("VIGIL_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Result<Self, ConfigError> {
        let p = profile.to_uppercase();
        let p = p.as_str();
        let defaults = Self::default();

        let config = Self {
            profile: p.to_string(),
            evaluation_timeout: profiled_env_duration(
                p,
                "ALERTING_EVALUATION_TIMEOUT",
                defaults.evaluation_timeout,
            )?,
            notification_timeout: profiled_env_duration(
                p,
                "ALERTING_NOTIFICATION_TIMEOUT",
                defaults.notification_timeout,
            )?,
            max_attempts: profiled_env_u32(p, "ALERTING_MAX_ATTEMPTS", defaults.max_attempts)?,
            shutdown_grace: profiled_env_duration(
                p,
                "ALERTING_SHUTDOWN_GRACE",
                defaults.shutdown_grace,
            )?,
            transport_timeout: profiled_env_duration(
                p,
                "ALERTING_TRANSPORT_TIMEOUT",
                defaults.transport_timeout,
            )?,
            tick_interval: profiled_env_duration(
                p,
                "ALERTING_TICK_INTERVAL",
                defaults.tick_interval,
            )?,
            queue_capacity: profiled_env_u32(
                p,
                "ALERTING_QUEUE_CAPACITY",
                defaults.queue_capacity as u32,
            )? as usize,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts < 1 {
            return Err(ConfigError::Invalid(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        let non_zero = [
            ("evaluation_timeout", self.evaluation_timeout),
            ("notification_timeout", self.notification_timeout),
            ("transport_timeout", self.transport_timeout),
            ("tick_interval", self.tick_interval),
        ];
        for (name, value) in non_zero {
            if value.is_zero() {
                return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
            }
        }
        let bounded = [
            ("evaluation_timeout", self.evaluation_timeout),
            ("notification_timeout", self.notification_timeout),
            ("shutdown_grace", self.shutdown_grace),
            ("transport_timeout", self.transport_timeout),
            ("tick_interval", self.tick_interval),
        ];
        for (name, value) in bounded {
            if value > MAX_DURATION {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be at most {MAX_DURATION:?}, got {value:?}"
                )));
            }
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Longest a single job run can take before cancellation comes into play.
    pub fn worst_case_run(&self) -> Duration {
        self.evaluation_timeout
            .saturating_add(self.notification_timeout)
            .saturating_mul(self.max_attempts)
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Alerting config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  timeouts:    evaluation={:?}, notification={:?}, transport={:?}",
            self.evaluation_timeout,
            self.notification_timeout,
            self.transport_timeout
        );
        tracing::info!(
            "  retries:     max_attempts={}, shutdown_grace={:?}, worst_case_run={:?}",
            self.max_attempts,
            self.shutdown_grace,
            self.worst_case_run()
        );
        tracing::info!(
            "  scheduling:  tick={:?}, queue_capacity={}",
            self.tick_interval,
            self.queue_capacity
        );
    }

    /// Return a JSON view of the effective settings.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "evaluation_timeout_ms": self.evaluation_timeout.as_millis() as u64,
            "notification_timeout_ms": self.notification_timeout.as_millis() as u64,
            "max_attempts": self.max_attempts,
            "shutdown_grace_ms": self.shutdown_grace.as_millis() as u64,
            "transport_timeout_ms": self.transport_timeout.as_millis() as u64,
            "tick_interval_ms": self.tick_interval.as_millis() as u64,
            "queue_capacity": self.queue_capacity,
        })
    }
}
