//! Worker configuration.
//!
//! Defaults match the production tuning. `from_env` reads overrides from
//! `COURIER_*` variables; `from_lookup` does the same over any key lookup,
//! which keeps tests away from the process environment.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use courier_core::Endpoint;

pub const ENV_WORKER_NAME: &str = "COURIER_WORKER_NAME";
pub const ENV_IDLE_TIMEOUT_MS: &str = "COURIER_IDLE_TIMEOUT_MS";
pub const ENV_RETRY_DELAY_MS: &str = "COURIER_RETRY_DELAY_MS";
pub const ENV_SUBMIT_ATTEMPTS: &str = "COURIER_SUBMIT_ATTEMPTS";
pub const ENV_SUBMIT_BACKOFF_MS: &str = "COURIER_SUBMIT_BACKOFF_MS";
pub const ENV_ENDPOINTS: &str = "COURIER_ENDPOINTS";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key}: expected a non-negative integer, got {value:?}")]
    InvalidNumber { key: &'static str, value: String },

    #[error("{key}: invalid endpoint {value:?}: {reason}")]
    InvalidEndpoint {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Request worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Loop thread name, also used in logs.
    pub name: String,
    /// Quiet window after which the idle timer fires.
    pub idle_timeout: Duration,
    /// Delay before a job whose failure was voted for requeue runs again.
    pub retry_delay: Duration,
    /// How many times `submit` re-checks readiness before giving up.
    pub submit_attempts: u32,
    pub submit_backoff: Duration,
    /// Server endpoints, rotated round-robin when the connection respawns.
    pub endpoints: Vec<Endpoint>,
    /// Keep-alive count the worker starts with.
    pub initial_holds: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "request-worker".to_string(),
            idle_timeout: Duration::from_secs(60),
            retry_delay: Duration::from_secs(10),
            submit_attempts: 10,
            submit_backoff: Duration::from_millis(500),
            endpoints: Vec::new(),
            initial_holds: 0,
        }
    }
}

impl WorkerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_submit_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.submit_attempts = attempts;
        self.submit_backoff = backoff;
        self
    }

    pub fn with_endpoints(mut self, endpoints: impl IntoIterator<Item = Endpoint>) -> Self {
        self.endpoints = endpoints.into_iter().collect();
        self
    }

    pub fn with_initial_holds(mut self, holds: usize) -> Self {
        self.initial_holds = holds;
        self
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from defaults plus whatever `lookup` returns.
    /// Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(name) = get(ENV_WORKER_NAME) {
            config.name = name.trim().to_string();
        }
        if let Some(v) = get(ENV_IDLE_TIMEOUT_MS) {
            config.idle_timeout = parse_millis(ENV_IDLE_TIMEOUT_MS, &v)?;
        }
        if let Some(v) = get(ENV_RETRY_DELAY_MS) {
            config.retry_delay = parse_millis(ENV_RETRY_DELAY_MS, &v)?;
        }
        if let Some(v) = get(ENV_SUBMIT_ATTEMPTS) {
            config.submit_attempts = parse_number(ENV_SUBMIT_ATTEMPTS, &v)?;
        }
        if let Some(v) = get(ENV_SUBMIT_BACKOFF_MS) {
            config.submit_backoff = parse_millis(ENV_SUBMIT_BACKOFF_MS, &v)?;
        }
        if let Some(v) = get(ENV_ENDPOINTS) {
            config.endpoints = parse_endpoints(ENV_ENDPOINTS, &v)?;
        }

        Ok(config)
    }
}

fn parse_number<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidNumber {
        key,
        value: value.to_string(),
    })
}

fn parse_millis(key: &'static str, value: &str) -> Result<Duration, ConfigError> {
    parse_number::<u64>(key, value).map(Duration::from_millis)
}

fn parse_endpoints(key: &'static str, value: &str) -> Result<Vec<Endpoint>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<Endpoint>()
                .map_err(|e| ConfigError::InvalidEndpoint {
                    key,
                    value: s.to_string(),
                    reason: e.to_string(),
                })
        })
        .collect()
}
