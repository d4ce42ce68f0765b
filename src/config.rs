use std::time::Duration;
use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HttpCfg {
    /// TCP connect timeout in milliseconds (default 5000ms)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Total request timeout in milliseconds (default 60000ms)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Optional per-host idle connection pool cap (None = reqwest default)
    #[serde(default)]
    pub pool_max_idle_per_host: Option<usize>,
}

impl Default for HttpCfg {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            pool_max_idle_per_host: None,
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_request_timeout_ms() -> u64 {
    60_000
}

/// Attempt budget and backoff schedule for one logical request.
///
/// Backoff is linear: after the failure of attempt `n` (zero-based), the
/// executor waits `backoff_base_ms × (n + 1)` before the next attempt.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (default 2, so 3 attempts total).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base backoff step in milliseconds (default 1000ms).
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Optional per-attempt deadline in milliseconds. Expiry counts as a
    /// retryable transport failure.
    #[serde(default)]
    pub attempt_timeout_ms: Option<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            attempt_timeout_ms: None,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after `failed_attempt` (zero-based) fails retryably.
    pub fn backoff_after(&self, failed_attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_base_ms.saturating_mul(failed_attempt as u64 + 1))
    }

    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.attempt_timeout_ms.map(Duration::from_millis)
    }
}

fn default_max_retries() -> u32 {
    2
}
fn default_backoff_base_ms() -> u64 {
    1_000
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct Config {
    #[serde(default)]
    pub http: HttpCfg,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Config {
    /// Load a Config from a TOML file path.
    pub fn from_path<P: AsRef<Path>>(path: P) -> crate::error::CoreResult<Self> {
        let bytes = fs::read(path.as_ref()).map_err(crate::error::AiStreamError::from)?;
        let s =
            std::str::from_utf8(&bytes).map_err(|e| crate::error::AiStreamError::Other(e.into()))?;
        let cfg =
            toml::from_str::<Self>(s).map_err(|e| crate::error::AiStreamError::Other(e.into()))?;
        Ok(cfg)
    }
}
