//! Per-client quota settings.

use std::time::Duration;

use duration_str::deserialize_duration;
use serde::Deserialize;

/// Per-client quota settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QuotaConfig {
    /// Number of calls every client gets without an entitlement.
    pub free_limit: u64,
    /// Upper bound for a single storage call.
    #[serde(deserialize_with = "deserialize_duration")]
    pub operation_timeout: Duration,
    /// Retry policy for recording usage.
    pub retry: RetryConfig,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            free_limit: 10,
            operation_timeout: Duration::from_secs(2),
            retry: RetryConfig::default(),
        }
    }
}

/// Bounded retry with linearly increasing backoff.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    /// Base delay; the n-th retry waits `backoff * n`.
    #[serde(deserialize_with = "deserialize_duration")]
    pub backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(100),
        }
    }
}
