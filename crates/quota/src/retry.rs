//! Bounded retry of storage calls.

use std::{future::Future, time::Duration};

use config::RetryConfig;

use crate::StorageError;

/// Bounded retry with linear backoff: the n-th retry waits `backoff * n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Duration,
}

/// Why [`RetryPolicy::run`] gave up.
#[derive(Debug)]
pub enum RetryError {
    /// Every attempt failed with a transient error. Holds the last one.
    Exhausted { attempts: u32, last: StorageError },
    /// The call failed with an error that repeating would not fix.
    Fatal { attempt: u32, error: StorageError },
}

impl RetryError {
    pub fn into_storage_error(self) -> StorageError {
        match self {
            Self::Exhausted { last, .. } => last,
            Self::Fatal { error, .. } => error,
        }
    }
}

impl RetryPolicy {
    /// A policy making at most `max_attempts` calls. Zero is treated as one.
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, config.backoff)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the attempt following the failed `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt)
    }

    /// Runs `operation` until it succeeds, fails permanently, or the attempts
    /// run out.
    pub async fn run<T, F, Fut>(&self, operation_name: &str, mut operation: F) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        let mut attempt = 1;

        loop {
            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if !error.is_transient() {
                log::error!("{operation_name} failed permanently on attempt {attempt}: {error}");
                return Err(RetryError::Fatal { attempt, error });
            }

            if attempt >= self.max_attempts {
                log::error!("{operation_name} failed after {attempt} attempts: {error}");

                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: error,
                });
            }

            let delay = self.delay(attempt);
            log::warn!(
                "{operation_name} attempt {attempt}/{} failed: {error}, retrying in {delay:?}",
                self.max_attempts
            );

            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
