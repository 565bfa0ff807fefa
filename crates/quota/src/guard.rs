//! Quota checks before a call and usage accounting after it.

use std::{sync::Arc, time::Duration};

use config::Config;
use jiff::Timestamp;

use crate::{
    ClientId, QuotaError, StorageResult, UsageSnapshot,
    record::period_of,
    retry::{RetryError, RetryPolicy},
    storage::{Storage, UsageStorage, with_timeout},
};

/// Answers "may this client make another call" and records calls that were
/// made.
pub struct QuotaGuard<S = Storage> {
    storage: Arc<S>,
    free_limit: u64,
    site_max_limit: u64,
    operation_timeout: Duration,
    retry: RetryPolicy,
}

impl<S> Clone for QuotaGuard<S> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            free_limit: self.free_limit,
            site_max_limit: self.site_max_limit,
            operation_timeout: self.operation_timeout,
            retry: self.retry,
        }
    }
}

impl<S: UsageStorage> QuotaGuard<S> {
    pub fn new(storage: Arc<S>, config: &Config) -> Self {
        Self {
            storage,
            free_limit: config.quota.free_limit,
            site_max_limit: config.site.max_limit,
            operation_timeout: config.quota.operation_timeout,
            retry: RetryPolicy::from_config(&config.quota.retry),
        }
    }

    pub fn free_limit(&self) -> u64 {
        self.free_limit
    }

    /// The usage of `id`, or the free-tier default if storage cannot answer
    /// in time. Never fails.
    pub async fn check(&self, id: &ClientId) -> UsageSnapshot {
        match self.try_check(id).await {
            Ok(snapshot) => snapshot,
            Err(error) => {
                log::warn!(
                    "Failed to read usage of client {}, assuming the free tier: {error}",
                    id.hashed()
                );

                UsageSnapshot::free_tier(self.free_limit)
            }
        }
    }

    /// Like [`QuotaGuard::check`], but reports storage failures.
    pub async fn try_check(&self, id: &ClientId) -> StorageResult<UsageSnapshot> {
        let record = with_timeout(self.operation_timeout, self.storage.get_record(id)).await?;

        Ok(UsageSnapshot::compose(&record, Timestamp::now(), self.free_limit))
    }

    /// Counts one call of `id` and returns the updated usage.
    ///
    /// The call is counted even if the client is already over its limit.
    /// Transient storage failures are retried; when the attempts run out the
    /// error carries the usage as it was before the call.
    pub async fn record(&self, id: &ClientId) -> Result<UsageSnapshot, QuotaError> {
        let result = self
            .retry
            .run("record usage", || {
                with_timeout(self.operation_timeout, self.storage.increment(id))
            })
            .await;

        match result {
            Ok(record) => {
                self.spawn_site_increment();

                log::debug!("Recorded usage of client {}, count is now {}", id.hashed(), record.count);

                Ok(UsageSnapshot::compose(&record, Timestamp::now(), self.free_limit))
            }
            Err(RetryError::Exhausted { attempts, last }) => Err(QuotaError::StorageContention {
                attempts,
                snapshot: self.check(id).await,
                source: last,
            }),
            Err(RetryError::Fatal { error, .. }) => Err(QuotaError::Storage(error)),
        }
    }

    /// Bumps the site-wide aggregate in the background. Failures are logged
    /// and otherwise ignored.
    fn spawn_site_increment(&self) {
        let storage = self.storage.clone();
        let period = period_of(Timestamp::now());
        let default_max = self.site_max_limit;
        let timeout = self.operation_timeout;

        tokio::spawn(async move {
            if let Err(error) = with_timeout(timeout, storage.increment_site(&period, default_max)).await {
                log::warn!("Failed to update site usage for {period}: {error}");
            }
        });
    }
}
