//! Test doubles shared by the unit tests of this crate.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use config::Config;
use jiff::Timestamp;

use crate::{
    ClientId, ClientRecord, SiteAggregate, StorageError, StorageResult, StorageStats, StoreSnapshot,
    entitlement::Entitlement,
    storage::{MemoryStorage, UsageStorage},
};

pub(crate) fn test_config() -> Config {
    Config::default()
}

/// In-memory storage with switchable failures.
#[derive(Default)]
pub(crate) struct FlakyStorage {
    pub inner: MemoryStorage,
    /// Reads fail with a connection error.
    pub fail_reads: AtomicBool,
    /// Reads never complete.
    pub hang_reads: AtomicBool,
    /// Number of upcoming increments failing with a conflict. `u32::MAX`
    /// fails all of them.
    pub failing_increments: AtomicU32,
    /// The next `set_entitlement` stores nothing.
    pub drop_entitlement_writes: AtomicBool,
}

impl FlakyStorage {
    pub fn new() -> Self {
        Self::default()
    }

    async fn read_gate(&self) -> StorageResult<()> {
        if self.hang_reads.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::Connection("connection refused".to_string()));
        }

        Ok(())
    }

    fn increment_gate(&self) -> StorageResult<()> {
        let failing = self
            .failing_increments
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| match n {
                0 => None,
                u32::MAX => Some(u32::MAX),
                n => Some(n - 1),
            });

        match failing {
            Ok(_) => Err(StorageError::Conflict("concurrent update".to_string())),
            Err(_) => Ok(()),
        }
    }
}

impl UsageStorage for FlakyStorage {
    async fn get_record(&self, id: &ClientId) -> StorageResult<ClientRecord> {
        self.read_gate().await?;
        self.inner.get_record(id).await
    }

    async fn increment(&self, id: &ClientId) -> StorageResult<ClientRecord> {
        self.increment_gate()?;
        self.inner.increment(id).await
    }

    async fn increment_by(&self, id: &ClientId, amount: u64) -> StorageResult<ClientRecord> {
        self.increment_gate()?;
        self.inner.increment_by(id, amount).await
    }

    async fn carry_over(&self, from: &ClientId, to: &ClientId) -> StorageResult<u64> {
        self.increment_gate()?;
        self.inner.carry_over(from, to).await
    }

    async fn set_entitlement(&self, id: &ClientId, entitlement: Entitlement) -> StorageResult<ClientRecord> {
        if self.drop_entitlement_writes.swap(false, Ordering::SeqCst) {
            return self.inner.get_record(id).await;
        }

        self.inner.set_entitlement(id, entitlement).await
    }

    async fn clear_entitlement(&self, id: &ClientId) -> StorageResult<ClientRecord> {
        self.inner.clear_entitlement(id).await
    }

    async fn export(&self) -> StorageResult<StoreSnapshot> {
        self.read_gate().await?;
        self.inner.export().await
    }

    async fn import(&self, snapshot: StoreSnapshot) -> StorageResult<()> {
        self.inner.import(snapshot).await
    }

    async fn purge_expired(&self, now: Timestamp) -> StorageResult<usize> {
        self.inner.purge_expired(now).await
    }

    async fn stats(&self, now: Timestamp) -> StorageResult<StorageStats> {
        self.read_gate().await?;
        self.inner.stats(now).await
    }

    async fn site_usage(&self, period: &str, default_max: u64) -> StorageResult<SiteAggregate> {
        self.read_gate().await?;
        self.inner.site_usage(period, default_max).await
    }

    async fn increment_site(&self, period: &str, default_max: u64) -> StorageResult<SiteAggregate> {
        self.inner.increment_site(period, default_max).await
    }

    async fn set_site_limit(&self, period: &str, max_limit: u64) -> StorageResult<SiteAggregate> {
        self.inner.set_site_limit(period, max_limit).await
    }

    async fn reset_site_usage(&self, period: &str, default_max: u64) -> StorageResult<SiteAggregate> {
        self.inner.reset_site_usage(period, default_max).await
    }

    async fn ping(&self) -> StorageResult<()> {
        self.read_gate().await
    }
}
