//! Usage storage abstraction and the available backends.

mod file;
mod memory;
mod redis;

use std::{future::Future, time::Duration};

use config::{StorageBackendConfig, StorageConfig};
use jiff::Timestamp;

pub use self::{
    file::FileStorage,
    memory::MemoryStorage,
    redis::{RedisStorage, TracedRedisStorage},
};

use crate::{
    ClientId, ClientRecord, SiteAggregate, StorageError, StorageResult, StorageStats, StoreSnapshot,
    entitlement::Entitlement,
};

/// Durable per-client usage state.
///
/// Every mutation is atomic with respect to concurrent calls on the same key:
/// `n` concurrent increments of one client raise its count by exactly `n`.
pub trait UsageStorage: Send + Sync + 'static {
    /// Fetches the record of `id`, creating a zero-valued one on first access.
    fn get_record(&self, id: &ClientId) -> impl Future<Output = StorageResult<ClientRecord>> + Send;

    /// Adds one to the count of `id` and returns the updated record.
    fn increment(&self, id: &ClientId) -> impl Future<Output = StorageResult<ClientRecord>> + Send;

    /// Adds `amount` to the count of `id` and returns the updated record.
    fn increment_by(&self, id: &ClientId, amount: u64) -> impl Future<Output = StorageResult<ClientRecord>> + Send;

    /// Adds the calls of `from` that were not carried over yet to the count
    /// of `to`, and marks them carried over on `from` in the same mutation.
    /// Returns the number of calls moved. Repeating the call moves nothing.
    fn carry_over(&self, from: &ClientId, to: &ClientId) -> impl Future<Output = StorageResult<u64>> + Send;

    /// Replaces the entitlement of `id`. Last write wins.
    fn set_entitlement(
        &self,
        id: &ClientId,
        entitlement: Entitlement,
    ) -> impl Future<Output = StorageResult<ClientRecord>> + Send;

    /// Removes the entitlement of `id`, keeping its count.
    fn clear_entitlement(&self, id: &ClientId) -> impl Future<Output = StorageResult<ClientRecord>> + Send;

    /// Copies out the whole store.
    fn export(&self) -> impl Future<Output = StorageResult<StoreSnapshot>> + Send;

    /// Replaces the whole store with `snapshot`.
    fn import(&self, snapshot: StoreSnapshot) -> impl Future<Output = StorageResult<()>> + Send;

    /// Removes subscriptions that expired before `now` and returns how many
    /// were removed. Counts are never touched.
    fn purge_expired(&self, now: Timestamp) -> impl Future<Output = StorageResult<usize>> + Send;

    fn stats(&self, now: Timestamp) -> impl Future<Output = StorageResult<StorageStats>> + Send;

    /// Fetches the aggregate of `period`, creating it with `default_max` as
    /// its cap on first access.
    fn site_usage(&self, period: &str, default_max: u64) -> impl Future<Output = StorageResult<SiteAggregate>> + Send;

    fn increment_site(
        &self,
        period: &str,
        default_max: u64,
    ) -> impl Future<Output = StorageResult<SiteAggregate>> + Send;

    fn set_site_limit(&self, period: &str, max_limit: u64) -> impl Future<Output = StorageResult<SiteAggregate>> + Send;

    /// Sets the count of `period` back to zero, keeping its cap.
    fn reset_site_usage(
        &self,
        period: &str,
        default_max: u64,
    ) -> impl Future<Output = StorageResult<SiteAggregate>> + Send;

    /// Checks that the backend is reachable.
    fn ping(&self) -> impl Future<Output = StorageResult<()>> + Send;
}

/// The storage backend selected by configuration.
pub enum Storage {
    Memory(MemoryStorage),
    File(FileStorage),
    Redis(TracedRedisStorage),
}

impl Storage {
    /// Builds the configured backend. Fails if it cannot be reached.
    pub async fn from_config(config: &StorageConfig) -> StorageResult<Self> {
        let storage = match &config.backend {
            StorageBackendConfig::Memory => Self::Memory(MemoryStorage::new()),
            StorageBackendConfig::File(file) => Self::File(FileStorage::open(&file.path).await?),
            StorageBackendConfig::Redis(redis) => {
                Self::Redis(TracedRedisStorage::new(RedisStorage::connect(redis).await?))
            }
        };

        log::debug!("Initialized {} usage storage", storage.backend_name());

        Ok(storage)
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            Self::File(_) => "file",
            Self::Redis(_) => "redis",
        }
    }
}

macro_rules! dispatch {
    ($self:ident, $storage:ident => $call:expr) => {
        match $self {
            Storage::Memory($storage) => $call.await,
            Storage::File($storage) => $call.await,
            Storage::Redis($storage) => $call.await,
        }
    };
}

impl UsageStorage for Storage {
    async fn get_record(&self, id: &ClientId) -> StorageResult<ClientRecord> {
        dispatch!(self, storage => storage.get_record(id))
    }

    async fn increment(&self, id: &ClientId) -> StorageResult<ClientRecord> {
        dispatch!(self, storage => storage.increment(id))
    }

    async fn increment_by(&self, id: &ClientId, amount: u64) -> StorageResult<ClientRecord> {
        dispatch!(self, storage => storage.increment_by(id, amount))
    }

    async fn carry_over(&self, from: &ClientId, to: &ClientId) -> StorageResult<u64> {
        dispatch!(self, storage => storage.carry_over(from, to))
    }

    async fn set_entitlement(&self, id: &ClientId, entitlement: Entitlement) -> StorageResult<ClientRecord> {
        dispatch!(self, storage => storage.set_entitlement(id, entitlement))
    }

    async fn clear_entitlement(&self, id: &ClientId) -> StorageResult<ClientRecord> {
        dispatch!(self, storage => storage.clear_entitlement(id))
    }

    async fn export(&self) -> StorageResult<StoreSnapshot> {
        dispatch!(self, storage => storage.export())
    }

    async fn import(&self, snapshot: StoreSnapshot) -> StorageResult<()> {
        dispatch!(self, storage => storage.import(snapshot))
    }

    async fn purge_expired(&self, now: Timestamp) -> StorageResult<usize> {
        dispatch!(self, storage => storage.purge_expired(now))
    }

    async fn stats(&self, now: Timestamp) -> StorageResult<StorageStats> {
        dispatch!(self, storage => storage.stats(now))
    }

    async fn site_usage(&self, period: &str, default_max: u64) -> StorageResult<SiteAggregate> {
        dispatch!(self, storage => storage.site_usage(period, default_max))
    }

    async fn increment_site(&self, period: &str, default_max: u64) -> StorageResult<SiteAggregate> {
        dispatch!(self, storage => storage.increment_site(period, default_max))
    }

    async fn set_site_limit(&self, period: &str, max_limit: u64) -> StorageResult<SiteAggregate> {
        dispatch!(self, storage => storage.set_site_limit(period, max_limit))
    }

    async fn reset_site_usage(&self, period: &str, default_max: u64) -> StorageResult<SiteAggregate> {
        dispatch!(self, storage => storage.reset_site_usage(period, default_max))
    }

    async fn ping(&self) -> StorageResult<()> {
        dispatch!(self, storage => storage.ping())
    }
}

/// Runs a storage call with an upper bound on its duration.
pub(crate) async fn with_timeout<T>(
    limit: Duration,
    call: impl Future<Output = StorageResult<T>>,
) -> StorageResult<T> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(StorageError::Timeout(limit)),
    }
}
