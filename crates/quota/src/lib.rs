//! Usage metering: per-client call counts against a free quota, upgraded by
//! subscriptions or purchased credits.

mod entitlement;
mod error;
mod guard;
mod identity;
mod manager;
mod migration;
mod record;
mod retry;
mod storage;

#[cfg(test)]
mod testing;

pub use entitlement::{Entitlement, Limit, Resolution, resolve};
pub use error::{QuotaError, StorageError, StorageResult};
pub use guard::QuotaGuard;
pub use identity::{ClientId, MAX_CLIENT_ID_LEN, MIN_CLIENT_ID_LEN};
pub use manager::{HealthReport, HealthStatus, QuotaManager};
pub use migration::{MigrationManager, MigrationOutcome};
pub use record::{
    ClientRecord, SiteAggregate, StorageStats, StoreSnapshot, StoredClient, StoredSite, UsageSnapshot, period_of,
};
pub use retry::{RetryError, RetryPolicy};
pub use storage::{FileStorage, MemoryStorage, RedisStorage, Storage, TracedRedisStorage, UsageStorage};
