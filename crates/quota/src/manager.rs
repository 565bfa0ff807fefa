use std::{sync::Arc, time::Duration};

use config::Config;
use jiff::Timestamp;
use serde::Serialize;

use crate::{
    ClientId, QuotaError, SiteAggregate, StorageError, StorageStats, StoreSnapshot, UsageSnapshot,
    entitlement::Entitlement,
    guard::QuotaGuard,
    migration::{MigrationManager, MigrationOutcome},
    record::period_of,
    retry::RetryPolicy,
    storage::{Storage, UsageStorage, with_timeout},
};

/// Entry point of the metering core.
///
/// Every operation taking a client id validates it before storage is
/// touched.
pub struct QuotaManager<S = Storage> {
    storage: Arc<S>,
    guard: QuotaGuard<S>,
    migrations: MigrationManager<S>,
    retry: RetryPolicy,
    operation_timeout: Duration,
    site_max_limit: u64,
}

impl<S> Clone for QuotaManager<S> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            guard: self.guard.clone(),
            migrations: self.migrations.clone(),
            retry: self.retry,
            operation_timeout: self.operation_timeout,
            site_max_limit: self.site_max_limit,
        }
    }
}

/// Outcome of a health probe.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<StorageStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

impl QuotaManager<Storage> {
    /// Connects the configured storage backend.
    pub async fn new(config: &Config) -> Result<Self, StorageError> {
        let storage = Storage::from_config(&config.storage).await?;

        log::info!("Using the {} storage backend", storage.backend_name());

        Ok(Self::with_storage(Arc::new(storage), config))
    }

    pub fn backend_name(&self) -> &'static str {
        self.storage.backend_name()
    }
}

impl<S: UsageStorage> QuotaManager<S> {
    pub fn with_storage(storage: Arc<S>, config: &Config) -> Self {
        Self {
            guard: QuotaGuard::new(storage.clone(), config),
            migrations: MigrationManager::new(storage.clone(), config.quota.operation_timeout),
            storage,
            retry: RetryPolicy::from_config(&config.quota.retry),
            operation_timeout: config.quota.operation_timeout,
            site_max_limit: config.site.max_limit,
        }
    }

    /// Current usage of a client. Storage failures yield the free-tier
    /// default.
    pub async fn get_usage(&self, client_id: &str) -> Result<UsageSnapshot, QuotaError> {
        let id = ClientId::parse(client_id)?;
        Ok(self.guard.check(&id).await)
    }

    /// Counts one served call.
    pub async fn record_usage(&self, client_id: &str) -> Result<UsageSnapshot, QuotaError> {
        let id = ClientId::parse(client_id)?;
        self.guard.record(&id).await
    }

    /// Attaches `entitlement` to a client, replacing any previous one.
    pub async fn grant_entitlement(
        &self,
        client_id: &str,
        entitlement: Entitlement,
    ) -> Result<UsageSnapshot, QuotaError> {
        let id = ClientId::parse(client_id)?;

        let record = self
            .retry
            .run("grant entitlement", || {
                with_timeout(
                    self.operation_timeout,
                    self.storage.set_entitlement(&id, entitlement.clone()),
                )
            })
            .await
            .map_err(|e| QuotaError::Storage(e.into_storage_error()))?;

        log::info!("Granted an entitlement to client {}", id.hashed());

        Ok(UsageSnapshot::compose(&record, Timestamp::now(), self.guard.free_limit()))
    }

    /// Removes the entitlement of a client. Its usage count is kept.
    pub async fn revoke_entitlement(&self, client_id: &str) -> Result<UsageSnapshot, QuotaError> {
        let id = ClientId::parse(client_id)?;

        let record = self
            .retry
            .run("revoke entitlement", || {
                with_timeout(self.operation_timeout, self.storage.clear_entitlement(&id))
            })
            .await
            .map_err(|e| QuotaError::Storage(e.into_storage_error()))?;

        log::info!("Revoked the entitlement of client {}", id.hashed());

        Ok(UsageSnapshot::compose(&record, Timestamp::now(), self.guard.free_limit()))
    }

    /// Moves the usage and entitlement of `old_client_id` to `new_client_id`.
    pub async fn migrate(&self, old_client_id: &str, new_client_id: &str) -> Result<MigrationOutcome, QuotaError> {
        let old = ClientId::parse(old_client_id)?;
        let new = ClientId::parse(new_client_id)?;

        self.migrations.migrate(&old, &new).await
    }

    pub async fn stats(&self) -> Result<StorageStats, QuotaError> {
        Ok(with_timeout(self.operation_timeout, self.storage.stats(Timestamp::now())).await?)
    }

    pub async fn export(&self) -> Result<StoreSnapshot, QuotaError> {
        Ok(with_timeout(self.operation_timeout, self.storage.export()).await?)
    }

    /// Replaces the stored state. The ids of the snapshot were validated when
    /// it was deserialized.
    pub async fn import(&self, snapshot: StoreSnapshot) -> Result<(), QuotaError> {
        let clients = snapshot.clients.len();

        with_timeout(self.operation_timeout, self.storage.import(snapshot)).await?;
        log::info!("Imported {clients} client records");

        Ok(())
    }

    /// Removes expired subscriptions and returns how many were removed.
    pub async fn purge_expired(&self) -> Result<usize, QuotaError> {
        let purged = with_timeout(self.operation_timeout, self.storage.purge_expired(Timestamp::now())).await?;

        if purged > 0 {
            log::info!("Removed {purged} expired entitlements");
        }

        Ok(purged)
    }

    /// Site-wide usage of the current month.
    pub async fn site_usage(&self) -> Result<SiteAggregate, QuotaError> {
        let period = period_of(Timestamp::now());
        Ok(with_timeout(self.operation_timeout, self.storage.site_usage(&period, self.site_max_limit)).await?)
    }

    /// Whether the site-wide cap of the current month is reached. An
    /// unreadable aggregate counts as not reached.
    pub async fn is_site_limit_reached(&self) -> bool {
        match self.site_usage().await {
            Ok(site) => site.is_limit_reached(),
            Err(error) => {
                log::warn!("Failed to read site usage, assuming the limit is not reached: {error}");
                false
            }
        }
    }

    pub async fn set_site_limit(&self, max_limit: u64) -> Result<SiteAggregate, QuotaError> {
        let period = period_of(Timestamp::now());
        let site = with_timeout(self.operation_timeout, self.storage.set_site_limit(&period, max_limit)).await?;

        log::info!("Site limit for {period} set to {max_limit}");

        Ok(site)
    }

    pub async fn reset_site_usage(&self) -> Result<SiteAggregate, QuotaError> {
        let period = period_of(Timestamp::now());
        let site = with_timeout(
            self.operation_timeout,
            self.storage.reset_site_usage(&period, self.site_max_limit),
        )
        .await?;

        log::info!("Site usage for {period} reset");

        Ok(site)
    }

    /// Probes the storage backend.
    pub async fn health(&self) -> HealthReport {
        match self.probe().await {
            Ok(stats) => HealthReport {
                status: HealthStatus::Healthy,
                stats: Some(stats),
                error: None,
            },
            Err(error) => {
                log::warn!("Health check failed: {error}");

                HealthReport {
                    status: HealthStatus::Unhealthy,
                    stats: None,
                    error: Some(error.to_string()),
                }
            }
        }
    }

    async fn probe(&self) -> Result<StorageStats, StorageError> {
        with_timeout(self.operation_timeout, self.storage.ping()).await?;
        with_timeout(self.operation_timeout, self.storage.stats(Timestamp::now())).await
    }
}
