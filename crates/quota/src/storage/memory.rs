use dashmap::DashMap;
use jiff::Timestamp;

use super::UsageStorage;
use crate::{
    ClientId, ClientRecord, SiteAggregate, StorageResult, StorageStats, StoreSnapshot,
    entitlement::Entitlement,
    record::{StoredClient, StoredSite},
};

/// Process-local storage. Each key is updated under its shard lock.
#[derive(Default)]
pub struct MemoryStorage {
    clients: DashMap<ClientId, StoredClient>,
    sites: DashMap<String, StoredSite>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, id: &ClientId, f: impl FnOnce(&mut StoredClient)) -> ClientRecord {
        let now = Timestamp::now();
        let mut entry = self
            .clients
            .entry(id.clone())
            .or_insert_with(|| StoredClient::new(now));

        f(&mut entry);
        entry.last_updated = now;

        ClientRecord::from_stored(id.clone(), &entry)
    }

    fn update_site(&self, period: &str, default_max: u64, f: impl FnOnce(&mut StoredSite)) -> SiteAggregate {
        let mut entry = self
            .sites
            .entry(period.to_owned())
            .or_insert_with(|| StoredSite::new(default_max));

        f(&mut entry);

        SiteAggregate::from_stored(period, *entry)
    }
}

impl UsageStorage for MemoryStorage {
    async fn get_record(&self, id: &ClientId) -> StorageResult<ClientRecord> {
        let entry = self
            .clients
            .entry(id.clone())
            .or_insert_with(|| StoredClient::new(Timestamp::now()));

        Ok(ClientRecord::from_stored(id.clone(), &entry))
    }

    async fn increment(&self, id: &ClientId) -> StorageResult<ClientRecord> {
        Ok(self.update(id, |client| client.count = client.count.saturating_add(1)))
    }

    async fn increment_by(&self, id: &ClientId, amount: u64) -> StorageResult<ClientRecord> {
        Ok(self.update(id, |client| client.count = client.count.saturating_add(amount)))
    }

    async fn carry_over(&self, from: &ClientId, to: &ClientId) -> StorageResult<u64> {
        // Marked first and released before `to` is locked, both may share a shard.
        let mut moved = 0;

        self.update(from, |client| {
            moved = client.pending_migration();
            client.migrated_count = client.count;
        });

        if moved > 0 {
            self.update(to, |client| client.count = client.count.saturating_add(moved));
        }

        Ok(moved)
    }

    async fn set_entitlement(&self, id: &ClientId, entitlement: Entitlement) -> StorageResult<ClientRecord> {
        Ok(self.update(id, |client| client.entitlement = Some(entitlement)))
    }

    async fn clear_entitlement(&self, id: &ClientId) -> StorageResult<ClientRecord> {
        Ok(self.update(id, |client| client.entitlement = None))
    }

    async fn export(&self) -> StorageResult<StoreSnapshot> {
        let clients = self
            .clients
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let site_usage = self
            .sites
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();

        Ok(StoreSnapshot { clients, site_usage })
    }

    async fn import(&self, snapshot: StoreSnapshot) -> StorageResult<()> {
        self.clients.clear();
        self.sites.clear();

        for (id, client) in snapshot.clients {
            self.clients.insert(id, client);
        }

        for (period, site) in snapshot.site_usage {
            self.sites.insert(period, site);
        }

        Ok(())
    }

    async fn purge_expired(&self, now: Timestamp) -> StorageResult<usize> {
        let mut purged = 0;

        for mut entry in self.clients.iter_mut() {
            if entry.entitlement.as_ref().is_some_and(|e| e.is_purgeable_at(now)) {
                entry.entitlement = None;
                entry.last_updated = now;
                purged += 1;
            }
        }

        Ok(purged)
    }

    async fn stats(&self, now: Timestamp) -> StorageResult<StorageStats> {
        let mut stats = StorageStats::default();

        for entry in self.clients.iter() {
            stats.add(entry.value(), now);
        }

        Ok(stats)
    }

    async fn site_usage(&self, period: &str, default_max: u64) -> StorageResult<SiteAggregate> {
        Ok(self.update_site(period, default_max, |_| {}))
    }

    async fn increment_site(&self, period: &str, default_max: u64) -> StorageResult<SiteAggregate> {
        Ok(self.update_site(period, default_max, |site| {
            site.total_count = site.total_count.saturating_add(1)
        }))
    }

    async fn set_site_limit(&self, period: &str, max_limit: u64) -> StorageResult<SiteAggregate> {
        Ok(self.update_site(period, max_limit, |site| site.max_limit = max_limit))
    }

    async fn reset_site_usage(&self, period: &str, default_max: u64) -> StorageResult<SiteAggregate> {
        Ok(self.update_site(period, default_max, |site| site.total_count = 0))
    }

    async fn ping(&self) -> StorageResult<()> {
        Ok(())
    }
}
