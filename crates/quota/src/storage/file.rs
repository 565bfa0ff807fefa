use std::{
    ffi::OsString,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use jiff::Timestamp;
use tokio::sync::Mutex;

use super::UsageStorage;
use crate::{
    ClientId, ClientRecord, SiteAggregate, StorageResult, StorageStats, StoreSnapshot,
    entitlement::Entitlement,
    record::{StoredClient, StoredSite},
};

/// Storage in a single JSON file.
///
/// The whole store lives in memory behind one lock. A mutation is applied to
/// a copy, written to a temporary file which is then renamed over the
/// original, and only then becomes visible. A failed write leaves both the
/// file and the in-memory state untouched.
pub struct FileStorage {
    path: PathBuf,
    state: Mutex<StoreSnapshot>,
}

impl FileStorage {
    /// Opens the store at `path`. A missing file is an empty store.
    pub async fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let state = match tokio::fs::read(&path).await {
            Ok(content) if content.iter().all(u8::is_ascii_whitespace) => StoreSnapshot::default(),
            Ok(content) => serde_json::from_slice(&content)?,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                log::debug!("Storage file {} does not exist yet, starting empty", path.display());
                StoreSnapshot::default()
            }
            Err(error) => return Err(error.into()),
        };

        log::debug!(
            "Loaded {} client records from {}",
            state.clients.len(),
            path.display()
        );

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, state: &StoreSnapshot) -> StorageResult<()> {
        let mut temp_name = self.path.file_name().map(OsString::from).unwrap_or_default();
        temp_name.push(".tmp");
        let temp_path = self.path.with_file_name(temp_name);

        let content = serde_json::to_vec_pretty(state)?;

        tokio::fs::write(&temp_path, content).await?;
        tokio::fs::rename(&temp_path, &self.path).await?;

        Ok(())
    }

    /// Applies `f` to a copy of the state, persists the copy and publishes it.
    async fn mutate<T>(&self, f: impl FnOnce(&mut StoreSnapshot) -> T) -> StorageResult<T> {
        let mut state = self.state.lock().await;

        let mut next = state.clone();
        let output = f(&mut next);

        self.persist(&next).await?;
        *state = next;

        Ok(output)
    }

    async fn update(&self, id: &ClientId, f: impl FnOnce(&mut StoredClient)) -> StorageResult<ClientRecord> {
        let now = Timestamp::now();

        self.mutate(|state| {
            let client = state.clients.entry(id.clone()).or_insert_with(|| StoredClient::new(now));

            f(client);
            client.last_updated = now;

            ClientRecord::from_stored(id.clone(), client)
        })
        .await
    }

    async fn update_site(
        &self,
        period: &str,
        default_max: u64,
        f: impl FnOnce(&mut StoredSite),
    ) -> StorageResult<SiteAggregate> {
        self.mutate(|state| {
            let site = state
                .site_usage
                .entry(period.to_owned())
                .or_insert_with(|| StoredSite::new(default_max));

            f(site);

            SiteAggregate::from_stored(period, *site)
        })
        .await
    }
}

impl UsageStorage for FileStorage {
    async fn get_record(&self, id: &ClientId) -> StorageResult<ClientRecord> {
        {
            let state = self.state.lock().await;

            if let Some(client) = state.clients.get(id) {
                return Ok(ClientRecord::from_stored(id.clone(), client));
            }
        }

        let now = Timestamp::now();

        self.mutate(|state| {
            let client = state.clients.entry(id.clone()).or_insert_with(|| StoredClient::new(now));
            ClientRecord::from_stored(id.clone(), client)
        })
        .await
    }

    async fn increment(&self, id: &ClientId) -> StorageResult<ClientRecord> {
        self.update(id, |client| client.count = client.count.saturating_add(1))
            .await
    }

    async fn increment_by(&self, id: &ClientId, amount: u64) -> StorageResult<ClientRecord> {
        self.update(id, |client| client.count = client.count.saturating_add(amount))
            .await
    }

    async fn carry_over(&self, from: &ClientId, to: &ClientId) -> StorageResult<u64> {
        let now = Timestamp::now();

        self.mutate(|state| {
            let source = state.clients.entry(from.clone()).or_insert_with(|| StoredClient::new(now));
            let moved = source.pending_migration();

            if moved == 0 {
                return 0;
            }

            source.migrated_count = source.count;
            source.last_updated = now;

            let target = state.clients.entry(to.clone()).or_insert_with(|| StoredClient::new(now));
            target.count = target.count.saturating_add(moved);
            target.last_updated = now;

            moved
        })
        .await
    }

    async fn set_entitlement(&self, id: &ClientId, entitlement: Entitlement) -> StorageResult<ClientRecord> {
        self.update(id, |client| client.entitlement = Some(entitlement)).await
    }

    async fn clear_entitlement(&self, id: &ClientId) -> StorageResult<ClientRecord> {
        self.update(id, |client| client.entitlement = None).await
    }

    async fn export(&self) -> StorageResult<StoreSnapshot> {
        Ok(self.state.lock().await.clone())
    }

    async fn import(&self, snapshot: StoreSnapshot) -> StorageResult<()> {
        self.mutate(|state| *state = snapshot).await
    }

    async fn purge_expired(&self, now: Timestamp) -> StorageResult<usize> {
        let has_expired = {
            let state = self.state.lock().await;

            state
                .clients
                .values()
                .any(|client| client.entitlement.as_ref().is_some_and(|e| e.is_purgeable_at(now)))
        };

        // Nothing to purge, skip rewriting the file.
        if !has_expired {
            return Ok(0);
        }

        self.mutate(|state| {
            let mut purged = 0;

            for client in state.clients.values_mut() {
                if client.entitlement.as_ref().is_some_and(|e| e.is_purgeable_at(now)) {
                    client.entitlement = None;
                    client.last_updated = now;
                    purged += 1;
                }
            }

            purged
        })
        .await
    }

    async fn stats(&self, now: Timestamp) -> StorageResult<StorageStats> {
        Ok(self.state.lock().await.stats(now))
    }

    async fn site_usage(&self, period: &str, default_max: u64) -> StorageResult<SiteAggregate> {
        {
            let state = self.state.lock().await;

            if let Some(site) = state.site_usage.get(period) {
                return Ok(SiteAggregate::from_stored(period, *site));
            }
        }

        self.update_site(period, default_max, |_| {}).await
    }

    async fn increment_site(&self, period: &str, default_max: u64) -> StorageResult<SiteAggregate> {
        self.update_site(period, default_max, |site| {
            site.total_count = site.total_count.saturating_add(1)
        })
        .await
    }

    async fn set_site_limit(&self, period: &str, max_limit: u64) -> StorageResult<SiteAggregate> {
        self.update_site(period, max_limit, |site| site.max_limit = max_limit)
            .await
    }

    async fn reset_site_usage(&self, period: &str, default_max: u64) -> StorageResult<SiteAggregate> {
        self.update_site(period, default_max, |site| site.total_count = 0)
            .await
    }

    async fn ping(&self) -> StorageResult<()> {
        match tokio::fs::metadata(&self.path).await {
            Ok(_) => Ok(()),
            // Nothing has been written yet.
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}
