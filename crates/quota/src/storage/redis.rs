mod tracing;

use std::{collections::HashMap, sync::LazyLock};

use config::RedisStorageConfig;
use deadpool::{
    Runtime,
    managed::{self, Metrics, Object, Pool, RecycleResult},
};
use jiff::Timestamp;
use redis::{Client, RedisError, Script, aio::MultiplexedConnection};

pub use self::tracing::TracedRedisStorage;

use super::UsageStorage;
use crate::{
    ClientId, ClientRecord, SiteAggregate, StorageError, StorageResult, StorageStats, StoreSnapshot,
    entitlement::Entitlement,
    record::{StoredClient, StoredSite},
};

const COUNT: &str = "count";
const ENTITLEMENT: &str = "entitlement";
const LAST_UPDATED: &str = "last_updated";
const MIGRATED_COUNT: &str = "migrated_count";
const TOTAL_COUNT: &str = "total_count";
const MAX_LIMIT: &str = "max_limit";

/// Removes the entitlement only if it is still the one the caller saw, so a
/// grant racing with the cleanup is never lost.
static CLEAR_IF_UNCHANGED: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
        if redis.call('HGET', KEYS[1], ARGV[1]) == ARGV[2] then
            redis.call('HDEL', KEYS[1], ARGV[1])
            redis.call('HSET', KEYS[1], ARGV[3], ARGV[4])
            return 1
        end
        return 0
        ",
    )
});

/// Moves the calls of KEYS[1] not yet carried over onto KEYS[2] and marks
/// them on KEYS[1]. Returns the number of calls moved.
static CARRY_OVER: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
        local count = tonumber(redis.call('HGET', KEYS[1], ARGV[1]) or '0')
        local migrated = tonumber(redis.call('HGET', KEYS[1], ARGV[2]) or '0')
        local moved = count - migrated
        if moved <= 0 then
            return 0
        end
        redis.call('HSET', KEYS[1], ARGV[2], count, ARGV[3], ARGV[4])
        redis.call('HINCRBY', KEYS[2], ARGV[1], moved)
        redis.call('HSET', KEYS[2], ARGV[3], ARGV[4])
        redis.call('SADD', KEYS[3], ARGV[5])
        return moved
        ",
    )
});

/// Creates and health-checks multiplexed Redis connections for the pool.
pub struct RedisConnectionManager {
    client: Client,
}

impl managed::Manager for RedisConnectionManager {
    type Type = MultiplexedConnection;
    type Error = RedisError;

    async fn create(&self) -> Result<MultiplexedConnection, RedisError> {
        self.client.get_multiplexed_async_connection().await
    }

    async fn recycle(&self, connection: &mut MultiplexedConnection, _: &Metrics) -> RecycleResult<RedisError> {
        let _: String = redis::cmd("PING").query_async(connection).await?;
        Ok(())
    }
}

/// Storage in a Redis server shared by every instance of the service.
///
/// Each client is a hash under `{prefix}:client:{id}` holding its count, its
/// JSON-encoded entitlement and the time of the last update. Ids are indexed
/// in the `{prefix}:clients` set. Site aggregates follow the same scheme
/// under `{prefix}:site:{period}` and `{prefix}:sites`. Every mutation runs
/// in a `MULTI`/`EXEC` block that also reads back the resulting hash.
pub struct RedisStorage {
    pool: Pool<RedisConnectionManager>,
    key_prefix: String,
}

impl RedisStorage {
    /// Builds the pool and checks that the server answers.
    pub async fn connect(config: &RedisStorageConfig) -> StorageResult<Self> {
        let client = Client::open(config.url.as_str())?;

        let pool = Pool::builder(RedisConnectionManager { client })
            .max_size(config.pool.max_size)
            .wait_timeout(Some(config.pool.wait_timeout))
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| StorageError::Connection(format!("failed to build the Redis pool: {e}")))?;

        let storage = Self {
            pool,
            key_prefix: config.key_prefix.clone(),
        };

        storage.ping().await?;
        log::debug!("Connected to Redis with key prefix '{}'", storage.key_prefix);

        Ok(storage)
    }

    pub(crate) fn pool_status(&self) -> deadpool::Status {
        self.pool.status()
    }

    async fn connection(&self) -> StorageResult<Object<RedisConnectionManager>> {
        self.pool
            .get()
            .await
            .map_err(|e| StorageError::Connection(format!("failed to get a Redis connection: {e}")))
    }

    fn client_key(&self, id: &ClientId) -> String {
        format!("{}:client:{id}", self.key_prefix)
    }

    fn clients_key(&self) -> String {
        format!("{}:clients", self.key_prefix)
    }

    fn site_key(&self, period: &str) -> String {
        format!("{}:site:{period}", self.key_prefix)
    }

    fn sites_key(&self) -> String {
        format!("{}:sites", self.key_prefix)
    }

    /// Runs `commands` on the hash of `id` in one transaction and returns the
    /// resulting record. The record is created if it does not exist.
    async fn update_client(
        &self,
        id: &ClientId,
        commands: impl FnOnce(&mut redis::Pipeline, &str),
    ) -> StorageResult<ClientRecord> {
        let key = self.client_key(id);
        let now = Timestamp::now().to_string();

        let mut pipe = redis::pipe();
        pipe.atomic();

        commands(&mut pipe, &key);

        pipe.hset_nx(&key, COUNT, 0)
            .ignore()
            .hset_nx(&key, LAST_UPDATED, &now)
            .ignore()
            .sadd(self.clients_key(), id.as_str())
            .ignore()
            .hgetall(&key);

        let mut conn = self.connection().await?;
        let (fields,): (HashMap<String, String>,) = pipe.query_async(&mut *conn).await?;

        Ok(ClientRecord::from_stored(id.clone(), &decode_client(&fields)?))
    }

    async fn update_site(
        &self,
        period: &str,
        default_max: u64,
        commands: impl FnOnce(&mut redis::Pipeline, &str),
    ) -> StorageResult<SiteAggregate> {
        let key = self.site_key(period);

        let mut pipe = redis::pipe();
        pipe.atomic();

        commands(&mut pipe, &key);

        pipe.hset_nx(&key, TOTAL_COUNT, 0)
            .ignore()
            .hset_nx(&key, MAX_LIMIT, default_max)
            .ignore()
            .sadd(self.sites_key(), period)
            .ignore()
            .hgetall(&key);

        let mut conn = self.connection().await?;
        let (fields,): (HashMap<String, String>,) = pipe.query_async(&mut *conn).await?;

        Ok(SiteAggregate::from_stored(period, decode_site(&fields)?))
    }

    /// Reads every indexed client hash.
    async fn load_clients(&self) -> StorageResult<Vec<(ClientId, StoredClient)>> {
        let mut conn = self.connection().await?;

        let members: Vec<String> = redis::cmd("SMEMBERS")
            .arg(self.clients_key())
            .query_async(&mut *conn)
            .await?;

        let ids: Vec<ClientId> = members
            .into_iter()
            .filter_map(|member| match ClientId::parse(&member) {
                Ok(id) => Some(id),
                Err(_) => {
                    log::warn!("Skipping malformed client id in the Redis index");
                    None
                }
            })
            .collect();

        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();

        for id in &ids {
            pipe.hgetall(self.client_key(id));
        }

        let hashes: Vec<HashMap<String, String>> = pipe.query_async(&mut *conn).await?;

        ids.into_iter()
            .zip(hashes)
            // Removed between SMEMBERS and HGETALL.
            .filter(|(_, fields)| !fields.is_empty())
            .map(|(id, fields)| Ok((id, decode_client(&fields)?)))
            .collect()
    }

    async fn load_sites(&self) -> StorageResult<Vec<(String, StoredSite)>> {
        let mut conn = self.connection().await?;

        let periods: Vec<String> = redis::cmd("SMEMBERS")
            .arg(self.sites_key())
            .query_async(&mut *conn)
            .await?;

        if periods.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();

        for period in &periods {
            pipe.hgetall(self.site_key(period));
        }

        let hashes: Vec<HashMap<String, String>> = pipe.query_async(&mut *conn).await?;

        periods
            .into_iter()
            .zip(hashes)
            .filter(|(_, fields)| !fields.is_empty())
            .map(|(period, fields)| Ok((period, decode_site(&fields)?)))
            .collect()
    }
}

fn decode_client(fields: &HashMap<String, String>) -> StorageResult<StoredClient> {
    let count = match fields.get(COUNT) {
        Some(count) => count
            .parse()
            .map_err(|e| StorageError::Internal(format!("malformed count '{count}': {e}")))?,
        None => 0,
    };

    let entitlement = fields
        .get(ENTITLEMENT)
        .map(|json| serde_json::from_str::<Entitlement>(json))
        .transpose()?;

    let last_updated = match fields.get(LAST_UPDATED) {
        Some(value) => value
            .parse()
            .map_err(|e| StorageError::Internal(format!("malformed timestamp '{value}': {e}")))?,
        None => Timestamp::UNIX_EPOCH,
    };

    let migrated_count = match fields.get(MIGRATED_COUNT) {
        Some(value) => value
            .parse()
            .map_err(|e| StorageError::Internal(format!("malformed migrated count '{value}': {e}")))?,
        None => 0,
    };

    Ok(StoredClient {
        count,
        entitlement,
        last_updated,
        migrated_count,
    })
}

fn decode_site(fields: &HashMap<String, String>) -> StorageResult<StoredSite> {
    let number = |field: &str| -> StorageResult<u64> {
        match fields.get(field) {
            Some(value) => value
                .parse()
                .map_err(|e| StorageError::Internal(format!("malformed {field} '{value}': {e}"))),
            None => Ok(0),
        }
    };

    Ok(StoredSite {
        total_count: number(TOTAL_COUNT)?,
        max_limit: number(MAX_LIMIT)?,
    })
}

fn to_delta(amount: u64) -> StorageResult<i64> {
    i64::try_from(amount).map_err(|_| StorageError::Internal(format!("increment {amount} out of range")))
}

impl UsageStorage for RedisStorage {
    async fn get_record(&self, id: &ClientId) -> StorageResult<ClientRecord> {
        self.update_client(id, |_, _| {}).await
    }

    async fn increment(&self, id: &ClientId) -> StorageResult<ClientRecord> {
        self.increment_by(id, 1).await
    }

    async fn increment_by(&self, id: &ClientId, amount: u64) -> StorageResult<ClientRecord> {
        let delta = to_delta(amount)?;
        let now = Timestamp::now().to_string();

        self.update_client(id, |pipe, key| {
            pipe.hincr(key, COUNT, delta)
                .ignore()
                .hset(key, LAST_UPDATED, now)
                .ignore();
        })
        .await
    }

    async fn carry_over(&self, from: &ClientId, to: &ClientId) -> StorageResult<u64> {
        let mut conn = self.connection().await?;

        let moved: i64 = CARRY_OVER
            .key(self.client_key(from))
            .key(self.client_key(to))
            .key(self.clients_key())
            .arg(COUNT)
            .arg(MIGRATED_COUNT)
            .arg(LAST_UPDATED)
            .arg(Timestamp::now().to_string())
            .arg(to.as_str())
            .invoke_async(&mut *conn)
            .await?;

        Ok(u64::try_from(moved).unwrap_or_default())
    }

    async fn set_entitlement(&self, id: &ClientId, entitlement: Entitlement) -> StorageResult<ClientRecord> {
        let json = serde_json::to_string(&entitlement)?;
        let now = Timestamp::now().to_string();

        self.update_client(id, |pipe, key| {
            pipe.hset(key, ENTITLEMENT, json)
                .ignore()
                .hset(key, LAST_UPDATED, now)
                .ignore();
        })
        .await
    }

    async fn clear_entitlement(&self, id: &ClientId) -> StorageResult<ClientRecord> {
        let now = Timestamp::now().to_string();

        self.update_client(id, |pipe, key| {
            pipe.hdel(key, ENTITLEMENT)
                .ignore()
                .hset(key, LAST_UPDATED, now)
                .ignore();
        })
        .await
    }

    async fn export(&self) -> StorageResult<StoreSnapshot> {
        Ok(StoreSnapshot {
            clients: self.load_clients().await?.into_iter().collect(),
            site_usage: self.load_sites().await?.into_iter().collect(),
        })
    }

    async fn import(&self, snapshot: StoreSnapshot) -> StorageResult<()> {
        let mut conn = self.connection().await?;

        let (old_clients, old_sites): (Vec<String>, Vec<String>) = redis::pipe()
            .smembers(self.clients_key())
            .smembers(self.sites_key())
            .query_async(&mut *conn)
            .await?;

        let mut pipe = redis::pipe();
        pipe.atomic();

        for member in &old_clients {
            pipe.del(format!("{}:client:{member}", self.key_prefix)).ignore();
        }

        for period in &old_sites {
            pipe.del(self.site_key(period)).ignore();
        }

        pipe.del(self.clients_key()).ignore().del(self.sites_key()).ignore();

        for (id, client) in &snapshot.clients {
            let mut fields = vec![
                (COUNT, client.count.to_string()),
                (LAST_UPDATED, client.last_updated.to_string()),
            ];

            if let Some(entitlement) = &client.entitlement {
                fields.push((ENTITLEMENT, serde_json::to_string(entitlement)?));
            }

            if client.migrated_count > 0 {
                fields.push((MIGRATED_COUNT, client.migrated_count.to_string()));
            }

            pipe.hset_multiple(self.client_key(id), fields.as_slice())
                .ignore()
                .sadd(self.clients_key(), id.as_str())
                .ignore();
        }

        for (period, site) in &snapshot.site_usage {
            pipe.hset_multiple(
                self.site_key(period),
                &[(TOTAL_COUNT, site.total_count), (MAX_LIMIT, site.max_limit)],
            )
            .ignore()
            .sadd(self.sites_key(), period)
            .ignore();
        }

        pipe.query_async::<()>(&mut *conn).await?;

        Ok(())
    }

    async fn purge_expired(&self, now: Timestamp) -> StorageResult<usize> {
        let expired: Vec<(ClientId, Entitlement)> = self
            .load_clients()
            .await?
            .into_iter()
            .filter_map(|(id, client)| client.entitlement.map(|entitlement| (id, entitlement)))
            .filter(|(_, entitlement)| entitlement.is_purgeable_at(now))
            .collect();

        let mut conn = self.connection().await?;
        let now = now.to_string();
        let mut purged = 0;

        for (id, entitlement) in expired {
            let removed: i64 = CLEAR_IF_UNCHANGED
                .key(self.client_key(&id))
                .arg(ENTITLEMENT)
                .arg(serde_json::to_string(&entitlement)?)
                .arg(LAST_UPDATED)
                .arg(&now)
                .invoke_async(&mut *conn)
                .await?;

            if removed == 1 {
                purged += 1;
            }
        }

        Ok(purged)
    }

    async fn stats(&self, now: Timestamp) -> StorageResult<StorageStats> {
        let mut stats = StorageStats::default();

        for (_, client) in self.load_clients().await? {
            stats.add(&client, now);
        }

        Ok(stats)
    }

    async fn site_usage(&self, period: &str, default_max: u64) -> StorageResult<SiteAggregate> {
        self.update_site(period, default_max, |_, _| {}).await
    }

    async fn increment_site(&self, period: &str, default_max: u64) -> StorageResult<SiteAggregate> {
        self.update_site(period, default_max, |pipe, key| {
            pipe.hincr(key, TOTAL_COUNT, 1).ignore();
        })
        .await
    }

    async fn set_site_limit(&self, period: &str, max_limit: u64) -> StorageResult<SiteAggregate> {
        self.update_site(period, max_limit, |pipe, key| {
            pipe.hset(key, MAX_LIMIT, max_limit).ignore();
        })
        .await
    }

    async fn reset_site_usage(&self, period: &str, default_max: u64) -> StorageResult<SiteAggregate> {
        self.update_site(period, default_max, |pipe, key| {
            pipe.hset(key, TOTAL_COUNT, 0).ignore();
        })
        .await
    }

    async fn ping(&self) -> StorageResult<()> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut *conn).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use config::RedisPoolConfig;

    use super::*;

    async fn storage() -> RedisStorage {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379/0".to_string());

        let config = RedisStorageConfig {
            url: url.parse().unwrap(),
            key_prefix: format!("meter-test-{}", Timestamp::now().as_nanosecond()),
            pool: RedisPoolConfig::default(),
        };

        RedisStorage::connect(&config).await.unwrap()
    }

    #[test]
    fn decodes_partial_hashes() {
        let fields = HashMap::from([(COUNT.to_string(), "7".to_string())]);
        let client = decode_client(&fields).unwrap();

        assert_eq!(client.count, 7);
        assert_eq!(client.entitlement, None);
        assert_eq!(client.last_updated, Timestamp::UNIX_EPOCH);
        assert_eq!(client.migrated_count, 0);

        let fields = HashMap::from([(COUNT.to_string(), "seven".to_string())]);
        assert!(matches!(decode_client(&fields), Err(StorageError::Internal(_))));
    }

    #[test]
    fn decodes_site_hashes() {
        let fields = HashMap::from([
            (TOTAL_COUNT.to_string(), "12".to_string()),
            (MAX_LIMIT.to_string(), "100".to_string()),
        ]);

        assert_eq!(
            decode_site(&fields).unwrap(),
            StoredSite {
                total_count: 12,
                max_limit: 100,
            }
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ignore = "requires a Redis server"]
    async fn concurrent_increments_are_not_lost() {
        let storage = Arc::new(storage().await);
        let client = ClientId::parse("concurrent-client").unwrap();

        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let storage = storage.clone();
                let client = client.clone();
                tokio::spawn(async move { storage.increment(&client).await })
            })
            .collect();

        for task in futures::future::join_all(tasks).await {
            task.unwrap().unwrap();
        }

        assert_eq!(storage.get_record(&client).await.unwrap().count, 50);
    }

    #[tokio::test]
    #[ignore = "requires a Redis server"]
    async fn carry_over_moves_each_call_once() {
        let storage = storage().await;
        let old = ClientId::parse("old-client-1").unwrap();
        let new = ClientId::parse("new-client-1").unwrap();

        storage.increment_by(&old, 3).await.unwrap();

        assert_eq!(storage.carry_over(&old, &new).await.unwrap(), 3);
        assert_eq!(storage.carry_over(&old, &new).await.unwrap(), 0);

        let old_record = storage.get_record(&old).await.unwrap();
        assert_eq!(old_record.count, 3);
        assert_eq!(old_record.migrated_count, 3);
        assert_eq!(storage.get_record(&new).await.unwrap().count, 3);
        assert_eq!(storage.export().await.unwrap().clients.len(), 2);
    }

    #[tokio::test]
    #[ignore = "requires a Redis server"]
    async fn export_import_and_purge() {
        let storage = storage().await;
        let now = Timestamp::now();
        let client = ClientId::parse("expired-client").unwrap();

        storage.increment_by(&client, 4).await.unwrap();
        storage
            .set_entitlement(&client, Entitlement::subscription(now - jiff::SignedDuration::from_hours(1)))
            .await
            .unwrap();
        storage.increment_site("2026-10", 10).await.unwrap();

        let snapshot = storage.export().await.unwrap();
        assert_eq!(snapshot.clients.len(), 1);

        assert_eq!(storage.purge_expired(now).await.unwrap(), 1);
        assert_eq!(storage.get_record(&client).await.unwrap().entitlement, None);

        storage.import(snapshot.clone()).await.unwrap();
        assert_eq!(storage.export().await.unwrap(), snapshot);
    }
}
