//! Storage backend configuration.

use std::{path::PathBuf, time::Duration};

use duration_str::deserialize_duration;
use serde::Deserialize;
use url::Url;

/// Storage configuration: which backend to use and how often to purge
/// expired entitlements.
///
/// The backend is selected with the `type` key directly in the `[storage]`
/// table. Without `type` and without backend options the memory backend is
/// used.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawStorageConfig")]
pub struct StorageConfig {
    /// The selected backend.
    pub backend: StorageBackendConfig,
    /// Interval of the background task purging expired entitlements.
    pub cleanup_interval: Duration,
}

/// The `[storage]` table before the backend is selected.
#[derive(Deserialize)]
#[serde(default)]
struct RawStorageConfig {
    #[serde(flatten)]
    backend: toml::Table,
    #[serde(deserialize_with = "deserialize_duration")]
    cleanup_interval: Duration,
}

impl Default for RawStorageConfig {
    fn default() -> Self {
        Self {
            backend: toml::Table::new(),
            cleanup_interval: StorageConfig::default().cleanup_interval,
        }
    }
}

impl TryFrom<RawStorageConfig> for StorageConfig {
    type Error = String;

    fn try_from(raw: RawStorageConfig) -> Result<Self, Self::Error> {
        let backend = if raw.backend.is_empty() {
            StorageBackendConfig::default()
        } else if !raw.backend.contains_key("type") {
            let mut options: Vec<_> = raw.backend.keys().map(String::as_str).collect();
            options.sort_unstable();

            return Err(format!(
                "storage.type is required when backend options are set ({})",
                options.join(", ")
            ));
        } else {
            toml::Value::Table(raw.backend)
                .try_into()
                .map_err(|e: toml::de::Error| e.message().to_string())?
        };

        Ok(Self {
            backend,
            cleanup_interval: raw.cleanup_interval,
        })
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackendConfig::Memory,
            cleanup_interval: Duration::from_secs(60 * 60),
        }
    }
}

/// Available storage backends.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StorageBackendConfig {
    /// Process-local map. Counts are lost on restart.
    #[default]
    Memory,
    /// A JSON file on local disk.
    File(FileStorageConfig),
    /// A Redis server shared by all instances.
    Redis(RedisStorageConfig),
}

impl StorageBackendConfig {
    /// Short backend name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::File(_) => "file",
            Self::Redis(_) => "redis",
        }
    }
}

/// JSON file backend configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileStorageConfig {
    /// Location of the storage file. Parent directories are created on demand.
    pub path: PathBuf,
}

/// Redis backend configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisStorageConfig {
    /// Connection URL, `redis://` or `rediss://`.
    pub url: Url,
    /// Prefix of every key written by the service.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Connection pool settings.
    #[serde(default)]
    pub pool: RedisPoolConfig,
}

/// Redis connection pool settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RedisPoolConfig {
    /// Maximum number of pooled connections.
    pub max_size: usize,
    /// How long to wait for a free connection.
    #[serde(deserialize_with = "deserialize_duration")]
    pub wait_timeout: Duration,
}

impl Default for RedisPoolConfig {
    fn default() -> Self {
        Self {
            max_size: 16,
            wait_timeout: Duration::from_secs(5),
        }
    }
}

fn default_key_prefix() -> String {
    "meter".to_string()
}
