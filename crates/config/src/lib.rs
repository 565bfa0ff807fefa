mod error;
mod loader;
mod quota;
mod server;
mod site;
mod storage;

use std::path::Path;

use serde::Deserialize;

pub use error::Error;
pub use quota::{QuotaConfig, RetryConfig};
pub use server::{HealthConfig, ServerConfig};
pub use site::SiteConfig;
pub use storage::{FileStorageConfig, RedisPoolConfig, RedisStorageConfig, StorageBackendConfig, StorageConfig};

pub(crate) type Result<T> = std::result::Result<T, error::Error>;

/// Top-level configuration of the metering service.
#[derive(Default, Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server settings.
    pub server: ServerConfig,
    /// Per-client quota settings.
    pub quota: QuotaConfig,
    /// Site-wide aggregate settings.
    pub site: SiteConfig,
    /// Storage backend selection.
    pub storage: StorageConfig,
}

impl Config {
    /// Reads, parses and validates the configuration file at `path`.
    pub fn load<P: AsRef<Path>>(path: P) -> crate::Result<Config> {
        loader::load(path)
    }

    /// Parses and validates configuration from a TOML string.
    pub fn parse(content: &str) -> crate::Result<Config> {
        loader::parse(content)
    }
}
