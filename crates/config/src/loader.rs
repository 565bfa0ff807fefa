use std::path::Path;

use indoc::formatdoc;
use secrecy::ExposeSecret;

use crate::{Config, StorageBackendConfig, error::Error};

/// Admin keys shorter than this are accepted with a warning.
const RECOMMENDED_ADMIN_KEY_LENGTH: usize = 32;

pub fn load<P: AsRef<Path>>(path: P) -> crate::Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())?;
    parse(&content)
}

pub fn parse(content: &str) -> crate::Result<Config> {
    let config: Config = toml::from_str(content)?;

    validate_quota(&config)?;
    validate_storage(&config)?;

    for warning in collect_warnings(&config) {
        log::warn!("{warning}");
    }

    Ok(config)
}

pub(crate) fn validate_quota(config: &Config) -> crate::Result<()> {
    if config.quota.free_limit == 0 {
        return Err(Error::Invalid(
            "quota.free_limit must be greater than zero, otherwise no client can ever be served".to_string(),
        ));
    }

    if config.quota.retry.max_attempts == 0 {
        return Err(Error::Invalid(
            "quota.retry.max_attempts must be at least 1 (the first attempt counts)".to_string(),
        ));
    }

    if config.quota.operation_timeout.is_zero() {
        return Err(Error::Invalid(
            "quota.operation_timeout must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

pub(crate) fn validate_storage(config: &Config) -> crate::Result<()> {
    match &config.storage.backend {
        StorageBackendConfig::Memory => Ok(()),
        StorageBackendConfig::File(file) => {
            if file.path.as_os_str().is_empty() {
                return Err(Error::Invalid("storage.path must not be empty".to_string()));
            }

            Ok(())
        }
        StorageBackendConfig::Redis(redis) => {
            if !matches!(redis.url.scheme(), "redis" | "rediss") {
                return Err(Error::Invalid(formatdoc! {r#"
                        storage.url must use the redis:// or rediss:// scheme, got '{}'.

                        Example configuration:

                          [storage]
                          type = "redis"
                          url = "redis://localhost:6379/0"
                    "#,
                    redis.url.scheme()
                }));
            }

            if redis.pool.max_size == 0 {
                return Err(Error::Invalid("storage.pool.max_size must be greater than zero".to_string()));
            }

            if redis.key_prefix.is_empty() || redis.key_prefix.contains(char::is_whitespace) {
                return Err(Error::Invalid(
                    "storage.key_prefix must be non-empty and contain no whitespace".to_string(),
                ));
            }

            Ok(())
        }
    }
}

pub(crate) fn collect_warnings(config: &Config) -> Vec<String> {
    let mut warnings = Vec::new();

    match &config.server.admin_key {
        Some(key) if key.expose_secret().len() < RECOMMENDED_ADMIN_KEY_LENGTH => {
            warnings.push(format!(
                "server.admin_key is shorter than {RECOMMENDED_ADMIN_KEY_LENGTH} characters, consider a longer key"
            ));
        }
        Some(_) => {}
        None => {
            warnings.push(
                "server.admin_key is not set, administrative endpoints are reachable without authentication"
                    .to_string(),
            );
        }
    }

    if matches!(config.storage.backend, StorageBackendConfig::Memory) {
        warnings.push("storage.type is 'memory', usage counts will be lost on restart".to_string());
    }

    warnings
}
