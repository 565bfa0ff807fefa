//! HTTP server configuration settings.

use std::net::SocketAddr;

use secrecy::SecretString;
use serde::Deserialize;

/// HTTP server configuration settings.
#[derive(Default, Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// The socket address the server should listen on.
    pub listen_address: Option<SocketAddr>,
    /// Key expected in the `x-admin-key` header of administrative requests.
    /// When unset, administrative endpoints are not protected.
    pub admin_key: Option<SecretString>,
    /// Health endpoint configuration.
    pub health: HealthConfig,
}

impl ServerConfig {
    /// Returns whether administrative endpoints require a key.
    pub fn requires_admin_key(&self) -> bool {
        self.admin_key.is_some()
    }
}

/// Health endpoint configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HealthConfig {
    /// Whether the health endpoint is served.
    pub enabled: bool,
    /// The path of the health endpoint.
    pub path: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "/health".to_string(),
        }
    }
}
