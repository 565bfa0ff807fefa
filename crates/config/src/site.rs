use serde::Deserialize;

/// Site-wide monthly aggregate settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SiteConfig {
    /// Total calls allowed per calendar month across all clients, used when a
    /// month is seen for the first time.
    pub max_limit: u64,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { max_limit: 10_000 }
    }
}
