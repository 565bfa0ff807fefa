use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;

/// Usage metering service with per-client quotas and paid entitlements.
#[derive(Debug, Parser)]
#[command(name = "meter", version)]
pub struct Args {
    /// Path to the TOML configuration file. Without it, `meter.toml` in the
    /// working directory is used when present.
    #[arg(short, long, env = "METER_CONFIG")]
    pub config: Option<PathBuf>,

    /// IP address and port to listen on. Overrides `server.listen_address`.
    #[arg(short, long, env = "METER_LISTEN_ADDRESS")]
    pub listen_address: Option<SocketAddr>,

    /// Log filter, e.g. "info" or "server=debug,quota=debug".
    #[arg(long, env = "METER_LOG", default_value = "info")]
    pub log: String,
}

impl Args {
    /// The configuration file to read, if any.
    pub fn config_path(&self) -> Option<PathBuf> {
        match &self.config {
            Some(path) => Some(path.clone()),
            None => {
                let fallback = PathBuf::from(DEFAULT_CONFIG_PATH);
                fallback.exists().then_some(fallback)
            }
        }
    }
}

const DEFAULT_CONFIG_PATH: &str = "meter.toml";
