use std::net::SocketAddr;

use anyhow::Context;
use args::Args;
use clap::Parser;
use config::Config;
use server::ServeConfig;
use tokio_util::sync::CancellationToken;

mod args;

const DEFAULT_LISTEN_ADDRESS: &str = "127.0.0.1:8000";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match args.config_path() {
        Some(path) => {
            Config::load(&path).with_context(|| format!("failed to load configuration from {}", path.display()))?
        }
        None => Config::default(),
    };

    let listen_address = match args.listen_address.or(config.server.listen_address) {
        Some(address) => address,
        None => DEFAULT_LISTEN_ADDRESS.parse::<SocketAddr>()?,
    };

    let shutdown_signal = CancellationToken::new();

    tokio::spawn({
        let shutdown_signal = shutdown_signal.clone();

        async move {
            if let Err(error) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for the shutdown signal: {error}");
                return;
            }

            log::info!("Shutting down");
            shutdown_signal.cancel();
        }
    });

    server::serve(ServeConfig {
        listen_address,
        config,
        shutdown_signal,
        log_filter: args.log,
    })
    .await?;

    Ok(())
}
