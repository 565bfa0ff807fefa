//! Housekeeping of expired entitlements.

use std::time::Duration;

use quota::QuotaManager;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Purges expired entitlements and logs the state of the store. Failures are
/// logged, startup continues.
pub(crate) async fn on_startup(manager: &QuotaManager) {
    if let Err(error) = manager.purge_expired().await {
        log::warn!("Startup cleanup of expired entitlements failed: {error}");
    }

    match manager.stats().await {
        Ok(stats) => log::info!(
            "Storage holds {} clients, {} recorded calls, {} with an active entitlement",
            stats.total_clients,
            stats.total_usage,
            stats.total_premium_clients
        ),
        Err(error) => log::warn!("Failed to read storage statistics: {error}"),
    }
}

/// Purges expired entitlements every `interval` until `shutdown` fires.
pub(crate) fn spawn_cleanup(manager: QuotaManager, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(error) = manager.purge_expired().await {
                        log::warn!("Periodic cleanup of expired entitlements failed: {error}");
                    }
                }
            }
        }

        log::debug!("Entitlement cleanup stopped");
    })
}
