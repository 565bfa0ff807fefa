mod admin;
mod admin_key;
mod api;
mod error;
mod logger;
mod maintenance;
mod response;
mod tracing;

use std::net::SocketAddr;

use axum::{
    Router,
    routing::{get, post},
};
use config::Config;
use quota::QuotaManager;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::{admin_key::AdminKeyLayer, tracing::TracingLayer};

pub use error::Error;

pub(crate) type Result<T> = std::result::Result<T, error::Error>;

pub struct ServeConfig {
    pub listen_address: SocketAddr,
    pub config: Config,
    /// Cancelling the token stops the server and its background tasks.
    pub shutdown_signal: CancellationToken,
    /// Log filter, e.g. "info" or "server=debug,quota=debug".
    pub log_filter: String,
}

pub async fn serve(
    ServeConfig {
        listen_address,
        config,
        shutdown_signal,
        log_filter,
    }: ServeConfig,
) -> crate::Result<()> {
    logger::init(&log_filter);

    let manager = QuotaManager::new(&config).await?;

    let listener = TcpListener::bind(listen_address).await.map_err(Error::Bind)?;

    maintenance::on_startup(&manager).await;

    let cleanup = maintenance::spawn_cleanup(
        manager.clone(),
        config.storage.cleanup_interval,
        shutdown_signal.child_token(),
    );

    let app = router(&config).with_state(manager);
    log::info!("Metering API listening on http://{listen_address}");

    if !config.server.requires_admin_key() {
        log::warn!("No admin key configured, administrative endpoints are not protected");
    }

    let token = shutdown_signal.clone();

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await
        .map_err(Error::Server);

    shutdown_signal.cancel();

    if let Err(error) = cleanup.await {
        log::warn!("Entitlement cleanup task ended abnormally: {error}");
    }

    result
}

fn router(config: &Config) -> Router<QuotaManager> {
    let public = Router::new().route("/api/usage", get(api::get_usage).post(api::record_usage));

    let protected = Router::new()
        .route(
            "/api/entitlements",
            post(api::grant_entitlement).delete(api::revoke_entitlement),
        )
        .route("/api/migrations", post(api::migrate))
        .route("/admin/stats", get(admin::stats))
        .route("/admin/export", get(admin::export))
        .route("/admin/import", post(admin::import))
        .route("/admin/cleanup", post(admin::cleanup))
        .route("/admin/site-usage", get(admin::site_usage).patch(admin::set_site_limit))
        .route("/admin/site-usage/reset", post(admin::reset_site_usage))
        .route_layer(AdminKeyLayer::new(config.server.admin_key.as_ref()));

    let mut app = public.merge(protected);

    if config.server.health.enabled {
        app = app.route(&config.server.health.path, get(admin::health));
    }

    app.layer(TracingLayer::new())
}
