//! Operator endpoints: statistics, backup/restore, cleanup and the site-wide
//! monthly aggregate.

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use quota::{QuotaManager, SiteAggregate, StoreSnapshot};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::response::{ApiError, ok};

type ApiResult = Result<Response, ApiError>;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SiteUsageView {
    period: String,
    total_count: u64,
    max_limit: u64,
    is_limit_reached: bool,
}

impl From<SiteAggregate> for SiteUsageView {
    fn from(site: SiteAggregate) -> Self {
        Self {
            is_limit_reached: site.is_limit_reached(),
            period: site.period,
            total_count: site.total_count,
            max_limit: site.max_limit,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SiteLimitRequest {
    max_limit: Option<u64>,
}

/// `GET /admin/stats`
pub(crate) async fn stats(State(manager): State<QuotaManager>) -> ApiResult {
    Ok(ok(manager.stats().await?))
}

/// `GET /admin/export`
pub(crate) async fn export(State(manager): State<QuotaManager>) -> ApiResult {
    Ok(ok(manager.export().await?))
}

/// `POST /admin/import`
pub(crate) async fn import(
    State(manager): State<QuotaManager>,
    body: Result<Json<StoreSnapshot>, JsonRejection>,
) -> ApiResult {
    let Json(snapshot) = body?;
    let clients = snapshot.clients.len();

    manager.import(snapshot).await?;

    Ok(ok(json!({ "importedClients": clients })))
}

/// `POST /admin/cleanup`
pub(crate) async fn cleanup(State(manager): State<QuotaManager>) -> ApiResult {
    let purged = manager.purge_expired().await?;

    Ok(ok(json!({ "purgedEntitlements": purged })))
}

/// `GET /admin/site-usage`
pub(crate) async fn site_usage(State(manager): State<QuotaManager>) -> ApiResult {
    Ok(ok(SiteUsageView::from(manager.site_usage().await?)))
}

/// `PATCH /admin/site-usage`
pub(crate) async fn set_site_limit(
    State(manager): State<QuotaManager>,
    body: Result<Json<SiteLimitRequest>, JsonRejection>,
) -> ApiResult {
    let Json(request) = body?;

    let max_limit = request.max_limit.ok_or(ApiError::MissingParams("maxLimit"))?;

    if max_limit == 0 {
        return Err(ApiError::InvalidParams("maxLimit must be greater than zero".to_string()));
    }

    Ok(ok(SiteUsageView::from(manager.set_site_limit(max_limit).await?)))
}

/// `POST /admin/site-usage/reset`
pub(crate) async fn reset_site_usage(State(manager): State<QuotaManager>) -> ApiResult {
    Ok(ok(SiteUsageView::from(manager.reset_site_usage().await?)))
}

/// Health probe, mounted at the configured path.
pub(crate) async fn health(State(manager): State<QuotaManager>) -> Response {
    let report = manager.health().await;

    let status = if report.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(report)).into_response()
}
