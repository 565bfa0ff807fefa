//! Client-facing endpoints: usage, entitlements and migrations.

use axum::{
    Json,
    extract::{
        Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    response::Response,
};
use quota::{Entitlement, QuotaManager};
use serde::Deserialize;

use crate::response::{ApiError, ok};

type ApiResult = Result<Response, ApiError>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ClientQuery {
    client_id: Option<String>,
}

impl ClientQuery {
    fn client_id(query: Result<Query<Self>, QueryRejection>) -> Result<String, ApiError> {
        let Query(query) = query?;

        query
            .client_id
            .filter(|id| !id.is_empty())
            .ok_or(ApiError::MissingParams("clientId"))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GrantRequest {
    client_id: Option<String>,
    entitlement: Option<Entitlement>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MigrationRequest {
    old_client_id: Option<String>,
    new_client_id: Option<String>,
}

/// `GET /api/usage?clientId=`
pub(crate) async fn get_usage(
    State(manager): State<QuotaManager>,
    query: Result<Query<ClientQuery>, QueryRejection>,
) -> ApiResult {
    let client_id = ClientQuery::client_id(query)?;

    Ok(ok(manager.get_usage(&client_id).await?))
}

/// `POST /api/usage?clientId=`
pub(crate) async fn record_usage(
    State(manager): State<QuotaManager>,
    query: Result<Query<ClientQuery>, QueryRejection>,
) -> ApiResult {
    let client_id = ClientQuery::client_id(query)?;

    Ok(ok(manager.record_usage(&client_id).await?))
}

/// `POST /api/entitlements`
pub(crate) async fn grant_entitlement(
    State(manager): State<QuotaManager>,
    body: Result<Json<GrantRequest>, JsonRejection>,
) -> ApiResult {
    let Json(request) = body?;

    let client_id = request.client_id.ok_or(ApiError::MissingParams("clientId"))?;
    let entitlement = request.entitlement.ok_or(ApiError::MissingParams("entitlement"))?;

    Ok(ok(manager.grant_entitlement(&client_id, entitlement).await?))
}

/// `DELETE /api/entitlements?clientId=`
pub(crate) async fn revoke_entitlement(
    State(manager): State<QuotaManager>,
    query: Result<Query<ClientQuery>, QueryRejection>,
) -> ApiResult {
    let client_id = ClientQuery::client_id(query)?;

    Ok(ok(manager.revoke_entitlement(&client_id).await?))
}

/// `POST /api/migrations`
pub(crate) async fn migrate(
    State(manager): State<QuotaManager>,
    body: Result<Json<MigrationRequest>, JsonRejection>,
) -> ApiResult {
    let Json(request) = body?;

    let old_client_id = request.old_client_id.ok_or(ApiError::MissingParams("oldClientId"))?;
    let new_client_id = request.new_client_id.ok_or(ApiError::MissingParams("newClientId"))?;

    let outcome = manager.migrate(&old_client_id, &new_client_id).await?;

    if !outcome.succeeded() {
        return Err(ApiError::MigrationFailed(outcome));
    }

    Ok(ok(outcome))
}
