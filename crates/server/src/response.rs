//! The JSON envelope shared by every endpoint.

use axum::{
    Json,
    extract::rejection::{JsonRejection, QueryRejection},
    response::{IntoResponse, Response},
};
use http::StatusCode;
use quota::{MigrationOutcome, QuotaError, UsageSnapshot};
use serde::Serialize;

/// `{ success, data?, error?, code? }`
#[derive(Debug, Serialize)]
pub(crate) struct Envelope<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
}

/// A successful response carrying `data`.
pub(crate) fn ok<T: Serialize>(data: T) -> Response {
    Json(Envelope {
        success: true,
        data: Some(data),
        error: None,
        code: None,
    })
    .into_response()
}

fn failure<T: Serialize>(status: StatusCode, code: &'static str, error: String, data: Option<T>) -> Response {
    let body = Envelope {
        success: false,
        data,
        error: Some(error),
        code: Some(code),
    };

    (status, Json(body)).into_response()
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum ApiError {
    #[error("Missing required parameter: {0}")]
    MissingParams(&'static str),

    #[error("{0}")]
    InvalidParams(String),

    #[error("Missing admin key")]
    Unauthorized,

    #[error("Invalid admin key")]
    Forbidden,

    #[error("Migration could not be verified, the previous client id was left unchanged")]
    MigrationFailed(MigrationOutcome),

    #[error(transparent)]
    Quota(#[from] QuotaError),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::InvalidParams(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::InvalidParams(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = self.to_string();

        match self {
            Self::MissingParams(_) => {
                failure::<()>(StatusCode::BAD_REQUEST, "MISSING_PARAMS", message, None)
            }
            Self::InvalidParams(_) | Self::Quota(QuotaError::InvalidIdentity(_)) => {
                failure::<()>(StatusCode::BAD_REQUEST, "INVALID_PARAMS", message, None)
            }
            Self::Unauthorized => failure::<()>(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message, None),
            Self::Forbidden => failure::<()>(StatusCode::FORBIDDEN, "FORBIDDEN", message, None),
            Self::MigrationFailed(outcome) => failure(
                StatusCode::CONFLICT,
                "MIGRATION_VERIFICATION_FAILED",
                message,
                Some(outcome),
            ),
            Self::Quota(QuotaError::StorageContention { snapshot, .. }) => {
                log::error!("{message}");

                failure::<UsageSnapshot>(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "STORAGE_CONTENTION",
                    "Usage could not be recorded, please retry".to_string(),
                    Some(snapshot),
                )
            }
            Self::Quota(QuotaError::Storage(error)) => {
                log::error!("Storage failure: {error}");

                failure::<()>(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "STORAGE_ERROR",
                    "Internal server error".to_string(),
                    None,
                )
            }
        }
    }
}
