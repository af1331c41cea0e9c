use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Error taxonomy for the API surface.
///
/// Every variant maps to exactly one HTTP status; handlers return this type
/// and let the `IntoResponse` impl produce the `{"error": ...}` JSON body.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed input: bad id, missing url, empty category name
    #[error("{0}")]
    Validation(String),
    /// No matching row for the requested resource
    #[error("{0} not found")]
    NotFound(&'static str),
    /// A feed with the same URL already exists
    #[error("A feed with this URL already exists")]
    Conflict,
    /// Remote feed unreachable or unparsable
    #[error("{0}")]
    Upstream(String),
    /// Unexpected storage or internal failure
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::Upstream(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Storage failures carry connection strings and SQL; log the chain
        // and hand the client a generic message.
        let message = if let ApiError::Internal(err) = &self {
            error!("internal error: {:#}", err);
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::Internal(err.into())
    }
}
