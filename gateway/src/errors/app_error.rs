//! Application-level error type shared by the HTTP handlers.
//!
//! Every handler returns `AppResult<T>`; the `IntoResponse` impl maps each
//! error kind onto the status code and JSON body the API contract promises.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::core::token::MintError;
use crate::errors::auth_error::AuthError;

/// Errors surfaced by HTTP handlers.
#[derive(Debug, Error)]
pub enum AppError {
    /// Request failed validation (bad E.164, out-of-range parameter, bad schema)
    #[error("invalid input: {0}")]
    Validation(String),

    /// Authentication or signature verification failed
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The credential endpoint rejected the mint or returned no usable secret
    #[error(transparent)]
    Mint(#[from] MintError),

    /// The carrier REST API rejected an outbound-call request
    #[error("carrier API error ({status}): {body}")]
    Carrier {
        status: u16,
        body: serde_json::Value,
    },

    /// A required configuration value is missing
    #[error("not configured: {0}")]
    NotConfigured(&'static str),

    /// Catch-all for unexpected internal failures
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Result type for HTTP handlers.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Validation(detail) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "invalid_input", "detail": detail })),
            )
                .into_response(),

            AppError::Auth(err) => err.into_response(),

            AppError::Mint(err) => err.into_response(),

            AppError::Carrier { status, body } => {
                let status =
                    StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
                (status, Json(json!({ "error": "carrier_error", "detail": body })))
                    .into_response()
            }

            AppError::NotConfigured(what) => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": "not_configured", "detail": what })),
            )
                .into_response(),

            AppError::Internal(err) => {
                tracing::error!("internal error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "internal_error" })),
                )
                    .into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn validation_maps_to_400() {
        let resp = AppError::Validation("bad number".into()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn internal_maps_to_500() {
        let resp = AppError::Internal(anyhow::anyhow!("boom")).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
