//! Authentication errors.
//!
//! Deliberately coarse: the response bodies never explain which check
//! failed, only whether the caller lacked credentials (401) or presented
//! credentials that do not grant access (403).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Errors from bearer, HMAC-envelope, and carrier-signature checks.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing credentials")]
    MissingCredentials,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("signature mismatch")]
    BadSignature,

    #[error("timestamp outside tolerance")]
    StaleTimestamp,

    #[error("forbidden")]
    Forbidden,
}

pub type AuthResult<T> = Result<T, AuthError>;

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match self {
            AuthError::Forbidden => StatusCode::FORBIDDEN,
            _ => StatusCode::UNAUTHORIZED,
        };
        (status, Json(json!({ "error": "unauthorized" }))).into_response()
    }
}
