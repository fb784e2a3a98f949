//! Control webhook and runtime-override endpoints.
//!
//! `POST /control` is pulled by the model mid-call to fetch session
//! updates; it accepts either a shared bearer token or an HMAC-SHA256
//! signed-request envelope over `timestamp.body`. `GET /control` exposes
//! the same payload for diagnostics. `/control/settings` reads and writes
//! the runtime overrides layer and is guarded by a separate admin bearer.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};

use crate::auth::{
    bearer_token, verify_admin_bearer, verify_bearer, verify_signed_request,
};
use crate::errors::app_error::{AppError, AppResult};
use crate::errors::auth_error::AuthError;
use crate::state::AppState;

/// Headers carrying the signed-request envelope. The webhook-style names
/// are accepted as aliases.
const TIMESTAMP_HEADERS: &[&str] = &["x-control-timestamp", "webhook-timestamp"];
const SIGNATURE_HEADERS: &[&str] = &["x-control-signature", "webhook-signature"];

fn first_header<'a>(headers: &'a HeaderMap, names: &[&str]) -> Option<&'a str> {
    names
        .iter()
        .find_map(|name| headers.get(*name).and_then(|v| v.to_str().ok()))
}

/// Authenticate a control request: shared bearer first, then the signed
/// envelope. With neither secret configured the endpoint is closed.
fn authorize_control(
    state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<(), AuthError> {
    if let Some(secret) = &state.config.control_secret {
        if let Some(presented) = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(bearer_token)
        {
            return verify_bearer(presented, secret);
        }
    }

    if let Some(signing_secret) = &state.config.control_signing_secret {
        let timestamp = first_header(headers, TIMESTAMP_HEADERS)
            .ok_or(AuthError::MissingCredentials)?;
        let signature = first_header(headers, SIGNATURE_HEADERS)
            .ok_or(AuthError::MissingCredentials)?;
        return verify_signed_request(
            signing_secret,
            timestamp,
            body,
            signature,
            state.config.control_tolerance_seconds,
            chrono::Utc::now().timestamp(),
        );
    }

    Err(AuthError::MissingCredentials)
}

/// POST /control: session-update pull.
pub async fn control_post(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<Value>> {
    authorize_control(&state, &headers, &body).map_err(AppError::Auth)?;
    Ok(Json(json!({
        "events": [state.control.session_update_event()],
    })))
}

/// GET /control: current update, for diagnostics.
pub async fn control_get(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    authorize_control(&state, &headers, b"").map_err(AppError::Auth)?;
    Ok(Json(state.control.session_update_event()))
}

fn authorize_admin(state: &AppState, headers: &HeaderMap) -> Result<(), AuthError> {
    let secret = state
        .config
        .control_admin_secret
        .as_deref()
        .ok_or(AuthError::MissingCredentials)?;
    let presented = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token)
        .ok_or(AuthError::MissingCredentials)?;
    verify_admin_bearer(presented, secret)
}

/// GET /control/settings: overrides layer plus the merged session.
pub async fn settings_get(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    authorize_admin(&state, &headers).map_err(AppError::Auth)?;
    Ok(Json(json!({
        "overrides": Value::Object(state.control.overrides()),
        "effective": Value::Object(state.control.session_object()),
    })))
}

/// POST /control/settings: replace the overrides layer.
pub async fn settings_post(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> AppResult<Json<Value>> {
    authorize_admin(&state, &headers).map_err(AppError::Auth)?;
    if !body.is_object() {
        return Err(AppError::Validation("overrides must be a JSON object".into()));
    }
    state.control.set_overrides(body);
    Ok(Json(json!({
        "overrides": Value::Object(state.control.overrides()),
    })))
}
