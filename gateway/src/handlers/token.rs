//! Ephemeral credential endpoint.
//!
//! `POST /realtime-token` mints a short-lived model credential on behalf
//! of a caller that will open its own model connection (browser clients,
//! SIP documents rendered elsewhere). The server's API key never leaves
//! this process; only the ephemeral secret does.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

use crate::core::session::validate_expiry_seconds;
use crate::core::token::{EphemeralCredential, MintRequest, WebhookRef};
use crate::errors::app_error::{AppError, AppResult};
use crate::state::AppState;

/// Request body. All fields optional; the control-plane session is the
/// default payload.
#[derive(Debug, Default, Deserialize)]
pub struct TokenRequest {
    #[serde(default)]
    pub expires_after: Option<ExpiresAfter>,
    #[serde(default)]
    pub session: Option<Value>,
    #[serde(default)]
    pub webhook: Option<WebhookRef>,
}

/// Accepts `600` or `{ "seconds": 600 }`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ExpiresAfter {
    Seconds(u64),
    Object { seconds: u64 },
}

impl ExpiresAfter {
    fn seconds(&self) -> u64 {
        match self {
            ExpiresAfter::Seconds(s) => *s,
            ExpiresAfter::Object { seconds } => *seconds,
        }
    }
}

/// POST /realtime-token
pub async fn mint_token(
    State(state): State<Arc<AppState>>,
    body: Option<Json<TokenRequest>>,
) -> AppResult<Json<EphemeralCredential>> {
    let request = body.map(|Json(r)| r).unwrap_or_default();

    let api_key = state
        .config
        .openai_api_key
        .clone()
        .ok_or(AppError::NotConfigured("OPENAI_API_KEY"))?;

    let seconds = request
        .expires_after
        .as_ref()
        .map(ExpiresAfter::seconds)
        .unwrap_or_else(|| state.control.token_expiry_seconds());
    validate_expiry_seconds(seconds).map_err(AppError::Validation)?;

    let session = request
        .session
        .unwrap_or_else(|| Value::Object(state.control.session_object()));

    let credential = state
        .minter
        .mint(
            &api_key,
            MintRequest {
                expires_after_seconds: Some(seconds),
                session,
                webhook: request.webhook,
            },
        )
        .await?;

    tracing::info!(expires_at = credential.expires_at, "ephemeral credential minted");
    Ok(Json(credential))
}
