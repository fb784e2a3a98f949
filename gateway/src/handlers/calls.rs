//! Outbound call placement and the call listing.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use crate::core::outbound::{CallDirection, CallRecord, PlaceCallRequest};
use crate::errors::app_error::{AppError, AppResult};
use crate::state::AppState;

/// POST /calls: place an outbound call pointing at our control document.
pub async fn place_call(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PlaceCallRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let dispatcher = state
        .dispatcher
        .as_ref()
        .ok_or(AppError::NotConfigured("TWILIO_ACCOUNT_SID / TWILIO_AUTH_TOKEN"))?;

    let from = request
        .from
        .clone()
        .or_else(|| state.config.twilio_from_number.clone())
        .ok_or(AppError::NotConfigured("TWILIO_FROM_NUMBER"))?;

    let base = state
        .config
        .public_base_url
        .as_ref()
        .ok_or(AppError::NotConfigured("PUBLIC_BASE_URL"))?;
    let document_url = format!("{base}/twiml?mode=stream");

    let call_sid = dispatcher.place(&request, &from, &document_url).await?;

    state.calls.upsert(CallRecord {
        call_sid: call_sid.clone(),
        to: request.to.clone(),
        from,
        direction: CallDirection::Outbound,
        status: "queued".into(),
        created_at: chrono::Utc::now(),
    });

    Ok((StatusCode::CREATED, Json(json!({ "call_sid": call_sid }))))
}

/// GET /calls: records this process has seen, newest first.
pub async fn list_calls(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "calls": state.calls.list() }))
}
