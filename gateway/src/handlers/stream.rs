//! Carrier media-stream WebSocket endpoint.
//!
//! `GET /stream/twilio` (and `/stream/twilio/{token}`) upgrades the
//! carrier's connection and hands the socket to the bridge. The ephemeral
//! credential is looked for in three places, in order: the URL path
//! segment, the `secret` query parameter, and a form-encoded query body -
//! carriers differ in what they preserve when dialing a stream URL.
//!
//! A request without upgrade headers is answered 426; a connection without
//! a credential is accepted and immediately closed with code 1008 so the
//! carrier sees a proper WebSocket close rather than a dropped TCP stream.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocketUpgrade};
use axum::extract::{FromRequestParts, Path, RawQuery, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::SinkExt;

use crate::bridge::{run_bridge, CLOSE_POLICY_VIOLATION};
use crate::state::AppState;

/// A [`WebSocketUpgrade`] that tolerates plain HTTP requests, so the
/// handler can answer 426 itself instead of axum's default rejection.
pub struct MaybeUpgrade(pub Option<WebSocketUpgrade>);

impl<S> FromRequestParts<S> for MaybeUpgrade
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Infallible> {
        Ok(MaybeUpgrade(
            WebSocketUpgrade::from_request_parts(parts, state).await.ok(),
        ))
    }
}

/// GET /stream/twilio
pub async fn stream_upgrade(
    State(state): State<Arc<AppState>>,
    MaybeUpgrade(ws): MaybeUpgrade,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Response {
    handle_upgrade(state, ws, headers, None, query)
}

/// GET /stream/twilio/{token}
pub async fn stream_upgrade_with_token(
    State(state): State<Arc<AppState>>,
    MaybeUpgrade(ws): MaybeUpgrade,
    headers: HeaderMap,
    Path(token): Path<String>,
    RawQuery(query): RawQuery,
) -> Response {
    handle_upgrade(state, ws, headers, Some(token), query)
}

fn handle_upgrade(
    state: Arc<AppState>,
    ws: Option<WebSocketUpgrade>,
    headers: HeaderMap,
    path_token: Option<String>,
    query: Option<String>,
) -> Response {
    let Some(ws) = ws else {
        // Plain HTTP request to a WebSocket-only endpoint.
        return (StatusCode::UPGRADE_REQUIRED, "WebSocket upgrade required").into_response();
    };

    let Some(slot) = state.try_acquire_call_slot() else {
        tracing::warn!(
            active = state.active_bridge_count(),
            "bridge capacity exhausted, refusing call"
        );
        return (StatusCode::SERVICE_UNAVAILABLE, "at capacity").into_response();
    };

    let credential = extract_credential(path_token, query.as_deref());

    // The carrier advertises a subprotocol and expects it echoed back.
    let requested_protocol = headers
        .get("sec-websocket-protocol")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string());

    let ws = match requested_protocol {
        Some(protocol) => ws.protocols([protocol]),
        None => ws,
    };

    ws.on_upgrade(move |socket| async move {
        let _slot = slot;
        match credential {
            Some(credential) => run_bridge(state, credential, socket).await,
            None => {
                tracing::warn!("carrier connected without a credential, closing 1008");
                let mut socket = socket;
                let _ = socket
                    .send(Message::Close(Some(CloseFrame {
                        code: CLOSE_POLICY_VIOLATION,
                        reason: "missing credential".into(),
                    })))
                    .await;
            }
        }
    })
}

/// Find the ephemeral credential: path segment, then `secret` query
/// parameter, then a form-encoded fallback where the token arrives as a
/// lone key with no value.
fn extract_credential(path_token: Option<String>, query: Option<&str>) -> Option<String> {
    if let Some(token) = path_token {
        let decoded = urlencoding::decode(&token).map(|t| t.into_owned()).ok();
        let decoded = decoded.unwrap_or(token);
        if !decoded.is_empty() {
            return Some(decoded);
        }
    }

    let query = query?;
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        if key == "secret" && !value.is_empty() {
            return Some(value.into_owned());
        }
    }

    // Form-encoded fallback: some carriers mangle the query into a single
    // bare field.
    let mut pairs = url::form_urlencoded::parse(query.as_bytes());
    match (pairs.next(), pairs.next()) {
        (Some((key, value)), None) if value.is_empty() && !key.is_empty() => {
            Some(key.into_owned())
        }
        _ => None,
    }
}
