//! HTTP route configuration.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// All non-WebSocket routes.
///
/// # Endpoints
///
/// - `GET/POST /twiml`: call-control document
/// - `POST /twiml/action`: post-dial continuation
/// - `POST /realtime-token`: mint ephemeral credential
/// - `POST /calls`, `GET /calls`: outbound dialing and the call listing
/// - `GET/POST /control`, `GET/POST /control/settings`: control webhook
/// - `GET /live/{key}`, `POST /live/{key}/push`: live transcript
/// - `GET /health`, `GET /env-check`: diagnostics
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/twiml",
            get(handlers::twiml::document_get).post(handlers::twiml::document_post),
        )
        .route("/twiml/action", post(handlers::twiml::document_action))
        .route("/realtime-token", post(handlers::token::mint_token))
        .route(
            "/calls",
            post(handlers::calls::place_call).get(handlers::calls::list_calls),
        )
        .route(
            "/control",
            get(handlers::control::control_get).post(handlers::control::control_post),
        )
        .route(
            "/control/settings",
            get(handlers::control::settings_get).post(handlers::control::settings_post),
        )
        .route("/live/{key}", get(handlers::live::live_stream))
        .route("/live/{key}/push", post(handlers::live::live_push))
        .route("/health", get(handlers::api::health_check))
        .route("/env-check", get(handlers::api::env_check))
        .layer(TraceLayer::new_for_http())
}
