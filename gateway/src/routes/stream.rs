//! Carrier media-stream WebSocket routes.
//!
//! `GET /stream/twilio` and `GET /stream/twilio/{token}` upgrade to the
//! bridge. The credential may ride in the path segment (preferred: some
//! carriers strip query strings) or the `secret` query parameter.

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

pub fn create_stream_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/stream/twilio", get(handlers::stream::stream_upgrade))
        .route(
            "/stream/twilio/{token}",
            get(handlers::stream::stream_upgrade_with_token),
        )
        .layer(TraceLayer::new_for_http())
}
