//! Liveness and environment diagnostics.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde_json::{json, Map, Value};

use crate::config::{env_opt, OPTIONAL_ENV, REQUIRED_ENV};
use crate::state::AppState;

/// GET /health
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "active_calls": state.active_bridge_count(),
    }))
}

/// GET /env-check: boolean presence matrix of recognized environment
/// variables. Values are never echoed.
pub async fn env_check() -> Json<Value> {
    let mut required = Map::new();
    for key in REQUIRED_ENV {
        required.insert((*key).to_string(), Value::Bool(env_opt(key).is_some()));
    }
    let mut optional = Map::new();
    for key in OPTIONAL_ENV {
        optional.insert((*key).to_string(), Value::Bool(env_opt(key).is_some()));
    }

    let ready = required.values().all(|v| v.as_bool().unwrap_or(false));
    Json(json!({
        "ready": ready,
        "required": Value::Object(required),
        "optional": Value::Object(optional),
    }))
}
