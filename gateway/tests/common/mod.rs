//! Shared fixtures for integration tests.

use std::sync::Arc;

use axum::Router;
use callbridge_gateway::config::{ServerConfig, SessionDefaults};
use callbridge_gateway::{routes, AppState};

/// Minimal test configuration. Upstream URLs point at unroutable ports
/// unless a test overrides them with a mock server.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        tls: None,
        openai_api_key: Some("sk-test".to_string()),
        openai_org_id: None,
        openai_project_id: None,
        client_secrets_url: "http://127.0.0.1:1/v1/realtime/client_secrets".to_string(),
        realtime_ws_url: "ws://127.0.0.1:1/v1/realtime".to_string(),
        twilio_account_sid: Some("AC00000000000000000000000000000000".to_string()),
        twilio_auth_token: Some("test_auth_token".to_string()),
        twilio_from_number: Some("+15550001111".to_string()),
        carrier_api_base: "http://127.0.0.1:1".to_string(),
        public_base_url: Some("https://gw.example.com".to_string()),
        external_bridge_url: None,
        default_document_mode: None,
        sip_gateway_domain: "sip.example.com".to_string(),
        control_secret: Some("control-secret".to_string()),
        control_signing_secret: Some("signing-secret".to_string()),
        control_admin_secret: Some("a".repeat(32)),
        control_tolerance_seconds: 300,
        max_concurrent_calls: 10,
        cors_allowed_origins: None,
        session_defaults: SessionDefaults {
            model: "gpt-realtime".to_string(),
            voice: Some("marin".to_string()),
            token_expiry_seconds: 600,
            ..Default::default()
        },
    }
}

pub async fn test_state(config: ServerConfig) -> Arc<AppState> {
    AppState::new(config).await
}

pub fn app(state: Arc<AppState>) -> Router {
    routes::create_api_router()
        .merge(routes::create_stream_router())
        .with_state(state)
}
