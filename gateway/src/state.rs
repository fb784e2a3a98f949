//! Shared application state.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::config::ServerConfig;
use crate::core::control::ControlPlane;
use crate::core::outbound::{CallDispatcher, CallRegistry};
use crate::core::token::TokenMinter;
use crate::core::transcript::TranscriptStore;

/// Process-wide state handed to every handler.
pub struct AppState {
    pub config: ServerConfig,
    pub control: ControlPlane,
    pub transcripts: TranscriptStore,
    pub calls: CallRegistry,
    pub minter: TokenMinter,
    /// None when carrier credentials are not configured; outbound dialing
    /// then returns 503.
    pub dispatcher: Option<CallDispatcher>,
    active_bridges: AtomicUsize,
}

impl AppState {
    /// Build state and start background maintenance (transcript sweeper).
    pub async fn new(config: ServerConfig) -> Arc<Self> {
        let control = ControlPlane::new(config.session_defaults.clone());
        let transcripts = TranscriptStore::new();
        transcripts.spawn_sweeper();

        let minter = TokenMinter::new(config.client_secrets_url.clone());

        let dispatcher = match (&config.twilio_account_sid, &config.twilio_auth_token) {
            (Some(sid), Some(token)) => Some(CallDispatcher::new(
                config.carrier_api_base.clone(),
                sid.clone(),
                token.clone(),
            )),
            _ => None,
        };

        Arc::new(Self {
            config,
            control,
            transcripts,
            calls: CallRegistry::new(),
            minter,
            dispatcher,
            active_bridges: AtomicUsize::new(0),
        })
    }

    /// Claim a bridge slot, or None when the process is at capacity.
    pub fn try_acquire_call_slot(self: &Arc<Self>) -> Option<CallSlot> {
        let max = self.config.max_concurrent_calls;
        let mut current = self.active_bridges.load(Ordering::SeqCst);
        loop {
            if current >= max {
                return None;
            }
            match self.active_bridges.compare_exchange(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    return Some(CallSlot {
                        state: self.clone(),
                    })
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Bridges currently running.
    pub fn active_bridge_count(&self) -> usize {
        self.active_bridges.load(Ordering::SeqCst)
    }
}

/// RAII bridge-capacity slot; releases on drop.
pub struct CallSlot {
    state: Arc<AppState>,
}

impl Drop for CallSlot {
    fn drop(&mut self) {
        self.state.active_bridges.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionDefaults;

    fn test_config(max_calls: usize) -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            tls: None,
            openai_api_key: Some("sk-test".into()),
            openai_org_id: None,
            openai_project_id: None,
            client_secrets_url: "http://127.0.0.1:1/secrets".into(),
            realtime_ws_url: "ws://127.0.0.1:1/realtime".into(),
            twilio_account_sid: None,
            twilio_auth_token: None,
            twilio_from_number: None,
            carrier_api_base: "http://127.0.0.1:1".into(),
            public_base_url: Some("https://gw.example.com".into()),
            external_bridge_url: None,
            default_document_mode: None,
            sip_gateway_domain: "sip.example.com".into(),
            control_secret: None,
            control_signing_secret: None,
            control_admin_secret: None,
            control_tolerance_seconds: 300,
            max_concurrent_calls: max_calls,
            cors_allowed_origins: None,
            session_defaults: SessionDefaults {
                model: "gpt-realtime".into(),
                token_expiry_seconds: 600,
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn call_slots_enforce_capacity() {
        let state = AppState::new(test_config(2)).await;
        let a = state.try_acquire_call_slot().unwrap();
        let _b = state.try_acquire_call_slot().unwrap();
        assert!(state.try_acquire_call_slot().is_none());
        assert_eq!(state.active_bridge_count(), 2);

        drop(a);
        assert_eq!(state.active_bridge_count(), 1);
        assert!(state.try_acquire_call_slot().is_some());
    }
}
