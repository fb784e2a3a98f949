//! Process-wide realtime session control plane.
//!
//! Two layers: environment-derived defaults loaded once at startup, and
//! runtime overrides written through the admin settings endpoint. Readers
//! get a merged snapshot rendered as a ready-to-send `session.update`
//! event. Overrides live for the process lifetime; a restart reverts to
//! the defaults.

use std::sync::{Arc, RwLock};

use serde_json::{json, Map, Value};

use crate::config::SessionDefaults;
use crate::core::session::{filter_overrides, merge_missing, SessionPayload};

/// Control-plane state. Clones share the same overrides layer.
#[derive(Clone)]
pub struct ControlPlane {
    defaults: Arc<SessionDefaults>,
    overrides: Arc<RwLock<Map<String, Value>>>,
}

impl ControlPlane {
    pub fn new(defaults: SessionDefaults) -> Self {
        Self {
            defaults: Arc::new(defaults),
            overrides: Arc::new(RwLock::new(Map::new())),
        }
    }

    /// The env-derived defaults, untouched by overrides.
    pub fn defaults(&self) -> SessionPayload {
        self.defaults.to_payload()
    }

    /// Replace the overrides layer. Incoming fields pass the same
    /// allow-list as carrier-supplied overrides; an empty object clears
    /// the layer.
    pub fn set_overrides(&self, value: Value) {
        let filtered = filter_overrides(value);
        let mut guard = self.overrides.write().expect("overrides lock poisoned");
        tracing::info!(
            fields = filtered.len(),
            "control plane overrides updated"
        );
        *guard = filtered;
    }

    /// Current overrides layer, as stored.
    pub fn overrides(&self) -> Map<String, Value> {
        self.overrides.read().expect("overrides lock poisoned").clone()
    }

    /// Merged session object: overrides win, defaults fill the rest.
    pub fn session_object(&self) -> Map<String, Value> {
        let mut merged = self.overrides();
        merge_missing(&mut merged, self.defaults.to_payload().to_map());
        merged
    }

    /// A fully-populated `session.update` event, ready to send on a model
    /// WebSocket.
    pub fn session_update_event(&self) -> Value {
        json!({
            "type": "session.update",
            "session": Value::Object(self.session_object()),
        })
    }

    /// Default credential expiry in seconds.
    pub fn token_expiry_seconds(&self) -> u64 {
        self.defaults.token_expiry_seconds
    }

    /// Default model identifier.
    pub fn model(&self) -> &str {
        &self.defaults.model
    }
}
