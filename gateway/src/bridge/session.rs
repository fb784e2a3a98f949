//! Per-call session record and turn state.
//!
//! One [`CallSession`] exists per carrier connection, created by the
//! carrier's `start` frame and dropped when either socket closes. All of
//! the barge-in arithmetic and the `session.update` layering live here so
//! the socket loop in `bridge` stays a thin relay.

use serde_json::{Map, Value};

use crate::core::carrier::StartInfo;
use crate::core::control::ControlPlane;
use crate::core::model::messages::{ClientEvent, ItemInfo, ResponseOverrides};
use crate::core::session::{
    merge_missing, overrides_from_custom_parameters, ULAW_FORMAT,
};

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgePhase {
    AwaitingStart,
    Connecting,
    AwaitingSessionCreated,
    Active,
    Closing,
}

/// Per-call mutable state.
#[derive(Debug)]
pub struct CallSession {
    pub stream_sid: String,
    pub call_sid: String,
    pub phase: BridgePhase,

    /// Allow-listed overrides decoded from the carrier's custom parameters.
    overrides: Map<String, Value>,
    /// Voice remembered for per-turn `response.create` overrides.
    voice_override: Option<String>,
    /// Output format remembered for per-turn overrides.
    output_format_override: Option<String>,

    /// Millisecond position of the newest caller media frame.
    pub latest_media_ms: u64,
    /// Caller-clock position when the current response's first audio delta
    /// arrived. None until latched.
    pub response_start_ms: Option<u64>,
    /// Item id of the assistant output currently playing.
    pub last_assistant_item: Option<String>,
    /// True between `response.created` and the response's end events.
    pub response_active: bool,
    /// Guards against issuing a second truncate for one response.
    pub interrupted_this_turn: bool,
    /// Set once the post-`session.created` update has been sent; caller
    /// audio is dropped until then.
    pub session_configured: bool,
}

impl CallSession {
    pub fn new(start: &StartInfo) -> Self {
        let overrides = overrides_from_custom_parameters(&start.custom_parameters);
        let voice_override = overrides
            .get("voice")
            .and_then(Value::as_str)
            .map(str::to_string);
        let output_format_override = overrides
            .get("output_audio_format")
            .and_then(Value::as_str)
            .map(str::to_string);

        Self {
            stream_sid: start.stream_sid.clone(),
            call_sid: start.call_sid.clone(),
            phase: BridgePhase::Connecting,
            overrides,
            voice_override,
            output_format_override,
            latest_media_ms: 0,
            response_start_ms: None,
            last_assistant_item: None,
            response_active: false,
            interrupted_this_turn: false,
            session_configured: false,
        }
    }

    /// Transcript key: the call sid, or the stream sid in the window
    /// before `start` metadata carries one.
    pub fn transcript_key(&self) -> &str {
        if self.call_sid.is_empty() {
            &self.stream_sid
        } else {
            &self.call_sid
        }
    }

    /// Build the `session.update` sent after `session.created`.
    ///
    /// Layering: `{type: "realtime"}`, then carrier overrides, then
    /// control-plane defaults for whatever is still absent. The audio
    /// codec is forced to μ-law 8 kHz in both directions last: the
    /// carrier leg cannot speak anything else, regardless of overrides.
    pub fn build_session_update(&self, control: &ControlPlane) -> ClientEvent {
        let mut session = self.overrides.clone();
        session.insert("type".to_string(), Value::String("realtime".to_string()));
        merge_missing(&mut session, control.session_object());
        session.insert(
            "input_audio_format".to_string(),
            Value::String(ULAW_FORMAT.to_string()),
        );
        session.insert(
            "output_audio_format".to_string(),
            Value::String(ULAW_FORMAT.to_string()),
        );

        ClientEvent::SessionUpdate {
            session: Value::Object(session),
        }
    }

    /// Per-turn overrides for a client-driven `response.create`.
    pub fn response_overrides(&self, control: &ControlPlane) -> ResponseOverrides {
        let merged = control.session_object();
        ResponseOverrides {
            modalities: None,
            voice: self.voice_override.clone().or_else(|| {
                merged.get("voice").and_then(Value::as_str).map(str::to_string)
            }),
            output_audio_format: Some(
                self.output_format_override
                    .clone()
                    .unwrap_or_else(|| ULAW_FORMAT.to_string()),
            ),
            temperature: merged
                .get("temperature")
                .and_then(Value::as_f64)
                .map(|t| t as f32),
            max_output_tokens: merged.get("max_response_output_tokens").cloned(),
        }
    }

    /// Record a caller media frame's timestamp.
    pub fn note_media_timestamp(&mut self, timestamp_ms: u64) {
        self.latest_media_ms = timestamp_ms;
    }

    pub fn on_session_configured(&mut self) {
        self.session_configured = true;
        self.phase = BridgePhase::Active;
    }

    pub fn on_response_created(&mut self) {
        self.response_active = true;
        self.interrupted_this_turn = false;
    }

    /// First audio delta of a response latches the caller-clock start so
    /// barge-in can compute how much the caller actually heard.
    pub fn on_audio_delta(&mut self, item_id: Option<&str>) {
        if self.response_start_ms.is_none() {
            self.response_start_ms = Some(self.latest_media_ms);
        }
        if let Some(id) = item_id {
            self.last_assistant_item = Some(id.to_string());
        }
    }

    /// Track assistant output items as they appear.
    pub fn on_output_item(&mut self, item: &ItemInfo) {
        if item.role.as_deref() == Some("user") {
            return;
        }
        if let Some(id) = &item.id {
            self.last_assistant_item = Some(id.clone());
        }
    }

    /// A response finished (done, cancelled, or its audio completed).
    pub fn on_response_finished(&mut self) {
        self.response_active = false;
        self.response_start_ms = None;
        self.last_assistant_item = None;
    }

    /// Barge-in: the caller started speaking over the agent.
    ///
    /// Returns the `conversation.item.truncate` to send, if this turn has
    /// not already been truncated. The caller is responsible for clearing
    /// the frame buffer and the carrier playback buffer regardless.
    pub fn barge_in(&mut self) -> Option<ClientEvent> {
        let truncate = if self.response_active && !self.interrupted_this_turn {
            self.last_assistant_item.as_ref().map(|item_id| {
                let audio_end_ms = self
                    .response_start_ms
                    .map(|start| self.latest_media_ms.saturating_sub(start))
                    .unwrap_or(0);
                ClientEvent::ConversationItemTruncate {
                    item_id: item_id.clone(),
                    content_index: 0,
                    audio_end_ms,
                }
            })
        } else {
            None
        };

        if truncate.is_some() {
            self.interrupted_this_turn = true;
        }
        self.last_assistant_item = None;
        self.response_start_ms = None;
        truncate
    }
}
