//! Model WebSocket protocol events.
//!
//! JSON text frames, discriminated by a `type` field. The server-event
//! names went through a rename (`response.audio.delta` became
//! `response.output_audio.delta`, and so on); both generations are
//! accepted here via serde aliases so one dispatch path covers either
//! protocol version. Unknown events fall into [`ServerEvent::Other`] and
//! are logged at trace level by the bridge.

use base64::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// Client events (gateway -> model)
// =============================================================================

/// Events the bridge sends to the model.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Update session configuration. The session object is pre-merged from
    /// carrier overrides and control-plane defaults.
    #[serde(rename = "session.update")]
    SessionUpdate { session: Value },

    /// Append caller audio to the input buffer (base64).
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },

    /// Commit the input buffer as a completed user turn.
    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioBufferCommit,

    /// Discard the uncommitted input buffer.
    #[serde(rename = "input_audio_buffer.clear")]
    InputAudioBufferClear,

    /// Truncate an assistant item at the point the caller actually heard.
    #[serde(rename = "conversation.item.truncate")]
    ConversationItemTruncate {
        item_id: String,
        content_index: u32,
        audio_end_ms: u64,
    },

    /// Ask the model to generate a response.
    #[serde(rename = "response.create")]
    ResponseCreate {
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<ResponseOverrides>,
    },

    /// Cancel the in-flight response.
    #[serde(rename = "response.cancel")]
    ResponseCancel,
}

impl ClientEvent {
    /// Audio append from raw μ-law bytes.
    pub fn audio_append(data: &[u8]) -> Self {
        ClientEvent::InputAudioBufferAppend {
            audio: BASE64_STANDARD.encode(data),
        }
    }

    /// Audio append from an already-encoded carrier payload, forwarded
    /// without a decode/encode round trip.
    pub fn audio_append_b64(payload: String) -> Self {
        ClientEvent::InputAudioBufferAppend { audio: payload }
    }
}

/// Per-turn overrides carried on `response.create`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResponseOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<Value>,
}

// =============================================================================
// Server events (model -> gateway)
// =============================================================================

/// Events the bridge consumes from the model. Field presence is kept
/// permissive: the bridge only needs a handful of fields per event and the
/// protocol adds more regularly.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        error: Value,
    },

    #[serde(rename = "session.created")]
    SessionCreated {
        #[serde(default)]
        session: Value,
    },

    #[serde(rename = "session.updated")]
    SessionUpdated {
        #[serde(default)]
        session: Value,
    },

    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {
        #[serde(default)]
        audio_start_ms: Option<u64>,
        #[serde(default)]
        item_id: Option<String>,
    },

    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped {
        #[serde(default)]
        audio_end_ms: Option<u64>,
        #[serde(default)]
        item_id: Option<String>,
    },

    #[serde(rename = "input_audio_buffer.committed")]
    InputAudioBufferCommitted {
        #[serde(default)]
        item_id: Option<String>,
    },

    #[serde(rename = "input_audio_buffer.cleared")]
    InputAudioBufferCleared,

    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    TranscriptionCompleted {
        #[serde(default)]
        item_id: Option<String>,
        #[serde(default)]
        transcript: String,
    },

    #[serde(rename = "conversation.item.input_audio_transcription.failed")]
    TranscriptionFailed {
        #[serde(default)]
        item_id: Option<String>,
        #[serde(default)]
        error: Value,
    },

    #[serde(rename = "response.created")]
    ResponseCreated {
        #[serde(default)]
        response: ResponseInfo,
    },

    #[serde(rename = "response.done")]
    ResponseDone {
        #[serde(default)]
        response: ResponseInfo,
    },

    #[serde(rename = "response.cancelled")]
    ResponseCancelled {
        #[serde(default)]
        response: ResponseInfo,
    },

    #[serde(rename = "response.output_item.added")]
    OutputItemAdded {
        #[serde(default)]
        item: ItemInfo,
    },

    #[serde(rename = "response.output_item.done")]
    OutputItemDone {
        #[serde(default)]
        item: ItemInfo,
    },

    /// Agent audio chunk (base64).
    #[serde(rename = "response.output_audio.delta", alias = "response.audio.delta")]
    AudioDelta {
        #[serde(default)]
        item_id: Option<String>,
        delta: String,
    },

    #[serde(rename = "response.output_audio.done", alias = "response.audio.done")]
    AudioDone {
        #[serde(default)]
        item_id: Option<String>,
    },

    #[serde(
        rename = "response.output_audio_transcript.delta",
        alias = "response.audio_transcript.delta"
    )]
    AudioTranscriptDelta {
        #[serde(default)]
        item_id: Option<String>,
        delta: String,
    },

    #[serde(
        rename = "response.output_audio_transcript.done",
        alias = "response.audio_transcript.done"
    )]
    AudioTranscriptDone {
        #[serde(default)]
        item_id: Option<String>,
        #[serde(default)]
        transcript: String,
    },

    #[serde(rename = "response.output_text.delta", alias = "response.text.delta")]
    TextDelta {
        #[serde(default)]
        item_id: Option<String>,
        delta: String,
    },

    #[serde(rename = "response.output_text.done", alias = "response.text.done")]
    TextDone {
        #[serde(default)]
        item_id: Option<String>,
        #[serde(default)]
        text: String,
    },

    #[serde(rename = "rate_limits.updated")]
    RateLimitsUpdated {
        #[serde(default)]
        rate_limits: Value,
    },

    /// Anything this bridge does not act on.
    #[serde(other)]
    Other,
}

/// Response envelope fields the bridge reads.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Output item fields the bridge reads.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type", default)]
    pub item_type: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

impl ServerEvent {
    /// Decode the base64 payload of an audio delta.
    pub fn decode_audio(delta: &str) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64_STANDARD.decode(delta)
    }
}
