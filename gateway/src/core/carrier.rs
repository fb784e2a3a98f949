//! Carrier media-stream WebSocket protocol.
//!
//! The carrier speaks JSON text frames over a long-lived WebSocket. Inbound
//! events are `connected`, `start`, `media`, `mark`, and `stop`; outbound
//! frames are `media`, `mark`, and `clear`. Audio payloads are base64
//! G.711 μ-law at 8 kHz in 20 ms frames.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// =============================================================================
// Inbound (carrier -> gateway)
// =============================================================================

/// Events received from the carrier.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum CarrierEvent {
    /// First frame after the socket opens.
    Connected {
        #[serde(default)]
        protocol: Option<String>,
        #[serde(default)]
        version: Option<String>,
    },

    /// Stream metadata; creates the call session.
    Start {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        start: StartInfo,
    },

    /// One 20 ms frame of caller audio.
    Media {
        #[serde(rename = "streamSid", default)]
        stream_sid: Option<String>,
        media: MediaInfo,
    },

    /// Playback-position marker echoed back by the carrier, also used as a
    /// client-driven commit signal.
    Mark {
        #[serde(rename = "streamSid", default)]
        stream_sid: Option<String>,
        mark: MarkInfo,
    },

    /// The carrier is tearing the stream down.
    Stop {
        #[serde(rename = "streamSid", default)]
        stream_sid: Option<String>,
    },
}

/// `start` frame payload.
#[derive(Debug, Clone, Deserialize)]
pub struct StartInfo {
    #[serde(rename = "streamSid")]
    pub stream_sid: String,
    #[serde(rename = "callSid")]
    pub call_sid: String,
    #[serde(rename = "customParameters", default)]
    pub custom_parameters: HashMap<String, String>,
    #[serde(rename = "mediaFormat", default)]
    pub media_format: Option<MediaFormat>,
}

/// Negotiated media format reported in `start`.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaFormat {
    #[serde(default)]
    pub encoding: Option<String>,
    #[serde(rename = "sampleRate", default)]
    pub sample_rate: Option<u32>,
    #[serde(default)]
    pub channels: Option<u32>,
}

/// `media` frame payload. The timestamp is milliseconds from stream start,
/// sent as a decimal string.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaInfo {
    /// Base64 μ-law audio.
    pub payload: String,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl MediaInfo {
    /// Parse the millisecond timestamp, if present and well-formed.
    pub fn timestamp_ms(&self) -> Option<u64> {
        self.timestamp.as_deref().and_then(|t| t.parse().ok())
    }
}

/// `mark` frame payload.
#[derive(Debug, Clone, Deserialize)]
pub struct MarkInfo {
    pub name: String,
}

// =============================================================================
// Outbound (gateway -> carrier)
// =============================================================================

/// Frames sent to the carrier.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum CarrierFrame {
    /// One chunk of agent audio.
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: MediaPayload,
    },

    /// Synchronization marker; the carrier echoes it once playback reaches
    /// this point.
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        mark: MarkPayload,
    },

    /// Drop everything queued in the carrier's playback buffer.
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct MediaPayload {
    /// Base64 μ-law audio.
    pub payload: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MarkPayload {
    pub name: String,
}

impl CarrierFrame {
    pub fn media(stream_sid: &str, payload_b64: String) -> Self {
        CarrierFrame::Media {
            stream_sid: stream_sid.to_string(),
            media: MediaPayload {
                payload: payload_b64,
            },
        }
    }

    pub fn mark(stream_sid: &str, name: &str) -> Self {
        CarrierFrame::Mark {
            stream_sid: stream_sid.to_string(),
            mark: MarkPayload {
                name: name.to_string(),
            },
        }
    }

    pub fn clear(stream_sid: &str) -> Self {
        CarrierFrame::Clear {
            stream_sid: stream_sid.to_string(),
        }
    }
}
