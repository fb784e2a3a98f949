//! Realtime session configuration model.
//!
//! One payload type is shared by the control plane (defaults + overrides),
//! the token minter (sanitized subset), and the bridge (the `session.update`
//! sent once the model socket reports `session.created`).
//!
//! Serialization follows the model's wire protocol: every field is optional
//! and omitted when unset, so a partial payload can be layered over another
//! without clobbering populated fields with nulls.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Wire name of the narrowband telephony codec.
pub const ULAW_FORMAT: &str = "g711_ulaw";

/// Telephony sample rate in Hz.
pub const ULAW_SAMPLE_RATE: u32 = 8000;

/// Fields a carrier-supplied override blob may set. Anything else is
/// dropped before the payload reaches the model: the upstream rejects
/// unknown fields, and the blob rides in from the public internet.
pub const OVERRIDE_ALLOW_LIST: &[&str] = &[
    "instructions",
    "prompt",
    "input_audio_transcription",
    "turn_detection",
    "tools",
    "tool_choice",
    "temperature",
    "max_response_output_tokens",
    "voice",
    "input_audio_format",
    "output_audio_format",
    "modalities",
];

// =============================================================================
// Payload types
// =============================================================================

/// Session configuration payload for `session.update`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionPayload {
    /// Session type discriminator (the GA protocol expects "realtime")
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub session_type: Option<String>,

    /// Model identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Free-text system instructions (mutually exclusive with `prompt`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    /// Stored-prompt reference (mutually exclusive with `instructions`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<PromptRef>,

    /// Voice for audio output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,

    /// Response modalities, subset of {"audio", "text"}
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,

    /// Input audio codec
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_format: Option<String>,

    /// Output audio codec
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_format: Option<String>,

    /// Input sample rate in Hz
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_sample_rate: Option<u32>,

    /// Tool choice: "auto" | "required" | "none" | a function name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,

    /// Tool definitions, in invocation-priority order
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDef>>,

    /// Sampling temperature, 0..=2
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Response token cap, a positive integer or "inf"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_response_output_tokens: Option<MaxTokens>,

    /// Turn detection configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_detection: Option<TurnDetection>,

    /// Input transcription configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<InputTranscription>,

    /// Input noise reduction
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_noise_reduction: Option<NoiseReduction>,
}

/// Reference to a stored prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptRef {
    pub id: String,
    /// Version is a string on the wire; numeric input is coerced.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "string_or_number"
    )]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variables: Option<Value>,
}

/// Tool definition forwarded verbatim to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

/// Response token cap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MaxTokens {
    Number(u32),
    /// "inf"
    Infinite(String),
}

/// Turn detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TurnDetection {
    #[serde(rename = "server_vad")]
    ServerVad {
        #[serde(skip_serializing_if = "Option::is_none")]
        threshold: Option<f32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        prefix_padding_ms: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        silence_duration_ms: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        create_response: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        interrupt_response: Option<bool>,
    },
    #[serde(rename = "none")]
    None {},
}

/// Input transcription configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputTranscription {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

/// Input noise reduction. "off" is represented by omitting the field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoiseReduction {
    #[serde(rename = "type")]
    pub kind: String,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

impl SessionPayload {
    /// Serialize to a JSON object map, dropping unset fields.
    pub fn to_map(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

}

// =============================================================================
// Override filtering and layering
// =============================================================================

/// Filter an untrusted override object down to the allow-listed fields.
///
/// Non-object input yields an empty map.
pub fn filter_overrides(value: Value) -> Map<String, Value> {
    let Value::Object(map) = value else {
        return Map::new();
    };
    map.into_iter()
        .filter(|(key, _)| OVERRIDE_ALLOW_LIST.contains(&key.as_str()))
        .collect()
}

/// Layer `fill` under `base`: keys already present in `base` win.
pub fn merge_missing(base: &mut Map<String, Value>, fill: Map<String, Value>) {
    for (key, value) in fill {
        base.entry(key).or_insert(value);
    }
}

/// Decode a base64-encoded JSON override blob from carrier custom
/// parameters and reduce it to the allow-listed fields.
pub fn decode_override_blob(encoded: &str) -> Option<Map<String, Value>> {
    use base64::prelude::*;
    let bytes = BASE64_STANDARD.decode(encoded.trim()).ok()?;
    let value: Value = serde_json::from_slice(&bytes).ok()?;
    Some(filter_overrides(value))
}

/// Extract override material from the carrier `start` frame custom
/// parameters. The full blob rides under `sessionOverrides`; a bare
/// prompt/instructions pair may also arrive as individual parameters.
pub fn overrides_from_custom_parameters(
    params: &HashMap<String, String>,
) -> Map<String, Value> {
    let mut merged = Map::new();
    if let Some(blob) = params.get("sessionOverrides") {
        if let Some(decoded) = decode_override_blob(blob) {
            merged = decoded;
        }
    }
    if let Some(instructions) = params.get("instructions") {
        merged
            .entry("instructions".to_string())
            .or_insert(Value::String(instructions.clone()));
    }
    if let Some(prompt_id) = params.get("promptId") {
        let mut prompt = Map::new();
        prompt.insert("id".to_string(), Value::String(prompt_id.clone()));
        if let Some(version) = params.get("promptVersion") {
            prompt.insert("version".to_string(), Value::String(version.clone()));
        }
        merged
            .entry("prompt".to_string())
            .or_insert(Value::Object(prompt));
    }
    merged
}

// =============================================================================
// Validation
// =============================================================================

fn e164_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\+[1-9]\d{1,14}$").expect("static regex"))
}

/// Validate an E.164 phone number.
pub fn validate_e164(number: &str) -> Result<(), String> {
    if e164_regex().is_match(number) {
        Ok(())
    } else {
        Err(format!("'{number}' is not a valid E.164 phone number"))
    }
}

/// Validate sampling temperature, 0..=2.
pub fn validate_temperature(temperature: f32) -> Result<(), String> {
    if (0.0..=2.0).contains(&temperature) {
        Ok(())
    } else {
        Err(format!("temperature {temperature} outside [0, 2]"))
    }
}

/// Validate credential expiry, 60..=3600 seconds.
pub fn validate_expiry_seconds(seconds: u64) -> Result<(), String> {
    if (60..=3600).contains(&seconds) {
        Ok(())
    } else {
        Err(format!("expires_after seconds {seconds} outside [60, 3600]"))
    }
}

/// Validate VAD tuning parameters.
pub fn validate_vad(
    threshold: Option<f32>,
    prefix_padding_ms: Option<u32>,
    silence_duration_ms: Option<u32>,
) -> Result<(), String> {
    if let Some(t) = threshold {
        if !(0.0..=1.0).contains(&t) {
            return Err(format!("vad threshold {t} outside [0, 1]"));
        }
    }
    if let Some(p) = prefix_padding_ms {
        if p > 2000 {
            return Err(format!("prefix padding {p}ms outside [0, 2000]"));
        }
    }
    if let Some(s) = silence_duration_ms {
        if !(50..=5000).contains(&s) {
            return Err(format!("silence duration {s}ms outside [50, 5000]"));
        }
    }
    Ok(())
}

/// Validate a response token cap: positive integer or "inf".
pub fn validate_max_tokens(value: &MaxTokens) -> Result<(), String> {
    match value {
        MaxTokens::Number(0) => Err("max_response_output_tokens must be positive".into()),
        MaxTokens::Number(_) => Ok(()),
        MaxTokens::Infinite(s) if s == "inf" => Ok(()),
        MaxTokens::Infinite(s) => Err(format!("unrecognized token cap '{s}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn e164_accepts_and_rejects() {
        assert!(validate_e164("+15551231234").is_ok());
        assert!(validate_e164("+442071838750").is_ok());
        assert!(validate_e164("555-123").is_err());
        assert!(validate_e164("+05551231234").is_err());
        assert!(validate_e164("15551231234").is_err());
        assert!(validate_e164("+1234567890123456").is_err());
    }

    #[test]
    fn prompt_version_number_coerces_to_string() {
        let prompt: PromptRef =
            serde_json::from_value(json!({ "id": "pmpt_1", "version": 7 })).unwrap();
        assert_eq!(prompt.version.as_deref(), Some("7"));

        let prompt: PromptRef =
            serde_json::from_value(json!({ "id": "pmpt_1", "version": "7" })).unwrap();
        assert_eq!(prompt.version.as_deref(), Some("7"));
    }

    #[test]
    fn filter_overrides_drops_unknown_fields() {
        let filtered = filter_overrides(json!({
            "voice": "marin",
            "temperature": 0.7,
            "api_key": "sneaky",
            "model": "not-allowed-here"
        }));
        assert_eq!(filtered.len(), 2);
        assert!(filtered.contains_key("voice"));
        assert!(filtered.contains_key("temperature"));
        assert!(!filtered.contains_key("api_key"));
        assert!(!filtered.contains_key("model"));
    }

    #[test]
    fn decode_override_blob_round_trip() {
        use base64::prelude::*;
        let blob = BASE64_STANDARD.encode(r#"{"voice":"cedar","bogus":true}"#);
        let decoded = decode_override_blob(&blob).unwrap();
        assert_eq!(decoded.get("voice"), Some(&json!("cedar")));
        assert!(!decoded.contains_key("bogus"));
        assert!(decode_override_blob("not base64!!!").is_none());
    }

    #[test]
    fn merge_missing_prefers_base() {
        let mut base = filter_overrides(json!({ "voice": "cedar" }));
        let fill = filter_overrides(json!({ "voice": "alloy", "temperature": 0.8 }));
        merge_missing(&mut base, fill);
        assert_eq!(base.get("voice"), Some(&json!("cedar")));
        assert_eq!(base.get("temperature"), Some(&json!(0.8)));
    }

    #[test]
    fn validation_ranges() {
        assert!(validate_temperature(0.8).is_ok());
        assert!(validate_temperature(2.1).is_err());
        assert!(validate_expiry_seconds(600).is_ok());
        assert!(validate_expiry_seconds(59).is_err());
        assert!(validate_vad(Some(0.5), Some(300), Some(500)).is_ok());
        assert!(validate_vad(Some(1.5), None, None).is_err());
        assert!(validate_vad(None, Some(3000), None).is_err());
        assert!(validate_vad(None, None, Some(10)).is_err());
        assert!(validate_max_tokens(&MaxTokens::Number(200)).is_ok());
        assert!(validate_max_tokens(&MaxTokens::Number(0)).is_err());
        assert!(validate_max_tokens(&MaxTokens::Infinite("inf".into())).is_ok());
        assert!(validate_max_tokens(&MaxTokens::Infinite("lots".into())).is_err());
    }

    #[test]
    fn payload_serializes_sparsely() {
        let payload = SessionPayload {
            session_type: Some("realtime".into()),
            voice: Some("marin".into()),
            ..Default::default()
        };
        let map = payload.to_map();
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("type"), Some(&json!("realtime")));
    }

    #[test]
    fn overrides_from_custom_parameters_layers_blob_and_flat() {
        use base64::prelude::*;
        let mut params = HashMap::new();
        params.insert(
            "sessionOverrides".to_string(),
            BASE64_STANDARD.encode(r#"{"voice":"cedar"}"#),
        );
        params.insert("instructions".to_string(), "Be brief.".to_string());
        let merged = overrides_from_custom_parameters(&params);
        assert_eq!(merged.get("voice"), Some(&json!("cedar")));
        assert_eq!(merged.get("instructions"), Some(&json!("Be brief.")));
    }
}
