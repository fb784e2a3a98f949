//! Server configuration.
//!
//! Everything is environment-driven: `.env` values are loaded by `main`
//! before [`ServerConfig::from_env`] runs, and real environment variables
//! override `.env`. There is no config file layer; every recognized
//! setting is a flat variable, listed by the `/env-check` endpoint.

use std::str::FromStr;

use crate::core::session::{
    InputTranscription, MaxTokens, NoiseReduction, PromptRef, SessionPayload,
    TurnDetection, ULAW_FORMAT,
};

/// Default credential endpoint.
pub const DEFAULT_CLIENT_SECRETS_URL: &str =
    "https://api.openai.com/v1/realtime/client_secrets";

/// Default model WebSocket endpoint (the model id is appended as a query
/// parameter at connect time).
pub const DEFAULT_REALTIME_WS_URL: &str = "wss://api.openai.com/v1/realtime";

/// Default SIP gateway for `mode=sip` documents.
pub const DEFAULT_SIP_DOMAIN: &str = "sip.api.openai.com";

/// Default realtime model.
pub const DEFAULT_MODEL: &str = "gpt-realtime";

/// Environment variables that must be present for the gateway to bridge
/// calls at all.
pub const REQUIRED_ENV: &[&str] = &["OPENAI_API_KEY"];

/// Recognized optional environment variables, surfaced by `/env-check`.
pub const OPTIONAL_ENV: &[&str] = &[
    "OPENAI_ORG_ID",
    "OPENAI_PROJECT_ID",
    "TWILIO_ACCOUNT_SID",
    "TWILIO_AUTH_TOKEN",
    "TWILIO_FROM_NUMBER",
    "PUBLIC_BASE_URL",
    "EXTERNAL_BRIDGE_URL",
    "TWIML_DEFAULT_MODE",
    "SIP_GATEWAY_DOMAIN",
    "REALTIME_CONTROL_SECRET",
    "REALTIME_CONTROL_SIGNING_SECRET",
    "REALTIME_CONTROL_ADMIN_SECRET",
    "REALTIME_CONTROL_TOLERANCE_SECONDS",
    "REALTIME_MODEL",
    "REALTIME_VOICE",
    "REALTIME_MODALITIES",
    "REALTIME_TEMPERATURE",
    "REALTIME_MAX_OUTPUT_TOKENS",
    "REALTIME_TURN_DETECTION",
    "REALTIME_VAD_THRESHOLD",
    "REALTIME_VAD_PREFIX_MS",
    "REALTIME_VAD_SILENCE_MS",
    "REALTIME_VAD_CREATE_RESPONSE",
    "REALTIME_INPUT_SAMPLE_RATE",
    "REALTIME_AUDIO_FORMAT",
    "REALTIME_TRANSCRIPTION_ENABLED",
    "REALTIME_TRANSCRIPTION_MODEL",
    "REALTIME_TRANSCRIPTION_LANGUAGE",
    "REALTIME_TRANSCRIPTION_PROMPT",
    "REALTIME_NOISE_REDUCTION",
    "REALTIME_DEFAULT_INSTRUCTIONS",
    "REALTIME_PROMPT_ID",
    "REALTIME_PROMPT_VERSION",
    "REALTIME_TOKEN_EXPIRY_SECONDS",
    "MAX_CONCURRENT_CALLS",
    "CORS_ALLOWED_ORIGINS",
    "TLS_CERT_PATH",
    "TLS_KEY_PATH",
    "HOST",
    "PORT",
];

/// TLS file paths, when serving HTTPS/WSS directly.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub cert_path: std::path::PathBuf,
    pub key_path: std::path::PathBuf,
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Listener
    pub host: String,
    pub port: u16,
    pub tls: Option<TlsConfig>,

    // Model credentials
    pub openai_api_key: Option<String>,
    pub openai_org_id: Option<String>,
    pub openai_project_id: Option<String>,
    /// Credential endpoint override, mostly for tests.
    pub client_secrets_url: String,
    /// Model WebSocket endpoint.
    pub realtime_ws_url: String,

    // Carrier credentials
    pub twilio_account_sid: Option<String>,
    pub twilio_auth_token: Option<String>,
    pub twilio_from_number: Option<String>,
    /// Carrier REST base override, mostly for tests.
    pub carrier_api_base: String,

    // Deployment
    /// Public base URL this process is reachable at (https://…).
    pub public_base_url: Option<String>,
    /// Bridge WebSocket base when the bridge runs on a separate host.
    pub external_bridge_url: Option<String>,
    /// Default document mode when the request does not pick one.
    pub default_document_mode: Option<String>,
    /// SIP gateway domain for `mode=sip`.
    pub sip_gateway_domain: String,

    // Control webhook
    pub control_secret: Option<String>,
    pub control_signing_secret: Option<String>,
    pub control_admin_secret: Option<String>,
    pub control_tolerance_seconds: i64,

    // Limits
    pub max_concurrent_calls: usize,
    pub cors_allowed_origins: Option<String>,

    // Session defaults
    pub session_defaults: SessionDefaults,
}

/// Environment-derived realtime session defaults. These seed the control
/// plane; runtime overrides layer on top.
#[derive(Debug, Clone, Default)]
pub struct SessionDefaults {
    pub model: String,
    pub voice: Option<String>,
    pub modalities: Option<Vec<String>>,
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<MaxTokens>,
    pub turn_detection_mode: Option<String>,
    pub vad_threshold: Option<f32>,
    pub vad_prefix_ms: Option<u32>,
    pub vad_silence_ms: Option<u32>,
    pub vad_create_response: Option<bool>,
    pub input_sample_rate: Option<u32>,
    pub audio_format: Option<String>,
    pub transcription_enabled: bool,
    pub transcription_model: Option<String>,
    pub transcription_language: Option<String>,
    pub transcription_prompt: Option<String>,
    pub noise_reduction: Option<String>,
    pub instructions: Option<String>,
    pub prompt_id: Option<String>,
    pub prompt_version: Option<String>,
    pub token_expiry_seconds: u64,
}

impl ServerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, String> {
        let host = env_opt("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = env_parse::<u16>("PORT")?.unwrap_or(8080);

        let tls = match (env_opt("TLS_CERT_PATH"), env_opt("TLS_KEY_PATH")) {
            (Some(cert), Some(key)) => Some(TlsConfig {
                cert_path: cert.into(),
                key_path: key.into(),
            }),
            (None, None) => None,
            _ => {
                return Err(
                    "TLS_CERT_PATH and TLS_KEY_PATH must be set together".to_string()
                )
            }
        };

        Ok(Self {
            host,
            port,
            tls,
            openai_api_key: env_opt("OPENAI_API_KEY"),
            openai_org_id: env_opt("OPENAI_ORG_ID"),
            openai_project_id: env_opt("OPENAI_PROJECT_ID"),
            client_secrets_url: env_opt("OPENAI_CLIENT_SECRETS_URL")
                .unwrap_or_else(|| DEFAULT_CLIENT_SECRETS_URL.to_string()),
            realtime_ws_url: env_opt("OPENAI_REALTIME_WS_URL")
                .unwrap_or_else(|| DEFAULT_REALTIME_WS_URL.to_string()),
            twilio_account_sid: env_opt("TWILIO_ACCOUNT_SID"),
            twilio_auth_token: env_opt("TWILIO_AUTH_TOKEN"),
            twilio_from_number: env_opt("TWILIO_FROM_NUMBER"),
            carrier_api_base: env_opt("TWILIO_API_BASE")
                .unwrap_or_else(|| "https://api.twilio.com".to_string()),
            public_base_url: env_opt("PUBLIC_BASE_URL").map(strip_trailing_slash),
            external_bridge_url: env_opt("EXTERNAL_BRIDGE_URL").map(strip_trailing_slash),
            default_document_mode: env_opt("TWIML_DEFAULT_MODE"),
            sip_gateway_domain: env_opt("SIP_GATEWAY_DOMAIN")
                .unwrap_or_else(|| DEFAULT_SIP_DOMAIN.to_string()),
            control_secret: env_opt("REALTIME_CONTROL_SECRET"),
            control_signing_secret: env_opt("REALTIME_CONTROL_SIGNING_SECRET"),
            control_admin_secret: env_opt("REALTIME_CONTROL_ADMIN_SECRET"),
            control_tolerance_seconds: env_parse::<i64>(
                "REALTIME_CONTROL_TOLERANCE_SECONDS",
            )?
            .unwrap_or(crate::auth::DEFAULT_TOLERANCE_SECONDS),
            max_concurrent_calls: env_parse::<usize>("MAX_CONCURRENT_CALLS")?
                .unwrap_or(200),
            cors_allowed_origins: env_opt("CORS_ALLOWED_ORIGINS"),
            session_defaults: SessionDefaults::from_env()?,
        })
    }

    /// Listener address as "host:port".
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_tls_enabled(&self) -> bool {
        self.tls.is_some()
    }

    /// The WebSocket URL the carrier should stream to, derived from the
    /// external bridge override or the public base URL.
    pub fn bridge_ws_base(&self) -> Option<String> {
        if let Some(external) = &self.external_bridge_url {
            return Some(external.clone());
        }
        self.public_base_url.as_ref().map(|base| {
            let ws = base
                .replacen("https://", "wss://", 1)
                .replacen("http://", "ws://", 1);
            format!("{ws}/stream/twilio")
        })
    }

    /// True when outbound dialing is possible.
    pub fn has_carrier_credentials(&self) -> bool {
        self.twilio_account_sid.is_some() && self.twilio_auth_token.is_some()
    }
}

impl SessionDefaults {
    pub fn from_env() -> Result<Self, String> {
        let modalities = env_opt("REALTIME_MODALITIES").map(|raw| {
            raw.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
        });

        let max_output_tokens = match env_opt("REALTIME_MAX_OUTPUT_TOKENS") {
            Some(raw) if raw == "inf" || raw == "unbounded" => {
                Some(MaxTokens::Infinite("inf".to_string()))
            }
            Some(raw) => Some(MaxTokens::Number(
                raw.parse::<u32>()
                    .map_err(|_| format!("REALTIME_MAX_OUTPUT_TOKENS: '{raw}' is not a positive integer or 'inf'"))?,
            )),
            None => None,
        };

        Ok(Self {
            model: env_opt("REALTIME_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            voice: env_opt("REALTIME_VOICE"),
            modalities,
            temperature: env_parse::<f32>("REALTIME_TEMPERATURE")?,
            max_output_tokens,
            turn_detection_mode: env_opt("REALTIME_TURN_DETECTION"),
            vad_threshold: env_parse::<f32>("REALTIME_VAD_THRESHOLD")?,
            vad_prefix_ms: env_parse::<u32>("REALTIME_VAD_PREFIX_MS")?,
            vad_silence_ms: env_parse::<u32>("REALTIME_VAD_SILENCE_MS")?,
            vad_create_response: env_flag("REALTIME_VAD_CREATE_RESPONSE"),
            input_sample_rate: env_parse::<u32>("REALTIME_INPUT_SAMPLE_RATE")?,
            audio_format: env_opt("REALTIME_AUDIO_FORMAT"),
            transcription_enabled: env_flag("REALTIME_TRANSCRIPTION_ENABLED")
                .unwrap_or(false),
            transcription_model: env_opt("REALTIME_TRANSCRIPTION_MODEL"),
            transcription_language: env_opt("REALTIME_TRANSCRIPTION_LANGUAGE"),
            transcription_prompt: env_opt("REALTIME_TRANSCRIPTION_PROMPT"),
            noise_reduction: env_opt("REALTIME_NOISE_REDUCTION"),
            instructions: env_opt("REALTIME_DEFAULT_INSTRUCTIONS"),
            prompt_id: env_opt("REALTIME_PROMPT_ID"),
            prompt_version: env_opt("REALTIME_PROMPT_VERSION"),
            token_expiry_seconds: env_parse::<u64>("REALTIME_TOKEN_EXPIRY_SECONDS")?
                .unwrap_or(600),
        })
    }

    /// Materialize the defaults as a full session payload.
    pub fn to_payload(&self) -> SessionPayload {
        let turn_detection = match self.turn_detection_mode.as_deref() {
            Some("off") | Some("none") => Some(TurnDetection::None {}),
            Some("server_vad") | None => Some(TurnDetection::ServerVad {
                threshold: self.vad_threshold,
                prefix_padding_ms: self.vad_prefix_ms,
                silence_duration_ms: self.vad_silence_ms,
                create_response: self.vad_create_response,
                interrupt_response: Some(true),
            }),
            Some(other) => {
                tracing::warn!(mode = other, "unrecognized turn detection mode, using server_vad");
                Some(TurnDetection::ServerVad {
                    threshold: self.vad_threshold,
                    prefix_padding_ms: self.vad_prefix_ms,
                    silence_duration_ms: self.vad_silence_ms,
                    create_response: self.vad_create_response,
                    interrupt_response: Some(true),
                })
            }
        };

        let input_audio_transcription = if self.transcription_enabled {
            Some(InputTranscription {
                model: self
                    .transcription_model
                    .clone()
                    .unwrap_or_else(|| "whisper-1".to_string()),
                language: self.transcription_language.clone(),
                prompt: self.transcription_prompt.clone(),
            })
        } else {
            None
        };

        let input_audio_noise_reduction = match self.noise_reduction.as_deref() {
            Some("near_field") => Some(NoiseReduction {
                kind: "near_field".to_string(),
            }),
            _ => None,
        };

        let prompt = self.prompt_id.as_ref().map(|id| PromptRef {
            id: id.clone(),
            version: self.prompt_version.clone(),
            variables: None,
        });

        // Instructions and prompt are mutually exclusive on the wire; a
        // configured prompt wins over default instructions.
        let instructions = if prompt.is_some() {
            None
        } else {
            self.instructions.clone()
        };

        SessionPayload {
            session_type: Some("realtime".to_string()),
            model: Some(self.model.clone()),
            instructions,
            prompt,
            voice: self.voice.clone(),
            modalities: self.modalities.clone(),
            input_audio_format: Some(
                self.audio_format
                    .clone()
                    .unwrap_or_else(|| ULAW_FORMAT.to_string()),
            ),
            output_audio_format: Some(
                self.audio_format
                    .clone()
                    .unwrap_or_else(|| ULAW_FORMAT.to_string()),
            ),
            input_sample_rate: self.input_sample_rate,
            tool_choice: None,
            tools: None,
            temperature: self.temperature,
            max_response_output_tokens: self.max_output_tokens.clone(),
            turn_detection,
            input_audio_transcription,
            input_audio_noise_reduction,
        }
    }
}

// =============================================================================
// Env helpers
// =============================================================================

/// Read an env var, treating empty/whitespace values as unset.
pub fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse an env var, erroring on malformed values rather than silently
/// falling back.
fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>, String> {
    match env_opt(key) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| format!("{key}: could not parse '{raw}'")),
        None => Ok(None),
    }
}

/// Parse a boolean flag: "1"/"true"/"yes" are true, "0"/"false"/"no" false.
fn env_flag(key: &str) -> Option<bool> {
    env_opt(key).map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
}

fn strip_trailing_slash(mut url: String) -> String {
    while url.ends_with('/') {
        url.pop();
    }
    url
}
