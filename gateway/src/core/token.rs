//! Ephemeral credential minter.
//!
//! Performs the HTTPS POST against the model's credential endpoint and
//! sanitizes the session payload first: the endpoint accepts only
//! {type, model, instructions, prompt} and rejects anything else. The rest
//! of the session configuration is applied later via `session.update` over
//! the WebSocket. Minting is single-shot: no retry; callers re-mint.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tokio::time::Duration;

/// Outbound call timeout.
pub const MINT_TIMEOUT: Duration = Duration::from_secs(15);

/// Fields the credential endpoint accepts under `session`.
pub const MINT_SESSION_FIELDS: &[&str] = &["type", "model", "instructions", "prompt"];

/// Default credential lifetime when the caller does not pick one.
pub const DEFAULT_EXPIRY_SECONDS: u64 = 600;

/// A minted credential: opaque token plus absolute expiry.
///
/// Single-use for one model connection; discard after the connection opens
/// or on expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EphemeralCredential {
    pub token: String,
    /// Epoch seconds.
    pub expires_at: i64,
}

/// Optional control-webhook reference forwarded to the credential
/// endpoint. Whether the endpoint accepts it is account-dependent; on
/// rejection the caller re-mints without it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookRef {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

/// Mint request parameters.
#[derive(Debug, Clone, Default)]
pub struct MintRequest {
    /// Credential lifetime in seconds; defaults to [`DEFAULT_EXPIRY_SECONDS`].
    pub expires_after_seconds: Option<u64>,
    /// Session payload; sanitized before send.
    pub session: Value,
    /// Optional webhook reference, forwarded only when supplied.
    pub webhook: Option<WebhookRef>,
}

/// Errors from the credential endpoint.
#[derive(Debug, Error)]
pub enum MintError {
    /// The endpoint returned an explicit error payload.
    #[error("credential endpoint rejected the mint (status {status})")]
    Upstream { status: u16, body: Value },

    /// The response parsed but carried no usable secret.
    #[error("credential endpoint returned no secret value")]
    MissingValue,

    /// Transport-level failure, including the 15 s timeout.
    #[error("credential endpoint unreachable: {0}")]
    Transport(#[from] reqwest::Error),
}

impl IntoResponse for MintError {
    fn into_response(self) -> Response {
        match self {
            MintError::Upstream { status, body } => {
                let status =
                    StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
                (status, Json(body)).into_response()
            }
            MintError::MissingValue => (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "error": "mint_failed", "detail": "no secret in response" })),
            )
                .into_response(),
            MintError::Transport(err) => {
                tracing::error!("credential endpoint transport error: {err}");
                (
                    StatusCode::BAD_GATEWAY,
                    Json(json!({ "error": "mint_failed", "detail": "upstream unreachable" })),
                )
                    .into_response()
            }
        }
    }
}

/// Client for the model's credential endpoint.
#[derive(Clone)]
pub struct TokenMinter {
    http: reqwest::Client,
    endpoint: String,
}

impl TokenMinter {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    /// Mint an ephemeral credential.
    pub async fn mint(
        &self,
        api_key: &str,
        request: MintRequest,
    ) -> Result<EphemeralCredential, MintError> {
        let seconds = request
            .expires_after_seconds
            .unwrap_or(DEFAULT_EXPIRY_SECONDS);

        let mut body = Map::new();
        body.insert(
            "expires_after".to_string(),
            json!({ "anchor": "created_at", "seconds": seconds }),
        );
        body.insert(
            "session".to_string(),
            sanitize_session(request.session),
        );
        if let Some(webhook) = request.webhook {
            body.insert(
                "server".to_string(),
                serde_json::to_value(webhook).unwrap_or(Value::Null),
            );
        }

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .timeout(MINT_TIMEOUT)
            .json(&Value::Object(body))
            .send()
            .await?;

        let status = response.status().as_u16();
        let payload: Value = response.json().await.unwrap_or(Value::Null);

        if payload.get("error").is_some() || status >= 400 {
            return Err(MintError::Upstream {
                status,
                body: payload,
            });
        }

        parse_credential(&payload).ok_or(MintError::MissingValue)
    }
}

/// Restrict a session object to the fields the credential endpoint
/// accepts, coercing a numeric `prompt.version` to a string.
pub fn sanitize_session(session: Value) -> Value {
    let Value::Object(map) = session else {
        return json!({ "type": "realtime" });
    };

    let mut sanitized: Map<String, Value> = map
        .into_iter()
        .filter(|(key, _)| MINT_SESSION_FIELDS.contains(&key.as_str()))
        .collect();

    sanitized
        .entry("type".to_string())
        .or_insert(json!("realtime"));

    // Instructions and prompt are mutually exclusive; a stored prompt wins.
    if sanitized.contains_key("prompt") {
        sanitized.remove("instructions");
    }

    if let Some(Value::Object(prompt)) = sanitized.get_mut("prompt") {
        if let Some(Value::Number(version)) = prompt.get("version") {
            let coerced = Value::String(version.to_string());
            prompt.insert("version".to_string(), coerced);
        }
    }

    Value::Object(sanitized)
}

/// Parse the three accepted response shapes:
/// `{client_secret: {value, expires_at}}`, `{client_secret: "...", expires_at}`,
/// and `{value: "...", expires_at}`.
fn parse_credential(payload: &Value) -> Option<EphemeralCredential> {
    let (token, expires_at) = match payload.get("client_secret") {
        Some(Value::Object(secret)) => (
            secret.get("value")?.as_str()?.to_string(),
            secret
                .get("expires_at")
                .and_then(Value::as_i64)
                .or_else(|| payload.get("expires_at").and_then(Value::as_i64)),
        ),
        Some(Value::String(token)) => (
            token.clone(),
            payload.get("expires_at").and_then(Value::as_i64),
        ),
        _ => (
            payload.get("value")?.as_str()?.to_string(),
            payload.get("expires_at").and_then(Value::as_i64),
        ),
    };

    if token.is_empty() {
        return None;
    }

    Some(EphemeralCredential {
        token,
        expires_at: expires_at.unwrap_or(0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_keeps_only_accepted_fields() {
        let session = json!({
            "type": "realtime",
            "model": "gpt-realtime",
            "instructions": "hi",
            "voice": "marin",
            "temperature": 0.8,
            "turn_detection": { "type": "server_vad" },
            "tools": []
        });
        let sanitized = sanitize_session(session);
        let obj = sanitized.as_object().unwrap();
        assert!(obj.keys().all(|k| MINT_SESSION_FIELDS.contains(&k.as_str())));
        assert_eq!(obj.get("model"), Some(&json!("gpt-realtime")));
        assert!(!obj.contains_key("voice"));
        assert!(!obj.contains_key("temperature"));
    }

    #[test]
    fn sanitize_coerces_numeric_prompt_version() {
        let sanitized = sanitize_session(json!({
            "model": "gpt-realtime",
            "prompt": { "id": "pmpt_1", "version": 3 }
        }));
        assert_eq!(sanitized["prompt"]["version"], json!("3"));
    }

    #[test]
    fn sanitize_prefers_prompt_over_instructions() {
        let sanitized = sanitize_session(json!({
            "instructions": "be brief",
            "prompt": { "id": "pmpt_1" }
        }));
        assert!(sanitized.get("instructions").is_none());
        assert_eq!(sanitized["prompt"]["id"], "pmpt_1");
    }

    #[test]
    fn sanitize_inserts_type() {
        let sanitized = sanitize_session(json!({ "model": "gpt-realtime" }));
        assert_eq!(sanitized["type"], json!("realtime"));
    }

    #[test]
    fn parse_nested_client_secret() {
        let credential = parse_credential(&json!({
            "client_secret": { "value": "ek_X", "expires_at": 1_700_000_600 }
        }))
        .unwrap();
        assert_eq!(credential.token, "ek_X");
        assert_eq!(credential.expires_at, 1_700_000_600);
    }

    #[test]
    fn parse_flat_client_secret() {
        let credential = parse_credential(&json!({
            "client_secret": "ek_Y",
            "expires_at": 42
        }))
        .unwrap();
        assert_eq!(credential.token, "ek_Y");
        assert_eq!(credential.expires_at, 42);
    }

    #[test]
    fn parse_bare_value() {
        let credential =
            parse_credential(&json!({ "value": "ek_Z", "expires_at": 7 })).unwrap();
        assert_eq!(credential.token, "ek_Z");
    }

    #[test]
    fn parse_missing_value_is_none() {
        assert!(parse_credential(&json!({ "expires_at": 7 })).is_none());
        assert!(parse_credential(&json!({ "client_secret": {} })).is_none());
    }
}
