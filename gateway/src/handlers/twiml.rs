//! Call-control document endpoints.
//!
//! `GET/POST /twiml` hands the carrier its instructions for a call: dial
//! the model's SIP gateway, open a media stream to the bridge, or speak a
//! static message. `POST /twiml/action` is the post-dial continuation used
//! to fall back from a failed SIP attempt to the stream bridge.
//!
//! Requests are verified against the carrier's HMAC-SHA1 signature when
//! both the signature header and the shared auth token are present. The
//! endpoint always answers 200 with a spoken document on internal
//! failures: a carrier receiving a 5xx plays a generic failure tone,
//! which is a worse caller experience than our own message.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{OriginalUri, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Form;
use serde_json::Value;

use crate::auth::verify_carrier_signature;
use crate::core::token::MintRequest;
use crate::core::twiml::{
    error_document, forbidden_document, simple_document, sip_document, stream_document,
    DocumentMode, SipScheme, SipTransport,
};
use crate::state::AppState;

/// Header carrying the carrier's request signature.
const SIGNATURE_HEADER: &str = "x-twilio-signature";

/// Spoken fallback when the bridge has no public address.
const UNREACHABLE_MESSAGE: &str =
    "This service is not fully configured yet. Please try again later.";

/// Parsed document request parameters. Unknown values fall back to
/// defaults rather than erroring; the carrier is not a client we can ask
/// to retry with corrected input mid-call.
#[derive(Debug, Default)]
pub struct DocumentRequest {
    pub mode: Option<String>,
    pub token: Option<String>,
    pub scheme: Option<String>,
    pub transport: Option<String>,
    pub port: Option<u16>,
    pub prompt_id: Option<String>,
    pub prompt_version: Option<String>,
    pub instructions: Option<String>,
    pub model: Option<String>,
}

impl DocumentRequest {
    fn from_params(params: &HashMap<String, String>) -> Self {
        let get = |key: &str| params.get(key).cloned().filter(|v| !v.is_empty());
        Self {
            mode: get("mode"),
            token: get("token").or_else(|| get("secret")),
            scheme: get("scheme"),
            transport: get("transport"),
            port: get("port").and_then(|p| p.parse::<u16>().ok()).filter(|p| *p > 0),
            prompt_id: get("promptId").or_else(|| get("prompt_id")),
            prompt_version: get("promptVersion").or_else(|| get("prompt_version")),
            instructions: get("instructions"),
            model: get("model"),
        }
    }
}

/// GET /twiml
pub async fn document_get(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
) -> Response {
    let params: HashMap<String, String> = uri
        .query()
        .map(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect()
        })
        .unwrap_or_default();

    // GET signatures cover the full URL including the query string, with
    // no form parameters.
    if let Err(forbidden) = check_signature(&state, &headers, &uri, &HashMap::new()) {
        return forbidden;
    }

    let request = DocumentRequest::from_params(&params);
    render_document(&state, request).await
}

/// POST /twiml
pub async fn document_post(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    if let Err(forbidden) = check_signature(&state, &headers, &uri, &form) {
        return forbidden;
    }

    let request = DocumentRequest::from_params(&form);
    render_document(&state, request).await
}

/// POST /twiml/action: post-dial continuation. A SIP dial that did not
/// complete falls back to the stream bridge; anything else ends the call.
pub async fn document_action(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    if let Err(forbidden) = check_signature(&state, &headers, &uri, &form) {
        return forbidden;
    }

    let dial_status = form
        .get("DialCallStatus")
        .map(String::as_str)
        .unwrap_or("unknown");

    if matches!(dial_status, "completed" | "answered") {
        return xml_response(StatusCode::OK, simple_document("Goodbye."));
    }

    tracing::warn!(dial_status, "SIP dial failed, falling back to stream");
    let mut request = DocumentRequest::from_params(&form);
    request.mode = Some("stream".to_string());
    request.token = None; // the SIP credential is spent
    render_document(&state, request).await
}

/// Verify the carrier signature when both sides of the check are present.
fn check_signature(
    state: &AppState,
    headers: &HeaderMap,
    uri: &axum::http::Uri,
    form: &HashMap<String, String>,
) -> Result<(), Response> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    let auth_token = state.config.twilio_auth_token.as_deref();

    let (Some(signature), Some(auth_token)) = (signature, auth_token) else {
        return Ok(());
    };

    // The carrier signs the public URL it requested.
    let url = match &state.config.public_base_url {
        Some(base) => format!(
            "{base}{}",
            uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/")
        ),
        None => uri.to_string(),
    };

    if verify_carrier_signature(auth_token, &url, form, signature) {
        Ok(())
    } else {
        tracing::warn!("carrier signature verification failed");
        Err(xml_response(StatusCode::FORBIDDEN, forbidden_document()))
    }
}

/// Build the document for a parsed request, minting a credential when the
/// carrier did not bring one.
async fn render_document(state: &AppState, request: DocumentRequest) -> Response {
    let mode = request
        .mode
        .as_deref()
        .and_then(DocumentMode::parse)
        .or_else(|| {
            state
                .config
                .default_document_mode
                .as_deref()
                .and_then(DocumentMode::parse)
        })
        .unwrap_or(DocumentMode::Sip);

    if mode == DocumentMode::Simple {
        return xml_response(
            StatusCode::OK,
            simple_document("Hello. The realtime agent is offline, please call back soon."),
        );
    }

    let token = match &request.token {
        Some(token) => token.clone(),
        None => match mint_for_document(state, &request).await {
            Ok(token) => token,
            Err(err) => {
                tracing::error!("document mint failed: {err}");
                return xml_response(StatusCode::OK, error_document());
            }
        },
    };

    match mode {
        DocumentMode::Stream => match state.config.bridge_ws_base() {
            Some(ws_base) => xml_response(StatusCode::OK, stream_document(&ws_base, &token)),
            None => {
                tracing::error!("stream mode requested but no bridge URL configured");
                xml_response(StatusCode::OK, simple_document(UNREACHABLE_MESSAGE))
            }
        },
        DocumentMode::Sip => {
            let scheme = request
                .scheme
                .as_deref()
                .and_then(|s| s.parse::<SipScheme>().ok())
                .unwrap_or_default();
            let transport = request
                .transport
                .as_deref()
                .and_then(|t| t.parse::<SipTransport>().ok())
                .unwrap_or_default();
            let action = state
                .config
                .public_base_url
                .as_ref()
                .map(|base| format!("{base}/twiml/action"));
            xml_response(
                StatusCode::OK,
                sip_document(
                    &token,
                    &state.config.sip_gateway_domain,
                    scheme,
                    transport,
                    request.port,
                    action.as_deref(),
                ),
            )
        }
        DocumentMode::Simple => unreachable!("handled above"),
    }
}

/// Mint a credential for a document, layering request overrides over the
/// control-plane session.
async fn mint_for_document(
    state: &AppState,
    request: &DocumentRequest,
) -> Result<String, String> {
    let api_key = state
        .config
        .openai_api_key
        .as_ref()
        .ok_or_else(|| "OPENAI_API_KEY not configured".to_string())?;

    let mut session = state.control.session_object();
    if let Some(model) = &request.model {
        session.insert("model".to_string(), Value::String(model.clone()));
    }
    if let Some(instructions) = &request.instructions {
        session.insert(
            "instructions".to_string(),
            Value::String(instructions.clone()),
        );
        session.remove("prompt");
    }
    if let Some(prompt_id) = &request.prompt_id {
        let mut prompt = serde_json::Map::new();
        prompt.insert("id".to_string(), Value::String(prompt_id.clone()));
        if let Some(version) = &request.prompt_version {
            prompt.insert("version".to_string(), Value::String(version.clone()));
        }
        session.insert("prompt".to_string(), Value::Object(prompt));
        session.remove("instructions");
    }

    let mint = MintRequest {
        expires_after_seconds: Some(state.control.token_expiry_seconds()),
        session: Value::Object(session),
        webhook: None,
    };

    state
        .minter
        .mint(api_key, mint)
        .await
        .map(|credential| credential.token)
        .map_err(|err| err.to_string())
}

/// XML response with the carrier's expected content type.
pub fn xml_response(status: StatusCode, body: String) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "text/xml; charset=utf-8")],
        body,
    )
        .into_response()
}
