//! Model WebSocket connector.
//!
//! Dials `wss://…/v1/realtime?model=<model-id>` with a bounded handshake.
//! Authentication is an `Authorization: Bearer` header when we hold the
//! credential server-side, or the `realtime` +
//! `openai-insecure-api-key.<token>` subprotocol pair for callers that
//! cannot set headers. Per-message compression is never negotiated: the
//! frames are small JSON and base64 audio, and compression adds latency
//! per frame.

use http::Uri;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::{self, client::IntoClientRequest};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// Model handshake deadline.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);

/// Connected model socket.
pub type ModelStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How to authenticate the model connection.
#[derive(Debug, Clone)]
pub enum ModelAuth {
    /// `Authorization: Bearer <token>` header. Preferred.
    Bearer(String),
    /// `realtime, openai-insecure-api-key.<token>` subprotocols; the
    /// browser-compatible fallback.
    Subprotocol(String),
}

/// Connection parameters.
#[derive(Debug, Clone)]
pub struct ModelConnectOptions {
    /// Base WebSocket URL without the model query parameter.
    pub ws_url: String,
    pub model: String,
    pub auth: ModelAuth,
}

/// Model connection failures.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model handshake failed: {0}")]
    Handshake(String),

    #[error("model handshake timed out after {HANDSHAKE_TIMEOUT:?}")]
    Timeout,
}

/// Open the model WebSocket.
pub async fn connect_model(options: &ModelConnectOptions) -> Result<ModelStream, ModelError> {
    let url = format!(
        "{}?model={}",
        options.ws_url,
        urlencoding::encode(&options.model)
    );

    let uri: Uri = url
        .parse()
        .map_err(|e| ModelError::Handshake(format!("bad model url: {e}")))?;
    let mut request = uri
        .into_client_request()
        .map_err(|e| ModelError::Handshake(e.to_string()))?;

    {
        let headers = request.headers_mut();
        headers.insert(
            "OpenAI-Beta",
            "realtime=v1"
                .parse()
                .map_err(|_| ModelError::Handshake("bad header".into()))?,
        );
        match &options.auth {
            ModelAuth::Bearer(token) => {
                let value = format!("Bearer {token}")
                    .parse()
                    .map_err(|_| ModelError::Handshake("bad bearer token".into()))?;
                headers.insert("Authorization", value);
                headers.insert(
                    "Sec-WebSocket-Protocol",
                    "realtime"
                        .parse()
                        .map_err(|_| ModelError::Handshake("bad header".into()))?,
                );
            }
            ModelAuth::Subprotocol(token) => {
                let value = format!("realtime, openai-insecure-api-key.{token}")
                    .parse()
                    .map_err(|_| ModelError::Handshake("bad subprotocol token".into()))?;
                headers.insert("Sec-WebSocket-Protocol", value);
            }
        }
    }

    let connect = tokio_tungstenite::connect_async(request);
    match timeout(HANDSHAKE_TIMEOUT, connect).await {
        Ok(Ok((stream, response))) => {
            tracing::info!(
                status = response.status().as_u16(),
                model = %options.model,
                "model WebSocket connected"
            );
            Ok(stream)
        }
        Ok(Err(tungstenite::Error::Http(response))) => Err(ModelError::Handshake(format!(
            "upstream returned {}",
            response.status()
        ))),
        Ok(Err(e)) => Err(ModelError::Handshake(e.to_string())),
        Err(_) => Err(ModelError::Timeout),
    }
}
