//! The bridge: a per-call relay between the carrier media stream and the
//! model WebSocket.
//!
//! One bridge task owns both sockets, the egress frame buffer, and the
//! heartbeat. Each socket gets a writer task fed by an mpsc channel so the
//! relay loop never blocks on a slow peer, and closure of either side
//! funnels into the single closing path that tears everything down.
//!
//! Lifecycle: `AwaitingStart` (carrier `start` frame) → `Connecting`
//! (model handshake, 15 s bound) → `AwaitingSessionCreated` (model
//! `session.created`, answered with the merged `session.update`) →
//! `Active`, until either peer hangs up.

pub mod session;

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message as CarrierMessage, WebSocket};
use base64::prelude::*;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval, Duration};
use tokio_tungstenite::tungstenite::Message as ModelMessage;

use crate::core::audio::{FrameBuffer, FrameSink};
use crate::core::carrier::{CarrierEvent, CarrierFrame, StartInfo};
use crate::core::model::{connect_model, ModelAuth, ModelConnectOptions, ModelStream};
use crate::core::model::messages::{ClientEvent, ServerEvent};
use crate::core::outbound::{CallDirection, CallRecord};
use crate::core::transcript::{TranscriptEntry, TranscriptKind};
use crate::state::AppState;

pub use session::{BridgePhase, CallSession};

/// WebSocket close codes used on the carrier leg.
pub const CLOSE_NORMAL: u16 = 1000;
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// Ping cadence on both sockets. Intermediate proxies tend to reap idle
/// connections well before two of these intervals elapse.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

/// Writer-channel depth per socket.
const SEND_CHANNEL_CAPACITY: usize = 256;

/// Name attached to carrier `mark` frames sent after each audio delta.
const PLAYBACK_MARK: &str = "agent-audio";

/// Frames destined for the carrier writer task.
enum CarrierSend {
    Frame(CarrierFrame),
    Ping,
    Close { code: u16, reason: String },
}

/// Frames destined for the model writer task.
enum ModelSend {
    Event(ClientEvent),
    Ping,
    Pong(Bytes),
    Close,
}

/// Run one bridged call to completion. `credential` is the ephemeral
/// secret already extracted by the upgrade handler.
pub async fn run_bridge(state: Arc<AppState>, credential: String, socket: WebSocket) {
    // Correlation id for log lines emitted before the carrier names the call.
    let connection_id = uuid::Uuid::new_v4();
    tracing::debug!(%connection_id, "carrier socket accepted");

    let (carrier_sink, mut carrier_stream) = socket.split();
    let (carrier_tx, carrier_rx) = mpsc::channel::<CarrierSend>(SEND_CHANNEL_CAPACITY);
    let carrier_writer = tokio::spawn(carrier_writer_task(carrier_sink, carrier_rx));

    // AwaitingStart: nothing useful can happen before stream metadata.
    let Some(start) = await_start(&mut carrier_stream).await else {
        let _ = carrier_tx
            .send(CarrierSend::Close {
                code: CLOSE_NORMAL,
                reason: "no stream started".into(),
            })
            .await;
        let _ = carrier_writer.await;
        return;
    };

    let mut session = CallSession::new(&start);
    tracing::info!(
        call_sid = %session.call_sid,
        stream_sid = %session.stream_sid,
        "carrier stream started"
    );
    state.calls.upsert(CallRecord {
        call_sid: session.call_sid.clone(),
        to: String::new(),
        from: String::new(),
        direction: CallDirection::Inbound,
        status: "in-progress".into(),
        created_at: chrono::Utc::now(),
    });

    // Connecting: dial the model with the ephemeral credential.
    let options = ModelConnectOptions {
        ws_url: state.config.realtime_ws_url.clone(),
        model: state.control.model().to_string(),
        auth: ModelAuth::Bearer(credential),
    };
    let model_socket = match connect_model(&options).await {
        Ok(socket) => socket,
        Err(err) => {
            tracing::error!(call_sid = %session.call_sid, "model connect failed: {err}");
            state.calls.set_status(&session.call_sid, "failed");
            let _ = carrier_tx
                .send(CarrierSend::Close {
                    code: CLOSE_INTERNAL_ERROR,
                    reason: "model unavailable".into(),
                })
                .await;
            let _ = carrier_writer.await;
            return;
        }
    };
    session.phase = BridgePhase::AwaitingSessionCreated;

    let (model_sink, mut model_stream) = model_socket.split();
    let (model_tx, model_rx) = mpsc::channel::<ModelSend>(SEND_CHANNEL_CAPACITY);
    let model_writer = tokio::spawn(model_writer_task(model_sink, model_rx));

    let buffer = FrameBuffer::new(carrier_frame_sink(
        carrier_tx.clone(),
        session.stream_sid.clone(),
    ));

    let heartbeat = {
        let carrier_tx = carrier_tx.clone();
        let model_tx = model_tx.clone();
        tokio::spawn(async move {
            let mut ticker = interval(HEARTBEAT_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if carrier_tx.send(CarrierSend::Ping).await.is_err() {
                    break;
                }
                if model_tx.send(ModelSend::Ping).await.is_err() {
                    break;
                }
            }
        })
    };

    // Relay until either side closes.
    let carrier_close_code = relay(
        &state,
        &mut session,
        &mut carrier_stream,
        &mut model_stream,
        &carrier_tx,
        &model_tx,
        &buffer,
    )
    .await;

    // Closing: one atomic teardown regardless of which side went first.
    session.phase = BridgePhase::Closing;
    buffer.shutdown();
    heartbeat.abort();
    let _ = model_tx.send(ModelSend::Close).await;
    let _ = carrier_tx
        .send(CarrierSend::Close {
            code: carrier_close_code,
            reason: "call ended".into(),
        })
        .await;
    drop(carrier_tx);
    drop(model_tx);
    let _ = carrier_writer.await;
    let _ = model_writer.await;

    state.calls.set_status(&session.call_sid, "completed");
    tracing::info!(call_sid = %session.call_sid, "bridge closed");
}

/// Read carrier frames until the `start` event arrives. Returns `None` if
/// the socket dies first.
async fn await_start(
    carrier_stream: &mut SplitStream<WebSocket>,
) -> Option<StartInfo> {
    while let Some(message) = carrier_stream.next().await {
        match message {
            Ok(CarrierMessage::Text(text)) => {
                match serde_json::from_str::<CarrierEvent>(&text) {
                    Ok(CarrierEvent::Start { start, .. }) => return Some(start),
                    Ok(CarrierEvent::Connected { protocol, .. }) => {
                        tracing::debug!(?protocol, "carrier connected");
                    }
                    Ok(CarrierEvent::Stop { .. }) => return None,
                    Ok(_) => {
                        tracing::debug!("carrier frame before start, dropping");
                    }
                    Err(err) => {
                        tracing::warn!("malformed carrier frame before start: {err}");
                    }
                }
            }
            Ok(CarrierMessage::Close(_)) => return None,
            Ok(_) => {}
            Err(err) => {
                tracing::warn!("carrier socket error before start: {err}");
                return None;
            }
        }
    }
    None
}

/// The main relay loop. Returns the close code for the carrier leg.
async fn relay(
    state: &Arc<AppState>,
    session: &mut CallSession,
    carrier_stream: &mut SplitStream<WebSocket>,
    model_stream: &mut SplitStream<ModelStream>,
    carrier_tx: &mpsc::Sender<CarrierSend>,
    model_tx: &mpsc::Sender<ModelSend>,
    buffer: &FrameBuffer,
) -> u16 {
    loop {
        tokio::select! {
            carrier_message = carrier_stream.next() => match carrier_message {
                Some(Ok(CarrierMessage::Text(text))) => {
                    if !on_carrier_text(state, session, &text, model_tx).await {
                        return CLOSE_NORMAL;
                    }
                }
                Some(Ok(CarrierMessage::Close(_))) | None => {
                    tracing::info!(call_sid = %session.call_sid, "carrier hung up");
                    return CLOSE_NORMAL;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    tracing::warn!(call_sid = %session.call_sid, "carrier socket error: {err}");
                    return CLOSE_NORMAL;
                }
            },
            model_message = model_stream.next() => match model_message {
                Some(Ok(ModelMessage::Text(text))) => {
                    on_model_text(state, session, &text, carrier_tx, model_tx, buffer).await;
                }
                Some(Ok(ModelMessage::Ping(data))) => {
                    let _ = model_tx.send(ModelSend::Pong(data)).await;
                }
                Some(Ok(ModelMessage::Close(frame))) => {
                    tracing::info!(call_sid = %session.call_sid, ?frame, "model closed");
                    return CLOSE_NORMAL;
                }
                None => {
                    tracing::info!(call_sid = %session.call_sid, "model stream ended");
                    return CLOSE_NORMAL;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    tracing::error!(call_sid = %session.call_sid, "model socket error: {err}");
                    return CLOSE_INTERNAL_ERROR;
                }
            },
        }
    }
}

/// Handle one carrier text frame. Returns false when the stream stopped.
async fn on_carrier_text(
    state: &Arc<AppState>,
    session: &mut CallSession,
    text: &str,
    model_tx: &mpsc::Sender<ModelSend>,
) -> bool {
    let event = match serde_json::from_str::<CarrierEvent>(text) {
        Ok(event) => event,
        Err(err) => {
            // One malformed frame never costs the call.
            tracing::warn!(call_sid = %session.call_sid, "malformed carrier frame: {err}");
            return true;
        }
    };

    match event {
        CarrierEvent::Media { media, .. } => {
            if let Some(timestamp) = media.timestamp_ms() {
                session.note_media_timestamp(timestamp);
            }
            if session.session_configured {
                let _ = model_tx
                    .send(ModelSend::Event(ClientEvent::audio_append_b64(media.payload)))
                    .await;
            } else {
                // The carrier is not paced by us and the session is not
                // configured yet; buffering here would grow unbounded.
                tracing::trace!("model not ready, dropping caller frame");
            }
        }

        CarrierEvent::Mark { mark, .. } => {
            if mark.name == "commit" {
                let _ = model_tx
                    .send(ModelSend::Event(ClientEvent::InputAudioBufferCommit))
                    .await;
                let overrides = session.response_overrides(&state.control);
                let _ = model_tx
                    .send(ModelSend::Event(ClientEvent::ResponseCreate {
                        response: Some(overrides),
                    }))
                    .await;
            } else {
                tracing::trace!(name = %mark.name, "carrier playback mark");
            }
        }

        CarrierEvent::Stop { .. } => {
            tracing::info!(call_sid = %session.call_sid, "carrier sent stop");
            return false;
        }

        CarrierEvent::Start { .. } | CarrierEvent::Connected { .. } => {
            tracing::debug!("duplicate start/connected frame ignored");
        }
    }
    true
}

/// Handle one model text frame.
async fn on_model_text(
    state: &Arc<AppState>,
    session: &mut CallSession,
    text: &str,
    carrier_tx: &mpsc::Sender<CarrierSend>,
    model_tx: &mpsc::Sender<ModelSend>,
    buffer: &FrameBuffer,
) {
    let event = match serde_json::from_str::<ServerEvent>(text) {
        Ok(event) => event,
        Err(err) => {
            tracing::warn!(call_sid = %session.call_sid, "unparseable model event: {err}");
            return;
        }
    };

    match event {
        ServerEvent::SessionCreated { .. } => {
            let update = session.build_session_update(&state.control);
            let _ = model_tx.send(ModelSend::Event(update)).await;
            session.on_session_configured();
            tracing::info!(call_sid = %session.call_sid, "session configured");
        }

        ServerEvent::SessionUpdated { .. } => {
            tracing::debug!(call_sid = %session.call_sid, "model session updated");
        }

        ServerEvent::ResponseCreated { response } => {
            tracing::debug!(response_id = ?response.id, "response started");
            session.on_response_created();
        }

        ServerEvent::OutputItemAdded { item } | ServerEvent::OutputItemDone { item } => {
            session.on_output_item(&item);
        }

        ServerEvent::AudioDelta { item_id, delta } => {
            session.on_audio_delta(item_id.as_deref());
            match ServerEvent::decode_audio(&delta) {
                Ok(audio) => {
                    buffer.enqueue(&audio);
                    let _ = carrier_tx
                        .send(CarrierSend::Frame(CarrierFrame::mark(
                            &session.stream_sid,
                            PLAYBACK_MARK,
                        )))
                        .await;
                }
                Err(err) => {
                    tracing::warn!("undecodable audio delta: {err}");
                }
            }
        }

        ServerEvent::AudioTranscriptDelta { delta, .. } => {
            state.transcripts.append(
                session.transcript_key(),
                TranscriptEntry::now(TranscriptKind::AudioTranscriptDelta, delta),
            );
        }

        ServerEvent::TextDelta { delta, .. } => {
            state.transcripts.append(
                session.transcript_key(),
                TranscriptEntry::now(TranscriptKind::TextDelta, delta),
            );
        }

        ServerEvent::AudioDone { .. }
        | ServerEvent::AudioTranscriptDone { .. }
        | ServerEvent::TextDone { .. }
        | ServerEvent::ResponseDone { .. }
        | ServerEvent::ResponseCancelled { .. } => {
            session.on_response_finished();
        }

        ServerEvent::SpeechStarted { .. } => {
            // Barge-in: stop our playback, flush the carrier's, and tell
            // the model where the caller actually stopped hearing us.
            buffer.clear();
            let _ = carrier_tx
                .send(CarrierSend::Frame(CarrierFrame::clear(&session.stream_sid)))
                .await;
            if let Some(truncate) = session.barge_in() {
                tracing::debug!(call_sid = %session.call_sid, "caller barge-in, truncating");
                let _ = model_tx.send(ModelSend::Event(truncate)).await;
            }
        }

        ServerEvent::SpeechStopped { .. } => {
            tracing::debug!("caller speech stopped");
        }

        ServerEvent::InputAudioBufferCommitted { .. }
        | ServerEvent::InputAudioBufferCleared => {}

        ServerEvent::TranscriptionCompleted { transcript, .. } => {
            tracing::debug!(call_sid = %session.call_sid, %transcript, "caller transcript");
        }

        ServerEvent::TranscriptionFailed { error, .. } => {
            tracing::warn!(call_sid = %session.call_sid, ?error, "caller transcription failed");
        }

        ServerEvent::RateLimitsUpdated { rate_limits } => {
            tracing::debug!(?rate_limits, "rate limits updated");
        }

        ServerEvent::Error { error } => {
            // Mid-call model errors are not fatal per protocol.
            tracing::error!(call_sid = %session.call_sid, ?error, "model error event");
        }

        ServerEvent::Other => {
            tracing::trace!("unhandled model event");
        }
    }
}

/// Frame-buffer sink: encode a paced frame and hand it to the carrier
/// writer. The buffer knows nothing about the wire format beyond bytes.
fn carrier_frame_sink(
    carrier_tx: mpsc::Sender<CarrierSend>,
    stream_sid: String,
) -> FrameSink {
    Arc::new(move |frame: Bytes| {
        let carrier_tx = carrier_tx.clone();
        let stream_sid = stream_sid.clone();
        Box::pin(async move {
            let frame = CarrierFrame::media(&stream_sid, BASE64_STANDARD.encode(&frame));
            let _ = carrier_tx.send(CarrierSend::Frame(frame)).await;
        })
    })
}

async fn carrier_writer_task(
    mut sink: SplitSink<WebSocket, CarrierMessage>,
    mut rx: mpsc::Receiver<CarrierSend>,
) {
    while let Some(send) = rx.recv().await {
        let closing = matches!(send, CarrierSend::Close { .. });
        let result = match send {
            CarrierSend::Frame(frame) => match serde_json::to_string(&frame) {
                Ok(json) => sink.send(CarrierMessage::Text(json.into())).await,
                Err(err) => {
                    tracing::error!("failed to serialize carrier frame: {err}");
                    continue;
                }
            },
            CarrierSend::Ping => sink.send(CarrierMessage::Ping(Bytes::new())).await,
            CarrierSend::Close { code, reason } => {
                sink.send(CarrierMessage::Close(Some(CloseFrame {
                    code,
                    reason: reason.into(),
                })))
                .await
            }
        };
        if result.is_err() || closing {
            break;
        }
    }
}

async fn model_writer_task(
    mut sink: SplitSink<ModelStream, ModelMessage>,
    mut rx: mpsc::Receiver<ModelSend>,
) {
    while let Some(send) = rx.recv().await {
        let closing = matches!(send, ModelSend::Close);
        let result = match send {
            ModelSend::Event(event) => match serde_json::to_string(&event) {
                Ok(json) => sink.send(ModelMessage::Text(json.into())).await,
                Err(err) => {
                    tracing::error!("failed to serialize model event: {err}");
                    continue;
                }
            },
            ModelSend::Ping => sink.send(ModelMessage::Ping(Bytes::new())).await,
            ModelSend::Pong(data) => sink.send(ModelMessage::Pong(data)).await,
            ModelSend::Close => sink.send(ModelMessage::Close(None)).await,
        };
        if result.is_err() || closing {
            break;
        }
    }
}
