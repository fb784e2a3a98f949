//! End-to-end bridge tests: a real carrier WebSocket client on one side,
//! a scripted mock model server on the other, and the gateway in between.

mod common;

use std::net::SocketAddr;
use std::sync::Arc;

use base64::prelude::*;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;

use callbridge_gateway::AppState;
use common::{app, test_config, test_state};

const WAIT: Duration = Duration::from_secs(5);

/// Serve the gateway on an ephemeral port.
async fn serve_gateway(state: Arc<AppState>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = app(state);
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// Mock model server: accepts one WebSocket, forwards every received JSON
/// event to the test, and sends whatever the test pushes in.
async fn mock_model() -> (
    String,
    mpsc::UnboundedSender<Value>,
    mpsc::UnboundedReceiver<Value>,
) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (to_model_tx, mut to_model_rx) = mpsc::unbounded_channel::<Value>();
    let (from_model_tx, from_model_rx) = mpsc::unbounded_channel::<Value>();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let (mut sink, mut stream) = ws.split();
        loop {
            tokio::select! {
                outbound = to_model_rx.recv() => match outbound {
                    Some(event) => {
                        if sink.send(Message::Text(event.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                inbound = stream.next() => match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if let Ok(event) = serde_json::from_str::<Value>(&text) {
                            let _ = from_model_tx.send(event);
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                },
            }
        }
    });

    (format!("ws://{addr}"), to_model_tx, from_model_rx)
}

/// Wait for the next model-bound event whose type matches.
async fn expect_model_event(
    rx: &mut mpsc::UnboundedReceiver<Value>,
    event_type: &str,
) -> Value {
    timeout(WAIT, async {
        loop {
            let event = rx.recv().await.expect("model channel closed");
            if event["type"] == event_type {
                return event;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {event_type}"))
}

type CarrierSocket = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Wait for the next carrier-bound JSON frame whose event matches.
async fn expect_carrier_event(socket: &mut CarrierSocket, event: &str) -> Value {
    timeout(WAIT, async {
        loop {
            match socket.next().await.expect("carrier socket closed") {
                Ok(Message::Text(text)) => {
                    let frame: Value = serde_json::from_str(&text).unwrap();
                    if frame["event"] == event {
                        return frame;
                    }
                }
                Ok(_) => {}
                Err(err) => panic!("carrier socket error: {err}"),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for carrier {event}"))
}

fn start_frame() -> String {
    json!({
        "event": "start",
        "streamSid": "MZ1",
        "start": {
            "streamSid": "MZ1",
            "callSid": "CA1",
            "customParameters": {},
            "mediaFormat": { "encoding": "audio/x-mulaw", "sampleRate": 8000, "channels": 1 }
        }
    })
    .to_string()
}

fn media_frame(payload: &[u8], timestamp_ms: u64) -> String {
    json!({
        "event": "media",
        "streamSid": "MZ1",
        "media": {
            "payload": BASE64_STANDARD.encode(payload),
            "timestamp": timestamp_ms.to_string()
        }
    })
    .to_string()
}

#[tokio::test]
async fn happy_path_stream_and_barge_in() {
    let (model_url, to_model, mut from_model) = mock_model().await;
    let mut config = test_config();
    config.realtime_ws_url = model_url;
    let state = test_state(config).await;
    let gateway = serve_gateway(state).await;

    let (mut carrier, _) =
        tokio_tungstenite::connect_async(format!("ws://{gateway}/stream/twilio/ek_test"))
            .await
            .unwrap();

    carrier
        .send(Message::Text(start_frame().into()))
        .await
        .unwrap();

    // Model comes up; the bridge answers session.created with its merged
    // session.update carrying forced narrowband codecs.
    to_model
        .send(json!({ "type": "session.created", "session": { "id": "sess_1" } }))
        .unwrap();
    let update = expect_model_event(&mut from_model, "session.update").await;
    assert_eq!(update["session"]["input_audio_format"], "g711_ulaw");
    assert_eq!(update["session"]["output_audio_format"], "g711_ulaw");
    assert_eq!(update["session"]["type"], "realtime");

    // Caller audio is relayed as input_audio_buffer.append, passthrough.
    let caller_audio = vec![0x7Fu8; 160];
    carrier
        .send(Message::Text(media_frame(&caller_audio, 1000).into()))
        .await
        .unwrap();
    let append = expect_model_event(&mut from_model, "input_audio_buffer.append").await;
    assert_eq!(
        append["audio"].as_str().unwrap(),
        BASE64_STANDARD.encode(&caller_audio)
    );

    // Agent turn: two deltas totaling 480 bytes become three paced
    // 160-byte frames toward the carrier.
    to_model
        .send(json!({ "type": "response.created", "response": { "id": "resp_1" } }))
        .unwrap();
    to_model
        .send(json!({
            "type": "response.output_audio.delta",
            "item_id": "it_9",
            "delta": BASE64_STANDARD.encode(vec![0x10u8; 240])
        }))
        .unwrap();
    to_model
        .send(json!({
            "type": "response.audio.delta",
            "item_id": "it_9",
            "delta": BASE64_STANDARD.encode(vec![0x20u8; 240])
        }))
        .unwrap();

    for _ in 0..3 {
        let media = expect_carrier_event(&mut carrier, "media").await;
        let bytes = BASE64_STANDARD
            .decode(media["media"]["payload"].as_str().unwrap())
            .unwrap();
        assert_eq!(bytes.len(), 160);
        assert_eq!(media["streamSid"], "MZ1");
    }

    // Barge-in: caller speaks at 1620 ms into a response that started at
    // 1000 ms; the model is told to truncate at 620 ms.
    carrier
        .send(Message::Text(media_frame(&caller_audio, 1620).into()))
        .await
        .unwrap();
    expect_model_event(&mut from_model, "input_audio_buffer.append").await;

    to_model
        .send(json!({ "type": "input_audio_buffer.speech_started", "audio_start_ms": 1620, "item_id": "it_u1" }))
        .unwrap();

    expect_carrier_event(&mut carrier, "clear").await;
    let truncate = expect_model_event(&mut from_model, "conversation.item.truncate").await;
    assert_eq!(truncate["item_id"], "it_9");
    assert_eq!(truncate["content_index"], 0);
    assert_eq!(truncate["audio_end_ms"], 620);

    // A second speech_started within the same response produces a clear
    // but no second truncate.
    to_model
        .send(json!({ "type": "input_audio_buffer.speech_started", "audio_start_ms": 1700, "item_id": "it_u2" }))
        .unwrap();
    expect_carrier_event(&mut carrier, "clear").await;

    let no_truncate = timeout(Duration::from_millis(500), async {
        loop {
            let event = from_model.recv().await.expect("model channel closed");
            if event["type"] == "conversation.item.truncate" {
                return event;
            }
        }
    })
    .await;
    assert!(no_truncate.is_err(), "second truncate must not be sent");

    let _ = carrier.close(None).await;
}

#[tokio::test]
async fn commit_mark_triggers_commit_and_response_create() {
    let (model_url, to_model, mut from_model) = mock_model().await;
    let mut config = test_config();
    config.realtime_ws_url = model_url;
    let state = test_state(config).await;
    let gateway = serve_gateway(state).await;

    let (mut carrier, _) =
        tokio_tungstenite::connect_async(format!("ws://{gateway}/stream/twilio/ek_test"))
            .await
            .unwrap();
    carrier
        .send(Message::Text(start_frame().into()))
        .await
        .unwrap();
    to_model
        .send(json!({ "type": "session.created", "session": {} }))
        .unwrap();
    expect_model_event(&mut from_model, "session.update").await;

    carrier
        .send(Message::Text(
            json!({ "event": "mark", "streamSid": "MZ1", "mark": { "name": "commit" } })
                .to_string()
                .into(),
        ))
        .await
        .unwrap();

    expect_model_event(&mut from_model, "input_audio_buffer.commit").await;
    let create = expect_model_event(&mut from_model, "response.create").await;
    assert_eq!(create["response"]["output_audio_format"], "g711_ulaw");

    let _ = carrier.close(None).await;
}

#[tokio::test]
async fn missing_credential_closes_1008() {
    let state = test_state(test_config()).await;
    let gateway = serve_gateway(state).await;

    let (mut carrier, _) =
        tokio_tungstenite::connect_async(format!("ws://{gateway}/stream/twilio"))
            .await
            .unwrap();

    let close = timeout(WAIT, async {
        loop {
            match carrier.next().await {
                Some(Ok(Message::Close(frame))) => return frame,
                Some(Ok(_)) => {}
                Some(Err(_)) | None => return None,
            }
        }
    })
    .await
    .unwrap();

    let frame = close.expect("expected a close frame");
    assert_eq!(frame.code, CloseCode::Policy);
}

#[tokio::test]
async fn model_handshake_failure_closes_1011() {
    let mut config = test_config();
    // Nothing listens here; the handshake fails immediately.
    config.realtime_ws_url = "ws://127.0.0.1:9".to_string();
    let state = test_state(config).await;
    let gateway = serve_gateway(state).await;

    let (mut carrier, _) =
        tokio_tungstenite::connect_async(format!("ws://{gateway}/stream/twilio/ek_test"))
            .await
            .unwrap();
    carrier
        .send(Message::Text(start_frame().into()))
        .await
        .unwrap();

    let close = timeout(WAIT, async {
        loop {
            match carrier.next().await {
                Some(Ok(Message::Close(frame))) => return frame,
                Some(Ok(_)) => {}
                Some(Err(_)) | None => return None,
            }
        }
    })
    .await
    .unwrap();

    let frame = close.expect("expected a close frame");
    assert_eq!(frame.code, CloseCode::Error);
}

#[tokio::test]
async fn malformed_carrier_frame_does_not_end_the_call() {
    let (model_url, to_model, mut from_model) = mock_model().await;
    let mut config = test_config();
    config.realtime_ws_url = model_url;
    let state = test_state(config).await;
    let gateway = serve_gateway(state).await;

    let (mut carrier, _) =
        tokio_tungstenite::connect_async(format!("ws://{gateway}/stream/twilio/ek_test"))
            .await
            .unwrap();
    carrier
        .send(Message::Text(start_frame().into()))
        .await
        .unwrap();
    to_model
        .send(json!({ "type": "session.created", "session": {} }))
        .unwrap();
    expect_model_event(&mut from_model, "session.update").await;

    // Garbage frame, then a valid one: the call must survive.
    carrier
        .send(Message::Text("this is not json".to_string().into()))
        .await
        .unwrap();
    carrier
        .send(Message::Text(media_frame(&[0u8; 160], 40).into()))
        .await
        .unwrap();

    expect_model_event(&mut from_model, "input_audio_buffer.append").await;
    let _ = carrier.close(None).await;
}
