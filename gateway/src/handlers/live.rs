//! Live transcript streaming.
//!
//! `GET /live/{key}` is a server-sent-events tail of a call's transcript
//! log: the stream polls the store at a sub-second cadence, emits each new
//! entry as an `event: line`, and sends a comment keepalive every 15 s so
//! proxies keep the connection open through silences. `POST /live/{key}/push`
//! appends a line, used by external publishers.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::Duration;

use crate::core::transcript::{TranscriptEntry, TranscriptKind};
use crate::state::AppState;

/// Poll cadence against the transcript store.
const POLL_INTERVAL: Duration = Duration::from_millis(600);

/// Keepalive comment cadence.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// GET /live/{key}
pub async fn live_stream(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let store = state.transcripts.clone();

    let stream = stream::unfold(
        (store, key, 0usize, true),
        |(store, key, cursor, first)| async move {
            if !first {
                tokio::time::sleep(POLL_INTERVAL).await;
            }
            let (entries, next_cursor) = store.range(&key, cursor);
            let events: Vec<Result<Event, Infallible>> = entries
                .iter()
                .filter_map(|entry| {
                    Event::default().event("line").json_data(entry).ok()
                })
                .map(Ok)
                .collect();
            Some((stream::iter(events), (store, key, next_cursor, false)))
        },
    )
    .flatten();

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(KEEPALIVE_INTERVAL)
            .text("keepalive"),
    )
}

/// Body for a pushed transcript line.
#[derive(Debug, Deserialize)]
pub struct PushRequest {
    pub text: String,
    #[serde(default)]
    pub kind: Option<TranscriptKind>,
}

/// POST /live/{key}/push
pub async fn live_push(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Json(request): Json<PushRequest>,
) -> (StatusCode, Json<Value>) {
    let kind = request.kind.unwrap_or(TranscriptKind::TextDelta);
    state
        .transcripts
        .append(&key, TranscriptEntry::now(kind, request.text));
    (StatusCode::ACCEPTED, Json(json!({ "ok": true })))
}
