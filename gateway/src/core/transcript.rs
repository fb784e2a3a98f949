//! Live transcript store: per-call append-only logs with cursor reads.
//!
//! Keys are the carrier call id, falling back to the stream id during the
//! brief window before `start` completes. Logs expire 30 minutes after the
//! last append. The backing store is an in-process map whose mutation is
//! serialized behind one lock; entries are lost on restart and are not
//! visible across replicas, which is acceptable because transcripts exist
//! for live observation only.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::time::{Duration, Instant};

/// Idle time before a key's log is evicted.
pub const TRANSCRIPT_TTL: Duration = Duration::from_secs(30 * 60);

/// How often the sweeper scans for expired keys.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// One transcript line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscriptEntry {
    /// Milliseconds since the Unix epoch at append time.
    pub timestamp_ms: i64,
    pub kind: TranscriptKind,
    pub text: String,
}

/// What produced the line.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptKind {
    AudioTranscriptDelta,
    TextDelta,
}

impl TranscriptEntry {
    pub fn now(kind: TranscriptKind, text: impl Into<String>) -> Self {
        Self {
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            kind,
            text: text.into(),
        }
    }
}

struct KeyLog {
    entries: Vec<TranscriptEntry>,
    expires_at: Instant,
}

/// Process-wide transcript store. Clones share the same map.
#[derive(Clone)]
pub struct TranscriptStore {
    inner: Arc<Mutex<HashMap<String, KeyLog>>>,
}

impl Default for TranscriptStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TranscriptStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Append an entry to `key`'s log and refresh its TTL.
    pub fn append(&self, key: &str, entry: TranscriptEntry) {
        let mut map = self.inner.lock().expect("transcript map poisoned");
        let log = map.entry(key.to_string()).or_insert_with(|| KeyLog {
            entries: Vec::new(),
            expires_at: Instant::now() + TRANSCRIPT_TTL,
        });
        log.entries.push(entry);
        log.expires_at = Instant::now() + TRANSCRIPT_TTL;
    }

    /// Read entries from `cursor` to the end. Returns the entries and the
    /// caller's next cursor (the log length). A missing or expired key
    /// yields an empty slice with the cursor unchanged.
    pub fn range(&self, key: &str, cursor: usize) -> (Vec<TranscriptEntry>, usize) {
        let map = self.inner.lock().expect("transcript map poisoned");
        match map.get(key) {
            Some(log) if cursor < log.entries.len() => {
                (log.entries[cursor..].to_vec(), log.entries.len())
            }
            Some(log) => (Vec::new(), log.entries.len().max(cursor)),
            None => (Vec::new(), cursor),
        }
    }

    /// Number of keys currently held.
    pub fn key_count(&self) -> usize {
        self.inner.lock().expect("transcript map poisoned").len()
    }

    /// Drop expired keys once.
    pub fn sweep(&self) {
        let now = Instant::now();
        let mut map = self.inner.lock().expect("transcript map poisoned");
        let before = map.len();
        map.retain(|_, log| log.expires_at > now);
        let evicted = before - map.len();
        if evicted > 0 {
            tracing::debug!(evicted, "transcript store evicted expired keys");
        }
    }

    /// Spawn the periodic sweeper. Called once from application startup.
    pub fn spawn_sweeper(&self) {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                store.sweep();
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(text: &str) -> TranscriptEntry {
        TranscriptEntry::now(TranscriptKind::AudioTranscriptDelta, text)
    }

    #[test]
    fn cursor_walk_reconstructs_sequence() {
        let store = TranscriptStore::new();
        let mut cursor = 0;
        let mut seen = Vec::new();

        store.append("CA1", line("hello "));
        store.append("CA1", line("world"));
        let (entries, next) = store.range("CA1", cursor);
        seen.extend(entries);
        cursor = next;

        store.append("CA1", line("!"));
        let (entries, next) = store.range("CA1", cursor);
        seen.extend(entries);
        cursor = next;

        let joined: String = seen.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(joined, "hello world!");
        assert_eq!(cursor, 3);

        // No duplicates on a re-read from the final cursor.
        let (entries, _) = store.range("CA1", cursor);
        assert!(entries.is_empty());
    }

    #[test]
    fn missing_key_is_empty() {
        let store = TranscriptStore::new();
        let (entries, cursor) = store.range("nope", 5);
        assert!(entries.is_empty());
        assert_eq!(cursor, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_evicts_idle_keys() {
        let store = TranscriptStore::new();
        store.append("CA1", line("hi"));
        assert_eq!(store.key_count(), 1);

        tokio::time::advance(TRANSCRIPT_TTL + Duration::from_secs(1)).await;
        store.sweep();
        assert_eq!(store.key_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn append_refreshes_ttl() {
        let store = TranscriptStore::new();
        store.append("CA1", line("a"));
        tokio::time::advance(TRANSCRIPT_TTL - Duration::from_secs(10)).await;
        store.append("CA1", line("b"));
        tokio::time::advance(Duration::from_secs(60)).await;
        store.sweep();
        assert_eq!(store.key_count(), 1);
    }

    #[test]
    fn kinds_serialize_snake_case() {
        let entry = line("x");
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["kind"], "audio_transcript_delta");
    }
}
