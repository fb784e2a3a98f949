//! Egress frame buffer: smooths bursty model audio into carrier-paced
//! 20 ms μ-law frames.
//!
//! The model delivers audio deltas in bursts of tens to hundreds of
//! milliseconds per message; the carrier expects one 160-byte frame every
//! 20 ms. An unpaced relay causes jitter and clipped playback, so the
//! buffer queues decoded bytes and a pacing task releases one frame per
//! tick to an abstract sink closed over the carrier socket.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// One 20 ms frame of G.711 μ-law at 8 kHz.
pub const FRAME_BYTES: usize = 160;

/// Frame cadence.
pub const FRAME_INTERVAL: Duration = Duration::from_millis(20);

/// μ-law encoding of silence.
pub const ULAW_SILENCE: u8 = 0xFF;

/// Maximum queued frames (2 s of audio) before the overflow policy kicks in.
pub const MAX_QUEUE_FRAMES: usize = 100;

/// Sink invoked once per released frame.
pub type FrameSink =
    Arc<dyn Fn(Bytes) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

struct Shared {
    queue: Mutex<VecDeque<Bytes>>,
    /// True while a pacing task is running.
    pacing: AtomicBool,
    stopped: AtomicBool,
    sink: FrameSink,
}

/// Paced egress queue toward the carrier.
///
/// Clones share the same queue and pacing task.
#[derive(Clone)]
pub struct FrameBuffer {
    shared: Arc<Shared>,
}

impl FrameBuffer {
    pub fn new(sink: FrameSink) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(VecDeque::new()),
                pacing: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                sink,
            }),
        }
    }

    /// Split `data` into 160-byte frames and queue them, padding a trailing
    /// partial frame with μ-law silence. Arms the pacing task if idle.
    pub fn enqueue(&self, data: &[u8]) {
        if data.is_empty() || self.shared.stopped.load(Ordering::SeqCst) {
            return;
        }

        {
            let mut queue = self.shared.queue.lock().expect("frame queue poisoned");
            for chunk in data.chunks(FRAME_BYTES) {
                if chunk.len() == FRAME_BYTES {
                    queue.push_back(Bytes::copy_from_slice(chunk));
                } else {
                    let mut frame = Vec::with_capacity(FRAME_BYTES);
                    frame.extend_from_slice(chunk);
                    frame.resize(FRAME_BYTES, ULAW_SILENCE);
                    queue.push_back(Bytes::from(frame));
                }
            }

            if queue.len() > MAX_QUEUE_FRAMES {
                let drop_count = MAX_QUEUE_FRAMES / 2;
                queue.drain(..drop_count);
                tracing::warn!(
                    dropped = drop_count,
                    remaining = queue.len(),
                    "egress frame queue overflow, dropped oldest frames"
                );
            }
        }

        self.arm();
    }

    /// Drop all pending frames. The pacing task parks itself on the next
    /// empty tick.
    pub fn clear(&self) {
        let mut queue = self.shared.queue.lock().expect("frame queue poisoned");
        let dropped = queue.len();
        queue.clear();
        if dropped > 0 {
            tracing::debug!(dropped, "egress frame queue cleared");
        }
    }

    /// Stop permanently: drop pending frames and refuse further enqueues.
    pub fn shutdown(&self) {
        self.shared.stopped.store(true, Ordering::SeqCst);
        self.clear();
    }

    /// Number of frames currently queued.
    pub fn depth(&self) -> usize {
        self.shared.queue.lock().expect("frame queue poisoned").len()
    }

    /// Spawn the pacing task unless one is already running.
    fn arm(&self) {
        if self.shared.pacing.swap(true, Ordering::SeqCst) {
            return;
        }
        let shared = self.shared.clone();
        tokio::spawn(async move {
            let mut ticker = interval(FRAME_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if shared.stopped.load(Ordering::SeqCst) {
                    shared.pacing.store(false, Ordering::SeqCst);
                    return;
                }
                let frame = {
                    let mut queue = shared.queue.lock().expect("frame queue poisoned");
                    queue.pop_front()
                };
                match frame {
                    Some(frame) => (shared.sink)(frame).await,
                    None => {
                        // Park. Re-check under the armed flag: an enqueue
                        // racing this store must not be stranded unpaced.
                        shared.pacing.store(false, Ordering::SeqCst);
                        let requeue = {
                            let queue =
                                shared.queue.lock().expect("frame queue poisoned");
                            !queue.is_empty()
                        };
                        if requeue && !shared.pacing.swap(true, Ordering::SeqCst) {
                            continue;
                        }
                        return;
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use tokio::time::Instant;

    fn collecting_sink() -> (FrameSink, Arc<StdMutex<Vec<(Instant, Bytes)>>>) {
        let collected: Arc<StdMutex<Vec<(Instant, Bytes)>>> =
            Arc::new(StdMutex::new(Vec::new()));
        let sink_copy = collected.clone();
        let sink: FrameSink = Arc::new(move |frame: Bytes| {
            let sink_copy = sink_copy.clone();
            Box::pin(async move {
                sink_copy.lock().unwrap().push((Instant::now(), frame));
            })
        });
        (sink, collected)
    }

    #[tokio::test(start_paused = true)]
    async fn paces_one_frame_per_interval() {
        let (sink, collected) = collecting_sink();
        let buffer = FrameBuffer::new(sink);

        buffer.enqueue(&[0u8; FRAME_BYTES * 3]);
        tokio::time::sleep(Duration::from_millis(200)).await;

        let frames = collected.lock().unwrap();
        assert_eq!(frames.len(), 3);
        for frame in frames.iter() {
            assert_eq!(frame.1.len(), FRAME_BYTES);
        }
        // Consecutive releases are one interval apart.
        for pair in frames.windows(2) {
            let gap = pair[1].0 - pair[0].0;
            assert_eq!(gap, FRAME_INTERVAL);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pads_partial_frame_with_silence() {
        let (sink, collected) = collecting_sink();
        let buffer = FrameBuffer::new(sink);

        // 200 bytes: one full frame plus 40 bytes padded to 160.
        buffer.enqueue(&[0x42u8; 200]);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let frames = collected.lock().unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].1.len(), FRAME_BYTES);
        assert!(frames[1].1[..40].iter().all(|&b| b == 0x42));
        assert!(frames[1].1[40..].iter().all(|&b| b == ULAW_SILENCE));
    }

    #[tokio::test(start_paused = true)]
    async fn clear_stops_pending_playback() {
        let (sink, collected) = collecting_sink();
        let buffer = FrameBuffer::new(sink);

        buffer.enqueue(&[0u8; FRAME_BYTES * 10]);
        tokio::time::sleep(Duration::from_millis(45)).await;
        let seen_before_clear = collected.lock().unwrap().len();
        assert!(seen_before_clear < 10);

        buffer.clear();
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(collected.lock().unwrap().len(), seen_before_clear);
    }

    #[tokio::test(start_paused = true)]
    async fn overflow_drops_oldest_half() {
        let (sink, _collected) = collecting_sink();
        let buffer = FrameBuffer::new(sink);

        // A single 50 000-byte delta is 313 frames (last one padded); the
        // overflow policy sheds the oldest 50 and paces the rest.
        buffer.enqueue(&vec![0u8; 50_000]);
        assert_eq!(buffer.depth(), 313 - MAX_QUEUE_FRAMES / 2);
        buffer.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn rearms_after_draining() {
        let (sink, collected) = collecting_sink();
        let buffer = FrameBuffer::new(sink);

        buffer.enqueue(&[0u8; FRAME_BYTES]);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(collected.lock().unwrap().len(), 1);

        buffer.enqueue(&[0u8; FRAME_BYTES]);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(collected.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_refuses_further_frames() {
        let (sink, collected) = collecting_sink();
        let buffer = FrameBuffer::new(sink);

        buffer.shutdown();
        buffer.enqueue(&[0u8; FRAME_BYTES]);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(collected.lock().unwrap().is_empty());
    }
}
