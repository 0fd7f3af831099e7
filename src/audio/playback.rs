//! # Playback Queue
//!
//! Serializes asynchronous, out-of-order decode completions into strictly
//! ordered, gapless playback.
//!
//! ## How ordering is guaranteed:
//! `enqueue()` reserves a *slot* synchronously, before any decode work
//! starts, so a unit's playback position is fixed by enqueue call order —
//! never by decode completion order. The playback worker only ever plays
//! the head slot: a ready head is appended to the sink (sources play
//! strictly one after another, so units never overlap and chain without a
//! gap), a failed head is dropped and skipped, and a pending head parks
//! the worker until its decode resolves.
//!
//! ## Resource ownership:
//! The output stream (audio context) is created lazily on the worker the
//! first time a unit becomes playable and is only released by an explicit
//! `close()` at session end. Decode completions that arrive after
//! teardown are discarded via the liveness flag.

use crate::audio::processor::decode_pcm16;
use crate::audio::wav::strip_wav_header;
use crate::error::{PipelineError, PipelineResult};
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, OutputStreamHandle, Sink};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// A renderable audio buffer produced by decoding one inbound chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedUnit {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Decode one inbound chunk into a playable unit.
///
/// Accepts either a RIFF/WAVE container (header stripped and validated,
/// sample rate taken from the header) or raw PCM16LE at the session's
/// configured format.
pub fn decode_chunk(raw: &[u8], sample_rate: u32, channels: u16) -> PipelineResult<DecodedUnit> {
    match strip_wav_header(raw) {
        Some(Ok(payload)) => {
            // Rate declared by the container wins over the session default.
            let declared_rate = u32::from_le_bytes([raw[24], raw[25], raw[26], raw[27]]);
            Ok(DecodedUnit {
                samples: decode_pcm16(payload)?,
                sample_rate: declared_rate,
                channels: 1,
            })
        }
        Some(Err(reason)) => Err(PipelineError::DecodeError(reason)),
        None => Ok(DecodedUnit {
            samples: decode_pcm16(raw)?,
            sample_rate,
            channels,
        }),
    }
}

/// State of one reserved playback slot.
enum SlotState {
    /// Decode still in flight.
    Pending,
    /// Decoded, waiting its turn.
    Ready(DecodedUnit),
    /// Decode failed; dropped when it reaches the head.
    Failed,
}

struct Slot {
    id: u64,
    state: SlotState,
}

/// Ordered slot buffer: FIFO strictly by reservation order.
pub(crate) struct OrderedQueue {
    slots: VecDeque<Slot>,
    next_id: u64,
}

impl OrderedQueue {
    pub(crate) fn new() -> Self {
        Self {
            slots: VecDeque::new(),
            next_id: 0,
        }
    }

    /// Reserve the next playback position. The returned id is used to
    /// resolve the slot when its decode completes.
    pub(crate) fn push_pending(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.slots.push_back(Slot {
            id,
            state: SlotState::Pending,
        });
        id
    }

    /// Mark a slot ready or failed. Returns false if the slot is gone
    /// (queue cleared by teardown while the decode was in flight).
    pub(crate) fn resolve(&mut self, id: u64, result: PipelineResult<DecodedUnit>) -> bool {
        let Some(slot) = self.slots.iter_mut().find(|slot| slot.id == id) else {
            return false;
        };

        slot.state = match result {
            Ok(unit) => SlotState::Ready(unit),
            Err(e) => {
                warn!("dropping undecodable chunk: {}", e);
                SlotState::Failed
            }
        };
        true
    }

    /// Pop the next playable unit, skipping failed slots at the head.
    /// Returns None when the head is still pending or the queue is empty;
    /// `head_blocked()` distinguishes the two.
    pub(crate) fn pop_playable(&mut self) -> Option<DecodedUnit> {
        loop {
            let head_ready = match self.slots.front() {
                None => return None,
                Some(slot) => match slot.state {
                    SlotState::Pending => return None,
                    SlotState::Failed => false,
                    SlotState::Ready(_) => true,
                },
            };

            let slot = self.slots.pop_front()?;
            if head_ready {
                if let SlotState::Ready(unit) = slot.state {
                    return Some(unit);
                }
            }
            // Failed head dropped; keep scanning toward the next unit.
        }
    }

    /// Whether the head slot exists but its decode has not resolved.
    pub(crate) fn head_blocked(&self) -> bool {
        matches!(
            self.slots.front(),
            Some(Slot {
                state: SlotState::Pending,
                ..
            })
        )
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn clear(&mut self) {
        self.slots.clear();
    }
}

/// State shared between the queue handle, decode tasks, and the worker.
struct PlaybackShared {
    queue: Mutex<OrderedQueue>,
    cv: Condvar,
    playing: AtomicBool,
    alive: AtomicBool,
    /// Lazily created by the worker; exposed here so `close()` can halt a
    /// unit that is still playing.
    sink: Mutex<Option<Arc<Sink>>>,
}

/// Output stream, kept alive for as long as the worker plays.
struct PlaybackOutput {
    _stream: OutputStream,
    _handle: OutputStreamHandle,
    sink: Arc<Sink>,
}

/// Accepts decoded audio chunks and plays them back-to-back, in enqueue
/// order, with no overlap.
pub struct PlaybackQueue {
    shared: Arc<PlaybackShared>,
    worker: Option<JoinHandle<()>>,
    sample_rate: u32,
    channels: u16,
}

impl PlaybackQueue {
    /// Create the queue and its (initially idle) playback worker. No audio
    /// resources are touched until the first unit becomes playable.
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        let shared = Arc::new(PlaybackShared {
            queue: Mutex::new(OrderedQueue::new()),
            cv: Condvar::new(),
            playing: AtomicBool::new(false),
            alive: AtomicBool::new(true),
            sink: Mutex::new(None),
        });

        let worker_shared = shared.clone();
        let worker = thread::Builder::new()
            .name("audio-playback".to_string())
            .spawn(move || playback_thread_main(worker_shared))
            .ok();

        if worker.is_none() {
            error!("failed to spawn playback worker");
        }

        Self {
            shared,
            worker,
            sample_rate,
            channels,
        }
    }

    /// Queue one raw inbound chunk for playback.
    ///
    /// The slot is reserved synchronously (fixing FIFO position at call
    /// order); the decode itself runs on the blocking pool and may resolve
    /// out of order. Decode failure drops this unit and never blocks the
    /// ones behind it. Must be called from within a tokio runtime.
    pub fn enqueue(&self, raw: Vec<u8>) {
        if !self.shared.alive.load(Ordering::SeqCst) {
            debug!("discarding chunk enqueued after teardown");
            return;
        }

        let id = {
            let mut queue = self.shared.queue.lock().unwrap();
            queue.push_pending()
        };

        let shared = self.shared.clone();
        let sample_rate = self.sample_rate;
        let channels = self.channels;

        tokio::spawn(async move {
            let result =
                tokio::task::spawn_blocking(move || decode_chunk(&raw, sample_rate, channels))
                    .await
                    .unwrap_or_else(|e| {
                        Err(PipelineError::DecodeError(format!("decode task failed: {}", e)))
                    });

            // A completion landing after teardown is discarded.
            if !shared.alive.load(Ordering::SeqCst) {
                debug!("discarding decode completion after teardown");
                return;
            }

            let mut queue = shared.queue.lock().unwrap();
            if queue.resolve(id, result) {
                shared.cv.notify_all();
            }
        });
    }

    /// Whether a unit is currently playing or queued behind one.
    pub fn is_playing(&self) -> bool {
        self.shared.playing.load(Ordering::SeqCst)
    }

    /// Number of slots (pending, ready, or failed) still queued.
    pub fn queued_len(&self) -> usize {
        self.shared.queue.lock().unwrap().len()
    }

    /// Abandon the queue and release the output stream. Safe to call at
    /// any point, including mid-playback; no further unit starts after
    /// this returns. Idempotent.
    pub fn close(&mut self) {
        if !self.shared.alive.swap(false, Ordering::SeqCst) {
            return;
        }

        self.shared.queue.lock().unwrap().clear();

        // Halt mid-unit playback; this also unblocks a worker draining the
        // sink tail, so the join below cannot wait out the audio.
        if let Some(sink) = self.shared.sink.lock().unwrap().as_ref() {
            sink.stop();
        }

        self.shared.cv.notify_all();

        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("playback worker panicked during teardown");
            }
        }

        self.shared.playing.store(false, Ordering::SeqCst);
        info!("playback queue closed");
    }
}

impl Drop for PlaybackQueue {
    fn drop(&mut self) {
        self.close();
    }
}

/// What the worker found at the head of the queue.
enum Head {
    Unit(DecodedUnit),
    Idle,
    Shutdown,
}

/// Body of the playback worker: pop playable heads in order, chain them
/// onto the sink, go idle when the queue drains.
fn playback_thread_main(shared: Arc<PlaybackShared>) {
    let mut output: Option<PlaybackOutput> = None;

    loop {
        let head = {
            let mut queue = shared.queue.lock().unwrap();
            loop {
                if !shared.alive.load(Ordering::SeqCst) {
                    break Head::Shutdown;
                }
                match queue.pop_playable() {
                    Some(unit) => break Head::Unit(unit),
                    None if queue.head_blocked() => {
                        // Head decode still in flight: its turn is fixed,
                        // so wait rather than play anything behind it.
                        queue = shared.cv.wait(queue).unwrap();
                    }
                    None => break Head::Idle,
                }
            }
        };

        match head {
            Head::Shutdown => {
                if let Some(out) = &output {
                    out.sink.stop();
                }
                debug!("playback worker shut down");
                return;
            }
            Head::Unit(unit) => {
                let Some(out) = ensure_output(&shared, &mut output) else {
                    warn!("dropping playable unit: no output device");
                    continue;
                };
                shared.playing.store(true, Ordering::SeqCst);
                out.sink.append(SamplesBuffer::new(
                    unit.channels,
                    unit.sample_rate,
                    unit.samples,
                ));
                // Loop immediately: the next ready head chains gaplessly.
            }
            Head::Idle => {
                // Nothing queued. Let the tail finish, then mark idle and
                // park until the next enqueue (or shutdown).
                if let Some(out) = &output {
                    out.sink.sleep_until_end();
                }
                let mut queue = shared.queue.lock().unwrap();
                if queue.is_empty() {
                    shared.playing.store(false, Ordering::SeqCst);
                    while queue.is_empty() && shared.alive.load(Ordering::SeqCst) {
                        queue = shared.cv.wait(queue).unwrap();
                    }
                }
            }
        }
    }
}

/// Create the output stream and sink on first use, publishing the sink
/// handle for `close()`.
fn ensure_output<'a>(
    shared: &PlaybackShared,
    output: &'a mut Option<PlaybackOutput>,
) -> Option<&'a PlaybackOutput> {
    if output.is_none() {
        let (stream, handle) = match OutputStream::try_default() {
            Ok(pair) => pair,
            Err(e) => {
                error!("failed to open output device: {}", e);
                return None;
            }
        };
        let sink = match Sink::try_new(&handle) {
            Ok(sink) => Arc::new(sink),
            Err(e) => {
                error!("failed to create playback sink: {}", e);
                return None;
            }
        };
        *shared.sink.lock().unwrap() = Some(sink.clone());
        info!("playback output ready");
        *output = Some(PlaybackOutput {
            _stream: stream,
            _handle: handle,
            sink,
        });
    }
    output.as_ref()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::processor::encode_pcm16;
    use crate::audio::wav::build_wav_header;

    fn unit(tag: f32) -> DecodedUnit {
        DecodedUnit {
            samples: vec![tag],
            sample_rate: 24_000,
            channels: 1,
        }
    }

    #[test]
    fn test_playback_order_matches_enqueue_order() {
        let mut queue = OrderedQueue::new();
        let first = queue.push_pending();
        let second = queue.push_pending();
        let third = queue.push_pending();

        // Decodes complete in order [3, 1, 2]...
        assert!(queue.resolve(third, Ok(unit(3.0))));
        assert!(queue.resolve(first, Ok(unit(1.0))));
        assert!(queue.resolve(second, Ok(unit(2.0))));

        // ...but playback order is [1, 2, 3].
        assert_eq!(queue.pop_playable(), Some(unit(1.0)));
        assert_eq!(queue.pop_playable(), Some(unit(2.0)));
        assert_eq!(queue.pop_playable(), Some(unit(3.0)));
        assert_eq!(queue.pop_playable(), None);
    }

    #[test]
    fn test_pending_head_blocks_later_ready_units() {
        let mut queue = OrderedQueue::new();
        let first = queue.push_pending();
        let second = queue.push_pending();

        assert!(queue.resolve(second, Ok(unit(2.0))));

        // Unit 2 is ready but must not play ahead of unit 1.
        assert_eq!(queue.pop_playable(), None);
        assert!(queue.head_blocked());

        assert!(queue.resolve(first, Ok(unit(1.0))));
        assert_eq!(queue.pop_playable(), Some(unit(1.0)));
        assert_eq!(queue.pop_playable(), Some(unit(2.0)));
    }

    #[test]
    fn test_failed_decode_is_skipped() {
        let mut queue = OrderedQueue::new();
        let first = queue.push_pending();
        let second = queue.push_pending();
        let third = queue.push_pending();

        assert!(queue.resolve(first, Ok(unit(1.0))));
        assert!(queue.resolve(
            second,
            Err(PipelineError::DecodeError("bad chunk".to_string()))
        ));
        assert!(queue.resolve(third, Ok(unit(3.0))));

        // Chunk 2's failure does not prevent chunk 3 from playing.
        assert_eq!(queue.pop_playable(), Some(unit(1.0)));
        assert_eq!(queue.pop_playable(), Some(unit(3.0)));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_resolve_after_clear_reports_missing() {
        let mut queue = OrderedQueue::new();
        let id = queue.push_pending();
        queue.clear();
        assert!(!queue.resolve(id, Ok(unit(1.0))));
    }

    #[test]
    fn test_decode_chunk_raw_pcm() {
        let raw = encode_pcm16(&[0.0, 0.5, -0.5]);
        let unit = decode_chunk(&raw, 24_000, 1).unwrap();
        assert_eq!(unit.samples.len(), 3);
        assert_eq!(unit.sample_rate, 24_000);
    }

    #[test]
    fn test_decode_chunk_wav_container() {
        let pcm = encode_pcm16(&[0.1, 0.2]);
        let mut raw = build_wav_header(pcm.len() as u32, 16_000).to_vec();
        raw.extend_from_slice(&pcm);

        let unit = decode_chunk(&raw, 24_000, 1).unwrap();
        assert_eq!(unit.samples.len(), 2);
        // The container's declared rate wins over the session default.
        assert_eq!(unit.sample_rate, 16_000);
    }

    #[test]
    fn test_decode_chunk_rejects_odd_length() {
        assert!(decode_chunk(&[0u8; 7], 24_000, 1).is_err());
    }

    #[test]
    fn test_enqueue_after_close_is_discarded() {
        let mut queue = PlaybackQueue::new(24_000, 1);
        queue.close();
        queue.close(); // idempotent

        queue.enqueue(vec![0u8; 4]);
        assert_eq!(queue.queued_len(), 0);
        assert!(!queue.is_playing());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failed_decodes_drain_without_output_device() {
        let mut queue = PlaybackQueue::new(24_000, 1);

        // Odd-length chunks fail to decode; the worker must drop them
        // without ever needing an output device.
        queue.enqueue(vec![0u8; 3]);
        queue.enqueue(vec![0u8; 5]);

        for _ in 0..50 {
            if queue.queued_len() == 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }

        assert_eq!(queue.queued_len(), 0);
        assert!(!queue.is_playing());
        queue.close();
    }
}
