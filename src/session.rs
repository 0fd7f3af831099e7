//! # Session State and Ownership
//!
//! One `VoiceSession` owns the whole client pipeline for one conversation:
//! capture source, transport, playback queue, and the optional recorder.
//!
//! ## Session Lifecycle:
//! 1. **Idle**: constructed, nothing allocated beyond the playback worker
//! 2. **Connecting**: transport handshake in flight
//! 3. **Connected**: duplex streaming; capture running
//! 4. **Ended**: terminal — torn down, locally or by the remote end
//!
//! State is an explicit machine with defined transitions, published on a
//! watch channel so observers (a UI layer, the client binary) subscribe
//! instead of poking at shared flags. Invalid transitions are ignored and
//! logged, never applied.
//!
//! At most one `VoiceSession` exists per process: the constructor fails
//! fast with `AlreadyStarted` while another instance is alive, instead of
//! probing for and destroying a predecessor.

use crate::audio::capture::{CaptureConfig, CaptureSource, FrameCallback};
use crate::audio::playback::PlaybackQueue;
use crate::audio::wav::WavRecorder;
use crate::config::AppConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::transport::{TransportEvent, TransportSession};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

/// Process-wide single-instance guard.
static ACTIVE_SESSION: AtomicBool = AtomicBool::new(false);

/// Conversation state, observed by — never mutated by — the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Ended,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Ended => "ended",
        }
    }

    /// The transition table. Anything not listed is invalid and ignored.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Connecting)      // connect() begins
                | (Connecting, Connected)  // handshake succeeded
                | (Connecting, Idle)       // handshake failed, nothing allocated
                | (Connecting, Ended)      // torn down mid-connect
                | (Connected, Ended)       // local close or remote close/error
                | (Idle, Ended)            // closed without ever connecting
        )
    }
}

/// Owner of one conversation's pipeline.
pub struct VoiceSession {
    config: AppConfig,
    state_tx: watch::Sender<SessionState>,
    capture: CaptureSource,
    playback: PlaybackQueue,
    transport: Option<TransportSession>,
    events_rx: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    recorder: Arc<Mutex<Option<WavRecorder>>>,
}

impl VoiceSession {
    /// Claim the session slot and set up the (idle) pipeline.
    ///
    /// Fails with `AlreadyStarted` if another session is alive anywhere in
    /// the process. No audio hardware is touched here.
    pub fn new(config: AppConfig) -> PipelineResult<Self> {
        if ACTIVE_SESSION.swap(true, Ordering::SeqCst) {
            return Err(PipelineError::AlreadyStarted);
        }

        let (state_tx, _) = watch::channel(SessionState::Idle);
        let capture = CaptureSource::new(CaptureConfig::from(&config.audio));
        let playback = PlaybackQueue::new(config.audio.sample_rate, config.audio.channels);

        Ok(Self {
            config,
            state_tx,
            capture,
            playback,
            transport: None,
            events_rx: None,
            recorder: Arc::new(Mutex::new(None)),
        })
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    /// Open the transport and start capturing.
    ///
    /// Idle → Connecting → Connected on success. On handshake failure the
    /// state returns to Idle with nothing allocated; on a capture failure
    /// after the handshake, the transport is torn back down and the
    /// session ends.
    pub async fn connect(&mut self) -> PipelineResult<()> {
        if self.state() != SessionState::Idle {
            return Err(PipelineError::AlreadyStarted);
        }

        self.set_state(SessionState::Connecting);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let timeout = Duration::from_secs(self.config.client.connect_timeout_secs);

        let transport =
            match TransportSession::open(&self.config.client.relay_url, timeout, events_tx).await {
                Ok(transport) => transport,
                Err(e) => {
                    self.set_state(SessionState::Idle);
                    return Err(e);
                }
            };

        self.set_state(SessionState::Connected);

        // Optional local recording of everything we send.
        if let Some(path) = self.config.client.record_path.clone() {
            match WavRecorder::create(Path::new(&path), self.config.audio.sample_rate) {
                Ok(recorder) => {
                    info!(path = %path, "recording captured audio");
                    *self.recorder.lock().unwrap() = Some(recorder);
                }
                Err(e) => warn!(path = %path, "recording disabled: {}", e),
            }
        }

        let sender = transport.frame_sender();
        let recorder = self.recorder.clone();
        let on_frame: FrameCallback = Arc::new(move |frame: Vec<u8>| {
            if let Some(recorder) = recorder.lock().unwrap().as_mut() {
                if let Err(e) = recorder.write_frame(&frame) {
                    warn!("recorder write failed: {}", e);
                }
            }
            sender.send(frame);
        });

        self.transport = Some(transport);

        if let Err(e) = self.capture.start(on_frame) {
            // Device failure after the handshake: recover into a full
            // teardown, then surface once.
            self.close().await;
            return Err(e);
        }

        self.events_rx = Some(events_rx);
        Ok(())
    }

    /// Consume transport events until the conversation ends.
    ///
    /// Remote close and remote error land in the same teardown path as a
    /// local `close()`, then this returns normally — the ending is visible
    /// through the state subscription, not as an error.
    pub async fn run(&mut self) -> PipelineResult<()> {
        let Some(mut events_rx) = self.events_rx.take() else {
            return Err(PipelineError::Config(
                "run() called before connect()".to_string(),
            ));
        };

        while let Some(event) = events_rx.recv().await {
            match event {
                TransportEvent::SessionInfo(data) => {
                    // Informational only; no pipeline effect.
                    info!(session_info = %data, "agent session established");
                }
                TransportEvent::Audio(raw) => {
                    self.playback.enqueue(raw);
                }
                TransportEvent::RelayError { code, message } => {
                    warn!(code = %code, "relay reported an error: {}", message);
                }
                TransportEvent::Closed { reason } => {
                    warn!(reason = %reason, "transport closed by remote end");
                    self.close().await;
                    return Ok(());
                }
            }
        }

        // Event source gone (local close while running).
        self.close().await;
        Ok(())
    }

    /// Full teardown: stop capture, close the transport, abandon the
    /// playback queue, finalize any recording. Safe to call at any point,
    /// in any state; idempotent.
    pub async fn close(&mut self) {
        self.capture.stop();

        if let Some(mut transport) = self.transport.take() {
            transport.close().await;
        }

        self.playback.close();

        let recorder = self.recorder.lock().unwrap().take();
        if let Some(recorder) = recorder {
            match recorder.finalize() {
                Ok(path) => info!(path = %path.display(), "recording finalized"),
                Err(e) => warn!("failed to finalize recording: {}", e),
            }
        }

        if self.state() != SessionState::Ended {
            self.set_state(SessionState::Ended);
        }
    }

    fn set_state(&self, next: SessionState) {
        let current = self.state();
        if current == next {
            return;
        }
        if !current.can_transition_to(next) {
            warn!(
                from = current.as_str(),
                to = next.as_str(),
                "ignoring invalid state transition"
            );
            return;
        }
        let _ = self.state_tx.send(next);
        info!(state = next.as_str(), "session state changed");
    }
}

impl Drop for VoiceSession {
    fn drop(&mut self) {
        ACTIVE_SESSION.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[test]
    fn test_transition_table() {
        use SessionState::*;

        assert!(Idle.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Connected));
        assert!(Connecting.can_transition_to(Idle));
        assert!(Connected.can_transition_to(Ended));
        assert!(Idle.can_transition_to(Ended));

        // Ended is terminal; nothing re-enters Connected sideways.
        assert!(!Ended.can_transition_to(Idle));
        assert!(!Ended.can_transition_to(Connecting));
        assert!(!Idle.can_transition_to(Connected));
        assert!(!Connected.can_transition_to(Connecting));
    }

    #[test]
    fn test_state_serializes_lowercase() {
        let json = serde_json::to_string(&SessionState::Connecting).unwrap();
        assert_eq!(json, r#""connecting""#);
    }

    /// Tests share the process-wide session slot; acquire with a retry so
    /// parallel test threads serialize instead of flaking.
    async fn acquire_session() -> VoiceSession {
        loop {
            match VoiceSession::new(AppConfig::default()) {
                Ok(session) => return session,
                Err(_) => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        }
    }

    #[tokio::test]
    async fn test_single_instance_guard_and_close() {
        let first = acquire_session().await;
        assert_eq!(first.state(), SessionState::Idle);

        // A second owner is rejected while the first is alive.
        assert!(matches!(
            VoiceSession::new(AppConfig::default()),
            Err(PipelineError::AlreadyStarted)
        ));

        drop(first);

        // The slot frees on drop.
        let mut second = acquire_session().await;
        let mut states = second.subscribe();

        // Closing an Idle session is valid and terminal; a second close
        // leaves the same end state.
        second.close().await;
        second.close().await;
        assert_eq!(second.state(), SessionState::Ended);

        states.changed().await.unwrap();
        assert_eq!(*states.borrow(), SessionState::Ended);
    }

    #[tokio::test]
    async fn test_run_before_connect_is_an_error() {
        let mut session = acquire_session().await;

        assert!(matches!(
            session.run().await,
            Err(PipelineError::Config(_))
        ));
        session.close().await;
    }
}
