//! # Transport Session
//!
//! One duplex WebSocket channel per conversation: encoded audio frames go
//! out, tagged envelopes come in.
//!
//! ## Lifecycle:
//! - `open()` establishes the channel within a bounded timeout and spawns
//!   the writer/reader tasks. On failure nothing is left allocated.
//! - `send()` transmits a frame iff the channel is open; otherwise the
//!   frame is silently dropped — capture callbacks race teardown by
//!   design, and a frame lost at the edge of a session is not an error.
//! - `close()` is idempotent. Remote close and remote error both emit a
//!   `Closed` event so the owner runs the exact same teardown path as an
//!   explicit close.

use crate::error::{PipelineError, PipelineResult};
use crate::protocol::{decode_audio_payload, RelayMessage};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Events delivered to the session owner as inbound traffic arrives.
#[derive(Debug)]
pub enum TransportEvent {
    /// Provider session metadata. Informational; no pipeline effect.
    SessionInfo(serde_json::Value),

    /// One decoded (base64-stripped) audio chunk ready for the playback
    /// queue.
    Audio(Vec<u8>),

    /// The relay reported a failure on its side.
    RelayError { code: String, message: String },

    /// The remote end closed or errored. The owner must tear down exactly
    /// as it would for a local `close()`.
    Closed { reason: String },
}

/// A live duplex channel to the relay.
pub struct TransportSession {
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    open: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

impl TransportSession {
    /// Establish the channel.
    ///
    /// ## Errors:
    /// `ConnectError` if the WebSocket handshake fails or does not
    /// complete within `timeout`. No tasks or sockets survive a failed
    /// open.
    pub async fn open(
        endpoint: &str,
        timeout: Duration,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> PipelineResult<Self> {
        let connect = connect_async(endpoint);

        let (ws, _response) = tokio::time::timeout(timeout, connect)
            .await
            .map_err(|_| {
                PipelineError::ConnectError(format!(
                    "handshake timed out after {}s",
                    timeout.as_secs()
                ))
            })?
            .map_err(|e| PipelineError::ConnectError(e.to_string()))?;

        info!(endpoint = %endpoint, "transport open");

        let (mut sink, mut stream) = ws.split();
        let open = Arc::new(AtomicBool::new(true));
        let shutdown = Arc::new(Notify::new());
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Vec<u8>>();

        // Writer: drains outbound frames until shutdown, then says goodbye.
        let writer_shutdown = shutdown.clone();
        let writer = tokio::spawn(async move {
            loop {
                tokio::select! {
                    maybe_frame = outbound_rx.recv() => match maybe_frame {
                        Some(frame) => {
                            if sink.send(Message::Binary(frame)).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                    _ = writer_shutdown.notified() => break,
                }
            }
            let _ = sink.send(Message::Close(None)).await;
        });

        // Reader: dispatches inbound envelopes until the channel dies.
        let reader_open = open.clone();
        let reader = tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                match message {
                    Ok(Message::Text(text)) => dispatch_text(&text, &events),
                    Ok(Message::Binary(data)) => {
                        // Agent media forwarded verbatim by the relay.
                        let _ = events.send(TransportEvent::Audio(data));
                    }
                    Ok(Message::Close(frame)) => {
                        reader_open.store(false, Ordering::SeqCst);
                        let reason = frame
                            .map(|f| f.reason.to_string())
                            .unwrap_or_else(|| "remote closed".to_string());
                        let _ = events.send(TransportEvent::Closed { reason });
                        return;
                    }
                    Ok(_) => {} // ping/pong/frame bookkeeping
                    Err(e) => {
                        reader_open.store(false, Ordering::SeqCst);
                        let _ = events.send(TransportEvent::Closed {
                            reason: e.to_string(),
                        });
                        return;
                    }
                }
            }

            // Stream ended without a close frame.
            reader_open.store(false, Ordering::SeqCst);
            let _ = events.send(TransportEvent::Closed {
                reason: "connection ended".to_string(),
            });
        });

        Ok(Self {
            outbound,
            open,
            shutdown,
            writer: Some(writer),
            reader: Some(reader),
        })
    }

    /// Whether the channel is currently open.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// A cheap, cloneable handle for producers on other threads (the
    /// capture callback). Inherits send-iff-open semantics.
    pub fn frame_sender(&self) -> FrameSender {
        FrameSender {
            outbound: self.outbound.clone(),
            open: self.open.clone(),
        }
    }

    /// Transmit one encoded frame if the channel is open; silently drop it
    /// otherwise.
    pub fn send(&self, frame: Vec<u8>) {
        if !self.is_open() {
            debug!("dropping frame: transport not open");
            return;
        }
        let _ = self.outbound.send(frame);
    }

    /// Close the channel. Idempotent; safe to call at any point.
    pub async fn close(&mut self) {
        self.open.store(false, Ordering::SeqCst);
        self.shutdown.notify_waiters();

        if let Some(writer) = self.writer.take() {
            // Give the writer a moment to flush the close frame.
            if tokio::time::timeout(Duration::from_secs(1), writer)
                .await
                .is_err()
            {
                warn!("transport writer did not finish in time");
            }
        }

        if let Some(reader) = self.reader.take() {
            reader.abort();
        }

        info!("transport closed");
    }
}

/// Outbound-only handle to a transport session.
#[derive(Clone)]
pub struct FrameSender {
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    open: Arc<AtomicBool>,
}

impl FrameSender {
    /// Transmit one encoded frame if the channel is open; silently drop it
    /// otherwise.
    pub fn send(&self, frame: Vec<u8>) {
        if !self.open.load(Ordering::SeqCst) {
            debug!("dropping frame: transport not open");
            return;
        }
        let _ = self.outbound.send(frame);
    }
}

/// Dispatch one text envelope by tag.
fn dispatch_text(text: &str, events: &mpsc::UnboundedSender<TransportEvent>) {
    match RelayMessage::parse(text) {
        Ok(RelayMessage::SessionInfo { data }) => {
            let _ = events.send(TransportEvent::SessionInfo(data));
        }
        Ok(RelayMessage::Audio { audio }) => match decode_audio_payload(&audio) {
            Ok(raw) => {
                let _ = events.send(TransportEvent::Audio(raw));
            }
            Err(e) => {
                // Per-chunk failure: logged, dropped, never fatal.
                warn!("dropping audio chunk with invalid base64: {}", e);
            }
        },
        Ok(RelayMessage::Error { code, message }) => {
            let _ = events.send(TransportEvent::RelayError { code, message });
        }
        Ok(RelayMessage::Unknown) => {
            debug!("ignoring unknown envelope type");
        }
        Err(e) => {
            warn!("ignoring malformed envelope: {}", e);
        }
    }
}
