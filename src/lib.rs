//! # Voice Agent Backend
//!
//! A full-duplex voice conversation pipeline: a native client that
//! captures microphone audio, streams PCM16LE frames over a WebSocket, and
//! plays agent audio back gaplessly — plus the relay service that bridges
//! those client connections to a third-party voice-agent provider.
//!
//! ## Crate layout:
//! - **audio**: capture source, PCM processing, playback queue, WAV support
//! - **transport** / **session**: the client pipeline's duplex channel and
//!   its single-owner state machine
//! - **relay** / **provider**: the server side — WebSocket bridging and
//!   session negotiation
//! - **config** / **state** / **health** / **middleware** / **handlers**:
//!   the service scaffolding around both binaries

pub mod audio; // Capture, playback, PCM, WAV
pub mod config; // Layered configuration
pub mod error; // AppError (HTTP) and PipelineError (client)
pub mod handlers; // HTTP request handlers
pub mod health; // Health check endpoints
pub mod middleware; // Request telemetry
pub mod protocol; // Tagged wire envelopes
pub mod provider; // Agent session negotiation
pub mod relay; // Client <-> agent WebSocket bridge
pub mod session; // SessionState machine + VoiceSession owner
pub mod state; // Shared application state
pub mod transport; // Client duplex channel
