//! # Audio Pipeline Module
//!
//! The capture and playback halves of the voice pipeline.
//!
//! ## Key Components:
//! - **Processor**: PCM16LE encoding/decoding and capture conditioning
//! - **Capture Source**: microphone lifecycle and the block cadence
//! - **Playback Queue**: ordered, gapless playback of inbound chunks
//! - **WAV**: canonical container header and optional session recording
//!
//! ## Audio Format:
//! - **Sample Rate**: 24 kHz (conversational default, configurable)
//! - **Bit Depth**: 16-bit PCM
//! - **Channels**: Mono
//! - **Encoding**: little-endian signed integers

pub mod capture; // Microphone lifecycle and block assembly
pub mod playback; // Ordered playback queue
pub mod processor; // PCM encoding and conditioning
pub mod wav; // Container header and recorder
