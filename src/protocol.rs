//! # Wire Protocol
//!
//! The tagged envelope exchanged on the client <-> relay WebSocket.
//!
//! ## Message Format:
//! - **Client → Relay**: binary frames of raw PCM16LE audio, one message
//!   per capture block, no additional framing. Forwarded verbatim.
//! - **Relay → Client**: JSON text envelopes, internally tagged:
//!   - `{"type": "session-info", "data": <opaque>}` — informational only
//!   - `{"type": "audio", "audio": "<base64>"}` — agent audio to play
//!   - `{"type": "error", "code": ..., "message": ...}` — relay failures
//!
//! Unknown message types are ignored, never an error: the agent side may
//! grow message kinds this client does not understand.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// A message on the relay leg of the conversation.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RelayMessage {
    /// Session coordinates and provider metadata, sent once after the
    /// relay finishes negotiation. Opaque to the pipeline.
    SessionInfo { data: serde_json::Value },

    /// One chunk of agent audio, base64-encoded in transit.
    Audio { audio: String },

    /// A relay-side failure (e.g. negotiation rejected).
    Error { code: String, message: String },

    /// Any tag this build does not know. Ignored by receivers.
    #[serde(other)]
    Unknown,
}

impl RelayMessage {
    /// Parse one text frame. Malformed JSON is an error; a well-formed
    /// envelope with an unrecognized tag parses as `Unknown`.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Serialize for the wire.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Decode the base64 payload of an `audio` envelope to raw bytes.
pub fn decode_audio_payload(audio: &str) -> Result<Vec<u8>, base64::DecodeError> {
    BASE64.decode(audio)
}

/// Encode raw audio bytes as an `audio` envelope payload.
pub fn encode_audio_payload(raw: &[u8]) -> String {
    BASE64.encode(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_session_info() {
        let text = r#"{"type": "session-info", "data": {"room_url": "wss://x", "token": "t"}}"#;
        match RelayMessage::parse(text).unwrap() {
            RelayMessage::SessionInfo { data } => {
                assert_eq!(data["token"], "t");
            }
            other => panic!("wrong variant: {:?}", other),
        }
    }

    #[test]
    fn test_parse_audio_and_decode_payload() {
        let payload = encode_audio_payload(&[1u8, 2, 3, 4]);
        let text = format!(r#"{{"type": "audio", "audio": "{}"}}"#, payload);

        match RelayMessage::parse(&text).unwrap() {
            RelayMessage::Audio { audio } => {
                assert_eq!(decode_audio_payload(&audio).unwrap(), vec![1, 2, 3, 4]);
            }
            other => panic!("wrong variant: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_is_ignored_not_an_error() {
        let text = r#"{"type": "speaker-change", "participant": "agent"}"#;
        assert!(matches!(
            RelayMessage::parse(text).unwrap(),
            RelayMessage::Unknown
        ));
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        assert!(RelayMessage::parse("{not json").is_err());
    }

    #[test]
    fn test_serialized_tags_are_kebab_case() {
        let msg = RelayMessage::SessionInfo {
            data: serde_json::json!({"k": "v"}),
        };
        let json = msg.to_json().unwrap();
        assert!(json.contains(r#""type":"session-info""#));

        let msg = RelayMessage::Error {
            code: "negotiation_failed".to_string(),
            message: "provider rejected the request".to_string(),
        };
        assert!(msg.to_json().unwrap().contains(r#""type":"error""#));
    }

    #[test]
    fn test_invalid_base64_payload() {
        assert!(decode_audio_payload("not base64!!!").is_err());
    }
}
