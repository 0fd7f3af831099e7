//! # Provider Session Negotiation
//!
//! One POST against the third-party voice-agent provider returns the
//! connection coordinates for a conversation: a media room URL, an access
//! token, and opaque session metadata. Everything beyond the two
//! coordinates is passed through to the client untouched.
//!
//! The bearer credential comes from configuration/environment
//! (`PROVIDER_API_KEY`); it is never baked into the code and never echoed
//! back out through the config API.

use crate::config::ProviderConfig;
use crate::error::{AppError, AppResult};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::info;

/// The two fields this relay actually needs from the provider response.
///
/// Provider payloads differ in naming; the aliases cover the spellings
/// seen in the wild.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionCoordinates {
    #[serde(alias = "room", alias = "roomUrl", alias = "dailyRoom")]
    pub room_url: String,

    #[serde(alias = "accessToken", alias = "dailyToken")]
    pub token: String,
}

/// A negotiated session: parsed coordinates plus the raw response the
/// client receives verbatim as `session-info`.
#[derive(Debug, Clone)]
pub struct NegotiatedSession {
    pub coordinates: SessionCoordinates,
    pub raw: serde_json::Value,
}

/// Call the provider's start endpoint and extract the coordinates.
pub async fn create_session(provider: &ProviderConfig) -> AppResult<NegotiatedSession> {
    if provider.api_key.is_empty() {
        return Err(AppError::ConfigError(
            "provider API key is not configured (set PROVIDER_API_KEY)".to_string(),
        ));
    }

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;

    let mut room_properties = json!({ "privacy": "private" });
    if provider.request_recording {
        room_properties["enable_recording"] = json!("cloud");
    }

    let body = json!({
        "create_room": true,
        "warm": true,
        "room_properties": room_properties,
        "token_properties": { "is_owner": true }
    });

    let response = client
        .post(&provider.api_url)
        .bearer_auth(&provider.api_key)
        .json(&body)
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        return Err(AppError::Internal(format!(
            "provider returned {}: {}",
            status, text
        )));
    }

    let raw: serde_json::Value = response.json().await?;

    let coordinates: SessionCoordinates = serde_json::from_value(raw.clone()).map_err(|e| {
        AppError::Internal(format!("provider response missing coordinates: {}", e))
    })?;

    info!(room = %coordinates.room_url, "agent session negotiated");

    Ok(NegotiatedSession { coordinates, raw })
}

/// Derive the agent's media WebSocket URL from the coordinates:
/// the room URL switched to a WebSocket scheme, with the access token as a
/// query parameter.
pub fn agent_ws_url(coordinates: &SessionCoordinates) -> String {
    let url = &coordinates.room_url;

    let base = if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        url.clone()
    };

    format!("{}?token={}", base, coordinates.token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinates_parse_aliased_fields() {
        let raw = json!({
            "dailyRoom": "https://agent.example.com/room-1",
            "dailyToken": "tok-123",
            "expires": 1234
        });

        let coords: SessionCoordinates = serde_json::from_value(raw).unwrap();
        assert_eq!(coords.room_url, "https://agent.example.com/room-1");
        assert_eq!(coords.token, "tok-123");
    }

    #[test]
    fn test_coordinates_parse_canonical_fields() {
        let raw = json!({ "room_url": "wss://a/b", "token": "t" });
        let coords: SessionCoordinates = serde_json::from_value(raw).unwrap();
        assert_eq!(coords.room_url, "wss://a/b");
    }

    #[test]
    fn test_coordinates_missing_token_fails() {
        let raw = json!({ "room_url": "https://a/b" });
        assert!(serde_json::from_value::<SessionCoordinates>(raw).is_err());
    }

    #[test]
    fn test_agent_ws_url_switches_scheme() {
        let coords = SessionCoordinates {
            room_url: "https://agent.example.com/room-1".to_string(),
            token: "tok".to_string(),
        };
        assert_eq!(
            agent_ws_url(&coords),
            "wss://agent.example.com/room-1?token=tok"
        );
    }

    #[test]
    fn test_agent_ws_url_passes_ws_scheme_through() {
        let coords = SessionCoordinates {
            room_url: "wss://agent.example.com/room-1".to_string(),
            token: "tok".to_string(),
        };
        assert_eq!(
            agent_ws_url(&coords),
            "wss://agent.example.com/room-1?token=tok"
        );
    }
}
