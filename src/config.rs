//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER_HOST, PROVIDER_API_KEY, etc.)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)
//!
//! The provider bearer key is deliberately *not* given a default: it must
//! come from the environment or a local (uncommitted) config file.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration shared by the relay and the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub provider: ProviderConfig,
    pub audio: AudioSettings,
    pub client: ClientConfig,
}

/// Relay HTTP server settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: localhost only (development)
/// - `host = "0.0.0.0"`: accept connections from any address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Third-party voice-agent provider settings.
///
/// ## Fields:
/// - `api_url`: the session-negotiation endpoint (POST)
/// - `api_key`: bearer credential, read from `PROVIDER_API_KEY` or a local
///   config file — never committed
/// - `request_recording`: ask the provider to record the session on its side
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub api_url: String,
    pub api_key: String,
    pub request_recording: bool,
}

/// Audio format shared by capture, playback, and the wire protocol.
///
/// ## Fields:
/// - `sample_rate`: 24 kHz mono is the conversational default
/// - `block_size`: samples per capture block (4096 ≈ 171 ms at 24 kHz)
/// - `noise_suppression` / `auto_gain`: capture-side conditioning toggles
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioSettings {
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_depth: u8,
    pub block_size: usize,
    pub noise_suppression: bool,
    pub auto_gain: bool,
}

/// Native client settings.
///
/// ## Fields:
/// - `relay_url`: WebSocket endpoint of the relay (`ws://host:port/ws/voice`)
/// - `connect_timeout_secs`: upper bound on transport open; expiry surfaces
///   as a connect error instead of pending forever
/// - `record_path`: when set, captured audio is also written to this WAV file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub relay_url: String,
    pub connect_timeout_secs: u64,
    pub record_path: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            provider: ProviderConfig {
                api_url: "https://api.example.com/v1/sessions/start".to_string(),
                api_key: String::new(),
                request_recording: false,
            },
            audio: AudioSettings {
                sample_rate: 24_000,
                channels: 1,
                bit_depth: 16,
                block_size: 4096,
                noise_suppression: true,
                auto_gain: true,
            },
            client: ClientConfig {
                relay_url: "ws://127.0.0.1:8080/ws/voice".to_string(),
                connect_timeout_secs: 10,
                record_path: None,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, config.toml, and the environment.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER_HOST=0.0.0.0`: override server host
    /// - `APP_SERVER_PORT=3000`: override server port
    /// - `HOST` / `PORT`: deployment-platform special cases
    /// - `PROVIDER_API_KEY`: provider bearer credential (special case,
    ///   because the `_` separator cannot address a two-word field)
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Ok(key) = env::var("PROVIDER_API_KEY") {
            settings = settings.set_override("provider.api_key", key)?;
        }

        if let Ok(url) = env::var("RELAY_URL") {
            settings = settings.set_override("client.relay_url", url)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// The provider key is intentionally not checked here: the client never
    /// needs it, and the relay checks it once at startup.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.audio.sample_rate == 0 {
            return Err(anyhow::anyhow!("Audio sample rate must be greater than 0"));
        }

        if self.audio.channels != 1 {
            return Err(anyhow::anyhow!(
                "Only mono capture is supported (channels must be 1)"
            ));
        }

        if self.audio.bit_depth != 16 {
            return Err(anyhow::anyhow!(
                "Only 16-bit PCM is supported on the wire"
            ));
        }

        if self.audio.block_size == 0 {
            return Err(anyhow::anyhow!("Audio block size must be greater than 0"));
        }

        if self.client.connect_timeout_secs == 0 {
            return Err(anyhow::anyhow!(
                "Client connect timeout must be greater than 0"
            ));
        }

        Ok(())
    }

    /// Update configuration from a JSON string (runtime config updates).
    ///
    /// ## Partial updates:
    /// Only the fields present in the JSON are changed. For example,
    /// `{"server": {"port": 9000}}` changes only the port. The provider
    /// key cannot be changed through this path.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(server) = partial_config.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = port as u16;
            }
        }

        if let Some(provider) = partial_config.get("provider") {
            if let Some(url) = provider.get("api_url").and_then(|v| v.as_str()) {
                self.provider.api_url = url.to_string();
            }
            if let Some(rec) = provider.get("request_recording").and_then(|v| v.as_bool()) {
                self.provider.request_recording = rec;
            }
        }

        if let Some(audio) = partial_config.get("audio") {
            if let Some(rate) = audio.get("sample_rate").and_then(|v| v.as_u64()) {
                self.audio.sample_rate = rate as u32;
            }
            if let Some(block) = audio.get("block_size").and_then(|v| v.as_u64()) {
                self.audio.block_size = block as usize;
            }
            if let Some(ns) = audio.get("noise_suppression").and_then(|v| v.as_bool()) {
                self.audio.noise_suppression = ns;
            }
            if let Some(ag) = audio.get("auto_gain").and_then(|v| v.as_bool()) {
                self.audio.auto_gain = ag;
            }
        }

        if let Some(client) = partial_config.get("client") {
            if let Some(url) = client.get("relay_url").and_then(|v| v.as_str()) {
                self.client.relay_url = url.to_string();
            }
            if let Some(timeout) = client.get("connect_timeout_secs").and_then(|v| v.as_u64()) {
                self.client.connect_timeout_secs = timeout;
            }
        }

        self.validate()?;
        Ok(())
    }

    /// Seconds of audio per capture block (the callback cadence).
    pub fn block_duration_secs(&self) -> f64 {
        self.audio.block_size as f64 / self.audio.sample_rate as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.audio.sample_rate, 24_000);
        assert_eq!(config.audio.block_size, 4096);
        assert!(config.provider.api_key.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.channels = 2;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.client.connect_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_update() {
        let mut config = AppConfig::default();
        let json = r#"{"server": {"port": 9090}, "audio": {"noise_suppression": false}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.server.port, 9090);
        assert!(!config.audio.noise_suppression);
        // Untouched fields keep their values
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.audio.sample_rate, 24_000);
    }

    #[test]
    fn test_update_rejects_invalid() {
        let mut config = AppConfig::default();
        let json = r#"{"audio": {"block_size": 0}}"#;
        assert!(config.update_from_json(json).is_err());
    }

    #[test]
    fn test_block_duration() {
        let config = AppConfig::default();
        // 4096 samples at 24 kHz ≈ 171 ms
        let ms = config.block_duration_secs() * 1000.0;
        assert!((ms - 170.666).abs() < 0.01);
    }
}
