use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Current configuration, with the provider credential redacted.
pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": {
            "server": {
                "host": config.server.host,
                "port": config.server.port
            },
            "provider": {
                "api_url": config.provider.api_url,
                "api_key": if config.provider.api_key.is_empty() { "<unset>" } else { "<redacted>" },
                "request_recording": config.provider.request_recording
            },
            "audio": {
                "sample_rate": config.audio.sample_rate,
                "channels": config.audio.channels,
                "bit_depth": config.audio.bit_depth,
                "block_size": config.audio.block_size,
                "noise_suppression": config.audio.noise_suppression,
                "auto_gain": config.audio.auto_gain
            },
            "client": {
                "relay_url": config.client.relay_url,
                "connect_timeout_secs": config.client.connect_timeout_secs,
                "record_path": config.client.record_path
            }
        }
    })))
}

/// Partial runtime update; the provider credential cannot be set here.
pub async fn update_config(
    state: web::Data<AppState>,
    body: web::Json<serde_json::Value>,
) -> Result<HttpResponse, AppError> {
    let json_str = serde_json::to_string(&body.into_inner())?;

    let mut current_config = state.get_config();
    current_config.update_from_json(&json_str)?;

    state
        .update_config(current_config.clone())
        .map_err(AppError::ValidationError)?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Configuration updated successfully",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "updated_config": {
            "server": {
                "host": current_config.server.host,
                "port": current_config.server.port
            },
            "audio": {
                "sample_rate": current_config.audio.sample_rate,
                "block_size": current_config.audio.block_size,
                "noise_suppression": current_config.audio.noise_suppression,
                "auto_gain": current_config.audio.auto_gain
            },
            "client": {
                "relay_url": current_config.client.relay_url,
                "connect_timeout_secs": current_config.client.connect_timeout_secs
            }
        }
    })))
}
