//! # Voice Client - Native Pipeline Entry Point
//!
//! Holds one voice conversation with the remote agent: captures the
//! microphone, streams encoded frames to the relay, and plays agent audio
//! back as it arrives. Ctrl-C ends the conversation cleanly.

use anyhow::Result;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::StreamExt;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use voice_agent_backend::config::AppConfig;
use voice_agent_backend::session::{SessionState, VoiceSession};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing();

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting voice-client v{}", env!("CARGO_PKG_VERSION"));
    info!(relay = %config.client.relay_url, "connecting to relay");

    let mut session = VoiceSession::new(config)?;

    // Surface state changes as they happen; the pipeline never prints UI
    // state itself, it only publishes transitions.
    let mut states = WatchStream::new(session.subscribe());
    tokio::spawn(async move {
        while let Some(state) = states.next().await {
            info!(state = state.as_str(), "session state");
            if state == SessionState::Ended {
                break;
            }
        }
    });

    session.connect().await?;
    info!("connected; speak into the microphone (ctrl-c to end)");

    tokio::select! {
        result = session.run() => {
            if let Err(e) = result {
                warn!("session ended with error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, ending conversation");
        }
    }

    session.close().await;
    info!("conversation ended");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voice_client=info,voice_agent_backend=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
