//! # WebSocket Voice Relay
//!
//! Terminates one client WebSocket per conversation at `/ws/voice`,
//! negotiates a session with the agent provider, opens a second WebSocket
//! to the agent's media endpoint, and forwards traffic both ways **with no
//! decoding** — audio frames are opaque bytes here.
//!
//! ## Relay Protocol:
//! 1. Client connects; the relay starts negotiation immediately
//! 2. On success the client receives `{"type": "session-info", ...}` and
//!    forwarding begins in both directions
//! 3. On failure the client receives `{"type": "error", ...}` and the
//!    socket closes
//! 4. Either side closing (or erroring) closes the other
//!
//! Frames arriving before the agent leg is open are dropped, mirroring the
//! pipeline's send-iff-open rule.

use crate::protocol::RelayMessage;
use crate::provider;
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use futures_util::{SinkExt, StreamExt};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as AgentWsError, Message as AgentMessage};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How often the relay pings its client.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Clients silent for this long are disconnected.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// One relay conversation: a client WebSocket bridged to an agent
/// WebSocket.
pub struct VoiceRelay {
    /// Unique id for this conversation (log correlation only)
    session_id: String,

    /// Shared state for metrics and provider configuration
    state: web::Data<AppState>,

    /// Outbound leg to the agent; `None` until negotiation finishes.
    /// Dropping the sender closes the agent connection.
    agent_tx: Option<mpsc::UnboundedSender<AgentMessage>>,

    /// Last time the client proved it was alive
    last_heartbeat: Instant,
}

impl VoiceRelay {
    pub fn new(state: web::Data<AppState>) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            state,
            agent_tx: None,
            last_heartbeat: Instant::now(),
        }
    }

    /// Ping the client on an interval; drop it after a silent minute.
    fn start_heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!(session = %act.session_id, "client heartbeat timeout, closing");
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    /// Send one envelope to the client.
    fn send_envelope(&self, ctx: &mut ws::WebsocketContext<Self>, msg: RelayMessage) {
        match msg.to_json() {
            Ok(json) => ctx.text(json),
            Err(e) => error!(session = %self.session_id, "failed to serialize envelope: {}", e),
        }
    }

    /// Wire up the freshly connected agent leg: writer task, reader stream
    /// into this actor, and the session-info envelope to the client.
    fn bridge_agent(
        &mut self,
        negotiated: provider::NegotiatedSession,
        agent_ws: tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
        ctx: &mut ws::WebsocketContext<Self>,
    ) {
        let (mut sink, stream) = agent_ws.split();
        let (agent_tx, mut agent_rx) = mpsc::unbounded_channel::<AgentMessage>();

        // Writer: drains frames to the agent, says goodbye when the relay
        // side drops the sender.
        tokio::spawn(async move {
            while let Some(message) = agent_rx.recv().await {
                if sink.send(message).await.is_err() {
                    return;
                }
            }
            let _ = sink.send(AgentMessage::Close(None)).await;
        });

        self.agent_tx = Some(agent_tx);

        // Reader: agent traffic is delivered to this actor's
        // StreamHandler and forwarded verbatim.
        ctx.add_stream(stream);

        self.send_envelope(
            ctx,
            RelayMessage::SessionInfo {
                data: negotiated.raw,
            },
        );

        info!(session = %self.session_id, "agent leg connected, forwarding");
    }
}

impl Actor for VoiceRelay {
    type Context = ws::WebsocketContext<Self>;

    /// Client connected: begin heartbeats and negotiate the agent leg.
    fn started(&mut self, ctx: &mut Self::Context) {
        info!(session = %self.session_id, "relay session started");
        self.state.increment_active_sessions();
        self.start_heartbeat(ctx);

        let provider_config = self.state.get_config().provider;

        let negotiate = async move {
            let negotiated = provider::create_session(&provider_config).await?;
            let url = provider::agent_ws_url(&negotiated.coordinates);

            let (agent_ws, _response) = connect_async(&url).await.map_err(|e| {
                crate::error::AppError::Internal(format!("agent connect failed: {}", e))
            })?;

            Ok::<_, crate::error::AppError>((negotiated, agent_ws))
        };

        ctx.spawn(actix::fut::wrap_future::<_, Self>(negotiate).map(
            |result, act: &mut Self, ctx| match result {
                Ok((negotiated, agent_ws)) => act.bridge_agent(negotiated, agent_ws, ctx),
                Err(e) => {
                    error!(session = %act.session_id, "negotiation failed: {}", e);
                    act.send_envelope(
                        ctx,
                        RelayMessage::Error {
                            code: "negotiation_failed".to_string(),
                            message: e.to_string(),
                        },
                    );
                    ctx.stop();
                }
            },
        ));
    }

    /// Conversation over: closing the agent leg is part of teardown, so an
    /// unexpected client disconnect never leaves a dangling agent socket.
    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.agent_tx = None;
        self.state.decrement_active_sessions();
        info!(session = %self.session_id, "relay session stopped");
    }
}

/// Client → agent direction.
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for VoiceRelay {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Binary(data)) => match &self.agent_tx {
                Some(tx) => {
                    if tx.send(AgentMessage::Binary(data.to_vec())).is_ok() {
                        self.state.record_upstream_frame();
                    }
                }
                None => debug!(session = %self.session_id, "dropping frame: agent leg not open"),
            },
            Ok(ws::Message::Text(text)) => match &self.agent_tx {
                Some(tx) => {
                    let _ = tx.send(AgentMessage::Text(text.to_string()));
                }
                None => debug!(session = %self.session_id, "dropping text: agent leg not open"),
            },
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(session = %self.session_id, "client closed: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!(session = %self.session_id, "unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(e) => {
                error!(session = %self.session_id, "client websocket error: {}", e);
                ctx.stop();
            }
        }
    }
}

/// Agent → client direction: forwarded verbatim, no decoding.
impl StreamHandler<Result<AgentMessage, AgentWsError>> for VoiceRelay {
    fn handle(&mut self, msg: Result<AgentMessage, AgentWsError>, ctx: &mut Self::Context) {
        match msg {
            Ok(AgentMessage::Text(text)) => {
                self.state.record_downstream_frame();
                ctx.text(text);
            }
            Ok(AgentMessage::Binary(data)) => {
                self.state.record_downstream_frame();
                ctx.binary(data);
            }
            Ok(AgentMessage::Close(_)) => {
                info!(session = %self.session_id, "agent closed, closing client");
                ctx.close(Some(ws::CloseCode::Normal.into()));
                ctx.stop();
            }
            Ok(_) => {} // ping/pong/frame bookkeeping
            Err(e) => {
                error!(session = %self.session_id, "agent websocket error: {}", e);
                ctx.stop();
            }
        }
    }

    /// Agent stream ended without a close frame: same teardown.
    fn finished(&mut self, ctx: &mut Self::Context) {
        info!(session = %self.session_id, "agent stream ended");
        ctx.stop();
    }
}

/// HTTP → WebSocket upgrade for `/ws/voice`.
pub async fn voice_relay(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    info!(
        "new relay connection request from: {:?}",
        req.connection_info().peer_addr()
    );

    ws::start(VoiceRelay::new(app_state), &req, stream)
}
