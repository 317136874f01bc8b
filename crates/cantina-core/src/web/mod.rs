//! Web Bridge (§4.8): translates validated external socket commands into
//! bus events and broadcasts a curated, throttled stream of internal
//! topics to every connected client.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::http::HeaderValue;
use axum::Router;
use cantina_proto::{LifecycleState, Mode, MusicAction, Payload, Severity, Source, Topic, ValidationError};
use serde::Deserialize;
use tokio::sync::{broadcast, Mutex};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use uuid::Uuid;

use crate::bus::throttle::ThrottleMode;
use crate::service::{Service, ServiceContext};

/// Internal topics rebroadcast to every client (§4.8 "Outputs"), paired
/// with the throttle mode their frequency class gets.
const BROADCAST_TOPICS: &[(Topic, ThrottleMode)] = &[
    (Topic::ServiceStatus, ThrottleMode::TailDrop { per_second: 30 }),
    (Topic::SystemModeChange, ThrottleMode::Unbounded),
    (Topic::DjModeChanged, ThrottleMode::Unbounded),
    (Topic::MusicPlaybackStarted, ThrottleMode::Unbounded),
    (Topic::MusicPlaybackStopped, ThrottleMode::Unbounded),
    (Topic::MusicLibraryUpdated, ThrottleMode::Unbounded),
    (Topic::TrackPlaying, ThrottleMode::TailDrop { per_second: 30 }),
    (Topic::TrackStopped, ThrottleMode::TailDrop { per_second: 30 }),
    (Topic::TrackEndingSoon, ThrottleMode::CoalesceLatest { per_second: 10 }),
    (Topic::PlanStarted, ThrottleMode::TailDrop { per_second: 30 }),
    (Topic::PlanEnded, ThrottleMode::TailDrop { per_second: 30 }),
    (Topic::DashboardLog, ThrottleMode::CoalesceLatest { per_second: 10 }),
    (Topic::CliResponse, ThrottleMode::Unbounded),
];

/// Wire shapes from §6.1. Each variant's `type` tag is the inbound event
/// name the client sends.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum InboundMessage {
    Command { command: String },
    VoiceCommand { action: String, #[allow(dead_code)] command_id: String },
    MusicCommand { action: String, track_name: Option<String>, #[allow(dead_code)] track_id: Option<String> },
    DjCommand { action: String, track: Option<String> },
    SystemCommand { #[allow(dead_code)] action: String, mode: String },
}

pub struct WebBridge {
    broadcast_tx: broadcast::Sender<serde_json::Value>,
    /// Connected client ids. Per-client rate limiting is tracked locally in
    /// `ws_loop`'s own task, not here -- this set only backs the connection
    /// cap and the `/health` count.
    clients: Mutex<HashMap<Uuid, ()>>,
}

#[derive(Clone)]
struct AppState {
    bridge: Arc<WebBridge>,
    ctx: Arc<ServiceContext>,
}

impl WebBridge {
    pub fn new() -> Arc<Self> {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Arc::new(Self {
            broadcast_tx,
            clients: Mutex::new(HashMap::new()),
        })
    }

    fn router(self: &Arc<Self>, ctx: Arc<ServiceContext>) -> Router {
        let origins: Vec<HeaderValue> = ctx
            .config
            .infra
            .bind
            .cors_allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        let cors = CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any);

        let state = AppState { bridge: Arc::clone(self), ctx };

        Router::new()
            .route("/health", get(health_handler))
            .route("/ws", get(ws_handler))
            .with_state(state)
            .layer(cors)
    }

    async fn accept_connection(self: &Arc<Self>) -> Option<Uuid> {
        let mut clients = self.clients.lock().await;
        // max_connections is enforced by the caller before this is reached;
        // this just allocates bookkeeping for the accepted client.
        let sid = Uuid::new_v4();
        clients.insert(sid, ());
        Some(sid)
    }

    async fn release_connection(self: &Arc<Self>, sid: Uuid) {
        self.clients.lock().await.remove(&sid);
    }

    async fn connection_count(&self) -> usize {
        self.clients.lock().await.len()
    }

    async fn handle_inbound(self: &Arc<Self>, ctx: &Arc<ServiceContext>, sid: Uuid, raw: &str) -> Result<()> {
        let sid_str = sid.to_string();
        let parsed: std::result::Result<InboundMessage, _> = serde_json::from_str(raw);
        let message = match parsed {
            Ok(m) => m,
            Err(e) => {
                self.send_validation_error(&sid_str, ValidationError::new("body", e.to_string()));
                return Ok(());
            }
        };

        match message {
            InboundMessage::Command { command } => {
                ctx.emit(Payload::CliCommand { raw_input: command, source: Source::Web, sid: Some(sid_str) }).await?;
            }
            // Voice capture start/stop is driven by mode change (§4.9), not
            // a direct service call -- a remote start/stop request is
            // expressed the same way a local mode switch would be.
            InboundMessage::VoiceCommand { action, .. } => {
                let mode = match action.as_str() {
                    "start" => Mode::Interactive,
                    "stop" => Mode::Idle,
                    other => {
                        self.send_validation_error(&sid_str, ValidationError::new("action", format!("unknown voice action {other}")));
                        return Ok(());
                    }
                };
                ctx.emit(Payload::SystemSetModeRequest { mode, sid: None }).await?;
            }
            InboundMessage::MusicCommand { action, track_name, track_id } => {
                let Some(action) = parse_music_action(&action) else {
                    self.send_validation_error(&sid_str, ValidationError::new("action", format!("unknown music action {action}")));
                    return Ok(());
                };
                if matches!(action, MusicAction::Play) && track_name.is_none() && track_id.is_none() {
                    self.send_validation_error(&sid_str, ValidationError::new("track_name", "required for action play"));
                    return Ok(());
                }
                ctx.emit(Payload::MusicCommand {
                    action,
                    source: Source::Web,
                    track_name,
                    track_id,
                    fade_ms: None,
                    ceiling_volume: None,
                })
                .await?;
            }
            InboundMessage::DjCommand { action, track } => match action.as_str() {
                "start" => ctx.emit(Payload::DjModeChanged { active: true, reason: None, sid: None }).await?,
                "stop" => ctx.emit(Payload::DjModeChanged { active: false, reason: None, sid: None }).await?,
                "next" => {
                    ctx.emit(Payload::MusicCommand {
                        action: MusicAction::Next,
                        source: Source::Web,
                        track_name: None,
                        track_id: None,
                        fade_ms: None,
                        ceiling_volume: None,
                    })
                    .await?
                }
                "queue" => {
                    ctx.emit(Payload::MusicCommand {
                        action: MusicAction::Play,
                        source: Source::Web,
                        track_name: track,
                        track_id: None,
                        fade_ms: None,
                        ceiling_volume: None,
                    })
                    .await?
                }
                other => {
                    self.send_validation_error(&sid_str, ValidationError::new("action", format!("unknown dj action {other}")));
                }
            },
            InboundMessage::SystemCommand { mode, .. } => {
                let Some(mode) = parse_mode(&mode) else {
                    self.send_validation_error(&sid_str, ValidationError::new("mode", format!("unknown mode {mode}")));
                    return Ok(());
                };
                ctx.emit(Payload::SystemSetModeRequest { mode, sid: None }).await?;
            }
        }
        Ok(())
    }

    fn send_validation_error(&self, sid: &str, error: ValidationError) {
        let _ = self.broadcast_tx.send(serde_json::json!({
            "topic": "VALIDATION_ERROR",
            "sid": sid,
            "data": error,
            "validated": true,
        }));
    }
}

fn parse_music_action(action: &str) -> Option<MusicAction> {
    match action {
        "play" => Some(MusicAction::Play),
        "stop" => Some(MusicAction::Stop),
        "pause" => Some(MusicAction::Pause),
        "resume" => Some(MusicAction::Resume),
        "next" => Some(MusicAction::Next),
        "crossfade" => Some(MusicAction::Crossfade),
        _ => None,
    }
}

fn parse_mode(mode: &str) -> Option<Mode> {
    match mode.to_ascii_uppercase().as_str() {
        "IDLE" => Some(Mode::Idle),
        "AMBIENT" => Some(Mode::Ambient),
        "INTERACTIVE" => Some(Mode::Interactive),
        _ => None,
    }
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "healthy",
        "connections": state.bridge.connection_count().await,
    }))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_loop(socket, addr, state))
}

async fn ws_loop(mut socket: WebSocket, addr: SocketAddr, state: AppState) {
    let max_connections = state.ctx.config.bootstrap.web_bridge.max_connections;
    if state.bridge.connection_count().await >= max_connections {
        let _ = socket
            .send(Message::Close(Some(axum::extract::ws::CloseFrame {
                code: 1013, // "try again later" -- server overloaded (§4.8).
                reason: "server overloaded".into(),
            })))
            .await;
        return;
    }

    let Some(sid) = state.bridge.accept_connection().await else { return };
    info!(%addr, %sid, "web bridge client connected");

    let rate_limit = state.ctx.config.bootstrap.web_bridge.client_rate_limit_per_min;
    let mut rx = state.bridge.broadcast_tx.subscribe();
    let mut window_start = tokio::time::Instant::now();
    let mut command_count: u32 = 0;

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                match outbound {
                    Ok(value) => {
                        if socket.send(Message::Text(value.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if window_start.elapsed() >= std::time::Duration::from_secs(60) {
                            window_start = tokio::time::Instant::now();
                            command_count = 0;
                        }
                        command_count += 1;
                        if command_count > rate_limit {
                            state.bridge.send_validation_error(&sid.to_string(), ValidationError::new("rate_limit", "per-client command rate exceeded"));
                            continue;
                        }
                        if let Err(e) = state.bridge.handle_inbound(&state.ctx, sid, &text).await {
                            warn!(error = %e, "failed to process inbound web bridge command");
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(%addr, error = %e, "web bridge socket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    state.bridge.release_connection(sid).await;
    info!(%addr, %sid, "web bridge client disconnected");
}

#[async_trait]
impl Service for WebBridge {
    fn name(&self) -> &'static str {
        "web_bridge"
    }

    async fn start(self: Arc<Self>, ctx: Arc<ServiceContext>) -> Result<()> {
        ctx.emit_status(LifecycleState::Starting, "binding http server", Severity::Info).await?;

        for (topic, mode) in BROADCAST_TOPICS {
            let bridge = Arc::clone(&self);
            let mode = *mode;
            ctx.bus
                .subscribe_with_throttle(
                    *topic,
                    self.name(),
                    crate::bus::handler_fn("web_bridge", move |env| {
                        let bridge = Arc::clone(&bridge);
                        async move {
                            let _ = bridge.broadcast_tx.send(env.to_broadcast_json());
                            Ok(())
                        }
                    }),
                    Some(mode),
                )
                .await?;
        }

        let router = self.router(Arc::clone(&ctx));
        let bind_addr: SocketAddr = ([0, 0, 0, 0], ctx.config.infra.bind.http_port).into();
        let listener = tokio::net::TcpListener::bind(bind_addr).await?;

        let shutdown = ctx.shutdown.clone();
        ctx.spawn(async move {
            let server = axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
                .with_graceful_shutdown(async move {
                    shutdown.cancelled().await;
                });
            if let Err(e) = server.await {
                warn!(error = %e, "web bridge server exited with error");
            }
        });

        ctx.answer_status_requests().await?;
        ctx.start_heartbeat();
        ctx.emit_status(LifecycleState::Running, "listening", Severity::Info).await?;
        info!(port = ctx.config.infra.bind.http_port, "web bridge started");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_music_action_rejects_unknown() {
        assert!(parse_music_action("teleport").is_none());
        assert_eq!(parse_music_action("play"), Some(MusicAction::Play));
    }

    #[test]
    fn parse_mode_rejects_startup() {
        assert!(parse_mode("STARTUP").is_none());
        assert_eq!(parse_mode("idle"), Some(Mode::Idle));
    }

    #[test]
    fn inbound_command_message_deserializes() {
        let json = r#"{"type":"command","command":"status"}"#;
        let msg: InboundMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(msg, InboundMessage::Command { .. }));
    }
}
