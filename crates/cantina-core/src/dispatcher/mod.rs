//! Command Dispatcher (§4.5): parses textual commands from the CLI and
//! the Web Bridge's simple-command channel into structured bus events.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use cantina_proto::{DispatchError, LifecycleState, MusicAction, Mode, Payload, Severity, Source, Topic};

use crate::service::{Service, ServiceContext};

/// The target-specific transform applied to a parsed command before
/// emission (§4.5's "closed set").
#[derive(Clone)]
enum Transform {
    /// Emit a bare `StatusRequest` (or any fixed payload), ignoring args.
    Fixed(fn() -> Payload),
    /// `"dj start"`/`"dj stop"` → `DjModeChanged{active}`.
    DjToggle { active: bool },
    /// `"dj next"` → `MusicCommand{action: next}`.
    DjNext,
    /// `"music play <query>"` / `"music stop"` → `MusicCommand`.
    MusicPlay,
    MusicStop,
    /// `"mode <name>"` → `SystemSetModeRequest{mode}`.
    SetMode,
}

struct Registration {
    target_topic: Topic,
    transform: Transform,
    /// Whether the compound form requires at least one remaining arg
    /// (e.g. `music play <query>` needs a track name).
    requires_arg: bool,
}

/// `register(pattern, target_topic, transform)` — performed once, at
/// service start, per §9's "explicit registration only" redesign.
struct CommandRegistry {
    patterns: HashMap<Vec<String>, Registration>,
}

impl CommandRegistry {
    fn with_builtin_commands() -> Self {
        let mut patterns = HashMap::new();
        patterns.insert(
            vec!["status".to_string()],
            Registration {
                target_topic: Topic::StatusRequest,
                transform: Transform::Fixed(|| Payload::StatusRequest {}),
                requires_arg: false,
            },
        );
        patterns.insert(
            vec!["dj".to_string(), "start".to_string()],
            Registration {
                target_topic: Topic::DjModeChanged,
                transform: Transform::DjToggle { active: true },
                requires_arg: false,
            },
        );
        patterns.insert(
            vec!["dj".to_string(), "stop".to_string()],
            Registration {
                target_topic: Topic::DjModeChanged,
                transform: Transform::DjToggle { active: false },
                requires_arg: false,
            },
        );
        patterns.insert(
            vec!["dj".to_string(), "next".to_string()],
            Registration {
                target_topic: Topic::MusicCommand,
                transform: Transform::DjNext,
                requires_arg: false,
            },
        );
        patterns.insert(
            vec!["music".to_string(), "play".to_string()],
            Registration {
                target_topic: Topic::MusicCommand,
                transform: Transform::MusicPlay,
                requires_arg: true,
            },
        );
        patterns.insert(
            vec!["music".to_string(), "stop".to_string()],
            Registration {
                target_topic: Topic::MusicCommand,
                transform: Transform::MusicStop,
                requires_arg: false,
            },
        );
        patterns.insert(
            vec!["mode".to_string()],
            Registration {
                target_topic: Topic::SystemSetModeRequest,
                transform: Transform::SetMode,
                requires_arg: true,
            },
        );
        Self { patterns }
    }

    /// Greedy match: try the two-word compound first, then one word.
    /// Returns the matched registration and the remaining argument tokens.
    fn resolve<'a>(&'a self, tokens: &[String]) -> Option<(&'a Registration, Vec<String>)> {
        if tokens.len() >= 2 {
            let compound = vec![tokens[0].clone(), tokens[1].clone()];
            if let Some(reg) = self.patterns.get(&compound) {
                return Some((reg, tokens[2..].to_vec()));
            }
        }
        if !tokens.is_empty() {
            let single = vec![tokens[0].clone()];
            if let Some(reg) = self.patterns.get(&single) {
                return Some((reg, tokens[1..].to_vec()));
            }
        }
        None
    }
}

pub struct CommandDispatcher {
    registry: CommandRegistry,
}

impl CommandDispatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            registry: CommandRegistry::with_builtin_commands(),
        })
    }

    async fn dispatch(&self, ctx: &Arc<ServiceContext>, raw_input: &str, source: Source, sid: Option<String>) -> Result<()> {
        let tokens: Vec<String> = raw_input.split_whitespace().map(str::to_string).collect();
        if tokens.is_empty() {
            return self
                .respond_failure(ctx, DispatchError::UnknownCommand { command: raw_input.to_string() }, sid)
                .await;
        }

        let Some((registration, args)) = self.registry.resolve(&tokens) else {
            return self
                .respond_failure(ctx, DispatchError::UnknownCommand { command: tokens[0].clone() }, sid)
                .await;
        };

        if registration.requires_arg && args.is_empty() {
            return self
                .respond_failure(ctx, DispatchError::MissingArgument { field: "args".to_string() }, sid)
                .await;
        }

        let query = args.join(" ");
        // `ack_here` is true only for targets with no in-repo service that
        // can confirm the outcome -- raw music transport and status are
        // handed off to the external audio player this core doesn't own,
        // so an immediate "dispatched" acknowledgment is the best this
        // crate can offer. DJ toggling and mode changes have a real
        // handler (Brain, Mode Manager) that knows the actual result, so
        // those get `sid` threaded through instead and publish the
        // terminal `CliResponse` themselves.
        let (payload, ack_here) = match &registration.transform {
            Transform::Fixed(build) => (build(), true),
            Transform::DjToggle { active } => (Payload::DjModeChanged { active: *active, reason: None, sid: sid.clone() }, false),
            Transform::DjNext => (
                Payload::MusicCommand {
                    action: MusicAction::Next,
                    source,
                    track_name: None,
                    track_id: None,
                    fade_ms: None,
                    ceiling_volume: None,
                },
                true,
            ),
            Transform::MusicPlay => (
                Payload::MusicCommand {
                    action: MusicAction::Play,
                    source,
                    track_name: Some(query),
                    track_id: None,
                    fade_ms: None,
                    ceiling_volume: None,
                },
                true,
            ),
            Transform::MusicStop => (
                Payload::MusicCommand {
                    action: MusicAction::Stop,
                    source,
                    track_name: None,
                    track_id: None,
                    fade_ms: None,
                    ceiling_volume: None,
                },
                true,
            ),
            Transform::SetMode => match parse_mode(&query) {
                Some(mode) => (Payload::SystemSetModeRequest { mode, sid: sid.clone() }, false),
                None => {
                    return self
                        .respond_failure(ctx, DispatchError::MissingArgument { field: "mode".to_string() }, sid)
                        .await
                }
            },
        };

        debug_assert_eq!(payload.topic(), registration.target_topic);
        ctx.emit(payload).await?;

        if ack_here {
            ctx.emit(Payload::CliResponse {
                success: true,
                message: format!("dispatched: {raw_input}"),
                data: None,
                code: None,
                field: None,
                sid,
            })
            .await?;
        }
        Ok(())
    }

    async fn respond_failure(&self, ctx: &Arc<ServiceContext>, err: DispatchError, sid: Option<String>) -> Result<()> {
        let field = match &err {
            DispatchError::MissingArgument { field } => Some(field.clone()),
            DispatchError::UnknownCommand { .. } => None,
        };
        ctx.emit(Payload::CliResponse {
            success: false,
            message: err.to_string(),
            data: None,
            code: Some(err.code().to_string()),
            field,
            sid,
        })
        .await
    }
}

fn parse_mode(name: &str) -> Option<Mode> {
    match name.to_ascii_uppercase().as_str() {
        "IDLE" => Some(Mode::Idle),
        "AMBIENT" => Some(Mode::Ambient),
        "INTERACTIVE" => Some(Mode::Interactive),
        _ => None,
    }
}

#[async_trait]
impl Service for CommandDispatcher {
    fn name(&self) -> &'static str {
        "command_dispatcher"
    }

    async fn start(self: Arc<Self>, ctx: Arc<ServiceContext>) -> Result<()> {
        ctx.emit_status(LifecycleState::Starting, "registering commands", Severity::Info).await?;

        let dispatcher = Arc::clone(&self);
        {
            let ctx = Arc::clone(&ctx);
            ctx.subscribe(Topic::CliCommand, move |env| {
                let dispatcher = Arc::clone(&dispatcher);
                let ctx = Arc::clone(&ctx);
                async move {
                    if let Payload::CliCommand { raw_input, source, sid } = env.payload {
                        dispatcher.dispatch(&ctx, &raw_input, source, sid).await?;
                    }
                    Ok(())
                }
            })
            .await?;
        }

        ctx.answer_status_requests().await?;
        ctx.start_heartbeat();
        ctx.emit_status(LifecycleState::Running, "ready", Severity::Info).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use cantina_conf::CantinaConfig;
    use std::time::Duration;
    use tokio::sync::Mutex;
    use tokio_util::sync::CancellationToken;

    fn ctx_for() -> Arc<ServiceContext> {
        let bus = EventBus::new(Duration::from_millis(100));
        ServiceContext::new("command_dispatcher", bus, Arc::new(CantinaConfig::default()), CancellationToken::new())
    }

    #[tokio::test]
    async fn compound_command_is_matched_greedily() {
        let ctx = ctx_for();
        let dispatcher = CommandDispatcher::new();
        Arc::clone(&dispatcher).start(Arc::clone(&ctx)).await.unwrap();

        let captured = Arc::new(Mutex::new(None));
        let captured2 = Arc::clone(&captured);
        ctx.bus
            .subscribe(
                Topic::MusicCommand,
                "music",
                crate::bus::handler_fn("music", move |env| {
                    let captured = Arc::clone(&captured2);
                    async move {
                        if let Payload::MusicCommand { track_name, .. } = env.payload {
                            *captured.lock().await = track_name;
                        }
                        Ok(())
                    }
                }),
            )
            .await
            .unwrap();

        ctx.emit(Payload::CliCommand {
            raw_input: "music play alderaan skies".into(),
            source: Source::Cli,
            sid: None,
        })
        .await
        .unwrap();

        assert_eq!(captured.lock().await.clone(), Some("alderaan skies".to_string()));
    }

    #[tokio::test]
    async fn unknown_command_responds_with_code() {
        let ctx = ctx_for();
        let dispatcher = CommandDispatcher::new();
        Arc::clone(&dispatcher).start(Arc::clone(&ctx)).await.unwrap();

        let code = Arc::new(Mutex::new(None));
        let code2 = Arc::clone(&code);
        ctx.bus
            .subscribe(
                Topic::CliResponse,
                "origin",
                crate::bus::handler_fn("origin", move |env| {
                    let code = Arc::clone(&code2);
                    async move {
                        if let Payload::CliResponse { code: c, .. } = env.payload {
                            *code.lock().await = c;
                        }
                        Ok(())
                    }
                }),
            )
            .await
            .unwrap();

        ctx.emit(Payload::CliCommand {
            raw_input: "fly away".into(),
            source: Source::Cli,
            sid: None,
        })
        .await
        .unwrap();

        assert_eq!(code.lock().await.clone(), Some("unknown_command".to_string()));
    }

    #[tokio::test]
    async fn missing_argument_responds_with_code() {
        let ctx = ctx_for();
        let dispatcher = CommandDispatcher::new();
        Arc::clone(&dispatcher).start(Arc::clone(&ctx)).await.unwrap();

        let code = Arc::new(Mutex::new(None));
        let code2 = Arc::clone(&code);
        ctx.bus
            .subscribe(
                Topic::CliResponse,
                "origin",
                crate::bus::handler_fn("origin", move |env| {
                    let code = Arc::clone(&code2);
                    async move {
                        if let Payload::CliResponse { code: c, .. } = env.payload {
                            *code.lock().await = c;
                        }
                        Ok(())
                    }
                }),
            )
            .await
            .unwrap();

        ctx.emit(Payload::CliCommand {
            raw_input: "music play".into(),
            source: Source::Cli,
            sid: None,
        })
        .await
        .unwrap();

        assert_eq!(code.lock().await.clone(), Some("missing_argument".to_string()));
    }
}
