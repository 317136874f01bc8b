//! Mode Manager (§4.9): owns the global `{STARTUP, IDLE, AMBIENT,
//! INTERACTIVE}` state machine. Mode changes are the only sanctioned way
//! voice capture, LED patterns, and ambient music behavior get driven --
//! never direct service-to-service calls.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use cantina_proto::{LifecycleState, Mode, ModeError, Payload, Severity, Topic};
use tokio::sync::Mutex;

use crate::service::{Service, ServiceContext};

pub struct ModeManager {
    current: Mutex<Mode>,
}

impl ModeManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { current: Mutex::new(Mode::Startup) })
    }

    /// All transitions are permitted except into `STARTUP` (§4.9).
    fn validate(to: Mode) -> Result<(), ModeError> {
        if to == Mode::Startup {
            return Err(ModeError::InvalidTransition { to: "STARTUP".to_string() });
        }
        Ok(())
    }

    async fn transition(&self, ctx: &Arc<ServiceContext>, to: Mode) -> Result<()> {
        Self::validate(to)?;

        let from = {
            let mut current = self.current.lock().await;
            let from = *current;
            *current = to;
            from
        };

        ctx.emit(Payload::ModeTransitionStarted { from, to }).await?;
        ctx.emit(Payload::SystemModeChange { mode: to, previous: from }).await?;
        ctx.emit(Payload::ModeTransitionComplete { to }).await?;
        Ok(())
    }
}

#[async_trait]
impl Service for ModeManager {
    fn name(&self) -> &'static str {
        "mode_manager"
    }

    async fn start(self: Arc<Self>, ctx: Arc<ServiceContext>) -> Result<()> {
        ctx.emit_status(LifecycleState::Starting, "entering idle", Severity::Info).await?;

        let manager = Arc::clone(&self);
        {
            let ctx = Arc::clone(&ctx);
            ctx.subscribe(Topic::SystemSetModeRequest, move |env| {
                let manager = Arc::clone(&manager);
                let ctx = Arc::clone(&ctx);
                async move {
                    if let Payload::SystemSetModeRequest { mode, sid } = env.payload {
                        match manager.transition(&ctx, mode).await {
                            Ok(()) => {
                                ctx.emit(Payload::CliResponse {
                                    success: true,
                                    message: format!("mode set to {mode:?}"),
                                    data: None,
                                    code: None,
                                    field: None,
                                    sid,
                                })
                                .await?;
                            }
                            Err(e) => {
                                ctx.emit_status(LifecycleState::Running, &e.to_string(), Severity::Warning).await?;
                                ctx.emit(Payload::CliResponse {
                                    success: false,
                                    message: e.to_string(),
                                    data: None,
                                    code: Some("invalid_mode_transition".to_string()),
                                    field: Some("mode".to_string()),
                                    sid,
                                })
                                .await?;
                            }
                        }
                    }
                    Ok(())
                }
            })
            .await?;
        }

        ctx.answer_status_requests().await?;
        ctx.start_heartbeat();
        self.transition(&ctx, Mode::Idle).await?;
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
    use tokio_util::sync::CancellationToken;

    fn ctx_for() -> Arc<ServiceContext> {
        let bus = EventBus::new(Duration::from_millis(100));
        ServiceContext::new("mode_manager", bus, Arc::new(CantinaConfig::default()), CancellationToken::new())
    }

    #[tokio::test]
    async fn startup_transitions_to_idle_on_start() {
        let ctx = ctx_for();
        let manager = ModeManager::new();
        Arc::clone(&manager).start(Arc::clone(&ctx)).await.unwrap();
        assert_eq!(*manager.current.lock().await, Mode::Idle);
    }

    #[tokio::test]
    async fn transition_into_startup_is_rejected() {
        assert!(ModeManager::validate(Mode::Startup).is_err());
        assert!(ModeManager::validate(Mode::Ambient).is_ok());
    }

    #[tokio::test]
    async fn set_mode_request_drives_full_sequence() {
        let ctx = ctx_for();
        let manager = ModeManager::new();
        Arc::clone(&manager).start(Arc::clone(&ctx)).await.unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        ctx.bus
            .subscribe(
                Topic::ModeTransitionComplete,
                "watcher",
                crate::bus::handler_fn("watcher", move |env| {
                    let seen = Arc::clone(&seen2);
                    async move {
                        if let Payload::ModeTransitionComplete { to } = env.payload {
                            seen.lock().await.push(to);
                        }
                        Ok(())
                    }
                }),
            )
            .await
            .unwrap();

        ctx.emit(Payload::SystemSetModeRequest { mode: Mode::Interactive, sid: None }).await.unwrap();
        assert_eq!(seen.lock().await.clone(), vec![Mode::Interactive]);
        assert_eq!(*manager.current.lock().await, Mode::Interactive);
    }
}
