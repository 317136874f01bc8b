//! Line-based CLI front end (§6.4). Reads whitespace-separated commands
//! from stdin, one per line, and forwards them to the Command Dispatcher
//! over the bus exactly as the Web Bridge's `command` channel does.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use cantina_proto::{LifecycleState, Payload, Severity, Source, Topic};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::service::{Service, ServiceContext};

pub struct Cli;

impl Cli {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

#[async_trait]
impl Service for Cli {
    fn name(&self) -> &'static str {
        "cli"
    }

    async fn start(self: Arc<Self>, ctx: Arc<ServiceContext>) -> Result<()> {
        ctx.emit_status(LifecycleState::Starting, "reading stdin", Severity::Info).await?;

        {
            let ctx = Arc::clone(&ctx);
            ctx.subscribe(Topic::CliResponse, move |env| {
                async move {
                    if let Payload::CliResponse { success, message, sid: None, .. } = env.payload {
                        if success {
                            println!("ok: {message}");
                        } else {
                            eprintln!("error: {message}");
                        }
                    }
                    Ok(())
                }
            })
            .await?;
        }

        let ctx_for_loop = Arc::clone(&ctx);
        ctx.spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                tokio::select! {
                    _ = ctx_for_loop.shutdown.cancelled() => break,
                    line = lines.next_line() => {
                        match line {
                            Ok(Some(line)) => {
                                let trimmed = line.trim();
                                if trimmed.is_empty() {
                                    continue;
                                }
                                if trimmed == "exit" || trimmed == "quit" {
                                    ctx_for_loop.shutdown.cancel();
                                    break;
                                }
                                let _ = ctx_for_loop
                                    .emit(Payload::CliCommand {
                                        raw_input: trimmed.to_string(),
                                        source: Source::Cli,
                                        sid: None,
                                    })
                                    .await;
                            }
                            Ok(None) => break,
                            Err(_) => break,
                        }
                    }
                }
            }
        });

        ctx.answer_status_requests().await?;
        ctx.start_heartbeat();
        ctx.emit_status(LifecycleState::Running, "ready", Severity::Info).await?;
        Ok(())
    }
}
