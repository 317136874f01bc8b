//! Memory Store (§4.4): a single service owning a keyed state record,
//! accessed exclusively through bus events.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use cantina_conf::CantinaConfig;
use cantina_proto::{LifecycleState, Payload, Severity, Topic};
use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::service::{Service, ServiceContext};

struct WaitPredicate {
    key: String,
    /// A predicate is satisfied when the stored value equals `condition`.
    /// The spec leaves the exact condition language open; equality is the
    /// simplest form that covers "wait until key == value".
    condition: Value,
    responder: oneshot::Sender<()>,
}

#[derive(Default)]
struct State {
    values: HashMap<String, Value>,
    waiters: Vec<WaitPredicate>,
    dirty: bool,
}

pub struct MemoryStore {
    path: PathBuf,
    debounce: Duration,
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new(path: PathBuf, debounce: Duration) -> Arc<Self> {
        Arc::new(Self {
            path,
            debounce,
            state: Mutex::new(State::default()),
        })
    }

    fn load_from_disk(&self) -> HashMap<String, Value> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_default(),
            Err(_) => HashMap::new(),
        }
    }

    /// Atomic write-temp + rename, as required by §4.4.
    async fn persist(&self, values: &HashMap<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp_path = self.path.with_extension("json.tmp");
        let contents = serde_json::to_string_pretty(values)?;
        tokio::fs::write(&tmp_path, contents).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }

    async fn set(&self, ctx: &Arc<ServiceContext>, key: String, value: Value) -> Result<()> {
        let previous = {
            let mut state = self.state.lock().await;
            let previous = state.values.insert(key.clone(), value.clone());
            state.dirty = true;
            previous
        };

        ctx.emit(Payload::MemoryUpdated {
            key: key.clone(),
            value: value.clone(),
            previous,
        })
        .await?;

        self.wake_waiters(ctx, &key, &value).await?;
        self.schedule_persist(ctx);
        Ok(())
    }

    async fn wake_waiters(&self, ctx: &Arc<ServiceContext>, key: &str, value: &Value) -> Result<()> {
        let mut state = self.state.lock().await;
        let mut remaining = Vec::new();
        let mut resolved = Vec::new();
        for waiter in std::mem::take(&mut state.waiters) {
            if waiter.key == key && waiter.condition == *value {
                resolved.push(waiter);
            } else {
                remaining.push(waiter);
            }
        }
        state.waiters = remaining;
        drop(state);

        for waiter in resolved {
            let _ = waiter.responder.send(());
        }
        let _ = ctx;
        Ok(())
    }

    fn schedule_persist(self: &Arc<Self>, ctx: &Arc<ServiceContext>) {
        let store = Arc::clone(self);
        let debounce = self.debounce;
        ctx.spawn(async move {
            tokio::time::sleep(debounce).await;
            let snapshot = {
                let mut state = store.state.lock().await;
                if !state.dirty {
                    return;
                }
                state.dirty = false;
                state.values.clone()
            };
            if let Err(e) = store.persist(&snapshot).await {
                error!(error = %e, "memory store persistence failed");
            }
        });
    }

    async fn mirror_domain_event(&self, ctx: &Arc<ServiceContext>, key: &str, value: Value) -> Result<()> {
        self.set(ctx, key.to_string(), value).await
    }
}

#[async_trait]
impl Service for MemoryStore {
    fn name(&self) -> &'static str {
        "memory_store"
    }

    /// Forces a synchronous flush rather than trusting the debounced
    /// persist task, which races the shutdown grace period and may get
    /// cut off mid-sleep.
    async fn stop(self: Arc<Self>, _ctx: Arc<ServiceContext>) -> Result<()> {
        let snapshot = {
            let mut state = self.state.lock().await;
            state.dirty = false;
            state.values.clone()
        };
        self.persist(&snapshot).await?;
        info!("memory store flushed on stop");
        Ok(())
    }

    async fn start(self: Arc<Self>, ctx: Arc<ServiceContext>) -> Result<()> {
        ctx.emit_status(LifecycleState::Starting, "loading state", Severity::Info).await?;

        let loaded = self.load_from_disk();
        {
            let mut state = self.state.lock().await;
            state.values = loaded.clone();
        }

        let store = Arc::clone(&self);
        {
            let ctx = Arc::clone(&ctx);
            ctx.subscribe(Topic::MemoryGet, move |env| {
                let store = Arc::clone(&store);
                let ctx = Arc::clone(&ctx);
                async move {
                    if let Payload::MemoryGet { key, request_id } = env.payload {
                        let value = store.state.lock().await.values.get(&key).cloned();
                        let present = value.is_some();
                        ctx.emit(Payload::MemoryValue {
                            key,
                            value,
                            present,
                            request_id,
                        })
                        .await?;
                    }
                    Ok(())
                }
            })
            .await?;
        }

        let store = Arc::clone(&self);
        {
            let ctx = Arc::clone(&ctx);
            ctx.subscribe(Topic::MemorySet, move |env| {
                let store = Arc::clone(&store);
                let ctx = Arc::clone(&ctx);
                async move {
                    if let Payload::MemorySet { key, value } = env.payload {
                        store.set(&ctx, key, value).await?;
                    }
                    Ok(())
                }
            })
            .await?;
        }

        let store = Arc::clone(&self);
        {
            let ctx = Arc::clone(&ctx);
            ctx.subscribe(Topic::MemoryWait, move |env| {
                let store = Arc::clone(&store);
                let ctx = Arc::clone(&ctx);
                async move {
                    if let Payload::MemoryWait {
                        key,
                        predicate_id,
                        condition,
                    } = env.payload
                    {
                        let already_satisfied = {
                            let state = store.state.lock().await;
                            state.values.get(&key) == Some(&condition)
                        };

                        if already_satisfied {
                            ctx.emit(Payload::MemoryWaitResolved { predicate_id, value: condition }).await?;
                            return Ok(());
                        }

                        let (tx, rx) = oneshot::channel();
                        {
                            let mut state = store.state.lock().await;
                            state.waiters.push(WaitPredicate {
                                key: key.clone(),
                                condition: condition.clone(),
                                responder: tx,
                            });
                        }

                        let timeout = Duration::from_secs(ctx.config.bootstrap.timeouts.memory_wait_secs);
                        let store2 = Arc::clone(&store);
                        let ctx2 = Arc::clone(&ctx);
                        ctx.spawn(async move {
                            match tokio::time::timeout(timeout, rx).await {
                                Ok(_) => {
                                    let value = store2.state.lock().await.values.get(&key).cloned().unwrap_or(Value::Null);
                                    if let Err(e) = ctx2.emit(Payload::MemoryWaitResolved { predicate_id, value }).await {
                                        warn!(error = %e, "failed to emit MEMORY_WAIT_RESOLVED");
                                    }
                                }
                                Err(_) => {
                                    if let Err(e) = ctx2.emit(Payload::MemoryWaitTimeout { predicate_id }).await {
                                        warn!(error = %e, "failed to emit MEMORY_WAIT_TIMEOUT");
                                    }
                                }
                            }
                        });
                    }
                    Ok(())
                }
            })
            .await?;
        }

        // Domain events mirrored into well-known keys (§4.4).
        let store = Arc::clone(&self);
        {
            let ctx = Arc::clone(&ctx);
            ctx.subscribe(Topic::MusicPlaybackStarted, move |env| {
                let store = Arc::clone(&store);
                let ctx = Arc::clone(&ctx);
                async move {
                    if let Payload::MusicPlaybackStarted { track, .. } = env.payload {
                        store.mirror_domain_event(&ctx, "music_playing", Value::Bool(true)).await?;
                        store
                            .mirror_domain_event(&ctx, "current_track", serde_json::to_value(&track)?)
                            .await?;
                    }
                    Ok(())
                }
            })
            .await?;
        }

        let store = Arc::clone(&self);
        {
            let ctx = Arc::clone(&ctx);
            ctx.subscribe(Topic::MusicPlaybackStopped, move |_env| {
                let store = Arc::clone(&store);
                let ctx = Arc::clone(&ctx);
                async move {
                    store.mirror_domain_event(&ctx, "music_playing", Value::Bool(false)).await?;
                    Ok(())
                }
            })
            .await?;
        }

        let store = Arc::clone(&self);
        {
            let ctx = Arc::clone(&ctx);
            ctx.subscribe(Topic::SystemModeChange, move |env| {
                let store = Arc::clone(&store);
                let ctx = Arc::clone(&ctx);
                async move {
                    if let Payload::SystemModeChange { mode, .. } = env.payload {
                        store.mirror_domain_event(&ctx, "mode", serde_json::to_value(mode)?).await?;
                    }
                    Ok(())
                }
            })
            .await?;
        }

        let store = Arc::clone(&self);
        {
            let ctx = Arc::clone(&ctx);
            ctx.subscribe(Topic::DjModeChanged, move |env| {
                let store = Arc::clone(&store);
                let ctx = Arc::clone(&ctx);
                async move {
                    if let Payload::DjModeChanged { active, .. } = env.payload {
                        store.mirror_domain_event(&ctx, "dj_mode_active", Value::Bool(active)).await?;
                    }
                    Ok(())
                }
            })
            .await?;
        }

        ctx.answer_status_requests().await?;
        ctx.start_heartbeat();

        // Startup load emits MEMORY_UPDATED for each loaded key (§4.4).
        for (key, value) in loaded {
            ctx.emit(Payload::MemoryUpdated {
                key,
                value,
                previous: None,
            })
            .await?;
        }

        debug!(path = %self.path.display(), "memory store loaded");
        ctx.emit_status(LifecycleState::Running, "ready", Severity::Info).await?;
        info!("memory store started");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use tokio_util::sync::CancellationToken;

    fn ctx_for(config: CantinaConfig) -> Arc<ServiceContext> {
        let bus = EventBus::new(Duration::from_millis(100));
        ServiceContext::new("memory_store", bus, Arc::new(config), CancellationToken::new())
    }

    #[tokio::test]
    async fn get_on_unknown_key_reports_not_present() {
        let tmp = tempfile::tempdir().unwrap();
        let store = MemoryStore::new(tmp.path().join("memory.json"), Duration::from_millis(10));
        let ctx = ctx_for(CantinaConfig::default());
        Arc::clone(&store).start(Arc::clone(&ctx)).await.unwrap();

        let seen = Arc::new(Mutex::new(None));
        let seen2 = Arc::clone(&seen);
        ctx.bus
            .subscribe(
                Topic::MemoryValue,
                "caller",
                crate::bus::handler_fn("caller", move |env| {
                    let seen = Arc::clone(&seen2);
                    async move {
                        if let Payload::MemoryValue { present, .. } = env.payload {
                            *seen.lock().await = Some(present);
                        }
                        Ok(())
                    }
                }),
            )
            .await
            .unwrap();

        ctx.emit(Payload::MemoryGet {
            key: "nonexistent".into(),
            request_id: Uuid::new_v4(),
        })
        .await
        .unwrap();

        assert_eq!(*seen.lock().await, Some(false));
    }

    #[tokio::test]
    async fn set_then_get_round_trips_value() {
        let tmp = tempfile::tempdir().unwrap();
        let store = MemoryStore::new(tmp.path().join("memory.json"), Duration::from_millis(10));
        let ctx = ctx_for(CantinaConfig::default());
        Arc::clone(&store).start(Arc::clone(&ctx)).await.unwrap();

        ctx.emit(Payload::MemorySet {
            key: "dj_mode_active".into(),
            value: Value::Bool(true),
        })
        .await
        .unwrap();

        let value = store.state.lock().await.values.get("dj_mode_active").cloned();
        assert_eq!(value, Some(Value::Bool(true)));
    }

    #[tokio::test]
    async fn wait_resolves_immediately_if_already_satisfied() {
        let tmp = tempfile::tempdir().unwrap();
        let store = MemoryStore::new(tmp.path().join("memory.json"), Duration::from_millis(10));
        let ctx = ctx_for(CantinaConfig::default());
        Arc::clone(&store).start(Arc::clone(&ctx)).await.unwrap();

        ctx.emit(Payload::MemorySet {
            key: "mode".into(),
            value: Value::String("IDLE".into()),
        })
        .await
        .unwrap();

        let resolved = Arc::new(Mutex::new(false));
        let resolved2 = Arc::clone(&resolved);
        ctx.bus
            .subscribe(
                Topic::MemoryWaitResolved,
                "waiter",
                crate::bus::handler_fn("waiter", move |_env| {
                    let resolved = Arc::clone(&resolved2);
                    async move {
                        *resolved.lock().await = true;
                        Ok(())
                    }
                }),
            )
            .await
            .unwrap();

        ctx.emit(Payload::MemoryWait {
            key: "mode".into(),
            predicate_id: Uuid::new_v4(),
            condition: Value::String("IDLE".into()),
        })
        .await
        .unwrap();

        assert!(*resolved.lock().await);
    }

    #[tokio::test]
    async fn stop_flushes_pending_state_synchronously() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("memory.json");
        // Debounce longer than this test is willing to wait, so only an
        // explicit flush on stop can get the value onto disk in time.
        let store = MemoryStore::new(path.clone(), Duration::from_secs(60));
        let ctx = ctx_for(CantinaConfig::default());
        Arc::clone(&store).start(Arc::clone(&ctx)).await.unwrap();

        ctx.emit(Payload::MemorySet {
            key: "dj_mode_active".into(),
            value: Value::Bool(true),
        })
        .await
        .unwrap();

        store.stop(Arc::clone(&ctx)).await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let persisted: HashMap<String, Value> = serde_json::from_str(&contents).unwrap();
        assert_eq!(persisted.get("dj_mode_active"), Some(&Value::Bool(true)));
    }
}
