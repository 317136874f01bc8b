//! Shared service lifecycle scaffolding (§4.2, §5).
//!
//! Every long-running subsystem (memory store, dispatcher, timeline
//! executor, brain, web bridge, mode manager) is a [`Service`]. `ServiceContext`
//! gives each one its bus handle, configuration, subscription bookkeeping,
//! and a cancellation token, mirroring the spawn/shutdown-token wiring the
//! binary's entry point already does for the web server (see `main.rs`)
//! but generalized so nine subsystems don't each hand-roll it.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use cantina_conf::CantinaConfig;
use cantina_proto::{Envelope, LifecycleState, Payload, Severity, Topic};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bus::{handler_fn, EventBus, SubscriptionHandle};

/// Everything a service needs to participate in the runtime: the bus, the
/// resolved configuration, and a token that is cancelled on shutdown.
pub struct ServiceContext {
    pub name: &'static str,
    pub bus: Arc<EventBus>,
    pub config: Arc<CantinaConfig>,
    pub shutdown: CancellationToken,
    started_at: Instant,
    subscriptions: std::sync::Mutex<Vec<SubscriptionHandle>>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl ServiceContext {
    pub fn new(name: &'static str, bus: Arc<EventBus>, config: Arc<CantinaConfig>, shutdown: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            name,
            bus,
            config,
            shutdown,
            started_at: Instant::now(),
            subscriptions: std::sync::Mutex::new(Vec::new()),
            tasks: std::sync::Mutex::new(Vec::new()),
        })
    }

    pub fn uptime_secs(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }

    /// Subscribe to `topic`, tracking the handle for this service's
    /// `stop()` to tear down.
    pub async fn subscribe<F, Fut>(self: &Arc<Self>, topic: Topic, handler: F) -> Result<()>
    where
        F: Fn(Envelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let handle = self
            .bus
            .subscribe(topic, self.name, handler_fn(self.name, handler))
            .await?;
        self.subscriptions.lock().unwrap().push(handle);
        Ok(())
    }

    /// Spawn a background task owned by this service. Tracked so `stop()`
    /// can await it under the T_stop grace period (§5).
    pub fn spawn(self: &Arc<Self>, fut: impl Future<Output = ()> + Send + 'static) {
        let handle = tokio::spawn(fut);
        self.tasks.lock().unwrap().push(handle);
    }

    pub async fn emit(&self, payload: Payload) -> Result<()> {
        self.bus.emit(Envelope::new(self.name, payload)).await?;
        Ok(())
    }

    pub async fn emit_status(&self, status: LifecycleState, message: impl Into<String>, severity: Severity) -> Result<()> {
        self.emit(Payload::ServiceStatus {
            service_name: self.name.to_string(),
            status,
            uptime_secs: self.uptime_secs(),
            message: message.into(),
            severity,
        })
        .await
    }

    /// Spawn the periodic heartbeat task (§3 invariant 9): a RUNNING
    /// `ServiceStatus` every `heartbeat_interval_secs`.
    pub fn start_heartbeat(self: &Arc<Self>) {
        let ctx = Arc::clone(self);
        let interval = std::time::Duration::from_secs(ctx.config.bootstrap.timeouts.heartbeat_interval_secs);
        self.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                tokio::select! {
                    _ = ctx.shutdown.cancelled() => return,
                    _ = ticker.tick() => {
                        if let Err(e) = ctx.emit_status(LifecycleState::Running, "heartbeat", Severity::Info).await {
                            warn!(service = ctx.name, error = %e, "failed to emit heartbeat");
                        }
                    }
                }
            }
        });
    }

    /// Register this service to answer bus-wide `STATUS_REQUEST` polls
    /// used by late subscribers bootstrapping current state (§4.2).
    pub async fn answer_status_requests(self: &Arc<Self>) -> Result<()> {
        let ctx = Arc::clone(self);
        self.subscribe(Topic::StatusRequest, move |_env| {
            let ctx = Arc::clone(&ctx);
            async move {
                ctx.emit_status(LifecycleState::Running, "status request", Severity::Info).await
            }
        })
        .await
    }

    /// Cross-thread bridge: a callback running on a dedicated OS thread
    /// (audio capture, serial read) posts a payload back onto the
    /// cooperative scheduler. A single crossing per payload, bounded by
    /// `thread_crossing_post_ms` (§5).
    pub fn post_from_thread(self: &Arc<Self>, payload: Payload) {
        let ctx = Arc::clone(self);
        let timeout = std::time::Duration::from_millis(ctx.config.bootstrap.timeouts.thread_crossing_post_ms);
        self.spawn(async move {
            match tokio::time::timeout(timeout, ctx.emit(payload)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(service = ctx.name, error = %e, "post_from_thread emit failed"),
                Err(_) => warn!(service = ctx.name, "post_from_thread crossing exceeded {:?}", timeout),
            }
        });
    }

    /// Drive a service through the full `stop()` contract in §5: mark
    /// STOPPING, cancel the shutdown token, wait for owned tasks under a
    /// bounded grace period, run the service's own `stop()` hook, release
    /// bus subscriptions, then mark STOPPED.
    pub async fn stop_service(self: &Arc<Self>, service: Arc<dyn Service>) {
        let _ = self.emit_status(LifecycleState::Stopping, "stopping", Severity::Info).await;
        self.shutdown.cancel();

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock().unwrap());
        let grace = std::time::Duration::from_secs(self.config.bootstrap.timeouts.stop_grace_secs);
        let joined = tokio::time::timeout(grace, futures::future::join_all(tasks)).await;
        if joined.is_err() {
            warn!(service = self.name, "owned tasks did not finish within stop grace period");
        }

        if let Err(e) = service.stop(Arc::clone(self)).await {
            warn!(service = self.name, error = %e, "service stop() hook failed");
        }

        for handle in std::mem::take(&mut *self.subscriptions.lock().unwrap()) {
            self.bus.unsubscribe(handle);
        }
        self.bus.unsubscribe_all(self.name);

        let _ = self.emit_status(LifecycleState::Stopped, "stopped", Severity::Info).await;
    }
}

/// A long-running subsystem participating in the event-driven runtime.
/// Implementors own no direct references to each other; all coordination
/// happens through the bus via `ctx`.
#[async_trait::async_trait]
pub trait Service: Send + Sync {
    fn name(&self) -> &'static str;

    /// Subscribe to topics, spawn background work, emit the initial
    /// STARTING/RUNNING status pair. Must not block past service startup.
    async fn start(self: Arc<Self>, ctx: Arc<ServiceContext>) -> Result<()>;

    /// Optional hook for configuration hot-reload; default is a no-op.
    async fn on_config_change(self: Arc<Self>, _ctx: Arc<ServiceContext>, _config: Arc<CantinaConfig>) -> Result<()> {
        Ok(())
    }

    /// Optional release hook invoked by [`ServiceContext::stop_service`],
    /// after owned tasks are cancelled/awaited but before subscriptions are
    /// released. Default is a no-op.
    async fn stop(self: Arc<Self>, _ctx: Arc<ServiceContext>) -> Result<()> {
        Ok(())
    }
}

/// Tracks how many services are currently registered, purely for the
/// periodic stats log line (SPEC_FULL.md §C).
pub static RUNNING_SERVICE_COUNT: AtomicU64 = AtomicU64::new(0);

pub fn note_service_started() {
    RUNNING_SERVICE_COUNT.fetch_add(1, Ordering::Relaxed);
}

pub fn note_service_stopped() {
    RUNNING_SERVICE_COUNT.fetch_sub(1, Ordering::Relaxed);
}
