//! Logging Pipeline (§4.10): a custom `tracing_subscriber::Layer` that
//! shapes every event into `{timestamp, service_name, level, message}`,
//! deduplicates repeats within a rolling window, writes accepted records
//! to a session-stamped file, and re-emits them onto `DASHBOARD_LOG`.
//!
//! The layer itself never touches the bus directly -- `tracing` layers
//! run synchronously on whatever thread emitted the event, and the bus
//! expects async callers. Instead the layer pushes shaped records onto an
//! unbounded channel; [`run_pump`] drains it from an ordinary tokio task
//! once the bus exists.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};

use cantina_proto::{Payload, Topic};
use chrono::Utc;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::bus::EventBus;

/// Targets excluded from the `DASHBOARD_LOG` rebroadcast to avoid
/// feedback loops and drowning the dashboard in transport chatter.
const DEFAULT_EXCLUDED_TARGETS: &[&str] = &["cantina_core::logging", "h2", "hyper", "tungstenite", "tokio_tungstenite"];

#[derive(Debug, Clone)]
pub struct LogRecord {
    pub timestamp: chrono::DateTime<Utc>,
    pub service_name: String,
    pub level: String,
    pub message: String,
}

#[derive(Default)]
struct MessageVisitor {
    message: Option<String>,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{value:?}"));
        }
    }
}

struct DashboardLayer {
    tx: tokio::sync::mpsc::UnboundedSender<LogRecord>,
    excluded_targets: Vec<String>,
}

impl<S: Subscriber> Layer<S> for DashboardLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let target = event.metadata().target();
        if self.excluded_targets.iter().any(|t| target.starts_with(t.as_str())) {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let record = LogRecord {
            timestamp: Utc::now(),
            service_name: target.to_string(),
            level: event.metadata().level().to_string(),
            message: visitor.message.unwrap_or_default(),
        };
        let _ = self.tx.send(record);
    }
}

/// Install the process-wide subscriber: `EnvFilter` (from `log_level` or
/// `RUST_LOG`), a human-readable stdout layer, and the dashboard-feeding
/// layer above. Returns the `tracing-appender` guard (keep alive for the
/// process lifetime) and the receiver [`run_pump`] drains once the bus is
/// available.
pub fn init(log_dir: &Path, log_level: &str) -> anyhow::Result<(WorkerGuard, tokio::sync::mpsc::UnboundedReceiver<LogRecord>)> {
    std::fs::create_dir_all(log_dir)?;
    let session_file = format!("session-{}.log", Utc::now().format("%Y%m%dT%H%M%SZ"));
    let file_appender = tracing_appender::rolling::never(log_dir, session_file);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let dashboard_layer = DashboardLayer {
        tx,
        excluded_targets: DEFAULT_EXCLUDED_TARGETS.iter().map(|s| s.to_string()).collect(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false))
        .with(dashboard_layer)
        .init();

    Ok((guard, rx))
}

struct Dedup {
    window: Duration,
    seen: HashMap<(String, String), Instant>,
}

impl Dedup {
    fn new(window: Duration) -> Self {
        Self { window, seen: HashMap::new() }
    }

    /// Returns `true` if this `(service_name, message)` pair has not been
    /// seen within the rolling window -- i.e. it should be accepted.
    fn admit(&mut self, service_name: &str, message: &str) -> bool {
        let key = (service_name.to_string(), message.to_string());
        let now = Instant::now();
        if let Some(last) = self.seen.get(&key) {
            if now.duration_since(*last) < self.window {
                return false;
            }
        }
        self.seen.insert(key, now);
        self.seen.retain(|_, seen_at| now.duration_since(*seen_at) < self.window);
        true
    }
}

/// Drain `rx`, deduplicate, and emit surviving records onto
/// `DASHBOARD_LOG`. Runs for the life of the process; intended to be
/// spawned once the bus is constructed.
pub async fn run_pump(bus: std::sync::Arc<EventBus>, mut rx: tokio::sync::mpsc::UnboundedReceiver<LogRecord>, dedup_window: Duration) {
    let dedup = StdMutex::new(Dedup::new(dedup_window));
    while let Some(record) = rx.recv().await {
        if !dedup.lock().unwrap().admit(&record.service_name, &record.message) {
            continue;
        }
        let envelope = cantina_proto::Envelope::new(
            "logging_pipeline",
            Payload::DashboardLog {
                timestamp: record.timestamp,
                service_name: record.service_name,
                level: record.level,
                message: record.message,
            },
        );
        debug_assert_eq!(envelope.topic, Topic::DashboardLog);
        let _ = bus.emit(envelope).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_rejects_repeat_within_window() {
        let mut dedup = Dedup::new(Duration::from_secs(30));
        assert!(dedup.admit("brain", "hello"));
        assert!(!dedup.admit("brain", "hello"));
    }

    #[test]
    fn dedup_distinguishes_by_service_name() {
        let mut dedup = Dedup::new(Duration::from_secs(30));
        assert!(dedup.admit("brain", "hello"));
        assert!(dedup.admit("dispatcher", "hello"));
    }

    #[test]
    fn dedup_admits_after_window_elapses() {
        let mut dedup = Dedup::new(Duration::from_millis(1));
        assert!(dedup.admit("brain", "hello"));
        std::thread::sleep(Duration::from_millis(5));
        assert!(dedup.admit("brain", "hello"));
    }
}
