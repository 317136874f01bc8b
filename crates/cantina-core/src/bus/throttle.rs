//! Per-(topic, subscriber) rate-limit hooks (§4.1, §5).
//!
//! Two bounded modes sit alongside the unbounded default: tail-drop (drop
//! anything past the per-second budget) and coalesce-latest (keep only
//! the newest payload and deliver it once the window reopens). Both are
//! windowed over a rolling one-second bucket, reset lazily on the first
//! call after the window elapses.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cantina_proto::Envelope;
use tokio::sync::Mutex;
use tracing::trace;

pub type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThrottleMode {
    Unbounded,
    TailDrop { per_second: u32 },
    CoalesceLatest { per_second: u32 },
}

struct Window {
    started_at: Instant,
    count: u32,
}

impl Window {
    fn fresh() -> Self {
        Self {
            started_at: Instant::now(),
            count: 0,
        }
    }
}

/// Mutable throttle state for one (topic, subscriber) pair.
pub struct ThrottleState {
    mode: ThrottleMode,
    window: Mutex<Window>,
    pending: Mutex<Option<Envelope>>,
    flush_scheduled: AtomicBool,
}

/// What the bus should do with an envelope about to be delivered to a
/// throttled subscriber.
pub enum Decision {
    Deliver,
    Drop,
    /// Don't deliver now; the envelope replaces whatever was pending and
    /// will be delivered when the window reopens.
    Coalesce,
}

impl ThrottleState {
    pub fn new(mode: ThrottleMode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            window: Mutex::new(Window::fresh()),
            pending: Mutex::new(None),
            flush_scheduled: AtomicBool::new(false),
        })
    }

    pub fn mode(&self) -> ThrottleMode {
        self.mode
    }

    /// Decide whether `envelope` should be delivered now, dropped, or
    /// coalesced into the pending slot for delivery at the next window.
    pub async fn admit(&self, envelope: &Envelope) -> Decision {
        let per_second = match self.mode {
            ThrottleMode::Unbounded => return Decision::Deliver,
            ThrottleMode::TailDrop { per_second } | ThrottleMode::CoalesceLatest { per_second } => {
                per_second
            }
        };

        let mut window = self.window.lock().await;
        if window.started_at.elapsed() >= Duration::from_secs(1) {
            *window = Window::fresh();
        }

        if window.count < per_second {
            window.count += 1;
            return Decision::Deliver;
        }

        match self.mode {
            ThrottleMode::TailDrop { .. } => {
                trace!("tail-drop throttle: dropping envelope on {}", envelope.topic);
                Decision::Drop
            }
            ThrottleMode::CoalesceLatest { .. } => {
                *self.pending.lock().await = Some(envelope.clone());
                Decision::Coalesce
            }
            ThrottleMode::Unbounded => unreachable!(),
        }
    }

    /// Take the coalesced payload, if any, clearing the slot. Called by a
    /// background flush task scheduled once per window.
    pub async fn take_pending(&self) -> Option<Envelope> {
        self.pending.lock().await.take()
    }

    /// Schedule a one-shot flush of the coalesced payload at the next
    /// window boundary, unless one is already pending. `deliver` is
    /// invoked with the pending envelope, if any, once the window closes.
    pub fn schedule_flush(self: &Arc<Self>, deliver: impl FnOnce(Envelope) -> HandlerFuture + Send + 'static) {
        if self.flush_scheduled.swap(true, Ordering::SeqCst) {
            return;
        }
        let state = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            if let Some(envelope) = state.take_pending().await {
                deliver(envelope).await;
            }
            state.flush_scheduled.store(false, Ordering::SeqCst);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cantina_proto::Payload;

    fn envelope() -> Envelope {
        Envelope::new("test", Payload::TrackStopped {})
    }

    #[tokio::test]
    async fn unbounded_always_delivers() {
        let state = ThrottleState::new(ThrottleMode::Unbounded);
        for _ in 0..100 {
            assert!(matches!(state.admit(&envelope()).await, Decision::Deliver));
        }
    }

    #[tokio::test]
    async fn tail_drop_drops_after_budget() {
        let state = ThrottleState::new(ThrottleMode::TailDrop { per_second: 2 });
        assert!(matches!(state.admit(&envelope()).await, Decision::Deliver));
        assert!(matches!(state.admit(&envelope()).await, Decision::Deliver));
        assert!(matches!(state.admit(&envelope()).await, Decision::Drop));
    }

    #[tokio::test]
    async fn coalesce_latest_keeps_newest_pending() {
        let state = ThrottleState::new(ThrottleMode::CoalesceLatest { per_second: 1 });
        assert!(matches!(state.admit(&envelope()).await, Decision::Deliver));
        assert!(matches!(state.admit(&envelope()).await, Decision::Coalesce));
        assert!(state.take_pending().await.is_some());
        assert!(state.take_pending().await.is_none());
    }
}
