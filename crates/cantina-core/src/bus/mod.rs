//! The in-process publish/subscribe event bus (§4.1).
//!
//! `emit` is synchronous from the caller's view: it returns once every
//! subscriber has been invoked (or, for a coalesced throttled subscriber,
//! scheduled). Intra-topic ordering across concurrent emitters is
//! guaranteed by a per-topic lock held for the duration of delivery.

pub mod throttle;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cantina_proto::{BusError, Envelope, Topic};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};
use uuid::Uuid;

pub use throttle::{HandlerFuture, ThrottleMode, ThrottleState};

/// A subscriber callback. Returns nothing (errors are logged inside the
/// closure, matching the bus's error-isolation contract); handlers never
/// get to veto or observe sibling subscribers.
pub type Handler = Arc<dyn Fn(Envelope) -> HandlerFuture + Send + Sync>;

struct Subscription {
    id: Uuid,
    service_name: String,
    handler: Handler,
    throttle: Option<Arc<ThrottleState>>,
}

#[derive(Default)]
struct TopicState {
    subscribers: Vec<Subscription>,
    /// Retained sticky payloads, one per origin service, in first-seen
    /// order.
    sticky: Vec<(String, cantina_proto::Payload)>,
}

/// A live subscription, used to unsubscribe.
#[derive(Clone, Copy, Debug)]
pub struct SubscriptionHandle {
    pub topic: Topic,
    pub id: Uuid,
}

pub struct EventBus {
    topics: DashMap<Topic, TopicState>,
    order_locks: DashMap<Topic, Arc<Mutex<()>>>,
    slow_handler_warn: Duration,
    emitted_count: AtomicU64,
}

impl EventBus {
    pub fn new(slow_handler_warn: Duration) -> Arc<Self> {
        Arc::new(Self {
            topics: DashMap::new(),
            order_locks: DashMap::new(),
            slow_handler_warn,
            emitted_count: AtomicU64::new(0),
        })
    }

    fn order_lock(&self, topic: Topic) -> Arc<Mutex<()>> {
        Arc::clone(
            self.order_locks
                .entry(topic)
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Register a handler for `topic`. Rejects a second subscriber on a
    /// command-kind topic (§4.5, §8.6, §8.8). If `topic` is sticky and any
    /// payload has already been retained, the new subscriber is replayed
    /// every retained value, in origin order, before this call returns
    /// (§8.3, §8.6).
    pub async fn subscribe(
        &self,
        topic: Topic,
        service_name: impl Into<String>,
        handler: Handler,
    ) -> Result<SubscriptionHandle, BusError> {
        self.subscribe_with_throttle(topic, service_name, handler, None).await
    }

    pub async fn subscribe_with_throttle(
        &self,
        topic: Topic,
        service_name: impl Into<String>,
        handler: Handler,
        throttle: Option<ThrottleMode>,
    ) -> Result<SubscriptionHandle, BusError> {
        let service_name = service_name.into();
        let id = Uuid::new_v4();

        let replay: Vec<cantina_proto::Payload> = {
            let mut entry = self.topics.entry(topic).or_default();
            if topic.is_command() && !entry.subscribers.is_empty() {
                return Err(BusError::DuplicateCommandSubscription {
                    topic: topic.as_str().to_string(),
                });
            }
            entry.subscribers.push(Subscription {
                id,
                service_name,
                handler: Arc::clone(&handler),
                throttle: throttle.map(ThrottleState::new),
            });
            if topic.is_sticky() {
                entry.sticky.iter().map(|(_, p)| p.clone()).collect()
            } else {
                Vec::new()
            }
        };

        for payload in replay {
            let envelope = Envelope::new("bus-replay", payload);
            handler(envelope).await;
        }

        Ok(SubscriptionHandle { topic, id })
    }

    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        if let Some(mut entry) = self.topics.get_mut(&handle.topic) {
            entry.subscribers.retain(|s| s.id != handle.id);
        }
    }

    /// Remove every subscription owned by `service_name`, across all
    /// topics. Called by a service's `stop()`.
    pub fn unsubscribe_all(&self, service_name: &str) {
        for mut entry in self.topics.iter_mut() {
            entry.subscribers.retain(|s| s.service_name != service_name);
        }
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.topics.get(&topic).map(|e| e.subscribers.len()).unwrap_or(0)
    }

    /// Publish `envelope`. Invariant 1: the envelope's topic must match
    /// the payload's own schema tag, or the bus rejects it outright.
    pub async fn emit(&self, envelope: Envelope) -> Result<(), BusError> {
        if envelope.topic != envelope.payload.topic() {
            return Err(BusError::PublishValidation {
                topic: envelope.topic.as_str().to_string(),
                reason: format!(
                    "envelope topic {:?} does not match payload schema {:?}",
                    envelope.topic,
                    envelope.payload.topic()
                ),
            });
        }

        let lock = self.order_lock(envelope.topic);
        let _guard = lock.lock().await;

        if envelope.topic.is_sticky() {
            let mut entry = self.topics.entry(envelope.topic).or_default();
            let origin = envelope.service_name.clone();
            if let Some(slot) = entry.sticky.iter_mut().find(|(svc, _)| *svc == origin) {
                slot.1 = envelope.payload.clone();
            } else {
                entry.sticky.push((origin, envelope.payload.clone()));
            }
        }

        // Snapshot subscribers so a handler that subscribes/unsubscribes
        // mid-delivery cannot deadlock on `topics`.
        let subscribers: Vec<(Handler, Option<Arc<ThrottleState>>, String)> = self
            .topics
            .get(&envelope.topic)
            .map(|e| {
                e.subscribers
                    .iter()
                    .map(|s| (Arc::clone(&s.handler), s.throttle.clone(), s.service_name.clone()))
                    .collect()
            })
            .unwrap_or_default();

        for (handler, throttle, owner) in subscribers {
            match &throttle {
                None => self.invoke(&handler, envelope.clone(), &owner).await,
                Some(state) => match state.admit(&envelope).await {
                    throttle::Decision::Deliver => self.invoke(&handler, envelope.clone(), &owner).await,
                    throttle::Decision::Drop => {}
                    throttle::Decision::Coalesce => {
                        let handler = Arc::clone(&handler);
                        state.schedule_flush(move |env| handler(env));
                    }
                },
            }
        }

        self.emitted_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn invoke(&self, handler: &Handler, envelope: Envelope, owner: &str) {
        let started = Instant::now();
        handler(envelope).await;
        let elapsed = started.elapsed();
        if elapsed > self.slow_handler_warn {
            warn!(
                service = owner,
                elapsed_ms = elapsed.as_millis() as u64,
                "handler exceeded slow-handler threshold"
            );
        } else {
            debug!(service = owner, elapsed_ms = elapsed.as_millis() as u64, "handler completed");
        }
    }

    pub fn total_emitted(&self) -> u64 {
        self.emitted_count.load(Ordering::Relaxed)
    }
}

/// Wrap a fallible async closure as a [`Handler`], logging (rather than
/// propagating) any error it returns — the bus's error-isolation contract
/// (§4.1).
pub fn handler_fn<F, Fut>(owner: &'static str, f: F) -> Handler
where
    F: Fn(Envelope) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |envelope: Envelope| {
        let fut = f(envelope);
        Box::pin(async move {
            if let Err(e) = fut.await {
                error!(service = owner, error = %e, "handler failed");
            }
        })
    })
}
