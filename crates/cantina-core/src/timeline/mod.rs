//! Timeline Executor (§4.6): drives the audio state machine from
//! declarative `Plan`s, enforcing layer preemption and duck/crossfade
//! ordering.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use cantina_proto::{Layer, MusicAction, Payload, PlanError, PlanStatus, Plan, PlayMusicTarget, Severity, LifecycleState, Step, Topic};
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::service::{Service, ServiceContext};

/// Registry of in-flight step completion waits, keyed by the id the
/// completion event correlates on (`clip_id`/`step_id`). Generalizes the
/// Memory Store's wait-predicate pattern to the three completion topics
/// the executor awaits.
#[derive(Default)]
struct WaitRegistry {
    waiters: HashMap<Uuid, oneshot::Sender<()>>,
}

impl WaitRegistry {
    fn register(&mut self, id: Uuid) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(id, tx);
        rx
    }

    fn resolve(&mut self, id: Uuid) {
        if let Some(tx) = self.waiters.remove(&id) {
            let _ = tx.send(());
        }
    }
}

struct ActiveLayer {
    plan_id: Uuid,
    cancel: CancellationToken,
    /// The plan's steps, kept so a preempted ambient layer can be replayed
    /// once the foreground/override layer above it clears. Resume restarts
    /// the ambient plan from its first step rather than mid-step -- step
    /// progress isn't tracked per layer, only per running task (§3
    /// lifecycle, §4.6 rule 1).
    steps: Vec<Step>,
    paused_remainder: Option<Vec<Step>>,
    /// Resolved by the running task right after it decides whether it owes
    /// a terminal PLAN_ENDED (and emits one if so). A preempting plan on
    /// this or a layer above it awaits this before emitting its own
    /// PLAN_STARTED, so a preempted plan's terminal event is always
    /// observed before the plan that preempted it starts (§4.6).
    ended_rx: Option<oneshot::Receiver<()>>,
}

#[derive(Default)]
struct LayerTable {
    ambient: Option<ActiveLayer>,
    foreground: Option<ActiveLayer>,
    r#override: Option<ActiveLayer>,
}

impl LayerTable {
    fn slot(&mut self, layer: Layer) -> &mut Option<ActiveLayer> {
        match layer {
            Layer::Ambient => &mut self.ambient,
            Layer::Foreground => &mut self.foreground,
            Layer::Override => &mut self.r#override,
        }
    }
}

pub struct TimelineExecutor {
    layers: Mutex<LayerTable>,
    waits: Mutex<WaitRegistry>,
    music_playing: Mutex<bool>,
    ducked: Mutex<Option<f32>>,
}

impl TimelineExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            layers: Mutex::new(LayerTable::default()),
            waits: Mutex::new(WaitRegistry::default()),
            music_playing: Mutex::new(false),
            ducked: Mutex::new(None),
        })
    }

    async fn await_completion(&self, id: Uuid, timeout: Duration) -> bool {
        let rx = self.waits.lock().await.register(id);
        tokio::time::timeout(timeout, rx).await.is_ok()
    }

    async fn resolve(&self, id: Uuid) {
        self.waits.lock().await.resolve(id);
    }

    /// Preempt according to §3 invariant 3-4 and §4.6 rule set, then start
    /// running `plan` on its layer.
    async fn handle_plan_ready(self: &Arc<Self>, ctx: Arc<ServiceContext>, plan: Plan) -> Result<()> {
        let layer = plan.layer;

        // Cancelling only flips each preempted layer's token; its own
        // running task notices the cancellation, decides whether it owes a
        // terminal PLAN_ENDED, and resolves `ended_rx` right after. Collect
        // those receivers and await them (outside the lock) before this
        // plan's PLAN_STARTED fires, so a preempted plan's terminal event
        // is always observed first (§4.6).
        let waits: Vec<oneshot::Receiver<()>> = {
            let mut layers = self.layers.lock().await;
            let mut waits = Vec::new();
            match layer {
                Layer::Foreground => {
                    if let Some(mut active) = layers.foreground.take() {
                        active.cancel.cancel();
                        waits.extend(active.ended_rx.take());
                    }
                    if let Some(active) = &mut layers.ambient {
                        active.paused_remainder = Some(active.steps.clone());
                        active.cancel.cancel();
                        waits.extend(active.ended_rx.take());
                    }
                }
                Layer::Override => {
                    if let Some(mut active) = layers.r#override.take() {
                        active.cancel.cancel();
                        waits.extend(active.ended_rx.take());
                    }
                    if let Some(mut active) = layers.foreground.take() {
                        active.cancel.cancel();
                        waits.extend(active.ended_rx.take());
                    }
                    if let Some(active) = &mut layers.ambient {
                        active.paused_remainder = Some(active.steps.clone());
                        active.cancel.cancel();
                        waits.extend(active.ended_rx.take());
                    }
                }
                Layer::Ambient => {
                    if let Some(mut active) = layers.ambient.take() {
                        active.cancel.cancel();
                        waits.extend(active.ended_rx.take());
                    }
                }
            }
            waits
        };

        for rx in waits {
            let _ = rx.await;
        }

        let cancel = CancellationToken::new();
        let (ended_tx, ended_rx) = oneshot::channel();
        {
            let mut layers = self.layers.lock().await;
            *layers.slot(layer) = Some(ActiveLayer {
                plan_id: plan.plan_id,
                cancel: cancel.clone(),
                steps: plan.steps.clone(),
                paused_remainder: None,
                ended_rx: Some(ended_rx),
            });
        }

        ctx.emit(Payload::PlanStarted { plan_id: plan.plan_id, layer }).await?;

        self.spawn_plan_run(&ctx, plan.plan_id, layer, plan.steps.clone(), cancel, ended_tx);

        Ok(())
    }

    /// Run `steps` to completion (or cancellation), then settle the plan's
    /// bookkeeping: clear its layer slot unless it was merely paused for a
    /// higher layer, emit the single terminal PLAN_ENDED unless it was
    /// paused, and resolve `ended_tx` so any plan that preempted this one
    /// can proceed. Shared by both a fresh `PlanReady` and an ambient
    /// plan's resume, so a paused-then-resumed ambient plan still gets
    /// exactly one PLAN_ENDED, emitted whenever it actually finishes.
    fn spawn_plan_run(
        self: &Arc<Self>,
        ctx: &Arc<ServiceContext>,
        plan_id: Uuid,
        layer: Layer,
        steps: Vec<Step>,
        cancel: CancellationToken,
        ended_tx: oneshot::Sender<()>,
    ) {
        let executor = Arc::clone(self);
        let ctx2 = Arc::clone(ctx);
        ctx.spawn(async move {
            let result = executor.run_steps(&ctx2, plan_id, &steps, cancel.clone()).await;
            let (status, failed_step_id, reason) = match result {
                Ok(()) if cancel.is_cancelled() => (PlanStatus::Cancelled, None, None),
                Ok(()) => (PlanStatus::Completed, None, None),
                Err(PlanError::StepFailed { step_id, reason }) => (PlanStatus::Failed, Some(step_id), Some(reason)),
                Err(other) => (PlanStatus::Failed, None, Some(other.to_string())),
            };

            let preempted = {
                let mut layers = executor.layers.lock().await;
                // A preempted ambient layer already has its resume steps
                // stashed in `paused_remainder` by the preempting plan;
                // leave the slot in place so `maybe_resume_ambient` can
                // find it instead of wiping it here.
                let preempted = matches!(layers.slot(layer), Some(active) if active.plan_id == plan_id && active.paused_remainder.is_some());
                if !preempted {
                    let slot = layers.slot(layer);
                    if matches!(slot, Some(active) if active.plan_id == plan_id) {
                        *slot = None;
                    }
                }
                preempted
            };

            executor.force_unduck(&ctx2).await;

            if !preempted {
                if let Err(e) = ctx2
                    .emit(Payload::PlanEnded {
                        plan_id,
                        status,
                        failed_step_id,
                        reason,
                    })
                    .await
                {
                    warn!(error = %e, "failed to emit PLAN_ENDED");
                }
            }

            let _ = ended_tx.send(());

            executor.maybe_resume_ambient(&ctx2).await;
        });
    }

    async fn maybe_resume_ambient(self: &Arc<Self>, ctx: &Arc<ServiceContext>) {
        let resume = {
            let mut layers = self.layers.lock().await;
            if layers.foreground.is_some() || layers.r#override.is_some() {
                return;
            }
            match &mut layers.ambient {
                Some(active) => active.paused_remainder.take().map(|steps| {
                    let cancel = CancellationToken::new();
                    let (ended_tx, ended_rx) = oneshot::channel();
                    active.cancel = cancel.clone();
                    active.ended_rx = Some(ended_rx);
                    (active.plan_id, steps, cancel, ended_tx)
                }),
                None => None,
            }
        };
        if let Some((plan_id, steps, cancel, ended_tx)) = resume {
            if steps.is_empty() {
                let _ = ended_tx.send(());
                return;
            }
            self.spawn_plan_run(ctx, plan_id, Layer::Ambient, steps, cancel, ended_tx);
        }
    }

    async fn run_steps(self: &Arc<Self>, ctx: &Arc<ServiceContext>, plan_id: Uuid, steps: &[Step], cancel: CancellationToken) -> std::result::Result<(), PlanError> {
        for step in steps {
            if cancel.is_cancelled() {
                self.cancel_step(ctx, step).await;
                return Ok(());
            }
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.cancel_step(ctx, step).await;
                    return Ok(());
                }
                result = self.run_step(ctx, plan_id, step, cancel.clone()) => {
                    result?;
                }
            }
        }
        Ok(())
    }

    async fn cancel_step(&self, ctx: &Arc<ServiceContext>, step: &Step) {
        match step {
            Step::Speak { step_id, .. } => {
                let _ = ctx.emit(Payload::TtsCancel { clip_id: *step_id }).await;
            }
            Step::MusicCrossfade { step_id, .. } => {
                // Crossfades are committed, never left mid-fade (§4.6).
                self.resolve(*step_id).await;
            }
            _ => {}
        }
        self.force_unduck(ctx).await;
    }

    fn run_step<'a>(
        self: &'a Arc<Self>,
        ctx: &'a Arc<ServiceContext>,
        plan_id: Uuid,
        step: &'a Step,
        cancel: CancellationToken,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = std::result::Result<(), PlanError>> + Send + 'a>> {
        Box::pin(async move {
            match step {
                Step::Speak { step_id, text } => {
                    let implicit_duck = *self.music_playing.lock().await && self.ducked.lock().await.is_none();
                    if implicit_duck {
                        self.duck(ctx, ctx.config.bootstrap.dj.duck_level, ctx.config.bootstrap.dj.duck_fade_ms).await;
                    }

                    ctx.emit(Payload::TtsGenerateRequest { text: text.clone(), clip_id: *step_id, plan_id })
                        .await
                        .map_err(|e| PlanError::StepFailed { step_id: *step_id, reason: e.to_string() })?;

                    let timeout = Duration::from_secs(ctx.config.bootstrap.timeouts.speech_completion_secs);
                    let completed = self.await_completion(*step_id, timeout).await;

                    if implicit_duck {
                        self.unduck(ctx, ctx.config.bootstrap.dj.duck_fade_ms).await;
                    }

                    if !completed {
                        return Err(PlanError::StepFailed { step_id: *step_id, reason: "speech completion timeout".into() });
                    }
                    Ok(())
                }
                Step::PlayCachedSpeech { step_id, cache_key } => {
                    ctx.emit(Payload::SpeechCachePlaybackRequest { cache_key: cache_key.clone(), step_id: *step_id, plan_id })
                        .await
                        .map_err(|e| PlanError::StepFailed { step_id: *step_id, reason: e.to_string() })?;

                    let timeout = Duration::from_secs(ctx.config.bootstrap.timeouts.speech_completion_secs);
                    if !self.await_completion(*step_id, timeout).await {
                        return Err(PlanError::StepFailed { step_id: *step_id, reason: "cached speech playback timeout".into() });
                    }
                    Ok(())
                }
                Step::MusicDuck { level, fade_ms, .. } => {
                    self.duck(ctx, *level, *fade_ms).await;
                    Ok(())
                }
                Step::MusicUnduck { fade_ms, .. } => {
                    self.unduck(ctx, *fade_ms).await;
                    Ok(())
                }
                Step::MusicCrossfade { step_id, next_track, fade_ms } => {
                    let ceiling = self.ducked.lock().await.unwrap_or(1.0);
                    ctx.emit(Payload::MusicCommand {
                        action: MusicAction::Crossfade,
                        source: cantina_proto::Source::Dj,
                        track_name: Some(next_track.clone()),
                        track_id: None,
                        fade_ms: Some(*fade_ms),
                        ceiling_volume: Some(ceiling),
                    })
                    .await
                    .map_err(|e| PlanError::StepFailed { step_id: *step_id, reason: e.to_string() })?;

                    let timeout = Duration::from_millis(2 * fade_ms + ctx.config.bootstrap.timeouts.crossfade_extra_secs * 1000);
                    if !self.await_completion(*step_id, timeout).await {
                        return Err(PlanError::StepFailed { step_id: *step_id, reason: "crossfade completion timeout".into() });
                    }
                    Ok(())
                }
                Step::PlayMusic { step_id, target, source } => {
                    let payload = match target {
                        PlayMusicTarget::Query(query) => Payload::MusicCommand {
                            action: MusicAction::Play,
                            source: *source,
                            track_name: Some(query.clone()),
                            track_id: None,
                            fade_ms: None,
                            ceiling_volume: None,
                        },
                        PlayMusicTarget::Stop => Payload::MusicCommand {
                            action: MusicAction::Stop,
                            source: *source,
                            track_name: None,
                            track_id: None,
                            fade_ms: None,
                            ceiling_volume: None,
                        },
                    };
                    ctx.emit(payload).await.map_err(|e| PlanError::StepFailed { step_id: *step_id, reason: e.to_string() })?;
                    Ok(())
                }
                Step::Parallel { children, .. } => {
                    let results = futures::future::join_all(
                        children.iter().map(|child| self.run_step(ctx, plan_id, child, cancel.clone())),
                    )
                    .await;
                    for result in results {
                        result?;
                    }
                    Ok(())
                }
            }
        })
    }

    async fn duck(&self, ctx: &Arc<ServiceContext>, level: f32, fade_ms: u64) {
        *self.ducked.lock().await = Some(level);
        let _ = ctx.emit(Payload::AudioDuckingStart { level, fade_ms }).await;
    }

    async fn unduck(&self, ctx: &Arc<ServiceContext>, fade_ms: u64) {
        *self.ducked.lock().await = None;
        let _ = ctx.emit(Payload::AudioDuckingStop { fade_ms }).await;
    }

    async fn force_unduck(&self, ctx: &Arc<ServiceContext>) {
        if self.ducked.lock().await.take().is_some() {
            let _ = ctx.emit(Payload::AudioDuckingStop { fade_ms: 0 }).await;
        }
    }
}

#[async_trait]
impl Service for TimelineExecutor {
    fn name(&self) -> &'static str {
        "timeline_executor"
    }

    async fn start(self: Arc<Self>, ctx: Arc<ServiceContext>) -> Result<()> {
        ctx.emit_status(LifecycleState::Starting, "subscribing", Severity::Info).await?;

        let executor = Arc::clone(&self);
        {
            let ctx = Arc::clone(&ctx);
            ctx.subscribe(Topic::PlanReady, move |env| {
                let executor = Arc::clone(&executor);
                let ctx = Arc::clone(&ctx);
                async move {
                    if let Payload::PlanReady { plan } = env.payload {
                        executor.handle_plan_ready(ctx, plan).await?;
                    }
                    Ok(())
                }
            })
            .await?;
        }

        let executor = Arc::clone(&self);
        {
            let ctx = Arc::clone(&ctx);
            ctx.subscribe(Topic::TrackPlaying, move |_env| {
                let executor = Arc::clone(&executor);
                async move {
                    *executor.music_playing.lock().await = true;
                    Ok(())
                }
            })
            .await?;
        }

        let executor = Arc::clone(&self);
        {
            let ctx = Arc::clone(&ctx);
            ctx.subscribe(Topic::TrackStopped, move |_env| {
                let executor = Arc::clone(&executor);
                async move {
                    *executor.music_playing.lock().await = false;
                    Ok(())
                }
            })
            .await?;
        }

        let executor = Arc::clone(&self);
        {
            let ctx = Arc::clone(&ctx);
            ctx.subscribe(Topic::SpeechGenerationComplete, move |env| {
                let executor = Arc::clone(&executor);
                async move {
                    if let Payload::SpeechGenerationComplete { clip_id } = env.payload {
                        executor.resolve(clip_id).await;
                    }
                    Ok(())
                }
            })
            .await?;
        }

        let executor = Arc::clone(&self);
        {
            let ctx = Arc::clone(&ctx);
            ctx.subscribe(Topic::SpeechCachePlaybackCompleted, move |env| {
                let executor = Arc::clone(&executor);
                async move {
                    if let Payload::SpeechCachePlaybackCompleted { step_id } = env.payload {
                        executor.resolve(step_id).await;
                    }
                    Ok(())
                }
            })
            .await?;
        }

        let executor = Arc::clone(&self);
        {
            let ctx = Arc::clone(&ctx);
            ctx.subscribe(Topic::CrossfadeComplete, move |env| {
                let executor = Arc::clone(&executor);
                async move {
                    if let Payload::CrossfadeComplete { step_id } = env.payload {
                        executor.resolve(step_id).await;
                    }
                    Ok(())
                }
            })
            .await?;
        }

        ctx.answer_status_requests().await?;
        ctx.start_heartbeat();
        ctx.emit_status(LifecycleState::Running, "ready", Severity::Info).await?;
        info!("timeline executor started");
        Ok(())
    }

    /// Cancel every active layer's token so the `run_steps` tasks this
    /// service owns (tracked via `ctx.spawn`, but only linked to their own
    /// per-layer token, not the global shutdown token) unwind promptly
    /// instead of blocking until the stop grace period expires.
    async fn stop(self: Arc<Self>, _ctx: Arc<ServiceContext>) -> Result<()> {
        let mut layers = self.layers.lock().await;
        for slot in [&mut layers.ambient, &mut layers.foreground, &mut layers.r#override] {
            if let Some(active) = slot.take() {
                active.cancel.cancel();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use cantina_conf::CantinaConfig;
    use cantina_proto::{Plan, Source};
    use std::time::Duration;
    use tokio::sync::Mutex as TMutex;
    use tokio_util::sync::CancellationToken;

    fn ctx_for() -> Arc<ServiceContext> {
        let bus = EventBus::new(Duration::from_millis(100));
        ServiceContext::new("timeline_executor", bus, Arc::new(CantinaConfig::default()), CancellationToken::new())
    }

    #[tokio::test]
    async fn crossfade_ceiling_uses_ducked_level_under_parallel_speak() {
        let ctx = ctx_for();
        let executor = TimelineExecutor::new();
        Arc::clone(&executor).start(Arc::clone(&ctx)).await.unwrap();

        let ceiling = Arc::new(TMutex::new(None));
        let ceiling2 = Arc::clone(&ceiling);
        ctx.bus
            .subscribe(
                Topic::MusicCommand,
                "player",
                crate::bus::handler_fn("player", move |env| {
                    let ceiling = Arc::clone(&ceiling2);
                    async move {
                        if let Payload::MusicCommand { ceiling_volume, action: MusicAction::Crossfade, .. } = env.payload {
                            *ceiling.lock().await = ceiling_volume;
                        }
                        Ok(())
                    }
                }),
            )
            .await
            .unwrap();

        let duck_step = Uuid::new_v4();
        let speak_step = Uuid::new_v4();
        let crossfade_step = Uuid::new_v4();
        let unduck_step = Uuid::new_v4();
        let parallel_id = Uuid::new_v4();

        let plan = Plan {
            plan_id: Uuid::new_v4(),
            layer: Layer::Foreground,
            steps: vec![Step::Parallel {
                step_id: parallel_id,
                children: vec![
                    Step::MusicDuck { step_id: duck_step, level: 0.4, fade_ms: 500 },
                    Step::MusicCrossfade { step_id: crossfade_step, next_track: "next".into(), fade_ms: 100 },
                ],
            }],
        };
        let _ = speak_step;
        let _ = unduck_step;

        let ctx2 = Arc::clone(&ctx);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = ctx2
                .emit(Payload::CrossfadeComplete { step_id: crossfade_step })
                .await;
        });

        ctx.emit(Payload::PlanReady { plan }).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(*ceiling.lock().await, Some(0.4));
    }

    #[tokio::test]
    async fn override_plan_preempts_foreground() {
        let ctx = ctx_for();
        let executor = TimelineExecutor::new();
        Arc::clone(&executor).start(Arc::clone(&ctx)).await.unwrap();

        let statuses = Arc::new(TMutex::new(Vec::new()));
        let statuses2 = Arc::clone(&statuses);
        ctx.bus
            .subscribe(
                Topic::PlanEnded,
                "observer",
                crate::bus::handler_fn("observer", move |env| {
                    let statuses = Arc::clone(&statuses2);
                    async move {
                        if let Payload::PlanEnded { status, .. } = env.payload {
                            statuses.lock().await.push(status);
                        }
                        Ok(())
                    }
                }),
            )
            .await
            .unwrap();

        let fg_plan = Plan::new(
            Layer::Foreground,
            vec![Step::Speak { step_id: Uuid::new_v4(), text: "long running".into() }],
        );
        ctx.emit(Payload::PlanReady { plan: fg_plan }).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let override_plan = Plan::new(Layer::Override, vec![Step::MusicUnduck { step_id: Uuid::new_v4(), fade_ms: 100 }]);
        ctx.emit(Payload::PlanReady { plan: override_plan }).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(statuses.lock().await.contains(&PlanStatus::Cancelled));
    }

    #[tokio::test]
    async fn preempted_plans_ended_event_precedes_preempting_plan_started() {
        let ctx = ctx_for();
        let executor = TimelineExecutor::new();
        Arc::clone(&executor).start(Arc::clone(&ctx)).await.unwrap();

        let events: Arc<TMutex<Vec<&'static str>>> = Arc::new(TMutex::new(Vec::new()));
        let events2 = Arc::clone(&events);
        ctx.bus
            .subscribe(
                Topic::PlanEnded,
                "observer-ended",
                crate::bus::handler_fn("observer-ended", move |_env| {
                    let events = Arc::clone(&events2);
                    async move {
                        events.lock().await.push("ended");
                        Ok(())
                    }
                }),
            )
            .await
            .unwrap();

        let events3 = Arc::clone(&events);
        let fg_plan_id = Uuid::new_v4();
        ctx.bus
            .subscribe(
                Topic::PlanStarted,
                "observer-started",
                crate::bus::handler_fn("observer-started", move |env| {
                    let events = Arc::clone(&events3);
                    async move {
                        if let Payload::PlanStarted { plan_id, .. } = env.payload {
                            if plan_id != fg_plan_id {
                                events.lock().await.push("started");
                            }
                        }
                        Ok(())
                    }
                }),
            )
            .await
            .unwrap();

        let fg_plan = Plan { plan_id: fg_plan_id, layer: Layer::Foreground, steps: vec![Step::Speak { step_id: Uuid::new_v4(), text: "long running".into() }] };
        ctx.emit(Payload::PlanReady { plan: fg_plan }).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let override_plan = Plan::new(Layer::Override, vec![Step::MusicUnduck { step_id: Uuid::new_v4(), fade_ms: 100 }]);
        ctx.emit(Payload::PlanReady { plan: override_plan }).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let seen = events.lock().await.clone();
        assert_eq!(seen, vec!["ended", "started"], "the preempted plan's PLAN_ENDED must be observed before the preempting plan's PLAN_STARTED");
    }

    #[tokio::test]
    async fn play_music_step_maps_stop_target() {
        let ctx = ctx_for();
        let executor = TimelineExecutor::new();
        Arc::clone(&executor).start(Arc::clone(&ctx)).await.unwrap();

        let seen = Arc::new(TMutex::new(None));
        let seen2 = Arc::clone(&seen);
        ctx.bus
            .subscribe(
                Topic::MusicCommand,
                "player",
                crate::bus::handler_fn("player", move |env| {
                    let seen = Arc::clone(&seen2);
                    async move {
                        if let Payload::MusicCommand { action, .. } = env.payload {
                            *seen.lock().await = Some(action);
                        }
                        Ok(())
                    }
                }),
            )
            .await
            .unwrap();

        let plan = Plan::new(
            Layer::Foreground,
            vec![Step::PlayMusic { step_id: Uuid::new_v4(), target: PlayMusicTarget::Stop, source: Source::Cli }],
        );
        ctx.emit(Payload::PlanReady { plan }).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(*seen.lock().await, Some(MusicAction::Stop));
    }
}
