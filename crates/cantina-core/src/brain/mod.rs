//! Brain / Planner (§4.7): intent-to-plan translation, track selection,
//! and the DJ-mode loop.

pub mod library;

use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use cantina_proto::{Layer, LifecycleState, MusicAction, Payload, Plan, PlayMusicTarget, Severity, Source, Step, Topic};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::service::{Service, ServiceContext};
use library::MusicLibrary;

#[derive(Default)]
struct DjState {
    active: bool,
    commentary_style_index: usize,
    /// `next_track -> cache_key`, recorded before `SPEECH_CACHE_REQUEST` is
    /// emitted (§3 invariant 8).
    cache_mappings: std::collections::HashMap<String, String>,
    cache_ready: std::collections::HashSet<String>,
    /// Last `dj.history_size` tracks played, oldest first, across all
    /// sources -- used to steer track selection away from recent repeats.
    track_history: VecDeque<String>,
}

pub struct Brain {
    library: Mutex<MusicLibrary>,
    dj: Mutex<DjState>,
}

impl Brain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            library: Mutex::new(MusicLibrary::new()),
            dj: Mutex::new(DjState::default()),
        })
    }

    async fn handle_intent(self: &Arc<Self>, ctx: &Arc<ServiceContext>, name: String, args: serde_json::Value) -> Result<()> {
        match name.as_str() {
            "music_play" => {
                let query = args.get("query").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                let source = parse_source(args.get("source"));
                self.play_music(ctx, query, source).await?;
            }
            "music_stop" => {
                let plan = Plan::new(
                    Layer::Foreground,
                    vec![
                        Step::Speak { step_id: Uuid::new_v4(), text: "stopping".into() },
                        Step::PlayMusic { step_id: Uuid::new_v4(), target: PlayMusicTarget::Stop, source: Source::Voice },
                    ],
                );
                ctx.emit(Payload::PlanReady { plan }).await?;
            }
            other => warn!(intent = other, "brain has no translation for this intent"),
        }
        Ok(())
    }

    /// §4.7.1: voice-initiated play gets a spoken intro; CLI/dashboard do
    /// not (source-aware rule).
    async fn play_music(self: &Arc<Self>, ctx: &Arc<ServiceContext>, query: String, source: Source) -> Result<()> {
        let recent = self.recent_history().await;
        let track = self.library.lock().await.select(&query, &recent);

        ctx.emit(Payload::MusicCommand {
            action: MusicAction::Play,
            source,
            track_name: track.clone().map(|t| t.title),
            track_id: track.map(|t| t.track_id),
            fade_ms: None,
            ceiling_volume: None,
        })
        .await?;

        if matches!(source, Source::Voice) {
            // The follow-up plan fires once MUSIC_PLAYBACK_STARTED{source:voice}
            // confirms playback began (handled in the subscription below).
        }
        Ok(())
    }

    async fn on_playback_started(self: &Arc<Self>, ctx: &Arc<ServiceContext>, source: Source, track_title: String) -> Result<()> {
        // Voice and DJ both get a spoken intro over a duck/unduck bracket
        // (§4.7.1's source-aware rule; §9 leaves streamed-vs-cached intro
        // speech to the implementer -- both stream here). CLI/dashboard
        // playback stays silent.
        if matches!(source, Source::Voice | Source::Dj) {
            let plan = Plan::new(
                Layer::Foreground,
                vec![
                    Step::MusicDuck { step_id: Uuid::new_v4(), level: ctx.config.bootstrap.dj.duck_level, fade_ms: ctx.config.bootstrap.dj.duck_fade_ms },
                    Step::Speak { step_id: Uuid::new_v4(), text: format!("now playing {track_title}") },
                    Step::MusicUnduck { step_id: Uuid::new_v4(), fade_ms: ctx.config.bootstrap.dj.duck_fade_ms },
                ],
            );
            ctx.emit(Payload::PlanReady { plan }).await?;
        }

        if matches!(source, Source::Dj) {
            let style = self.next_commentary_style(ctx).await;
            let request_id = Uuid::new_v4();
            ctx.emit(Payload::DjCommentaryRequest {
                request_id,
                context: "intro".into(),
                current_track: track_title.clone(),
                next_track: track_title.clone(),
                style,
            })
            .await?;
        }

        self.record_track_played(ctx, track_title).await;
        Ok(())
    }

    /// Push a newly-played track onto the bounded history, trimming to
    /// `dj.history_size`, and mirror the result into the Memory Store so
    /// `dj_track_history` stays queryable (§4.8 `MemoryKey`s).
    async fn record_track_played(&self, ctx: &Arc<ServiceContext>, title: String) {
        let cap = ctx.config.bootstrap.dj.history_size.max(1);
        {
            let mut dj = self.dj.lock().await;
            dj.track_history.push_back(title);
            while dj.track_history.len() > cap {
                dj.track_history.pop_front();
            }
        }
        self.persist_track_history(ctx).await;
    }

    async fn persist_track_history(&self, ctx: &Arc<ServiceContext>) {
        let history: Vec<String> = self.dj.lock().await.track_history.iter().cloned().collect();
        if let Err(e) = ctx
            .emit(Payload::MemorySet { key: "dj_track_history".into(), value: serde_json::json!(history) })
            .await
        {
            warn!(error = %e, "failed to mirror dj_track_history into memory store");
        }
    }

    async fn persist_cache_mappings(&self, ctx: &Arc<ServiceContext>) {
        let mappings = self.dj.lock().await.cache_mappings.clone();
        if let Err(e) = ctx
            .emit(Payload::MemorySet { key: "dj_commentary_cache_mappings".into(), value: serde_json::json!(mappings) })
            .await
        {
            warn!(error = %e, "failed to mirror dj_commentary_cache_mappings into memory store");
        }
    }

    async fn persist_cache_ready(&self, ctx: &Arc<ServiceContext>) {
        let ready: Vec<String> = self.dj.lock().await.cache_ready.iter().cloned().collect();
        if let Err(e) = ctx
            .emit(Payload::MemorySet { key: "dj_commentary_cache_ready".into(), value: serde_json::json!(ready) })
            .await
        {
            warn!(error = %e, "failed to mirror dj_commentary_cache_ready into memory store");
        }
    }

    async fn next_commentary_style(&self, ctx: &Arc<ServiceContext>) -> String {
        let mut dj = self.dj.lock().await;
        let styles = &ctx.config.bootstrap.dj.commentary_styles;
        if styles.is_empty() {
            return "banter".to_string();
        }
        let style = styles[dj.commentary_style_index % styles.len()].clone();
        dj.commentary_style_index += 1;
        style
    }

    async fn start_dj_mode(self: &Arc<Self>, ctx: &Arc<ServiceContext>, sid: Option<String>) -> Result<()> {
        let recent = self.recent_history().await;
        let track = self.library.lock().await.select("", &recent);
        let Some(track) = track else {
            ctx.emit(Payload::DjModeChanged { active: false, reason: Some("NO_TRACKS".into()), sid: None }).await?;
            ctx.emit(Payload::CliResponse {
                success: false,
                message: "no tracks available for dj mode".into(),
                data: None,
                code: Some("no_tracks".into()),
                field: None,
                sid,
            })
            .await?;
            return Ok(());
        };

        ctx.emit(Payload::MusicCommand {
            action: MusicAction::Play,
            source: Source::Dj,
            track_name: Some(track.title.clone()),
            track_id: Some(track.track_id),
            fade_ms: None,
            ceiling_volume: None,
        })
        .await?;

        ctx.emit(Payload::CliResponse {
            success: true,
            message: format!("dj mode started, playing {}", track.title),
            data: None,
            code: None,
            field: None,
            sid,
        })
        .await?;
        Ok(())
    }

    async fn recent_history(&self) -> Vec<String> {
        self.dj.lock().await.track_history.iter().cloned().collect()
    }

    /// §4.7.3 steps 1-6: on `TRACK_ENDING_SOON`, pick the next track,
    /// request commentary, pre-cache it, and schedule the transition plan.
    async fn on_track_ending_soon(self: &Arc<Self>, ctx: &Arc<ServiceContext>, current_track: String, seconds_remaining: u32) -> Result<()> {
        if !self.dj.lock().await.active {
            return Ok(());
        }

        let recent = self.recent_history().await;
        let next = self.library.lock().await.select("", &recent);
        let Some(next) = next else {
            self.fall_back_to_stop(ctx, "NO_TRACKS").await?;
            return Ok(());
        };

        let style = self.next_commentary_style(ctx).await;
        let request_id = Uuid::new_v4();
        let cache_key = format!("dj-transition-{request_id}");

        // Invariant 8: the mapping is recorded before SPEECH_CACHE_REQUEST.
        {
            let mut dj = self.dj.lock().await;
            dj.cache_mappings.insert(next.path_or_uri.clone(), cache_key.clone());
        }
        self.persist_cache_mappings(ctx).await;

        ctx.emit(Payload::DjCommentaryRequest {
            request_id,
            context: "transition".into(),
            current_track: current_track.clone(),
            next_track: next.title.clone(),
            style,
        })
        .await?;

        let lead_secs = ctx.config.bootstrap.dj.track_ending_lead_secs;
        let executor_ctx = Arc::clone(ctx);
        let brain = Arc::clone(self);
        let next_for_task = next.clone();
        let wait = seconds_remaining.saturating_sub(lead_secs) as u64;
        ctx.spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(wait)).await;
            if let Err(e) = brain.emit_transition_plan(&executor_ctx, &next_for_task, &cache_key).await {
                warn!(error = %e, "failed to emit DJ transition plan");
            }
        });

        Ok(())
    }

    async fn emit_transition_plan(self: &Arc<Self>, ctx: &Arc<ServiceContext>, next: &cantina_proto::MusicTrack, cache_key: &str) -> Result<()> {
        let ready = self.dj.lock().await.cache_ready.contains(cache_key);
        let fade_ms = ctx.config.bootstrap.dj.crossfade_fade_ms;

        let plan = if ready {
            Plan::new(
                Layer::Foreground,
                vec![Step::Parallel {
                    step_id: Uuid::new_v4(),
                    children: vec![
                        Step::MusicDuck { step_id: Uuid::new_v4(), level: ctx.config.bootstrap.dj.duck_level, fade_ms: ctx.config.bootstrap.dj.duck_fade_ms },
                        Step::PlayCachedSpeech { step_id: Uuid::new_v4(), cache_key: cache_key.to_string() },
                        Step::MusicUnduck { step_id: Uuid::new_v4(), fade_ms: ctx.config.bootstrap.dj.duck_fade_ms },
                        Step::MusicCrossfade { step_id: Uuid::new_v4(), next_track: next.path_or_uri.clone(), fade_ms },
                    ],
                }],
            )
        } else {
            ctx.emit(Payload::CommentaryMissed { track: next.title.clone() }).await?;
            Plan::new(
                Layer::Foreground,
                vec![Step::MusicCrossfade { step_id: Uuid::new_v4(), next_track: next.path_or_uri.clone(), fade_ms }],
            )
        };

        ctx.emit(Payload::PlanReady { plan }).await?;
        self.record_track_played(ctx, next.title.clone()).await;
        Ok(())
    }

    async fn fall_back_to_stop(&self, ctx: &Arc<ServiceContext>, reason: &str) -> Result<()> {
        ctx.emit(Payload::MusicCommand {
            action: MusicAction::Stop,
            source: Source::Dj,
            track_name: None,
            track_id: None,
            fade_ms: None,
            ceiling_volume: None,
        })
        .await?;
        ctx.emit(Payload::DjModeChanged { active: false, reason: Some(reason.to_string()), sid: None }).await?;
        self.dj.lock().await.active = false;
        Ok(())
    }

    async fn stop_dj_mode(self: &Arc<Self>, ctx: &Arc<ServiceContext>, sid: Option<String>) -> Result<()> {
        ctx.emit(Payload::MusicCommand {
            action: MusicAction::Stop,
            source: Source::Dj,
            track_name: None,
            track_id: None,
            fade_ms: None,
            ceiling_volume: None,
        })
        .await?;
        {
            let mut dj = self.dj.lock().await;
            dj.cache_mappings.clear();
            dj.cache_ready.clear();
        }
        self.persist_cache_mappings(ctx).await;
        self.persist_cache_ready(ctx).await;

        ctx.emit(Payload::CliResponse {
            success: true,
            message: "dj mode stopped".into(),
            data: None,
            code: None,
            field: None,
            sid,
        })
        .await?;
        Ok(())
    }
}

fn parse_source(value: Option<&serde_json::Value>) -> Source {
    match value.and_then(|v| v.as_str()) {
        Some("cli") => Source::Cli,
        Some("dashboard") => Source::Dashboard,
        Some("web") => Source::Web,
        Some("dj") => Source::Dj,
        _ => Source::Voice,
    }
}

#[async_trait]
impl Service for Brain {
    fn name(&self) -> &'static str {
        "brain"
    }

    async fn start(self: Arc<Self>, ctx: Arc<ServiceContext>) -> Result<()> {
        ctx.emit_status(LifecycleState::Starting, "subscribing", Severity::Info).await?;

        let brain = Arc::clone(&self);
        {
            let ctx = Arc::clone(&ctx);
            ctx.subscribe(Topic::IntentDetected, move |env| {
                let brain = Arc::clone(&brain);
                let ctx = Arc::clone(&ctx);
                async move {
                    if let Payload::IntentDetected { name, args, .. } = env.payload {
                        brain.handle_intent(&ctx, name, args).await?;
                    }
                    Ok(())
                }
            })
            .await?;
        }

        let brain = Arc::clone(&self);
        {
            let ctx = Arc::clone(&ctx);
            ctx.subscribe(Topic::MusicPlaybackStarted, move |env| {
                let brain = Arc::clone(&brain);
                let ctx = Arc::clone(&ctx);
                async move {
                    if let Payload::MusicPlaybackStarted { source, track } = env.payload {
                        brain.on_playback_started(&ctx, source, track.title).await?;
                    }
                    Ok(())
                }
            })
            .await?;
        }

        let brain = Arc::clone(&self);
        {
            let ctx = Arc::clone(&ctx);
            ctx.subscribe(Topic::MusicLibraryUpdated, move |env| {
                let brain = Arc::clone(&brain);
                async move {
                    if let Payload::MusicLibraryUpdated { tracks } = env.payload {
                        brain.library.lock().await.replace(tracks);
                    }
                    Ok(())
                }
            })
            .await?;
        }

        let brain = Arc::clone(&self);
        {
            let ctx = Arc::clone(&ctx);
            ctx.subscribe(Topic::DjModeChanged, move |env| {
                let brain = Arc::clone(&brain);
                let ctx = Arc::clone(&ctx);
                async move {
                    if let Payload::DjModeChanged { active, sid, .. } = env.payload {
                        brain.dj.lock().await.active = active;
                        if active {
                            brain.start_dj_mode(&ctx, sid).await?;
                        } else {
                            brain.stop_dj_mode(&ctx, sid).await?;
                        }
                    }
                    Ok(())
                }
            })
            .await?;
        }

        let brain = Arc::clone(&self);
        {
            let ctx = Arc::clone(&ctx);
            ctx.subscribe(Topic::TrackEndingSoon, move |env| {
                let brain = Arc::clone(&brain);
                let ctx = Arc::clone(&ctx);
                async move {
                    if let Payload::TrackEndingSoon { track, seconds_remaining } = env.payload {
                        brain.on_track_ending_soon(&ctx, track, seconds_remaining).await?;
                    }
                    Ok(())
                }
            })
            .await?;
        }

        let brain = Arc::clone(&self);
        {
            let ctx = Arc::clone(&ctx);
            ctx.subscribe(Topic::SpeechCacheReady, move |env| {
                let brain = Arc::clone(&brain);
                let ctx = Arc::clone(&ctx);
                async move {
                    if let Payload::SpeechCacheReady { cache_key } = env.payload {
                        brain.dj.lock().await.cache_ready.insert(cache_key);
                        brain.persist_cache_ready(&ctx).await;
                    }
                    Ok(())
                }
            })
            .await?;
        }

        self.library.lock().await.set_keyword_map(ctx.config.bootstrap.keyword_map.clone());

        ctx.answer_status_requests().await?;
        ctx.start_heartbeat();
        ctx.emit_status(LifecycleState::Running, "ready", Severity::Info).await?;
        info!("brain started");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use cantina_conf::CantinaConfig;
    use cantina_proto::{MusicSource, MusicTrack};
    use std::time::Duration;
    use tokio::sync::Mutex as TMutex;
    use tokio_util::sync::CancellationToken;

    fn ctx_for() -> Arc<ServiceContext> {
        let bus = EventBus::new(Duration::from_millis(100));
        ServiceContext::new("brain", bus, Arc::new(CantinaConfig::default()), CancellationToken::new())
    }

    fn track(title: &str) -> MusicTrack {
        MusicTrack {
            track_id: title.to_string(),
            title: title.to_string(),
            artist: None,
            duration_ms: Some(180_000),
            path_or_uri: format!("/music/{title}.flac"),
            source: MusicSource::Local,
        }
    }

    #[tokio::test]
    async fn voice_intent_generates_follow_up_intro_plan() {
        let ctx = ctx_for();
        let brain = Brain::new();
        Arc::clone(&brain).start(Arc::clone(&ctx)).await.unwrap();
        brain.library.lock().await.replace(vec![track("cantina")]);

        let saw_plan = Arc::new(TMutex::new(false));
        let saw_plan2 = Arc::clone(&saw_plan);
        ctx.bus
            .subscribe(
                Topic::PlanReady,
                "executor",
                crate::bus::handler_fn("executor", move |_env| {
                    let saw_plan = Arc::clone(&saw_plan2);
                    async move {
                        *saw_plan.lock().await = true;
                        Ok(())
                    }
                }),
            )
            .await
            .unwrap();

        ctx.emit(Payload::MusicPlaybackStarted { source: Source::Voice, track: track("cantina") })
            .await
            .unwrap();

        assert!(*saw_plan.lock().await);
    }

    #[tokio::test]
    async fn cli_intent_does_not_generate_intro_plan() {
        let ctx = ctx_for();
        let brain = Brain::new();
        Arc::clone(&brain).start(Arc::clone(&ctx)).await.unwrap();

        let saw_plan = Arc::new(TMutex::new(false));
        let saw_plan2 = Arc::clone(&saw_plan);
        ctx.bus
            .subscribe(
                Topic::PlanReady,
                "executor",
                crate::bus::handler_fn("executor", move |_env| {
                    let saw_plan = Arc::clone(&saw_plan2);
                    async move {
                        *saw_plan.lock().await = true;
                        Ok(())
                    }
                }),
            )
            .await
            .unwrap();

        ctx.emit(Payload::MusicPlaybackStarted { source: Source::Cli, track: track("cantina") })
            .await
            .unwrap();

        assert!(!*saw_plan.lock().await);
    }

    #[tokio::test]
    async fn cache_mapping_is_recorded_before_cache_request() {
        let ctx = ctx_for();
        let brain = Brain::new();
        Arc::clone(&brain).start(Arc::clone(&ctx)).await.unwrap();
        brain.library.lock().await.replace(vec![track("next-up")]);
        brain.dj.lock().await.active = true;

        ctx.emit(Payload::TrackEndingSoon { track: "current".into(), seconds_remaining: 30 }).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let dj = brain.dj.lock().await;
        assert_eq!(dj.cache_mappings.len(), 1);
    }
}
