//! End-to-end: DJ-mode track transitions, with and without cached
//! commentary ready in time (§8 scenarios 4 and 5).

use std::sync::Arc;
use std::time::Duration;

use cantina_conf::CantinaConfig;
use cantina_core::brain::Brain;
use cantina_core::bus::{handler_fn, EventBus};
use cantina_core::dispatcher::CommandDispatcher;
use cantina_core::service::{Service, ServiceContext};
use cantina_core::timeline::TimelineExecutor;
use cantina_proto::{MusicAction, MusicSource, MusicTrack, Payload, Plan, PlanStatus, Step, Topic};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

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

fn ctx_for() -> Arc<ServiceContext> {
    let bus = EventBus::new(Duration::from_millis(100));
    ServiceContext::new("test-harness", bus, Arc::new(CantinaConfig::default()), CancellationToken::new())
}

/// The two step kinds whose completion the real player/speech-cache layer
/// would signal back; walked out of a received `Plan` so the test doesn't
/// need to know which layer (foreground intro vs. transition) produced it.
fn completions_needed(step: &Step, out: &mut Vec<(&'static str, Uuid)>) {
    match step {
        Step::PlayCachedSpeech { step_id, .. } => out.push(("cached_speech", *step_id)),
        Step::MusicCrossfade { step_id, .. } => out.push(("crossfade", *step_id)),
        Step::Parallel { children, .. } => {
            for child in children {
                completions_needed(child, out);
            }
        }
        _ => {}
    }
}

struct Outcome {
    plans: Arc<Mutex<Vec<Plan>>>,
    commentary_missed: Arc<Mutex<bool>>,
    plan_ended_statuses: Arc<Mutex<Vec<PlanStatus>>>,
}

async fn run_transition_scenario(cache_ready_in_time: bool) -> Outcome {
    let ctx = ctx_for();

    Arc::clone(&CommandDispatcher::new()).start(Arc::clone(&ctx)).await.unwrap();
    Arc::clone(&Brain::new()).start(Arc::clone(&ctx)).await.unwrap();
    Arc::clone(&TimelineExecutor::new()).start(Arc::clone(&ctx)).await.unwrap();

    let plans: Arc<Mutex<Vec<Plan>>> = Arc::new(Mutex::new(Vec::new()));
    let commentary_missed = Arc::new(Mutex::new(false));
    let plan_ended_statuses = Arc::new(Mutex::new(Vec::new()));

    // Stub music player: answers MUSIC_COMMAND{play} so Brain's DJ loop
    // sees a track actually start.
    {
        let ctx2 = Arc::clone(&ctx);
        ctx.bus
            .subscribe(
                Topic::MusicCommand,
                "stub-player",
                handler_fn("stub-player", move |env| {
                    let ctx2 = Arc::clone(&ctx2);
                    async move {
                        if let Payload::MusicCommand { action: MusicAction::Play, source, track_name, .. } = env.payload {
                            let t = track(&track_name.unwrap_or_else(|| "seed".into()));
                            ctx2.emit(Payload::MusicPlaybackStarted { source, track: t.clone() }).await?;
                            ctx2.emit(Payload::TrackPlaying { track_id: t.track_id }).await?;
                        }
                        Ok(())
                    }
                }),
            )
            .await
            .unwrap();
    }

    // Stub TTS collaborator: completes every speech request immediately.
    {
        let ctx2 = Arc::clone(&ctx);
        ctx.bus
            .subscribe(
                Topic::TtsGenerateRequest,
                "stub-tts",
                handler_fn("stub-tts", move |env| {
                    let ctx2 = Arc::clone(&ctx2);
                    async move {
                        if let Payload::TtsGenerateRequest { clip_id, .. } = env.payload {
                            ctx2.emit(Payload::SpeechGenerationComplete { clip_id }).await?;
                        }
                        Ok(())
                    }
                }),
            )
            .await
            .unwrap();
    }

    // Stub commentary collaborator: for a "transition" request, optionally
    // signals the cache is ready before the executor needs it -- this is
    // the knob that distinguishes scenario 4 from scenario 5.
    {
        let ctx2 = Arc::clone(&ctx);
        ctx.bus
            .subscribe(
                Topic::DjCommentaryRequest,
                "stub-commentary",
                handler_fn("stub-commentary", move |env| {
                    let ctx2 = Arc::clone(&ctx2);
                    async move {
                        if let Payload::DjCommentaryRequest { request_id, context, .. } = env.payload {
                            if context == "transition" && cache_ready_in_time {
                                let cache_key = format!("dj-transition-{request_id}");
                                ctx2.emit(Payload::SpeechCacheReady { cache_key }).await?;
                            }
                        }
                        Ok(())
                    }
                }),
            )
            .await
            .unwrap();
    }

    // Generic plan-step completer: whatever plan arrives (intro or
    // transition), signal back completion for every step that awaits one.
    {
        let ctx2 = Arc::clone(&ctx);
        let plans = Arc::clone(&plans);
        ctx.bus
            .subscribe(
                Topic::PlanReady,
                "observer-plan",
                handler_fn("observer-plan", move |env| {
                    let ctx2 = Arc::clone(&ctx2);
                    let plans = Arc::clone(&plans);
                    async move {
                        if let Payload::PlanReady { plan } = env.payload {
                            plans.lock().await.push(plan.clone());
                            let mut needed = Vec::new();
                            for step in &plan.steps {
                                completions_needed(step, &mut needed);
                            }
                            for (kind, step_id) in needed {
                                match kind {
                                    "cached_speech" => {
                                        ctx2.emit(Payload::SpeechCachePlaybackCompleted { step_id }).await?;
                                    }
                                    "crossfade" => {
                                        ctx2.emit(Payload::CrossfadeComplete { step_id }).await?;
                                    }
                                    _ => {}
                                }
                            }
                        }
                        Ok(())
                    }
                }),
            )
            .await
            .unwrap();
    }

    {
        let commentary_missed = Arc::clone(&commentary_missed);
        ctx.bus
            .subscribe(
                Topic::CommentaryMissed,
                "observer-missed",
                handler_fn("observer-missed", move |_env| {
                    let commentary_missed = Arc::clone(&commentary_missed);
                    async move {
                        *commentary_missed.lock().await = true;
                        Ok(())
                    }
                }),
            )
            .await
            .unwrap();
    }

    {
        let plan_ended_statuses = Arc::clone(&plan_ended_statuses);
        ctx.bus
            .subscribe(
                Topic::PlanEnded,
                "observer-ended",
                handler_fn("observer-ended", move |env| {
                    let plan_ended_statuses = Arc::clone(&plan_ended_statuses);
                    async move {
                        if let Payload::PlanEnded { status, .. } = env.payload {
                            plan_ended_statuses.lock().await.push(status);
                        }
                        Ok(())
                    }
                }),
            )
            .await
            .unwrap();
    }

    ctx.emit(Payload::MusicLibraryUpdated { tracks: vec![track("current"), track("next-up")] })
        .await
        .unwrap();

    ctx.emit(Payload::DjModeChanged { active: true, reason: None, sid: None }).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Lead time defaults to 30s and `seconds_remaining` is 30, so the
    // transition fires with no extra wait.
    ctx.emit(Payload::TrackEndingSoon { track: "current".into(), seconds_remaining: 30 }).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    Outcome { plans, commentary_missed, plan_ended_statuses }
}

#[tokio::test]
async fn transition_with_cached_commentary_ready_plays_parallel_bracket() {
    let outcome = run_transition_scenario(true).await;

    let plans = outcome.plans.lock().await.clone();
    let transition_plan = plans.last().expect("transition plan observed");
    assert_eq!(transition_plan.steps.len(), 1);
    match &transition_plan.steps[0] {
        Step::Parallel { children, .. } => {
            assert!(children.iter().any(|s| matches!(s, Step::MusicDuck { .. })));
            assert!(children.iter().any(|s| matches!(s, Step::PlayCachedSpeech { .. })));
            assert!(children.iter().any(|s| matches!(s, Step::MusicUnduck { .. })));
            assert!(children.iter().any(|s| matches!(s, Step::MusicCrossfade { .. })));
        }
        other => panic!("expected a parallel duck/speech/crossfade bracket, got {other:?}"),
    }

    assert!(!*outcome.commentary_missed.lock().await);
    assert!(outcome.plan_ended_statuses.lock().await.contains(&PlanStatus::Completed));
}

#[tokio::test]
async fn transition_without_cached_commentary_falls_back_to_crossfade_only() {
    let outcome = run_transition_scenario(false).await;

    let plans = outcome.plans.lock().await.clone();
    let transition_plan = plans.last().expect("transition plan observed");
    assert_eq!(transition_plan.steps.len(), 1);
    assert!(matches!(transition_plan.steps[0], Step::MusicCrossfade { .. }));

    assert!(*outcome.commentary_missed.lock().await, "a missed-commentary diagnostic should fire");
    assert!(outcome.plan_ended_statuses.lock().await.contains(&PlanStatus::Completed));
}
