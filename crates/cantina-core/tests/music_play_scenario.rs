//! End-to-end: CLI `music play <query>` starts playback without an intro
//! plan (§8 scenario 2) -- the source-aware rule in §4.7.1 only brackets
//! Voice/DJ-sourced playback with a spoken, ducked intro.

use std::sync::Arc;
use std::time::Duration;

use cantina_conf::CantinaConfig;
use cantina_core::brain::Brain;
use cantina_core::bus::{handler_fn, EventBus};
use cantina_core::dispatcher::CommandDispatcher;
use cantina_core::service::{Service, ServiceContext};
use cantina_core::timeline::TimelineExecutor;
use cantina_proto::{MusicAction, MusicSource, MusicTrack, Payload, Source, Topic};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

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

#[tokio::test]
async fn cli_music_play_starts_playback_with_no_intro_plan() {
    let ctx = ctx_for();

    Arc::clone(&CommandDispatcher::new()).start(Arc::clone(&ctx)).await.unwrap();
    Arc::clone(&Brain::new()).start(Arc::clone(&ctx)).await.unwrap();
    Arc::clone(&TimelineExecutor::new()).start(Arc::clone(&ctx)).await.unwrap();

    let played: Arc<Mutex<Option<(MusicAction, Source, Option<String>)>>> = Arc::new(Mutex::new(None));
    let plan_seen = Arc::new(Mutex::new(false));
    let duck_seen = Arc::new(Mutex::new(false));

    {
        let played = Arc::clone(&played);
        let ctx2 = Arc::clone(&ctx);
        ctx.bus
            .subscribe(
                Topic::MusicCommand,
                "stub-player",
                handler_fn("stub-player", move |env| {
                    let played = Arc::clone(&played);
                    let ctx2 = Arc::clone(&ctx2);
                    async move {
                        if let Payload::MusicCommand { action, source, track_name, .. } = env.payload {
                            *played.lock().await = Some((action, source, track_name.clone()));
                            if action == MusicAction::Play {
                                ctx2.emit(Payload::MusicPlaybackStarted {
                                    source,
                                    track: track(&track_name.unwrap_or_else(|| "cantina".into())),
                                })
                                .await?;
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
        let plan_seen = Arc::clone(&plan_seen);
        ctx.bus
            .subscribe(
                Topic::PlanReady,
                "observer-plan",
                handler_fn("observer-plan", move |_env| {
                    let plan_seen = Arc::clone(&plan_seen);
                    async move {
                        *plan_seen.lock().await = true;
                        Ok(())
                    }
                }),
            )
            .await
            .unwrap();
    }

    {
        let duck_seen = Arc::clone(&duck_seen);
        ctx.bus
            .subscribe(
                Topic::AudioDuckingStart,
                "observer-duck",
                handler_fn("observer-duck", move |_env| {
                    let duck_seen = Arc::clone(&duck_seen);
                    async move {
                        *duck_seen.lock().await = true;
                        Ok(())
                    }
                }),
            )
            .await
            .unwrap();
    }

    ctx.emit(Payload::CliCommand { raw_input: "music play cantina".into(), source: Source::Cli, sid: None })
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;

    let (action, source, track_name) = played.lock().await.clone().expect("music command observed");
    assert_eq!(action, MusicAction::Play);
    assert_eq!(source, Source::Cli);
    assert_eq!(track_name.as_deref(), Some("cantina"));

    assert!(!*plan_seen.lock().await, "CLI-sourced playback must not produce an intro plan");
    assert!(!*duck_seen.lock().await, "CLI-sourced playback must never duck");
}
