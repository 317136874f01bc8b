use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use cantina_conf::CantinaConfig;
use cantina_core::bus::EventBus;
use cantina_core::service::{Service, ServiceContext};
use cantina_core::{brain::Brain, cli::Cli, dispatcher::CommandDispatcher, logging, memory::MemoryStore, mode::ModeManager, timeline::TimelineExecutor, web::WebBridge};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// CantinaOS -- event-driven runtime for an interactive voice-character
/// system.
///
/// Configuration is loaded from (in order, later wins):
/// 1. Compiled defaults
/// 2. /etc/cantina-os/config.toml
/// 3. ~/.config/cantina-os/config.toml
/// 4. ./cantina-os.toml (or --config path)
/// 5. Environment variables (CANTINA_OS_*)
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct CliArgs {
    /// Path to config file (overrides ./cantina-os.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Show loaded configuration and exit
    #[arg(long)]
    show_config: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let (config, sources) = CantinaConfig::load_with_sources_from(args.config.as_deref()).context("failed to load configuration")?;

    if args.show_config {
        println!("# Configuration sources:");
        for path in &sources.files {
            println!("#   - {}", path.display());
        }
        if !sources.env_overrides.is_empty() {
            println!("# Environment overrides:");
            for var in &sources.env_overrides {
                println!("#   - {var}");
            }
        }
        println!();
        println!("{}", config.to_toml());
        return Ok(());
    }

    let config = Arc::new(config);

    let (_log_guard, log_rx) = logging::init(&config.infra.paths.log_dir, &config.infra.telemetry.log_level).context("failed to initialize logging")?;

    info!("configuration loaded from:");
    for path in &sources.files {
        info!("   - {}", path.display());
    }
    if !sources.env_overrides.is_empty() {
        info!(overrides = ?sources.env_overrides, "environment overrides applied");
    }

    std::fs::create_dir_all(&config.infra.paths.state_dir).context("failed to create state directory")?;

    let slow_handler_warn = std::time::Duration::from_millis(config.bootstrap.timeouts.slow_handler_warn_ms);
    let bus = EventBus::new(slow_handler_warn);

    let dedup_window = std::time::Duration::from_secs(config.infra.telemetry.dedup_window_secs);
    tokio::spawn(logging::run_pump(Arc::clone(&bus), log_rx, dedup_window));

    let shutdown = CancellationToken::new();

    let persistence_debounce = std::time::Duration::from_millis(config.bootstrap.timeouts.persistence_debounce_ms);
    let memory_store = MemoryStore::new(config.infra.paths.memory_file.clone(), persistence_debounce);

    let mut services: Vec<(Arc<dyn Service>, Arc<ServiceContext>)> = Vec::new();

    macro_rules! start_service {
        ($service:expr) => {{
            let service: Arc<dyn Service> = $service;
            let ctx = ServiceContext::new(service.name(), Arc::clone(&bus), Arc::clone(&config), shutdown.clone());
            Arc::clone(&service).start(Arc::clone(&ctx)).await.with_context(|| format!("failed to start {}", ctx.name))?;
            cantina_core::service::note_service_started();
            services.push((service, ctx));
        }};
    }

    // Startup order mirrors dependency direction: memory and mode state
    // first (everything else reads/reacts to them), then the command path,
    // then the timeline/brain planners that drive audio, then the
    // externally-facing front ends last.
    start_service!(memory_store);
    start_service!(ModeManager::new());
    start_service!(CommandDispatcher::new());
    start_service!(TimelineExecutor::new());
    start_service!(Brain::new());
    start_service!(WebBridge::new());
    start_service!(Cli::new());

    info!(port = config.infra.bind.http_port, "cantina-os ready");

    let stats_shutdown = shutdown.clone();
    let stats_started = Instant::now();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    info!(
                        uptime_secs = stats_started.elapsed().as_secs(),
                        running_services = cantina_core::service::RUNNING_SERVICE_COUNT.load(std::sync::atomic::Ordering::Relaxed),
                        total_events = bus.total_emitted(),
                        "runtime statistics"
                    );
                }
                _ = stats_shutdown.cancelled() => break,
            }
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received SIGINT, shutting down gracefully");
        }
        _ = async {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
                sigterm.recv().await;
            }
            #[cfg(not(unix))]
            std::future::pending::<()>().await;
        } => {
            info!("received SIGTERM, shutting down gracefully");
        }
    }

    shutdown.cancel();
    for (service, ctx) in &services {
        ctx.stop_service(Arc::clone(service)).await;
        cantina_core::service::note_service_stopped();
    }

    info!("shutdown complete");
    Ok(())
}
