use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sentinel_recorder::alert::{AlertHandler, AlertIngest};
use sentinel_recorder::broadcast::{
    BroadcastController, LivePlatform, ObsConnector, SourceSettings, YouTubePlatform,
};
use sentinel_recorder::config::{AppConfig, ConfigStore, MetadataBackend};
use sentinel_recorder::detection::{build_detectors, DetectionStage};
use sentinel_recorder::events::{EventBus, SystemEvent};
use sentinel_recorder::persistence::{
    FfmpegTool, HttpVerifier, MetadataStore, ObjectStorage, PersistencePipeline,
    PostgrestMetadataStore, SqliteMetadataStore, StatusFlagStore, SupabaseStorage,
};
use sentinel_recorder::recording::{RecordingController, SessionResources, WorkerSettings};
use sentinel_recorder::state::AppState;
use sentinel_recorder::stream::FrameRelay;
use sentinel_recorder::utils::{bind_tcp_listener, parse_bind_addr};
use sentinel_recorder::video::network_source::probe_camera_status;
use sentinel_recorder::video::{
    Annotator, DeviceSourceFactory, FfmpegSinkFactory, FrameSourceAdapter,
};
use sentinel_recorder::web;

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// Sentinel Recorder command line arguments
#[derive(Parser, Debug)]
#[command(name = "sentinel-recorder")]
#[command(version, about = "Alert-driven recording and live streaming for security cameras", long_about = None)]
struct CliArgs {
    /// Relay listen address (overrides database config)
    #[arg(short = 'a', long, value_name = "ADDRESS")]
    address: Option<String>,

    /// Relay HTTP port (overrides database config)
    #[arg(short = 'p', long, value_name = "PORT")]
    port: Option<u16>,

    /// Data directory path (default: /etc/sentinel-recorder)
    #[arg(short = 'd', long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Record locally without contacting the broadcaster
    #[arg(long)]
    record_only: bool,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose, args.json_logs);

    tracing::info!("Starting Sentinel Recorder v{}", env!("CARGO_PKG_VERSION"));

    let data_dir = args.data_dir.clone().unwrap_or_else(get_data_dir);
    tracing::info!("Data directory: {}", data_dir.display());
    tokio::fs::create_dir_all(&data_dir).await?;

    let db_path = data_dir.join("sentinel.db");
    let config_store = ConfigStore::new(&db_path).await?;

    let stored_dir = PathBuf::from(&config_store.get().recording.directory);
    if !stored_dir.is_absolute() {
        let rebased = data_dir.join(&stored_dir).to_string_lossy().to_string();
        tracing::warn!("Recording directory is relative, rebasing to {}", rebased);
        config_store
            .update(|c| c.recording.directory = rebased)
            .await?;
    }
    spawn_config_watcher(&config_store);
    let config = effective_config(&config_store, &args);

    for feature in config.disabled_features() {
        tracing::warn!("Disabled: {}", feature);
    }

    if let Some(url) = &config.camera.network_url {
        probe_camera_status(
            url,
            config.camera.network_username.as_deref(),
            config.camera.network_password.as_deref(),
        )
        .await;
    }

    let events = Arc::new(EventBus::new());
    spawn_event_logger(events.subscribe());

    // Metadata store and live flag
    let metadata: Arc<dyn MetadataStore> = match config.metadata.backend {
        MetadataBackend::Postgrest if config.storage_configured() => Arc::new(
            PostgrestMetadataStore::new(&config.storage, &config.metadata)?,
        ),
        backend => {
            if backend == MetadataBackend::Postgrest {
                tracing::warn!("PostgREST metadata needs the storage URL/key, using SQLite");
            }
            Arc::new(SqliteMetadataStore::new(config_store.pool().clone(), &config.metadata).await?)
        }
    };
    let status = Arc::new(StatusFlagStore::new(
        Arc::clone(&metadata),
        config.device.user_id.clone(),
    ));
    if let Err(e) = status.set_live(false, None).await {
        tracing::warn!("Failed to reset live status: {}", e);
    }

    let relay = Arc::new(FrameRelay::with_fps(config.camera.fps));

    // Broadcaster
    let broadcast = if args.record_only || !config.broadcaster.enabled {
        tracing::info!("Live streaming disabled, recording only");
        None
    } else {
        let platform = YouTubePlatform::from_config(&config.live_platform)?
            .map(|p| Arc::new(p) as Arc<dyn LivePlatform>);
        let source = SourceSettings {
            url: config.relay.stream_url(),
            width: config.camera.width,
            height: config.camera.height,
            fps: config.camera.fps,
        };
        let controller = Arc::new(
            BroadcastController::new(
                &config.broadcaster,
                source,
                Arc::new(ObsConnector::new(&config.broadcaster)),
                platform,
            )
            .with_events(events.clone())
            .with_status_flag(status.clone()),
        );
        match controller.connect_with_retries().await {
            Ok(()) => Some(controller),
            Err(e) => {
                tracing::warn!("Broadcaster unreachable, recording only: {}", e);
                None
            }
        }
    };

    // Persistence
    let storage = SupabaseStorage::from_config(&config.storage)?
        .map(|s| Arc::new(s) as Arc<dyn ObjectStorage>);
    let pipeline = Arc::new(
        PersistencePipeline::new(
            &config,
            Arc::new(FfmpegTool::new(
                &config.recording.ffmpeg_path,
                &config.recording.ffprobe_path,
            )),
            storage,
            Arc::new(HttpVerifier::new(Duration::from_secs(
                config.storage.verify_timeout_secs,
            ))?),
            metadata,
        )
        .with_events(events.clone()),
    );

    // Capture pipeline
    let (person, face) = build_detectors(&config.detection);
    let resources = Arc::new(SessionResources {
        adapter: FrameSourceAdapter::new(
            Arc::new(DeviceSourceFactory::new(&config.camera)),
            &config.camera,
        ),
        sink_factory: Arc::new(FfmpegSinkFactory::new(config.recording.ffmpeg_path.clone())),
        detection: parking_lot::Mutex::new(DetectionStage::new(person, face, &config.detection)),
        annotator: Annotator::new(&config.annotation, &config.detection),
        relay: relay.clone(),
        settings: WorkerSettings::from_config(&config),
    });
    tracing::info!(
        "Capture sources: {:?}",
        resources
            .adapter
            .candidates()
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
    );

    let recorder = Arc::new(RecordingController::new(
        resources,
        config.device.clone(),
        broadcast.clone(),
        Some(status.clone()),
        Some(pipeline),
        Some(events.clone()),
    ));

    // Alert ingest
    let ingest_cancel = CancellationToken::new();
    let ingest_task = if config.alert.broker_host.is_some() {
        let handler: Arc<dyn AlertHandler> = recorder.clone();
        match AlertIngest::new(&config.alert, handler, Some(events.clone())) {
            Ok(ingest) => Some(tokio::spawn(ingest.run(ingest_cancel.clone()))),
            Err(e) => {
                tracing::error!("Alert ingest not started: {}", e);
                None
            }
        }
    } else {
        None
    };

    // Relay server
    let state = AppState::new(
        config_store,
        relay,
        recorder.clone(),
        broadcast.clone(),
        events.clone(),
    );
    let app = web::create_router(state);

    let addr = parse_bind_addr(&config.relay.bind_address, config.relay.port)?;
    let listener = tokio::net::TcpListener::from_std(bind_tcp_listener(addr)?)?;
    tracing::info!(
        "Relay listening on http://{}{}",
        addr,
        config.relay.path
    );

    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for CTRL+C: {}", e);
        }
        tracing::info!("Shutdown signal received");
    };

    tokio::select! {
        _ = shutdown_signal => {}
        result = axum::serve(listener, app) => {
            if let Err(e) = result {
                tracing::error!("HTTP server error: {}", e);
            }
        }
    }

    // Cleanup: stop intake first so no new session opens while draining
    ingest_cancel.cancel();
    if let Some(task) = ingest_task {
        let _ = task.await;
    }
    recorder.shutdown().await;
    if let Some(broadcast) = &broadcast {
        broadcast.stop().await;
    }
    if let Err(e) = status.set_live(false, None).await {
        tracing::warn!("Failed to clear live status: {}", e);
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Stored configuration with environment secrets and CLI overrides applied
///
/// Overrides stay in memory; the database keeps the operator's settings.
fn effective_config(store: &ConfigStore, args: &CliArgs) -> AppConfig {
    let mut config = (*store.get()).clone();
    config.apply_env_overrides();

    if let Some(address) = &args.address {
        config.relay.bind_address = address.clone();
    }
    if let Some(port) = args.port {
        config.relay.port = port;
    }
    config
}

fn init_logging(level: LogLevel, verbose_count: u8, json: bool) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "sentinel_recorder=error,tower_http=error,rumqttc=error",
        LogLevel::Warn => "sentinel_recorder=warn,tower_http=warn,rumqttc=warn",
        LogLevel::Info => "sentinel_recorder=info,tower_http=info,rumqttc=warn",
        LogLevel::Verbose => "sentinel_recorder=debug,tower_http=info,rumqttc=info",
        LogLevel::Debug => "sentinel_recorder=debug,tower_http=debug,rumqttc=debug",
        LogLevel::Trace => "sentinel_recorder=trace,tower_http=debug,rumqttc=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = if json {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
    if let Err(err) = result {
        eprintln!("failed to initialize tracing: {}", err);
    }
}

/// Get the application data directory
fn get_data_dir() -> PathBuf {
    if let Ok(path) = std::env::var("SENTINEL_DATA_DIR") {
        return PathBuf::from(path);
    }
    PathBuf::from("/etc/sentinel-recorder")
}

/// Components read the configuration once at startup
fn spawn_config_watcher(store: &ConfigStore) {
    let mut changes = store.subscribe();
    tokio::spawn(async move {
        while let Ok(change) = changes.recv().await {
            tracing::info!("Configuration '{}' changed; restart to apply", change.key);
        }
    });
}

/// Mirror bus events into the log
fn spawn_event_logger(mut rx: broadcast::Receiver<SystemEvent>) {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(SystemEvent::SystemError {
                    module, message, ..
                }) => tracing::warn!("[{}] {}", module, message),
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => tracing::debug!("Event {}", json),
                    Err(_) => tracing::debug!("Event {}", event.name()),
                },
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!("Event logger lagged by {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}
