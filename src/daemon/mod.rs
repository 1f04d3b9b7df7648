// Daemon module: queue runtime wiring, config resolution and the HTTP daemon.

pub mod events;
pub mod executor;
pub mod scheduler;
pub mod sync;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::sync::{broadcast, watch};

use crate::daemon::scheduler::Scheduler;
use crate::daemon::sync::RecordSync;
use crate::installer::{ContentInstaller, FsInstaller};
use crate::models::{AppConfig, JobSnapshot};
use crate::server::{self, AppState};
use crate::spawner::{SystemSpawner, ToolSpawner};
use crate::storage::{ConfigSource, FileConfigSource, FixedConfigSource, JsonRecordStore};

const APP_DIR: &str = "workshop-queue";

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// A loaded config plus the file it came from, if any.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: AppConfig,
    pub path: Option<PathBuf>,
    /// Where the config file is looked up, in order. Re-checked on every
    /// concurrency query so a file created later still takes effect.
    pub candidates: Vec<PathBuf>,
}

fn read_config_file(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config file {}", path.display()))
}

/// Config file locations when no `--config` path is given:
///   1. `WSQ_CONFIG_DIR/config.json`
///   2. platform config dir (`dirs::config_dir()/workshop-queue/config.json`)
///   3. `{data_dir}/config.json`
pub fn config_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Ok(config_dir) = std::env::var("WSQ_CONFIG_DIR") {
        candidates.push(PathBuf::from(config_dir).join("config.json"));
    }
    if let Some(config_dir) = dirs::config_dir() {
        candidates.push(config_dir.join(APP_DIR).join("config.json"));
    }
    candidates.push(resolve_data_dir(None).join("config.json"));
    candidates
}

/// Locate the config file: an explicit `--config` path (must exist), else
/// the first existing entry of [`config_candidates`].
pub fn resolve_config_path(config_path: Option<&Path>) -> Result<Option<PathBuf>> {
    if let Some(path) = config_path {
        if path.exists() {
            return Ok(Some(path.to_path_buf()));
        }
        return Err(anyhow::anyhow!("Config file not found: {}", path.display()));
    }

    Ok(config_candidates().into_iter().find(|p| p.exists()))
}

/// Load the config, falling back to defaults when no file is found.
pub fn load_config(config_path: Option<&Path>) -> Result<LoadedConfig> {
    let candidates = match config_path {
        Some(path) => vec![path.to_path_buf()],
        None => config_candidates(),
    };
    match resolve_config_path(config_path)? {
        Some(path) => {
            let config = read_config_file(&path)?;
            tracing::info!("Loaded config from: {}", path.display());
            Ok(LoadedConfig {
                config,
                path: Some(path),
                candidates,
            })
        }
        None => {
            tracing::info!("No config file found, using defaults");
            Ok(LoadedConfig {
                config: AppConfig::default(),
                path: None,
                candidates,
            })
        }
    }
}

/// Resolve the data directory: explicit override, then `WSQ_DATA_DIR`, then
/// the platform data dir (`dirs::data_dir()/workshop-queue`).
pub fn resolve_data_dir(override_dir: Option<&Path>) -> PathBuf {
    if let Some(dir) = override_dir {
        return dir.to_path_buf();
    }

    if let Ok(d) = std::env::var("WSQ_DATA_DIR") {
        return PathBuf::from(d);
    }

    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

/// Pick the data dir for a loaded config, honoring the CLI override first.
pub fn effective_data_dir(config: &AppConfig, override_dir: Option<&Path>) -> PathBuf {
    match (override_dir, config.data_dir.as_ref()) {
        (Some(dir), _) => dir.to_path_buf(),
        (None, Some(dir)) => dir.clone(),
        (None, None) => resolve_data_dir(None),
    }
}

// ---------------------------------------------------------------------------
// Runtime wiring
// ---------------------------------------------------------------------------

/// The running queue and the record layer it writes to.
pub struct QueueRuntime {
    pub scheduler: Scheduler,
    pub records: Arc<RecordSync>,
}

/// Open the record layer (JSON store plus filesystem installer) under `data_dir`.
pub async fn open_records(data_dir: &Path) -> Result<Arc<RecordSync>> {
    let store = JsonRecordStore::new(data_dir.to_path_buf())
        .await
        .context("Failed to open record store")?;
    let installer: Arc<dyn ContentInstaller> = Arc::new(FsInstaller);
    Ok(Arc::new(RecordSync::new(Arc::new(store), installer)))
}

/// Start a scheduler backed by real processes, the JSON record store and the
/// filesystem installer. `concurrency_override` pins the limit instead of
/// re-reading the config file.
pub async fn start_queue(
    loaded: &LoadedConfig,
    data_dir: &Path,
    concurrency_override: Option<usize>,
) -> Result<QueueRuntime> {
    let records = open_records(data_dir).await?;
    let config: Arc<dyn ConfigSource> = match concurrency_override {
        Some(limit) => Arc::new(FixedConfigSource::new(limit)),
        None => Arc::new(FileConfigSource::new(loaded.candidates.clone())),
    };
    let spawner: Arc<dyn ToolSpawner> = Arc::new(SystemSpawner);
    let scheduler = Scheduler::start(spawner, Arc::clone(&records), config);
    Ok(QueueRuntime { scheduler, records })
}

/// Wait for Ctrl+C, or SIGTERM on unix.
pub async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl+C signal");
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM signal");
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        tracing::info!("Received Ctrl+C signal");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Daemon bootstrap
// ---------------------------------------------------------------------------

const SERVER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Serve `router` until `shutdown` flips to `true`, then drain connections.
pub async fn serve_until_shutdown(
    listener: tokio::net::TcpListener,
    router: axum::Router,
    mut shutdown: watch::Receiver<bool>,
) {
    let result = axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stopping| *stopping).await;
            tracing::info!("HTTP server received shutdown signal");
        })
        .await;
    if let Err(e) = result {
        tracing::error!("HTTP server error: {}", e);
    }
}

/// Run the HTTP daemon in the foreground until a shutdown signal arrives.
///
/// On shutdown the HTTP server stops accepting connections and every running
/// download is cancelled before returning.
pub async fn start_daemon(
    config_path: Option<&Path>,
    data_dir_override: Option<&Path>,
    host_override: Option<&str>,
    port_override: Option<u16>,
) -> Result<()> {
    let loaded = load_config(config_path)?;
    let mut config = loaded.config.clone();

    if let Some(h) = host_override {
        config.host = h.to_string();
    }
    if let Some(p) = port_override {
        config.port = p;
    }

    let data_dir = effective_data_dir(&config, data_dir_override);
    config.data_dir = Some(data_dir.clone());
    tokio::fs::create_dir_all(&data_dir)
        .await
        .context("Failed to create data directory")?;
    tracing::info!("Data directory: {}", data_dir.display());

    let config = Arc::new(config);
    let runtime = start_queue(&loaded, &data_dir, None).await?;

    let (event_tx, _event_rx) = broadcast::channel::<JobSnapshot>(config.broadcast_capacity);
    let bridge = server::sse::bridge_events(&runtime.scheduler, event_tx.clone());
    let (shutdown_tx, _) = watch::channel(false);

    let state = Arc::new(AppState {
        scheduler: runtime.scheduler.clone(),
        records: Arc::clone(&runtime.records),
        event_tx,
        shutdown: shutdown_tx.clone(),
        config: Arc::clone(&config),
        start_time: Instant::now(),
    });

    let router = server::create_router(state);
    let bind_addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;

    tracing::info!("Daemon started. Listening on http://{}", bind_addr);
    tracing::info!("Press Ctrl+C to stop.");

    let server_handle = tokio::spawn(serve_until_shutdown(
        listener,
        router,
        shutdown_tx.subscribe(),
    ));

    wait_for_shutdown_signal().await?;

    // Ends open SSE streams as well as the accept loop.
    shutdown_tx.send_replace(true);
    if let Err(e) = runtime.scheduler.shutdown().await {
        tracing::warn!("Scheduler shutdown: {}", e);
    }
    bridge.unsubscribe();

    if tokio::time::timeout(SERVER_DRAIN_TIMEOUT, server_handle)
        .await
        .is_err()
    {
        tracing::warn!("HTTP server did not drain in time, exiting anyway");
    }
    tracing::info!("Daemon exited cleanly.");
    Ok(())
}
