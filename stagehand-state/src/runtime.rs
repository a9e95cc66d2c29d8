use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot, Mutex, RwLock};
use tokio::time::Instant;

use stagehand_core::{config, Config, DirQueue, LocalDirStore, MessageQueue, ObjectStore};
use stagehand_sync::pipeline::{self, SyncOptions, SyncRoute};
use stagehand_sync::LogObserver;

use crate::aggregator::{AggregatorConfig, DrainReport, StateAggregator};
use crate::error::{io_err, DaemonError};
use crate::lease::{LeaseConfig, LeaseLock};
use crate::paths::{run_dir, socket_path};
use crate::protocol::{DaemonRequest, DaemonResponse};
use crate::reader::read_state;

// ---------------------------------------------------------------------------
// Shared engine
// ---------------------------------------------------------------------------

/// Everything the daemon's tasks share: configuration, ports and the
/// components built on them.
pub struct Engine {
    config: Config,
    store: Arc<dyn ObjectStore>,
    queue: Arc<dyn MessageQueue>,
    aggregator: StateAggregator,
    lease: LeaseLock,
    drain_gate: Mutex<()>,
    activity: RwLock<Activity>,
    started_at_unix: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
struct Activity {
    last_sync: Option<SyncSummary>,
    last_drain_at_unix: Option<u64>,
    last_drain: Option<DrainReport>,
    last_drain_error: Option<String>,
}

impl Engine {
    pub fn new(config: Config, store: Arc<dyn ObjectStore>, queue: Arc<dyn MessageQueue>) -> Self {
        let aggregator = StateAggregator::new(
            store.clone(),
            queue.clone(),
            AggregatorConfig::from_settings(&config.state),
        );
        let lease = LeaseLock::new(
            store.clone(),
            LeaseConfig::from_settings(config.state.lock_key.clone(), &config.lease),
        );
        Self {
            config,
            store,
            queue,
            aggregator,
            lease,
            drain_gate: Mutex::new(()),
            activity: RwLock::new(Activity::default()),
            started_at_unix: unix_seconds_now(),
        }
    }

    /// Engine over the local state store and directory queue named in `config`.
    pub fn local(config: Config) -> Self {
        let store: Arc<dyn ObjectStore> = Arc::new(LocalDirStore::new(&config.state.store_root));
        let queue: Arc<dyn MessageQueue> = Arc::new(DirQueue::new(&config.state.queue_dir));
        Self::new(config, store, queue)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// One drain cycle. Cycles never overlap.
    pub async fn drain(&self) -> Result<DrainReport, DaemonError> {
        let _gate = self.drain_gate.lock().await;
        let result = self.aggregator.drain_and_fold().await;
        let mut activity = self.activity.write().await;
        activity.last_drain_at_unix = Some(unix_seconds_now());
        match result {
            Ok(report) => {
                activity.last_drain = Some(report.clone());
                activity.last_drain_error = None;
                Ok(report)
            }
            Err(err) => {
                activity.last_drain_error = Some(err.to_string());
                Err(err.into())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Sync jobs
// ---------------------------------------------------------------------------

struct SyncJob {
    route: SyncRoute,
    dry_run: bool,
    source: &'static str,
    respond_to: oneshot::Sender<Result<SyncSummary, String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncSummary {
    pub route: SyncRoute,
    pub source: String,
    pub dry_run: bool,
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub finished_at_unix: u64,
    pub duration_ms: u128,
}

impl SyncSummary {
    fn from_run(
        run: &pipeline::SyncRun,
        route: SyncRoute,
        source: &'static str,
        duration: Duration,
    ) -> Self {
        let (added, updated, deleted, unchanged, failed) = match &run.report {
            Some(report) => (
                report.added,
                report.updated,
                report.deleted,
                report.unchanged,
                report.failures.len(),
            ),
            None => (
                run.plan.to_add.len(),
                run.plan.to_update.len(),
                run.plan.to_delete.len(),
                run.plan.unchanged.len(),
                0,
            ),
        };
        Self {
            route,
            source: source.to_string(),
            dry_run: run.report.is_none(),
            added,
            updated,
            deleted,
            unchanged,
            failed,
            finished_at_unix: unix_seconds_now(),
            duration_ms: duration.as_millis(),
        }
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Run the daemon runtime until `stop` or ctrl-c.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    let config = config::load_at(&home)?;
    ensure_runtime_dirs(&home, &config)?;
    let engine = Arc::new(Engine::local(config));

    let (sync_tx, sync_rx) = mpsc::channel::<SyncJob>(64);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let watcher_handle = {
        let shutdown = shutdown_tx.clone();
        let engine = engine.clone();
        let sync_tx = sync_tx.clone();
        tokio::spawn(async move {
            let result = if engine.config.daemon.watch_source {
                watcher_task(engine, sync_tx, shutdown.subscribe()).await
            } else {
                Ok(())
            };
            if result.is_err() {
                let _ = shutdown.send(());
            }
            result
        })
    };

    let processor_handle = {
        let shutdown = shutdown_tx.clone();
        let engine = engine.clone();
        tokio::spawn(async move {
            let result = sync_processor_task(engine, sync_rx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let drain_handle = {
        let shutdown = shutdown_tx.clone();
        let engine = engine.clone();
        tokio::spawn(async move {
            let result = drain_task(engine, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let engine = engine.clone();
        let sync_tx = sync_tx.clone();
        let home = home.clone();
        tokio::spawn(async move {
            let result =
                socket_server_task(home, engine, sync_tx, shutdown.clone(), shutdown.subscribe())
                    .await;
            let _ = shutdown.send(());
            result
        })
    };
    drop(sync_tx);

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    tracing::info!(
        socket = %socket_path(&home).display(),
        drain_interval_secs = engine.config.drain_interval().as_secs(),
        "daemon started",
    );

    let (watcher_result, processor_result, drain_result, socket_result, signal_result) = tokio::join!(
        watcher_handle,
        processor_handle,
        drain_handle,
        socket_handle,
        signal_handle
    );

    handle_join("watcher", watcher_result)?;
    handle_join("sync_processor", processor_result)?;
    handle_join("drain", drain_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

async fn watcher_task(
    engine: Arc<Engine>,
    sync_tx: mpsc::Sender<SyncJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let source = engine.config.site.source_dir.clone();
    if !source.exists() {
        fs::create_dir_all(&source).map_err(|e| io_err(&source, e))?;
    }
    // FSEvents reports real paths (/private/var/... on macOS).
    let source = fs::canonicalize(&source).unwrap_or(source);

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut _watcher: RecommendedWatcher = recommended_watcher(move |event| {
        let _ = event_tx.send(event);
    })?;
    _watcher.watch(&source, RecursiveMode::Recursive)?;
    tracing::info!(path = %source.display(), "watching source directory");

    let mut debounce = Debounce::new(Duration::from_millis(engine.config.daemon.debounce_ms));

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = wait_until(debounce.deadline()) => {
                debounce.clear();
                match enqueue_sync(&sync_tx, SyncRoute::Publish, false, "watcher").await {
                    Ok(summary) => tracing::info!(
                        added = summary.added,
                        updated = summary.updated,
                        deleted = summary.deleted,
                        failed = summary.failed,
                        duration_ms = summary.duration_ms,
                        "watcher-triggered publish completed",
                    ),
                    Err(err) => tracing::error!(error = %err, "watcher-triggered publish failed"),
                }
            }
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(error = %err, "watcher event error");
                        continue;
                    }
                };
                if is_relevant_event(&event, &source) {
                    debounce.touch(Instant::now());
                }
            }
        }
    }

    Ok(())
}

async fn sync_processor_task(
    engine: Arc<Engine>,
    mut sync_rx: mpsc::Receiver<SyncJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            maybe_job = sync_rx.recv() => {
                let Some(job) = maybe_job else { break };
                let outcome = process_job(&engine, &job).await;
                let _ = job.respond_to.send(outcome);
            }
        }
    }
    Ok(())
}

async fn process_job(engine: &Engine, job: &SyncJob) -> Result<SyncSummary, String> {
    let started = Instant::now();
    let options = SyncOptions {
        dry_run: job.dry_run,
        cache_policy: None,
    };
    let result = pipeline::run_reported(
        &engine.config,
        job.route,
        &options,
        &LogObserver,
        engine.queue.as_ref(),
    )
    .await;

    match result {
        Ok(run) => {
            let summary = SyncSummary::from_run(&run, job.route, job.source, started.elapsed());
            if !summary.dry_run {
                engine.activity.write().await.last_sync = Some(summary.clone());
            }
            Ok(summary)
        }
        Err(err) => {
            tracing::error!(route = %job.route, error = %err, "sync failed");
            Err(err.to_string())
        }
    }
}

async fn drain_task(
    engine: Arc<Engine>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(engine.config.drain_interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                // A failed cycle is reported; the next tick starts from scratch.
                if let Err(err) = engine.drain().await {
                    tracing::error!(error = %err, "drain cycle failed");
                }
            }
        }
    }
    Ok(())
}

async fn socket_server_task(
    home: PathBuf,
    engine: Arc<Engine>,
    sync_tx: mpsc::Sender<SyncJob>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = socket_path(&home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let engine = engine.clone();
                let sync_tx = sync_tx.clone();
                let shutdown_tx = shutdown_tx.clone();
                let socket = socket.clone();
                tokio::spawn(async move {
                    if let Err(err) =
                        handle_socket_client(stream, &socket, engine, sync_tx, shutdown_tx).await
                    {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    socket: &Path,
    engine: Arc<Engine>,
    sync_tx: mpsc::Sender<SyncJob>,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: DaemonRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let stop = request.cmd == "stop";
        let response = dispatch(&engine, request, socket, &sync_tx, &shutdown_tx).await;
        write_response(&mut writer, &response).await?;
        if stop {
            break;
        }
    }

    Ok(())
}

/// Execute one request against the engine.
async fn dispatch(
    engine: &Engine,
    request: DaemonRequest,
    socket: &Path,
    sync_tx: &mpsc::Sender<SyncJob>,
    shutdown_tx: &broadcast::Sender<()>,
) -> DaemonResponse {
    let result: Result<Value, DaemonError> = match request.cmd.as_str() {
        "status" => Ok(build_status_payload(engine, socket).await),
        "lock" => match request.owner {
            Some(owner) => engine
                .lease
                .try_acquire(&owner)
                .await
                .map(|status| json!({ "lock": status, "message": status.to_string() }))
                .map_err(DaemonError::from),
            None => Err(DaemonError::Protocol("lock requires 'owner'".to_string())),
        },
        "state" => read_state(
            engine.store.as_ref(),
            &engine.config.state.state_key,
            request.if_none_match.as_deref(),
        )
        .await
        .map_err(DaemonError::from)
        .and_then(|read| Ok(serde_json::to_value(read)?)),
        "enqueue" => match request.delta {
            Some(delta) => enqueue_delta(engine, &delta).await,
            None => Err(DaemonError::Protocol("enqueue requires 'delta'".to_string())),
        },
        "sync" => {
            let route = request.route.unwrap_or(SyncRoute::Publish);
            enqueue_sync(sync_tx, route, request.dry_run, "socket")
                .await
                .and_then(|summary| Ok(serde_json::to_value(summary)?))
        }
        "drain" => engine
            .drain()
            .await
            .and_then(|report| Ok(serde_json::to_value(report)?)),
        "stop" => {
            let _ = shutdown_tx.send(());
            Ok(json!({ "stopping": true }))
        }
        other => Err(DaemonError::Protocol(format!("unknown command '{other}'"))),
    };

    match result {
        Ok(data) => DaemonResponse::ok(data),
        Err(err) => DaemonResponse::error(err.to_string()),
    }
}

async fn enqueue_delta(
    engine: &Engine,
    delta: &stagehand_core::DeltaMessage,
) -> Result<Value, DaemonError> {
    let body = delta.to_body()?;
    let id = engine
        .queue
        .send(body)
        .await
        .map_err(|err| DaemonError::State(err.into()))?;
    Ok(json!({ "id": id }))
}

async fn build_status_payload(engine: &Engine, socket: &Path) -> Value {
    let activity = engine.activity.read().await.clone();
    json!({
        "running": true,
        "started_at_unix": engine.started_at_unix,
        "socket": socket.display().to_string(),
        "source_dir": engine.config.site.source_dir.display().to_string(),
        "state_store": engine.config.state.store_root.display().to_string(),
        "queue_dir": engine.config.state.queue_dir.display().to_string(),
        "watch_source": engine.config.daemon.watch_source,
        "drain_interval_secs": engine.config.drain_interval().as_secs(),
        "last_sync": activity.last_sync,
        "last_drain_at_unix": activity.last_drain_at_unix,
        "last_drain": activity.last_drain,
        "last_drain_error": activity.last_drain_error,
    })
}

async fn enqueue_sync(
    sync_tx: &mpsc::Sender<SyncJob>,
    route: SyncRoute,
    dry_run: bool,
    source: &'static str,
) -> Result<SyncSummary, DaemonError> {
    let (tx, rx) = oneshot::channel();
    sync_tx
        .send(SyncJob {
            route,
            dry_run,
            source,
            respond_to: tx,
        })
        .await
        .map_err(|_| DaemonError::ChannelClosed("sync queue"))?;

    let outcome = rx
        .await
        .map_err(|_| DaemonError::ChannelClosed("sync response"))?;
    outcome.map_err(DaemonError::Protocol)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Trailing-edge debounce: fires once the source has been quiet for `window`.
#[derive(Debug, Clone)]
struct Debounce {
    window: Duration,
    deadline: Option<Instant>,
}

impl Debounce {
    fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    fn touch(&mut self, now: Instant) {
        self.deadline = Some(now + self.window);
    }

    fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    fn clear(&mut self) {
        self.deadline = None;
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

fn is_relevant_event(event: &Event, source: &Path) -> bool {
    let kind_matters = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    );
    kind_matters
        && event
            .paths
            .iter()
            .any(|path| path.starts_with(source) && !is_temp_file(path))
}

fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.ends_with(".tmp") || name.ends_with('~') || name.starts_with(".#"))
        .unwrap_or(false)
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(home: &Path, config: &Config) -> Result<(), DaemonError> {
    for dir in [
        run_dir(home),
        config.state.store_root.clone(),
        config.state.queue_dir.clone(),
    ] {
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        }
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Install the `tracing` subscriber on stderr: `RUST_LOG` or `default_filter`.
pub fn init_tracing_with(default_filter: &str) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn init_tracing() {
    init_tracing_with("info");
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}
