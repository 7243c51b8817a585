use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::time::Instant;

use prenv_core::paths::{resources_dir, run_dir, socket_path};
use prenv_core::resources::{list_resources_lenient_at, load_resource_at};
use prenv_core::{settings, ConfigError, ControllerResource, LogFormat, ResourceName, Settings};
use prenv_reconcile::Reconciler;

use crate::error::{io_err, DaemonError};
use crate::protocol::{DaemonRequest, DaemonResponse, DaemonStatus};
use crate::wiring::build_reconciler;
use crate::worker::{
    spawn_worker, unix_seconds_now, StatusBoard, TickSummary, TriggerJob, WorkerHandle,
};

/// Editors and atomic renames emit bursts of events for one save.
const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

enum Command {
    /// A resource file changed on disk; restart (or stop) its worker.
    Reload { name: String },
    /// Tick now and answer with the results. `None` means every resource.
    Reconcile {
        target: Option<String>,
        respond_to: oneshot::Sender<Result<Vec<TickSummary>, String>>,
    },
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    let settings = settings::load_at(home)?;
    init_tracing(settings.log_format);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Run the daemon runtime.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;
    let settings = settings::load_at(&home)?;

    let board: Arc<RwLock<StatusBoard>> = Arc::new(RwLock::new(StatusBoard::new()));
    let started_at_unix = unix_seconds_now();

    let (command_tx, command_rx) = mpsc::channel::<Command>(64);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let watcher_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        let command_tx = command_tx.clone();
        tokio::spawn(async move {
            let result = watcher_task(home, command_tx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let supervisor_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        let board = board.clone();
        tokio::spawn(async move {
            let result =
                supervisor_task(home, settings, board, command_rx, shutdown.clone()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        let board = board.clone();
        tokio::spawn(async move {
            let result = socket_server_task(
                home,
                board,
                command_tx,
                shutdown.clone(),
                shutdown.subscribe(),
                started_at_unix,
            )
            .await;
            let _ = shutdown.send(());
            result
        })
    };

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

    let (watcher_result, supervisor_result, socket_result, signal_result) = tokio::join!(
        watcher_handle,
        supervisor_handle,
        socket_handle,
        signal_handle
    );

    handle_join("watcher", watcher_result)?;
    handle_join("supervisor", supervisor_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

async fn watcher_task(
    home: PathBuf,
    command_tx: mpsc::Sender<Command>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let resources = resources_dir(&home);
    if !resources.exists() {
        fs::create_dir_all(&resources).map_err(|e| io_err(&resources, e))?;
    }

    // Canonicalize so that FSEvents paths (which arrive as real paths, e.g.
    // /private/var/... on macOS) match the `starts_with` checks below.
    let resources = fs::canonicalize(&resources).unwrap_or(resources);

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher: RecommendedWatcher = recommended_watcher(move |event| {
        let _ = event_tx.send(event);
    })?;
    watcher.watch(&resources, RecursiveMode::NonRecursive)?;

    let mut debounce = HashMap::<PathBuf, Instant>::new();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(error = %err, "watcher event error");
                        continue;
                    }
                };
                if !is_relevant_event_kind(&event.kind) {
                    continue;
                }

                for path in event.paths {
                    let Some(name) = resource_name_for_path(&path, &resources) else {
                        continue;
                    };
                    if !should_process_event(&mut debounce, &path, Instant::now()) {
                        continue;
                    }
                    tracing::info!(resource = %name, "resource definition changed");
                    if command_tx.send(Command::Reload { name }).await.is_err() {
                        return Err(DaemonError::ChannelClosed("supervisor"));
                    }
                }
            }
        }
    }

    Ok(())
}

/// Owns one worker per declared resource.
async fn supervisor_task(
    home: PathBuf,
    settings: Settings,
    board: Arc<RwLock<StatusBoard>>,
    mut command_rx: mpsc::Receiver<Command>,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DaemonError> {
    let reconciler = build_reconciler(&home, &settings);
    let deadline = settings.tick_deadline();
    let mut shutdown_rx = shutdown_tx.subscribe();
    let mut workers: HashMap<String, WorkerHandle> = HashMap::new();

    let spawn = |resource: ControllerResource, reconciler: &Reconciler| {
        spawn_worker(
            resource,
            reconciler.clone(),
            deadline,
            board.clone(),
            shutdown_tx.subscribe(),
        )
    };

    for (path, parsed) in list_resources_lenient_at(&home)? {
        match parsed {
            Ok(resource) => {
                let name = resource.name.0.clone();
                workers.insert(name, spawn(resource, &reconciler));
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "skipping unreadable resource");
            }
        }
    }
    tracing::info!(workers = workers.len(), "supervisor started");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            command = command_rx.recv() => {
                let Some(command) = command else { break };
                match command {
                    Command::Reload { name } => {
                        if let Some(worker) = workers.remove(&name) {
                            worker.stop().await;
                            board.write().await.remove(&name);
                        }
                        match load_resource_at(&home, &ResourceName::from(name.as_str())) {
                            Ok(resource) => {
                                workers.insert(name, spawn(resource, &reconciler));
                            }
                            Err(ConfigError::ResourceNotFound { .. }) => {
                                tracing::info!(resource = %name, "resource removed, worker stopped");
                            }
                            Err(err) => {
                                tracing::warn!(resource = %name, error = %err, "resource unreadable, worker stopped");
                            }
                        }
                    }
                    Command::Reconcile { target, respond_to } => {
                        let mut pending = Vec::new();
                        let mut names: Vec<&String> = match &target {
                            Some(name) => match workers.get_key_value(name) {
                                Some((name, _)) => vec![name],
                                None => {
                                    let err = DaemonError::UnknownResource(name.clone());
                                    let _ = respond_to.send(Err(err.to_string()));
                                    continue;
                                }
                            },
                            None => workers.keys().collect(),
                        };
                        names.sort();
                        for name in names {
                            let (tx, rx) = oneshot::channel();
                            if workers[name].trigger_tx.send(TriggerJob { respond_to: tx }).await.is_ok() {
                                pending.push(rx);
                            }
                        }
                        tokio::spawn(async move {
                            let mut summaries = Vec::with_capacity(pending.len());
                            for rx in pending {
                                if let Ok(summary) = rx.await {
                                    summaries.push(summary);
                                }
                            }
                            let _ = respond_to.send(Ok(summaries));
                        });
                    }
                }
            }
        }
    }

    for (_, worker) in workers.drain() {
        worker.stop().await;
    }
    tracing::info!("supervisor stopped");
    Ok(())
}

async fn socket_server_task(
    home: PathBuf,
    board: Arc<RwLock<StatusBoard>>,
    command_tx: mpsc::Sender<Command>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
    started_at_unix: u64,
) -> Result<(), DaemonError> {
    let run = run_dir(&home);
    if !run.exists() {
        fs::create_dir_all(&run).map_err(|e| io_err(&run, e))?;
    }

    let socket = socket_path(&home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "daemon listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let socket = socket.clone();
                let board = board.clone();
                let command_tx = command_tx.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(
                        stream,
                        socket,
                        board,
                        command_tx,
                        shutdown_tx,
                        started_at_unix,
                    ).await {
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
    socket: PathBuf,
    board: Arc<RwLock<StatusBoard>>,
    command_tx: mpsc::Sender<Command>,
    shutdown_tx: broadcast::Sender<()>,
    started_at_unix: u64,
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

        let request: Result<DaemonRequest, _> = serde_json::from_str(&line);
        let request = match request {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request: {err}")),
                )
                .await?;
                continue;
            }
        };

        let stopping = request == DaemonRequest::Stop;
        let response = match request {
            DaemonRequest::Status => DaemonResponse::Status(
                daemon_status(&socket, &board, started_at_unix).await,
            ),
            DaemonRequest::Reconcile { resource } => {
                match reconcile_now(&command_tx, resource).await {
                    Ok(summaries) => DaemonResponse::Reconciled { summaries },
                    Err(err) => DaemonResponse::error(err),
                }
            }
            DaemonRequest::Stop => {
                let _ = shutdown_tx.send(());
                DaemonResponse::Stopping
            }
        };

        write_response(&mut writer, &response).await?;
        if stopping {
            break;
        }
    }

    Ok(())
}

async fn reconcile_now(
    command_tx: &mpsc::Sender<Command>,
    target: Option<String>,
) -> Result<Vec<TickSummary>, String> {
    let (respond_to, response) = oneshot::channel();
    command_tx
        .send(Command::Reconcile { target, respond_to })
        .await
        .map_err(|_| DaemonError::ChannelClosed("supervisor").to_string())?;
    response
        .await
        .map_err(|_| DaemonError::ChannelClosed("reconcile response").to_string())?
}

async fn daemon_status(
    socket: &Path,
    board: &RwLock<StatusBoard>,
    started_at_unix: u64,
) -> DaemonStatus {
    DaemonStatus {
        pid: std::process::id(),
        started_at_unix,
        socket: socket.to_path_buf(),
        resources: board.read().await.clone(),
    }
}

fn is_relevant_event_kind(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

/// `<resources>/<name>.yaml` → `name`. Temp files and other directories are ignored.
fn resource_name_for_path(path: &Path, resources: &Path) -> Option<String> {
    if path.parent()? != resources {
        return None;
    }
    let is_yaml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("yaml"))
        .unwrap_or(false);
    if !is_yaml {
        return None;
    }
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_string)
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

fn should_process_event(
    debounce: &mut HashMap<PathBuf, Instant>,
    path: &Path,
    now: Instant,
) -> bool {
    should_process_event_with_threshold(debounce, path, now, DEBOUNCE_WINDOW)
}

fn should_process_event_with_threshold(
    debounce: &mut HashMap<PathBuf, Instant>,
    path: &Path,
    now: Instant,
    threshold: Duration,
) -> bool {
    debounce.retain(|_, seen_at| now.duration_since(*seen_at) <= Duration::from_secs(30));
    match debounce.get(path) {
        Some(last_seen) if now.duration_since(*last_seen) < threshold => false,
        _ => {
            debounce.insert(path.to_path_buf(), now);
            true
        }
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    for dir in [resources_dir(home), run_dir(home)] {
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

/// Install the global subscriber. `RUST_LOG` overrides the default `info` filter.
pub fn init_tracing(format: LogFormat) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter).with_target(false);
    let _ = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::WorkerStatus;

    use serde_json::json;
    use tokio::time::advance;

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn debounce_coalesces_rapid_events() {
        let threshold = Duration::from_millis(100);
        let mut debounce = HashMap::<PathBuf, Instant>::new();
        let path = PathBuf::from("/tmp/shop.yaml");
        let mut reloads = 0usize;

        for _ in 0..5 {
            if should_process_event_with_threshold(&mut debounce, &path, Instant::now(), threshold)
            {
                reloads += 1;
            }
            advance(Duration::from_millis(10)).await;
        }
        assert_eq!(reloads, 1, "rapid saves should collapse to one reload");

        advance(Duration::from_millis(150)).await;
        assert!(should_process_event_with_threshold(
            &mut debounce,
            &path,
            Instant::now(),
            threshold
        ));
    }

    #[test]
    fn resource_names_come_from_yaml_files_directly_under_resources() {
        let resources = Path::new("/home/u/.prenv/resources");
        assert_eq!(
            resource_name_for_path(&resources.join("shop.yaml"), resources).as_deref(),
            Some("shop")
        );
        assert_eq!(
            resource_name_for_path(&resources.join("shop.yaml.tmp"), resources),
            None
        );
        assert_eq!(
            resource_name_for_path(&resources.join("nested/shop.yaml"), resources),
            None
        );
        assert_eq!(
            resource_name_for_path(Path::new("/elsewhere/shop.yaml"), resources),
            None
        );
    }

    #[test]
    fn remove_events_are_relevant() {
        use notify::event::{CreateKind, RemoveKind};
        assert!(is_relevant_event_kind(&EventKind::Remove(RemoveKind::File)));
        assert!(is_relevant_event_kind(&EventKind::Create(CreateKind::File)));
        assert!(!is_relevant_event_kind(&EventKind::Any));
    }

    #[test]
    fn status_reply_lists_workers_sorted_by_name() {
        let board = RwLock::new(StatusBoard::new());
        tokio_test::block_on(async {
            let mut guard = board.write().await;
            guard.insert(
                "web".to_string(),
                WorkerStatus {
                    ticks: 2,
                    last: None,
                    next_tick_at_unix: Some(1_000_060),
                },
            );
            guard.insert("api".to_string(), WorkerStatus::default());
        });

        let status = tokio_test::block_on(daemon_status(
            Path::new("/tmp/daemon.sock"),
            &board,
            1_000_000,
        ));
        assert_eq!(status.started_at_unix, 1_000_000);
        assert_eq!(status.socket, Path::new("/tmp/daemon.sock"));
        let names: Vec<&str> = status.resources.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["api", "web"]);
        assert_eq!(status.resources["web"].ticks, 2);

        let wire = serde_json::to_value(DaemonResponse::Status(status)).expect("json");
        assert_eq!(wire["reply"], json!("status"));
        assert_eq!(wire["resources"]["web"]["next_tick_at_unix"], json!(1_000_060u64));
    }

    #[test]
    fn stale_socket_file_is_removed_before_bind() {
        let dir = tempfile::TempDir::new().expect("dir");
        let socket = dir.path().join("daemon.sock");
        fs::write(&socket, b"").expect("stale file");

        prepare_socket_for_bind(&socket).expect("prepare");
        assert!(!socket.exists());
    }
}
