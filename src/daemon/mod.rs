//! Background daemon lifecycle
//!
//! - `context` - `DaemonContext`, the shared component graph
//! - `lock` - pid lock file and exit-time cleanup
//! - `process` - liveness probing, detaching, output redirection, termination
//!
//! `start_daemon` runs in the CLI and spawns `orch daemon run`, which calls
//! `run_daemon`. The child publishes its TCP port through the port file; the
//! launcher waits for that file to appear.

pub mod context;
pub mod lock;
pub mod process;

pub use context::DaemonContext;

use crate::agent::CommandAgentRunner;
use crate::config::{ConfigError, ConfigManager};
use crate::database::{StateStore, StoreError};
use crate::models::WorkUnitStatus;
use crate::server::{self, AppState};
use crate::shutdown::register_signal_handlers;
use crate::utils::{db_path, remove_file_if_exists, ve_dir, write_atomic};
use crate::worktrees::WorktreeError;
use lock::{CleanupGuard, PidLock};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

const SERVER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
const STARTUP_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Daemon already running (pid {0})")]
    AlreadyRunning(u32),

    #[error("Failed to start daemon: {reason}. Check logs at {}", .log.display())]
    StartFailed { reason: String, log: PathBuf },

    #[error("Failed to detach daemon process: {0}")]
    SpawnFailed(#[source] std::io::Error),

    #[error("Failed to stop daemon (pid {pid}): {source}")]
    KillFailed {
        pid: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to acquire lock: daemon already running?")]
    LockFailed(#[source] std::io::Error),

    #[error("Failed to bind {what}: {source}")]
    BindFailed {
        what: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Worktree(#[from] WorktreeError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Runtime files under `.ve/`
#[derive(Debug, Clone, Serialize)]
pub struct DaemonPaths {
    pub ve_dir: PathBuf,
    pub pid: PathBuf,
    pub socket: PathBuf,
    pub port: PathBuf,
    pub log: PathBuf,
    pub db: PathBuf,
}

impl DaemonPaths {
    pub fn new(project_path: &Path) -> Self {
        let dir = ve_dir(project_path);
        Self {
            pid: dir.join("orchestrator.pid"),
            socket: dir.join("orchestrator.sock"),
            port: dir.join("orchestrator.port"),
            log: dir.join("orchestrator.log"),
            db: db_path(project_path),
            ve_dir: dir,
        }
    }

    fn remove_runtime_files(&self) {
        for path in [&self.pid, &self.socket, &self.port] {
            if let Err(e) = remove_file_if_exists(path) {
                log::warn!("[Daemon] Failed to remove stale {:?}: {}", path, e);
            }
        }
    }
}

fn read_port(path: &Path) -> Option<u16> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|content| content.trim().parse().ok())
}

/// Pid of a live daemon, if any
fn live_pid(paths: &DaemonPaths) -> Option<u32> {
    process::read_pid(&paths.pid).filter(|pid| process::is_process_alive(*pid))
}

#[derive(Debug, Clone, Serialize)]
pub struct StartedDaemon {
    pub pid: u32,
    pub port: u16,
    pub socket: PathBuf,
}

/// Spawn the background daemon and wait until it has published its port.
pub fn start_daemon(
    project_path: &Path,
    port: Option<u16>,
    timeout: Duration,
) -> Result<StartedDaemon, DaemonError> {
    let paths = DaemonPaths::new(project_path);
    if let Some(pid) = live_pid(&paths) {
        return Err(DaemonError::AlreadyRunning(pid));
    }
    paths.remove_runtime_files();
    std::fs::create_dir_all(&paths.ve_dir)?;

    let exe = std::env::current_exe()?;
    let mut cmd = Command::new(exe);
    cmd.arg("--project")
        .arg(project_path)
        .arg("daemon")
        .arg("run")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    if let Some(port) = port {
        cmd.arg("--port").arg(port.to_string());
    }
    process::detach_session(&mut cmd);

    let mut child = cmd.spawn().map_err(DaemonError::SpawnFailed)?;
    let pid = child.id();
    log::info!("[Daemon] Spawned background process {}", pid);

    let deadline = Instant::now() + timeout;
    loop {
        if let Some(port) = read_port(&paths.port) {
            return Ok(StartedDaemon {
                pid,
                port,
                socket: paths.socket,
            });
        }
        if let Some(status) = child.try_wait()? {
            return Err(DaemonError::StartFailed {
                reason: format!("background process exited with {}", status),
                log: paths.log,
            });
        }
        if Instant::now() >= deadline {
            return Err(DaemonError::StartFailed {
                reason: format!("no port published within {:?}", timeout),
                log: paths.log,
            });
        }
        std::thread::sleep(STARTUP_POLL_INTERVAL);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum StopOutcome {
    NotRunning,
    Stopped { pid: u32, forced: bool },
}

/// SIGTERM the daemon, escalating to SIGKILL after `grace`.
pub fn stop_daemon(project_path: &Path, grace: Duration) -> Result<StopOutcome, DaemonError> {
    let paths = DaemonPaths::new(project_path);
    let Some(pid) = live_pid(&paths) else {
        paths.remove_runtime_files();
        return Ok(StopOutcome::NotRunning);
    };

    let forced =
        process::terminate(pid, grace).map_err(|source| DaemonError::KillFailed { pid, source })?;
    if forced {
        // A killed daemon never ran its cleanup
        paths.remove_runtime_files();
    }
    log::info!("[Daemon] Stopped {} (forced: {})", pid, forced);
    Ok(StopOutcome::Stopped { pid, forced })
}

#[derive(Debug, Clone, Serialize)]
pub struct DaemonStatus {
    pub running: bool,
    pub pid: Option<u32>,
    pub uptime_secs: Option<u64>,
    pub port: Option<u16>,
    pub socket: Option<PathBuf>,
    pub counts: BTreeMap<String, i64>,
}

pub fn daemon_status(project_path: &Path) -> Result<DaemonStatus, DaemonError> {
    let paths = DaemonPaths::new(project_path);
    let pid = live_pid(&paths);

    let counts = if paths.db.exists() {
        StateStore::open(&paths.db)?.count_by_status()?
    } else {
        WorkUnitStatus::all()
            .iter()
            .map(|s| (s.as_str().to_string(), 0))
            .collect()
    };

    let (uptime_secs, port, socket) = match pid {
        Some(_) => {
            let uptime = std::fs::metadata(&paths.pid)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|started| SystemTime::now().duration_since(started).ok())
                .map(|d| d.as_secs());
            let socket = paths.socket.exists().then(|| paths.socket.clone());
            (uptime, read_port(&paths.port), socket)
        }
        None => (None, None, None),
    };

    Ok(DaemonStatus {
        running: pid.is_some(),
        pid,
        uptime_secs,
        port,
        socket,
        counts,
    })
}

/// Background-process options for `run_daemon`
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub port: Option<u16>,
    /// Send stdout and stderr to `orchestrator.log`
    pub redirect_output: bool,
}

/// Entry point of the background process.
pub async fn run_daemon(project_path: &Path, options: RunOptions) -> Result<(), DaemonError> {
    let paths = DaemonPaths::new(project_path);
    std::fs::create_dir_all(&paths.ve_dir)?;
    if options.redirect_output {
        process::redirect_output(&paths.log)?;
    }

    let _lock = PidLock::acquire(&paths.pid)?;
    // Declared after the lock so it drops first
    let _cleanup = CleanupGuard::new(vec![
        paths.socket.clone(),
        paths.port.clone(),
        paths.pid.clone(),
    ]);

    let cancel = CancellationToken::new();
    let _signals = register_signal_handlers(cancel.clone())?;

    let mut config = ConfigManager::new(project_path).read()?;
    if options.port.is_some() {
        config.port = options.port;
    }

    let agent = Arc::new(CommandAgentRunner::new(&config.agent, project_path));
    let ctx = DaemonContext::build(project_path, config, agent, cancel)?;
    log::info!(
        "[Daemon] Started for {:?} (pid {})",
        project_path,
        std::process::id()
    );
    serve(ctx).await
}

/// Recover, start the scheduler and both listeners, and run until the context's
/// token is cancelled.
pub async fn serve(ctx: DaemonContext) -> Result<(), DaemonError> {
    let recovered = ctx.scheduler.recover_from_crash()?;
    if !recovered.is_empty() {
        log::info!("[Daemon] Recovered {} interrupted unit(s)", recovered.len());
    }
    match ctx.worktrees.cleanup_orphaned_worktrees() {
        Ok(found) => log::info!("[Daemon] {} chunk worktree(s) on disk", found.len()),
        Err(e) => log::warn!("[Daemon] Orphaned worktree cleanup failed: {}", e),
    }

    ctx.scheduler.start();

    let app = server::build_router(AppState::from(&ctx));

    let unix_listener =
        server::bind_unix_listener(&ctx.paths.socket).map_err(|source| DaemonError::BindFailed {
            what: ctx.paths.socket.display().to_string(),
            source,
        })?;
    let addr = ("127.0.0.1", ctx.config.port.unwrap_or(0));
    let tcp_listener = TcpListener::bind(addr)
        .await
        .map_err(|source| DaemonError::BindFailed {
            what: format!("127.0.0.1:{}", addr.1),
            source,
        })?;
    let port = tcp_listener.local_addr()?.port();

    let servers_token = CancellationToken::new();
    let unix_server = tokio::spawn(server::serve_unix(
        unix_listener,
        app.clone(),
        servers_token.clone(),
    ));
    let tcp_server = tokio::spawn(server::serve_tcp(tcp_listener, app, servers_token.clone()));

    write_atomic(&ctx.paths.port, &format!("{}\n", port))?;
    log::info!(
        "[Daemon] Listening on {:?} and http://127.0.0.1:{}",
        ctx.paths.socket,
        port
    );

    ctx.cancel.cancelled().await;
    log::info!("[Daemon] Shutting down");

    ctx.scheduler
        .stop(Duration::from_secs(ctx.config.stop_timeout_secs))
        .await;

    servers_token.cancel();
    for (name, handle) in [("unix", unix_server), ("tcp", tcp_server)] {
        match tokio::time::timeout(SERVER_SHUTDOWN_TIMEOUT, handle).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => log::warn!("[Daemon] {} server error: {}", name, e),
            Ok(Err(e)) => log::warn!("[Daemon] {} server task failed: {}", name, e),
            Err(_) => log::warn!("[Daemon] {} server did not stop in time", name),
        }
    }

    log::info!("[Daemon] Shutdown complete");
    Ok(())
}
