use anyhow::{Context, Result};
use chunk_orchestrator_lib::config::ConfigManager;
use chunk_orchestrator_lib::daemon::{self, RunOptions, StopOutcome};
use clap::{Parser, Subcommand};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Orchestrates parallel coding agents across isolated git worktrees
#[derive(Parser, Debug)]
#[command(name = "orch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Project root (a git repository)
    #[arg(long, global = true, env = "ORCH_PROJECT", default_value = ".")]
    project: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage the background daemon
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },
}

#[derive(Subcommand, Debug)]
enum DaemonAction {
    /// Start the daemon in the background
    Start {
        /// TCP port for the HTTP API (ephemeral when omitted)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Stop a running daemon
    Stop,
    /// Show daemon and work-unit status
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Run the daemon in the foreground
    #[command(hide = true)]
    Run {
        #[arg(long)]
        port: Option<u16>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let project = cli
        .project
        .canonicalize()
        .with_context(|| format!("Project directory {:?} not found", cli.project))?;

    match cli.command {
        Command::Daemon { action } => run_daemon_action(&project, action),
    }
}

fn run_daemon_action(project: &Path, action: DaemonAction) -> Result<()> {
    match action {
        DaemonAction::Start { port } => {
            let config = ConfigManager::new(project).read()?;
            let timeout = Duration::from_secs(config.startup_timeout_secs);
            match daemon::start_daemon(project, port, timeout) {
                Ok(started) => {
                    println!(
                        "Daemon started (pid {}) on http://127.0.0.1:{}",
                        started.pid, started.port
                    );
                    Ok(())
                }
                Err(daemon::DaemonError::AlreadyRunning(pid)) => {
                    println!("Daemon already running (pid {})", pid);
                    Ok(())
                }
                Err(e) => Err(e).context("Daemon failed to start, check logs"),
            }
        }
        DaemonAction::Stop => {
            let config = ConfigManager::new(project).read()?;
            let grace = Duration::from_secs(config.stop_timeout_secs);
            match daemon::stop_daemon(project, grace)? {
                StopOutcome::NotRunning => println!("Daemon not running"),
                StopOutcome::Stopped { pid, forced: false } => {
                    println!("Daemon stopped (pid {})", pid)
                }
                StopOutcome::Stopped { pid, forced: true } => {
                    println!("Daemon killed after timeout (pid {})", pid)
                }
            }
            Ok(())
        }
        DaemonAction::Status { json } => {
            let status = daemon::daemon_status(project)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
                return Ok(());
            }

            match status.pid {
                Some(pid) => {
                    println!("Daemon running (pid {})", pid);
                    if let Some(uptime) = status.uptime_secs {
                        println!("  uptime: {}s", uptime);
                    }
                    if let Some(port) = status.port {
                        println!("  http:   http://127.0.0.1:{}", port);
                    }
                    if let Some(socket) = &status.socket {
                        println!("  socket: {}", socket.display());
                    }
                }
                None => println!("Daemon not running"),
            }
            for (state, count) in &status.counts {
                println!("  {:<16} {}", state, count);
            }
            Ok(())
        }
        DaemonAction::Run { port } => {
            let options = RunOptions {
                port,
                redirect_output: !std::io::stdout().is_terminal(),
            };
            let runtime = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
            runtime.block_on(daemon::run_daemon(project, options))?;
            Ok(())
        }
    }
}
