// Everything the daemon's components share, built once at startup

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::{DaemonError, DaemonPaths};
use crate::agent::AgentRunner;
use crate::chunks::{ChunkReader, FsChunkReader};
use crate::config::OrchestratorConfig;
use crate::database::StateStore;
use crate::oracle::ConflictOracle;
use crate::scheduler::{Scheduler, SchedulerConfig};
use crate::server::AppState;
use crate::worktrees::WorktreeManager;

pub struct DaemonContext {
    pub project_path: PathBuf,
    pub paths: DaemonPaths,
    pub config: OrchestratorConfig,
    pub store: Arc<StateStore>,
    pub worktrees: Arc<WorktreeManager>,
    pub oracle: Arc<ConflictOracle>,
    pub scheduler: Arc<Scheduler>,
    pub started_at: DateTime<Utc>,
    /// Cancelled on a termination signal
    pub cancel: CancellationToken,
}

impl DaemonContext {
    /// Context reading chunk documents from the project tree
    pub fn build(
        project_path: &Path,
        config: OrchestratorConfig,
        agent: Arc<dyn AgentRunner>,
        cancel: CancellationToken,
    ) -> Result<Self, DaemonError> {
        let reader: Arc<dyn ChunkReader> = Arc::new(FsChunkReader::new(project_path));
        Self::with_reader(project_path, config, reader, agent, cancel)
    }

    pub fn with_reader(
        project_path: &Path,
        config: OrchestratorConfig,
        reader: Arc<dyn ChunkReader>,
        agent: Arc<dyn AgentRunner>,
        cancel: CancellationToken,
    ) -> Result<Self, DaemonError> {
        let paths = DaemonPaths::new(project_path);
        let store = Arc::new(StateStore::open(&paths.db)?);
        let worktrees = Arc::new(WorktreeManager::new(
            project_path,
            config.base_branch.as_deref(),
        )?);
        let oracle = Arc::new(ConflictOracle::new(
            store.clone(),
            reader.clone(),
            config.oracle.clone(),
        ));
        let scheduler = Arc::new(Scheduler::new(
            store.clone(),
            worktrees.clone(),
            oracle.clone(),
            reader,
            agent,
            SchedulerConfig::from(&config),
        ));

        Ok(Self {
            project_path: project_path.to_path_buf(),
            paths,
            config,
            store,
            worktrees,
            oracle,
            scheduler,
            started_at: Utc::now(),
            cancel,
        })
    }
}

impl From<&DaemonContext> for AppState {
    fn from(ctx: &DaemonContext) -> Self {
        Self {
            store: ctx.store.clone(),
            oracle: ctx.oracle.clone(),
            scheduler: ctx.scheduler.clone(),
            started_at: ctx.started_at,
            pid: std::process::id(),
        }
    }
}
