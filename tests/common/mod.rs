// Shared fixtures for integration tests
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chunk_orchestrator_lib::agent::{AgentResult, AgentRunner};
use chunk_orchestrator_lib::chunks::{ChunkReader, InMemoryChunkReader};
use chunk_orchestrator_lib::database::StateStore;
use chunk_orchestrator_lib::oracle::{ConflictOracle, OracleConfig};
use chunk_orchestrator_lib::scheduler::{Scheduler, SchedulerConfig};
use chunk_orchestrator_lib::worktrees::WorktreeManager;
use chunk_orchestrator_lib::WorkUnit;
use git2::{Repository, Signature};
use tempfile::TempDir;

pub struct TestProject {
    _temp_dir: TempDir,
    pub path: PathBuf,
    pub store: Arc<StateStore>,
    pub reader: Arc<InMemoryChunkReader>,
    pub worktrees: Arc<WorktreeManager>,
    pub oracle: Arc<ConflictOracle>,
}

impl TestProject {
    /// Git repository with one commit, plus a fresh store under `.ve/`
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().to_path_buf();

        let repo = Repository::init(&path).unwrap();
        let sig = Signature::now("Test User", "test@example.com").unwrap();
        let tree_id = {
            let mut index = repo.index().unwrap();
            fs::write(path.join("README.md"), "# project\n").unwrap();
            index.add_path(Path::new("README.md")).unwrap();
            index.write().unwrap();
            index.write_tree().unwrap()
        };
        let tree = repo.find_tree(tree_id).unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "Initial commit", &tree, &[])
            .unwrap();

        let store = Arc::new(StateStore::open(path.join(".ve/orchestrator.db")).unwrap());
        let reader = Arc::new(InMemoryChunkReader::new());
        let worktrees = Arc::new(WorktreeManager::new(&path, None).unwrap());
        let oracle = Arc::new(ConflictOracle::new(
            store.clone(),
            reader.clone(),
            OracleConfig::default(),
        ));

        Self {
            _temp_dir: temp_dir,
            path,
            store,
            reader,
            worktrees,
            oracle,
        }
    }

    pub fn scheduler(&self, agent: Arc<MockAgent>, config: SchedulerConfig) -> Arc<Scheduler> {
        self.scheduler_with_reader(agent, config, self.reader.clone())
    }

    pub fn scheduler_with_reader(
        &self,
        agent: Arc<MockAgent>,
        config: SchedulerConfig,
        reader: Arc<dyn ChunkReader>,
    ) -> Arc<Scheduler> {
        Arc::new(Scheduler::new(
            self.store.clone(),
            self.worktrees.clone(),
            self.oracle.clone(),
            reader,
            agent,
            config,
        ))
    }

    /// Write `relative` in the main checkout and commit it on the current branch
    pub fn commit_file(&self, relative: &str, content: &str) {
        let file = self.path.join(relative);
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(&file, content).unwrap();

        let repo = Repository::open(&self.path).unwrap();
        let sig = Signature::now("Test User", "test@example.com").unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new(relative)).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let parent = repo.head().unwrap().peel_to_commit().unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, &format!("Add {}", relative), &tree, &[&parent])
            .unwrap();
    }

    pub fn enqueue(&self, unit: WorkUnit) {
        self.store.create(&unit).unwrap();
    }

    pub fn unit(&self, chunk: &str) -> WorkUnit {
        self.store.get(chunk).unwrap().unwrap()
    }

    pub fn set_goal_status(&self, chunk: &str, status: &str) {
        self.reader.set_goal(chunk, &goal_doc(status, &[]));
    }
}

pub fn goal_doc(status: &str, refs: &[&str]) -> String {
    let mut doc = format!("---\nstatus: {}\n", status);
    if !refs.is_empty() {
        doc.push_str("code_references:\n");
        for reference in refs {
            doc.push_str(&format!("  - ref: {}\n", reference));
        }
    }
    doc.push_str("---\n\n# Goal\n");
    doc
}

/// Scheduler settings for tests: conflict checks off unless a test opts in
pub fn test_config(max_agents: usize) -> SchedulerConfig {
    SchedulerConfig {
        max_agents,
        conflict_checks: false,
        ..SchedulerConfig::default()
    }
}

type Script = Box<dyn Fn(&WorkUnit, &Path) -> AgentResult + Send + Sync>;

/// Scripted agent. Records every call as `<kind>:<chunk>:<phase>`.
pub struct MockAgent {
    phase: Script,
    resume: Script,
    commit: Script,
    hold: AtomicBool,
    calls: Mutex<Vec<String>>,
}

impl MockAgent {
    pub fn completing() -> Self {
        Self {
            phase: Box::new(|_, _| AgentResult::completed(Some("session-1".to_string()))),
            resume: Box::new(|_, _| AgentResult::completed(Some("session-1".to_string()))),
            commit: Box::new(|_, _| AgentResult::completed(None)),
            hold: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn on_phase(
        mut self,
        f: impl Fn(&WorkUnit, &Path) -> AgentResult + Send + Sync + 'static,
    ) -> Self {
        self.phase = Box::new(f);
        self
    }

    pub fn on_resume(
        mut self,
        f: impl Fn(&WorkUnit, &Path) -> AgentResult + Send + Sync + 'static,
    ) -> Self {
        self.resume = Box::new(f);
        self
    }

    /// Phase invocations block until `release` is called
    pub fn holding(self) -> Self {
        self.hold.store(true, Ordering::SeqCst);
        self
    }

    pub fn release(&self) {
        self.hold.store(false, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn record(&self, kind: &str, unit: &WorkUnit) {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{}:{}:{}", kind, unit.chunk, unit.phase));
    }
}

#[async_trait]
impl AgentRunner for MockAgent {
    async fn run_phase(&self, unit: &WorkUnit, worktree: &Path) -> AgentResult {
        self.record("phase", unit);
        while self.hold.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        (self.phase)(unit, worktree)
    }

    async fn run_commit(&self, unit: &WorkUnit, worktree: &Path) -> AgentResult {
        self.record("commit", unit);
        (self.commit)(unit, worktree)
    }

    async fn resume_for_active_status(
        &self,
        session_id: &str,
        unit: &WorkUnit,
        worktree: &Path,
    ) -> AgentResult {
        self.record(&format!("resume[{}]", session_id), unit);
        (self.resume)(unit, worktree)
    }
}

/// Poll `condition` every 20ms until it holds or `timeout` passes.
pub async fn wait_for<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
