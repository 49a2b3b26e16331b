//! Work-unit scheduler
//!
//! Drives READY units through GOAL, PLAN, IMPLEMENT and COMPLETE, one agent
//! invocation per phase, never running more than `max_agents` at once.
//!
//! - `registry` - supervised map of in-flight agent tasks
//! - `completion` - completion gate, commit and merge of finished chunks
//!
//! The scheduler is the only writer of RUNNING. Store errors inside the dispatch
//! loop are logged and the unit is left for crash recovery.

pub mod completion;
pub mod registry;

pub use completion::{GateStep, MAX_COMPLETION_RETRIES};
pub use registry::TaskRegistry;

use crate::agent::{AgentOutcome, AgentResult, AgentRunner};
use crate::chunks::ChunkReader;
use crate::config::{AskOperatorPolicy, OrchestratorConfig};
use crate::database::{StateStore, StoreResult};
use crate::models::{ConflictVerdict, WorkUnit, WorkUnitStatus};
use crate::oracle::ConflictOracle;
use crate::utils::lock_mutex_recover;
use crate::worktrees::{WorktreeError, WorktreeManager, WorktreeResult};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Scheduler knobs, taken from `OrchestratorConfig`
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub max_agents: usize,
    pub dispatch_interval: Duration,
    pub conflict_checks: bool,
    pub ask_operator_policy: AskOperatorPolicy,
    pub delete_branch_after_merge: bool,
}

impl From<&OrchestratorConfig> for SchedulerConfig {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            max_agents: config.max_agents,
            dispatch_interval: Duration::from_secs(config.dispatch_interval_secs.max(1)),
            conflict_checks: config.conflict_checks,
            ask_operator_policy: config.ask_operator_policy,
            delete_branch_after_merge: config.delete_branch_after_merge,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from(&OrchestratorConfig::default())
    }
}

/// Run a git operation on the blocking pool.
pub(crate) async fn blocking<T, F>(f: F) -> WorktreeResult<T>
where
    F: FnOnce() -> WorktreeResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| WorktreeError::Join(e.to_string()))?
}

/// Result of the conflict check for one dispatch candidate
enum ConflictDecision {
    Dispatch,
    Held,
}

pub struct Scheduler {
    store: Arc<StateStore>,
    worktrees: Arc<WorktreeManager>,
    oracle: Arc<ConflictOracle>,
    reader: Arc<dyn ChunkReader>,
    agent: Arc<dyn AgentRunner>,
    config: SchedulerConfig,
    registry: TaskRegistry,
    merge_lock: tokio::sync::Mutex<()>,
    cancel: CancellationToken,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        store: Arc<StateStore>,
        worktrees: Arc<WorktreeManager>,
        oracle: Arc<ConflictOracle>,
        reader: Arc<dyn ChunkReader>,
        agent: Arc<dyn AgentRunner>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            worktrees,
            oracle,
            reader,
            agent,
            config,
            registry: TaskRegistry::new(),
            merge_lock: tokio::sync::Mutex::new(()),
            cancel: CancellationToken::new(),
            loop_handle: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn oracle(&self) -> &Arc<ConflictOracle> {
        &self.oracle
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Chunks with an agent task in flight
    pub fn live_chunks(&self) -> Vec<String> {
        self.registry.live_chunks()
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Reset every RUNNING unit to READY. Whatever a crashed invocation did is
    /// discarded and the phase starts over.
    pub fn recover_from_crash(&self) -> StoreResult<Vec<String>> {
        let mut recovered = Vec::new();
        for mut unit in self.store.list(Some(WorkUnitStatus::Running))? {
            unit.status = WorkUnitStatus::Ready;
            unit.worktree = None;
            self.store.update(&unit)?;
            log::info!(
                "[Scheduler] Recovered {} ({} phase) to READY",
                unit.chunk,
                unit.phase
            );
            recovered.push(unit.chunk);
        }
        Ok(recovered)
    }

    /// Start the periodic dispatch loop.
    pub fn start(self: &Arc<Self>) {
        let scheduler = self.clone();
        let handle = tokio::spawn(async move { scheduler.run_loop().await });
        if let Some(previous) = lock_mutex_recover(&self.loop_handle).replace(handle) {
            previous.abort();
        }
        log::info!(
            "[Scheduler] Started (max_agents={}, interval={:?})",
            self.config.max_agents,
            self.config.dispatch_interval
        );
    }

    async fn run_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.dispatch_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = interval.tick() => {
                    match self.dispatch_tick().await {
                        Ok(dispatched) if !dispatched.is_empty() => {
                            log::debug!("[Scheduler] Dispatched {:?}", dispatched);
                        }
                        Ok(_) => {}
                        Err(e) => log::error!("[Scheduler] Dispatch tick failed: {}", e),
                    }
                }
            }
        }
        log::info!("[Scheduler] Dispatch loop stopped");
    }

    /// Cancel the loop and in-flight tasks, waiting up to `timeout` before aborting
    /// what is left. Interrupted units stay RUNNING until the next recovery.
    pub async fn stop(&self, timeout: Duration) {
        self.cancel.cancel();
        let deadline = tokio::time::Instant::now() + timeout;

        let handle = lock_mutex_recover(&self.loop_handle).take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(timeout, &mut handle).await.is_err() {
                log::warn!("[Scheduler] Dispatch loop did not stop in time, aborting");
                handle.abort();
            }
        }

        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if !self.registry.wait_idle(remaining).await {
            log::warn!(
                "[Scheduler] Aborting {} agent task(s) still running",
                self.registry.live_count()
            );
            self.registry.abort_all();
        }
    }

    /// One scheduling pass. Returns the chunks dispatched.
    pub async fn dispatch_tick(self: &Arc<Self>) -> StoreResult<Vec<String>> {
        self.unblock_cleared()?;

        let running = self.store.list(Some(WorkUnitStatus::Running))?;
        let slots = self.config.max_agents.saturating_sub(running.len());
        if slots == 0 {
            return Ok(Vec::new());
        }

        let mut ready = self.store.list(Some(WorkUnitStatus::Ready))?;
        // Stable: creation order survives among equal priorities
        ready.sort_by(|a, b| b.priority.cmp(&a.priority));

        let mut running_chunks: Vec<String> = running.into_iter().map(|u| u.chunk).collect();
        let mut dispatched = Vec::new();

        for mut unit in ready {
            if dispatched.len() >= slots || self.cancel.is_cancelled() {
                break;
            }
            if self.registry.is_live(&unit.chunk) {
                continue;
            }
            if self.config.conflict_checks {
                if let ConflictDecision::Held = self.check_conflicts(&mut unit, &running_chunks)? {
                    continue;
                }
            }
            if self.dispatch_unit(unit.clone()).await {
                running_chunks.push(unit.chunk.clone());
                dispatched.push(unit.chunk);
            }
        }

        Ok(dispatched)
    }

    /// BLOCKED units whose blockers are all DONE (or gone) go back to READY.
    fn unblock_cleared(&self) -> StoreResult<()> {
        for mut unit in self.store.list(Some(WorkUnitStatus::Blocked))? {
            let mut cleared = true;
            for blocker in &unit.blocked_by {
                match self.store.get(blocker)? {
                    Some(other) if other.status != WorkUnitStatus::Done => {
                        cleared = false;
                        break;
                    }
                    _ => {}
                }
            }
            if cleared {
                log::info!(
                    "[Scheduler] Unblocking {} (blockers cleared: {:?})",
                    unit.chunk,
                    unit.blocked_by
                );
                unit.status = WorkUnitStatus::Ready;
                unit.blocked_by.clear();
                self.store.update(&unit)?;
            }
        }
        Ok(())
    }

    fn check_conflicts(
        &self,
        unit: &mut WorkUnit,
        running: &[String],
    ) -> StoreResult<ConflictDecision> {
        let mut blockers = Vec::new();
        let mut uncertain = None;

        for other in running {
            let analysis = self.oracle.should_serialize(&unit.chunk, other);
            match analysis.verdict {
                ConflictVerdict::Serialize => blockers.push(other.clone()),
                ConflictVerdict::AskOperator if uncertain.is_none() => {
                    uncertain = Some(format!(
                        "Possible conflict with {}: {}",
                        other, analysis.reason
                    ));
                }
                _ => {}
            }
        }

        if !blockers.is_empty() {
            log::info!(
                "[Scheduler] Blocking {} behind {:?}",
                unit.chunk,
                blockers
            );
            unit.status = WorkUnitStatus::Blocked;
            unit.blocked_by = blockers;
            self.store.update(unit)?;
            return Ok(ConflictDecision::Held);
        }

        if let Some(reason) = uncertain {
            match self.config.ask_operator_policy {
                AskOperatorPolicy::Attention => {
                    log::info!("[Scheduler] {} needs operator input: {}", unit.chunk, reason);
                    unit.mark_needs_attention(reason);
                    self.store.update(unit)?;
                    return Ok(ConflictDecision::Held);
                }
                AskOperatorPolicy::Proceed => {
                    log::info!("[Scheduler] Dispatching {} despite: {}", unit.chunk, reason);
                }
            }
        }

        Ok(ConflictDecision::Dispatch)
    }

    /// Ensure a worktree, mark RUNNING and start the agent task. A worktree failure
    /// parks the unit in NEEDS_ATTENTION. Returns whether the unit was dispatched.
    async fn dispatch_unit(self: &Arc<Self>, mut unit: WorkUnit) -> bool {
        let chunk = unit.chunk.clone();
        let worktrees = self.worktrees.clone();
        let target = chunk.clone();

        let path = match blocking(move || worktrees.create_worktree(&target)).await {
            Ok(path) => path,
            Err(e) => {
                log::error!("[Scheduler] Worktree for {} failed: {}", chunk, e);
                unit.mark_needs_attention(format!("Worktree creation failed: {}", e));
                if let Err(e) = self.store.update(&unit) {
                    log::error!("[Scheduler] Failed to record worktree failure for {}: {}", chunk, e);
                }
                return false;
            }
        };

        unit.status = WorkUnitStatus::Running;
        unit.worktree = Some(path.to_string_lossy().to_string());
        unit.attention_reason = None;
        if let Err(e) = self.store.update(&unit) {
            log::error!("[Scheduler] Failed to mark {} RUNNING: {}", chunk, e);
            return false;
        }

        log::info!(
            "[Scheduler] Dispatching {} ({} phase, priority {})",
            chunk,
            unit.phase,
            unit.priority
        );
        self.spawn_unit_task(chunk, path);
        true
    }

    fn spawn_unit_task(self: &Arc<Self>, chunk: String, worktree: PathBuf) {
        let scheduler = self.clone();
        let token = self.cancel.child_token();
        let task_chunk = chunk.clone();
        let body = async move {
            tokio::select! {
                _ = token.cancelled() => {
                    log::info!("[Scheduler] {} interrupted by shutdown, left RUNNING", task_chunk);
                }
                _ = scheduler.run_unit(&task_chunk, worktree) => {}
            }
        };

        let store = self.store.clone();
        self.registry.spawn(&chunk, body, move |chunk, reason| {
            match store.get(&chunk) {
                Ok(Some(mut unit)) if unit.status == WorkUnitStatus::Running => {
                    unit.mark_needs_attention(reason);
                    if let Err(e) = store.update(&unit) {
                        log::error!("[Scheduler] Failed to flag {}: {}", chunk, e);
                    }
                }
                Ok(_) => {}
                Err(e) => log::error!("[Scheduler] Failed to load {}: {}", chunk, e),
            }
        });
    }

    async fn run_unit(self: &Arc<Self>, chunk: &str, worktree: PathBuf) {
        let unit = match self.store.get(chunk) {
            Ok(Some(unit)) => unit,
            Ok(None) => {
                log::warn!("[Scheduler] {} disappeared before its agent started", chunk);
                return;
            }
            Err(e) => {
                log::error!("[Scheduler] Failed to load {}: {}", chunk, e);
                return;
            }
        };

        let result = self.agent.run_phase(&unit, &worktree).await;
        if let Err(e) = self.handle_agent_result(chunk, worktree, result).await {
            log::error!(
                "[Scheduler] Failed to record result for {}, left for recovery: {}",
                chunk,
                e
            );
        }
    }

    /// Apply a phase invocation's result to the stored unit.
    pub async fn handle_agent_result(
        self: &Arc<Self>,
        chunk: &str,
        worktree: PathBuf,
        result: AgentResult,
    ) -> StoreResult<()> {
        let Some(mut unit) = self.store.get(chunk)? else {
            log::warn!("[Scheduler] Result for unknown unit {} dropped", chunk);
            return Ok(());
        };
        if unit.status != WorkUnitStatus::Running {
            log::warn!(
                "[Scheduler] Ignoring result for {}: status changed to {}",
                chunk,
                unit.status
            );
            return Ok(());
        }

        if result.session_id.is_some() {
            unit.session_id = result.session_id.clone();
        }

        match result.outcome {
            AgentOutcome::Completed => match unit.phase.next() {
                Some(next) => {
                    log::info!("[Scheduler] {} finished {} phase, next {}", chunk, unit.phase, next);
                    unit.phase = next;
                    unit.status = WorkUnitStatus::Ready;
                    unit.worktree = None;
                    self.store.update(&unit)?;
                }
                None => {
                    self.store.update(&unit)?;
                    self.finalize_completion(chunk, worktree).await?;
                }
            },
            AgentOutcome::Suspended { question } => {
                log::info!("[Scheduler] {} suspended: {}", chunk, question);
                unit.mark_needs_attention(question);
                self.store.update(&unit)?;
            }
            AgentOutcome::Failed { error } => {
                log::warn!("[Scheduler] {} agent failed: {}", chunk, error);
                unit.mark_needs_attention(format!("Agent failed: {}", error));
                self.store.update(&unit)?;
            }
        }
        Ok(())
    }

    /// Park a unit in NEEDS_ATTENTION, reloading it first.
    fn flag_attention(&self, chunk: &str, reason: String) -> StoreResult<()> {
        if let Some(mut unit) = self.store.get(chunk)? {
            log::warn!("[Scheduler] {} needs attention: {}", chunk, reason);
            unit.mark_needs_attention(reason);
            self.store.update(&unit)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_config_from_orchestrator_config() {
        let mut config = OrchestratorConfig::default();
        config.max_agents = 4;
        config.dispatch_interval_secs = 0;
        config.ask_operator_policy = AskOperatorPolicy::Proceed;

        let scheduler_config = SchedulerConfig::from(&config);
        assert_eq!(scheduler_config.max_agents, 4);
        // Zero would make tokio's interval panic
        assert_eq!(scheduler_config.dispatch_interval, Duration::from_secs(1));
        assert_eq!(scheduler_config.ask_operator_policy, AskOperatorPolicy::Proceed);
        assert!(scheduler_config.delete_branch_after_merge);
    }
}
