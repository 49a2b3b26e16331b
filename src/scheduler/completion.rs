// Completion gate and merge of finished chunks

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{blocking, Scheduler};
use crate::agent::AgentOutcome;
use crate::chunks::{ChunkDocError, ChunkStatus};
use crate::database::{StoreError, StoreResult};
use crate::models::WorkUnitStatus;

/// Resume attempts allowed for a chunk whose document is still IMPLEMENTING
pub const MAX_COMPLETION_RETRIES: u32 = 2;

/// Outcome of one completion-gate check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateStep {
    /// Document is ACTIVE; the unit may be merged and marked DONE
    Passed,
    /// Retry counter incremented and the unit left RUNNING; resume this session
    Retry { session_id: String },
    /// Unit was moved to NEEDS_ATTENTION with this reason
    NeedsAttention(String),
}

impl Scheduler {
    /// Check the chunk's own status field once, as written in its worktree.
    /// Never marks the unit DONE.
    ///
    /// Each IMPLEMENTING check bumps `completion_retries`; the unit escalates once
    /// the counter exceeds `MAX_COMPLETION_RETRIES`.
    pub fn completion_gate_step(&self, chunk: &str, worktree: &Path) -> StoreResult<GateStep> {
        let Some(mut unit) = self.store.get(chunk)? else {
            return Err(StoreError::NotFound(chunk.to_string()));
        };

        let reason = match self.reader.read_goal_in(worktree, chunk) {
            Ok(goal) => match goal.status() {
                ChunkStatus::Active => return Ok(GateStep::Passed),
                ChunkStatus::Implementing => match unit.session_id.clone() {
                    None => "Chunk status is IMPLEMENTING and there is no agent session to resume"
                        .to_string(),
                    Some(session_id) => {
                        unit.completion_retries += 1;
                        if unit.completion_retries > MAX_COMPLETION_RETRIES {
                            format!(
                                "Chunk status is still IMPLEMENTING after {} resume attempt(s); set it to ACTIVE once the work is finished",
                                MAX_COMPLETION_RETRIES
                            )
                        } else {
                            self.store.update(&unit)?;
                            log::info!(
                                "[Scheduler] {} not marked ACTIVE, resuming session {} (attempt {}/{})",
                                chunk,
                                session_id,
                                unit.completion_retries,
                                MAX_COMPLETION_RETRIES
                            );
                            return Ok(GateStep::Retry { session_id });
                        }
                    }
                },
                other => format!(
                    "Chunk status is {} at completion, expected ACTIVE",
                    other
                ),
            },
            Err(ChunkDocError::NotFound(location)) => {
                format!("Goal document missing at completion: {}", location)
            }
            Err(e) => format!("Unreadable chunk metadata at completion: {}", e),
        };

        unit.mark_needs_attention(reason.clone());
        self.store.update(&unit)?;
        log::warn!("[Scheduler] Completion gate held {}: {}", chunk, reason);
        Ok(GateStep::NeedsAttention(reason))
    }

    /// Drive a COMPLETE-phase unit to DONE: gate, commit, remove the worktree, merge.
    /// Any failure parks the unit in NEEDS_ATTENTION.
    pub async fn finalize_completion(self: &Arc<Self>, chunk: &str, worktree: PathBuf) -> StoreResult<()> {
        loop {
            match self.completion_gate_step(chunk, &worktree)? {
                GateStep::Passed => break,
                GateStep::NeedsAttention(_) => return Ok(()),
                GateStep::Retry { session_id } => {
                    let Some(unit) = self.store.get(chunk)? else {
                        return Ok(());
                    };
                    let result = self
                        .agent
                        .resume_for_active_status(&session_id, &unit, &worktree)
                        .await;
                    match result.outcome {
                        AgentOutcome::Completed => continue,
                        AgentOutcome::Suspended { question } => {
                            return self.flag_attention(chunk, question);
                        }
                        AgentOutcome::Failed { error } => {
                            return self.flag_attention(chunk, format!("Agent failed: {}", error));
                        }
                    }
                }
            }
        }

        let Some(unit) = self.store.get(chunk)? else {
            return Ok(());
        };

        let commit = self.agent.run_commit(&unit, &worktree).await;
        if !commit.is_completed() {
            log::warn!(
                "[Scheduler] Agent commit for {} did not complete ({:?}), committing directly",
                chunk,
                commit.outcome
            );
        }

        let worktrees = self.worktrees.clone();
        let target = chunk.to_string();
        match blocking(move || worktrees.commit_changes(&target)).await {
            Ok(true) => log::info!("[Scheduler] Committed leftover changes for {}", chunk),
            Ok(false) => {}
            Err(e) => return self.flag_attention(chunk, format!("Commit failed: {}", e)),
        }

        let worktrees = self.worktrees.clone();
        let target = chunk.to_string();
        if let Err(e) = blocking(move || worktrees.remove_worktree(&target, false)).await {
            log::warn!("[Scheduler] Worktree removal for {} failed: {}", chunk, e);
        }

        let merged = {
            let _guard = self.merge_lock.lock().await;
            let worktrees = self.worktrees.clone();
            let target = chunk.to_string();
            let delete_branch = self.config.delete_branch_after_merge;
            blocking(move || worktrees.merge_to_base(&target, delete_branch)).await
        };
        if let Err(e) = merged {
            return self.flag_attention(chunk, format!("Merge failed: {}", e));
        }

        let Some(mut unit) = self.store.get(chunk)? else {
            return Ok(());
        };
        unit.status = WorkUnitStatus::Done;
        unit.worktree = None;
        unit.attention_reason = None;
        self.store.update(&unit)?;
        log::info!("[Scheduler] {} is DONE", chunk);
        Ok(())
    }
}
