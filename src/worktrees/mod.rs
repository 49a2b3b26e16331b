//! Per-chunk worktree lifecycle
//!
//! Each chunk gets a dedicated branch (`orch/<chunk>`) cut from a fixed base
//! branch and an isolated working tree under `.ve/chunks/<chunk>/worktree`.
//! Git is the source of truth for whether a worktree exists; nothing here is
//! persisted outside the repository itself.

use crate::git::{GitManager, MergeOutcome, WorktreeInfo};
use crate::utils::{chunk_state_dir, validate_chunk_name, ve_dir};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Branch namespace for orchestrated chunks
pub const BRANCH_PREFIX: &str = "orch/";
/// Worktree registration names use '-' in place of the branch's '/'
const WORKTREE_NAME_PREFIX: &str = "orch-";

#[derive(Debug, Error)]
pub enum WorktreeError {
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("Worktree for chunk '{0}' does not exist")]
    NotFound(String),

    #[error("Branch '{0}' does not exist")]
    BranchNotFound(String),

    #[error("Merge conflict merging {branch} into {base}: {}", .files.join(", "))]
    MergeConflict {
        chunk: String,
        branch: String,
        base: String,
        files: Vec<String>,
    },

    #[error("{0}")]
    InvalidChunk(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Worktree task failed: {0}")]
    Join(String),
}

pub type WorktreeResult<T> = Result<T, WorktreeError>;

/// Deterministic mapping from a chunk to its sandbox locations
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WorktreeHandle {
    pub chunk: String,
    pub path: PathBuf,
    pub branch: String,
    pub log_dir: PathBuf,
}

impl WorktreeHandle {
    fn worktree_name(&self) -> String {
        format!("{}{}", WORKTREE_NAME_PREFIX, self.chunk)
    }
}

pub struct WorktreeManager {
    project_path: PathBuf,
    base_branch: String,
}

impl WorktreeManager {
    /// Capture the base branch for this manager's lifetime. With no explicit base,
    /// the repository's current branch is used.
    pub fn new(project_path: &Path, base_branch: Option<&str>) -> WorktreeResult<Self> {
        let git = GitManager::new(project_path)?;
        let base_branch = match base_branch {
            Some(base) => {
                if !git.branch_exists(base) {
                    return Err(WorktreeError::BranchNotFound(base.to_string()));
                }
                base.to_string()
            }
            None => git.current_branch_name()?,
        };

        let manager = Self {
            project_path: project_path.to_path_buf(),
            base_branch,
        };
        manager.ensure_state_dir_ignored()?;

        log::info!(
            "[WorktreeManager] Using base branch '{}' for {:?}",
            manager.base_branch,
            manager.project_path
        );
        Ok(manager)
    }

    pub fn base_branch(&self) -> &str {
        &self.base_branch
    }

    pub fn project_path(&self) -> &Path {
        &self.project_path
    }

    pub fn handle(&self, chunk: &str) -> WorktreeHandle {
        let state_dir = chunk_state_dir(&self.project_path, chunk);
        WorktreeHandle {
            chunk: chunk.to_string(),
            path: state_dir.join("worktree"),
            branch: format!("{}{}", BRANCH_PREFIX, chunk),
            log_dir: state_dir.join("log"),
        }
    }

    fn git(&self) -> WorktreeResult<GitManager> {
        Ok(GitManager::new(&self.project_path)?)
    }

    /// `.ve/` sits inside the main working copy; keep it out of status and merges.
    fn ensure_state_dir_ignored(&self) -> WorktreeResult<()> {
        let dir = ve_dir(&self.project_path);
        std::fs::create_dir_all(&dir)?;
        let gitignore = dir.join(".gitignore");
        if !gitignore.exists() {
            std::fs::write(&gitignore, "*\n")?;
        }
        Ok(())
    }

    pub fn worktree_exists(&self, chunk: &str) -> bool {
        let handle = self.handle(chunk);
        match self.git() {
            Ok(git) => git.is_valid_worktree(&handle.worktree_name()) && handle.path.exists(),
            Err(_) => false,
        }
    }

    /// Idempotent: returns the existing path if the worktree is already there.
    pub fn create_worktree(&self, chunk: &str) -> WorktreeResult<PathBuf> {
        validate_chunk_name(chunk).map_err(WorktreeError::InvalidChunk)?;
        let handle = self.handle(chunk);
        let name = handle.worktree_name();
        let git = self.git()?;

        if git.is_valid_worktree(&name) && handle.path.exists() {
            std::fs::create_dir_all(&handle.log_dir)?;
            return Ok(handle.path);
        }

        if let Err(e) = git.prune_orphaned_worktrees() {
            log::warn!("[WorktreeManager] Failed to prune orphaned worktrees: {}", e);
        }

        // A directory that is not a registered worktree would make the add fail
        if handle.path.exists() {
            log::warn!(
                "[WorktreeManager] Removing invalid worktree directory {:?}",
                handle.path
            );
            std::fs::remove_dir_all(&handle.path)?;
        }
        if let Some(parent) = handle.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        if !git.branch_exists(&handle.branch) {
            git.create_branch_from(&handle.branch, &self.base_branch)?;
        }

        match git.create_worktree(&handle.branch, &handle.path) {
            Ok(_) => {}
            Err(e) if e.message().contains("already checked out") => {
                log::warn!(
                    "[WorktreeManager] Branch {} reported as already checked out, retrying with force",
                    handle.branch
                );
                self.force_release_branch(&git, &name, &handle.branch);
                git.create_worktree(&handle.branch, &handle.path)?;
            }
            Err(e) => return Err(e.into()),
        }

        std::fs::create_dir_all(&handle.log_dir)?;
        log::info!(
            "[WorktreeManager] Created worktree for {} at {:?} on branch {}",
            chunk,
            handle.path,
            handle.branch
        );
        Ok(handle.path)
    }

    /// Take the branch back from whatever holds it: our own stale registration,
    /// registrations whose directory is gone, and live worktrees (detached).
    fn force_release_branch(&self, git: &GitManager, name: &str, branch: &str) {
        if git.find_worktree(name).is_some() {
            if let Err(e) = git.force_prune_worktree(name) {
                log::warn!("[WorktreeManager] Force prune of {} failed: {}", name, e);
            }
        }
        if let Ok(worktrees) = git.list_worktrees() {
            for info in worktrees.iter().filter(|w| !w.is_valid) {
                if let Err(e) = git.force_prune_worktree(&info.name) {
                    log::warn!(
                        "[WorktreeManager] Force prune of {} failed: {}",
                        info.name,
                        e
                    );
                }
            }
        }
        if let Err(e) = git.detach_branch_holders(branch) {
            log::warn!(
                "[WorktreeManager] Failed to release {} from other worktrees: {}",
                branch,
                e
            );
        }
    }

    /// Best-effort removal. Falls back to deleting the directory and pruning the
    /// registration; an already-missing worktree is not an error.
    pub fn remove_worktree(&self, chunk: &str, remove_branch: bool) -> WorktreeResult<()> {
        let handle = self.handle(chunk);
        let name = handle.worktree_name();
        let git = self.git()?;

        if git.find_worktree(&name).is_some() {
            if let Err(e) = git.remove_worktree(&name) {
                log::warn!(
                    "[WorktreeManager] Clean removal of {} failed ({}), forcing",
                    chunk,
                    e
                );
                if handle.path.exists() {
                    if let Err(e) = std::fs::remove_dir_all(&handle.path) {
                        log::warn!(
                            "[WorktreeManager] Failed to delete {:?}: {}",
                            handle.path,
                            e
                        );
                    }
                }
                if let Err(e) = git.force_prune_worktree(&name) {
                    log::warn!("[WorktreeManager] Failed to prune {}: {}", name, e);
                }
            }
        } else if handle.path.exists() {
            if let Err(e) = std::fs::remove_dir_all(&handle.path) {
                log::warn!(
                    "[WorktreeManager] Failed to delete {:?}: {}",
                    handle.path,
                    e
                );
            }
        }

        if remove_branch && git.branch_exists(&handle.branch) {
            if let Err(e) = git.delete_branch(&handle.branch) {
                log::warn!(
                    "[WorktreeManager] Failed to delete branch {}: {}",
                    handle.branch,
                    e
                );
            }
        }

        log::info!("[WorktreeManager] Removed worktree for {}", chunk);
        Ok(())
    }

    fn open_worktree(&self, chunk: &str) -> WorktreeResult<GitManager> {
        if !self.worktree_exists(chunk) {
            return Err(WorktreeError::NotFound(chunk.to_string()));
        }
        Ok(GitManager::new(self.handle(chunk).path)?)
    }

    /// Working-tree dirtiness, untracked files included.
    pub fn has_uncommitted_changes(&self, chunk: &str) -> WorktreeResult<bool> {
        Ok(self.open_worktree(chunk)?.is_dirty()?)
    }

    /// Dirtiness, or commits on the chunk branch that base does not have.
    pub fn has_changes(&self, chunk: &str) -> WorktreeResult<bool> {
        if self.worktree_exists(chunk) && self.has_uncommitted_changes(chunk)? {
            return Ok(true);
        }

        let handle = self.handle(chunk);
        let git = self.git()?;
        if !git.branch_exists(&handle.branch) {
            return Ok(false);
        }
        Ok(git.commits_ahead(&handle.branch, &self.base_branch)? > 0)
    }

    /// Stage everything and create one commit. Returns false if nothing was staged.
    pub fn commit_changes(&self, chunk: &str) -> WorktreeResult<bool> {
        let wt = self.open_worktree(chunk)?;
        wt.stage_all()?;
        match wt.commit_staged(&format!("feat: chunk {}", chunk))? {
            Some(commit) => {
                log::info!(
                    "[WorktreeManager] Committed {} for chunk {}",
                    commit.short_id,
                    chunk
                );
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Merge the chunk branch into base in the main working copy. A conflicted
    /// merge is aborted and reported; nothing is resolved automatically.
    pub fn merge_to_base(&self, chunk: &str, delete_branch: bool) -> WorktreeResult<MergeOutcome> {
        let handle = self.handle(chunk);
        let git = self.git()?;

        if !git.branch_exists(&handle.branch) {
            return Err(WorktreeError::BranchNotFound(handle.branch));
        }

        let outcome = git.merge_branch(&handle.branch, &self.base_branch)?;
        if let MergeOutcome::Conflicted { files } = outcome {
            if let Err(e) = git.merge_abort() {
                log::warn!("[WorktreeManager] Failed to abort merge: {}", e);
            }
            return Err(WorktreeError::MergeConflict {
                chunk: chunk.to_string(),
                branch: handle.branch,
                base: self.base_branch.clone(),
                files,
            });
        }

        if delete_branch {
            if let Err(e) = git.delete_branch(&handle.branch) {
                log::warn!(
                    "[WorktreeManager] Merged but failed to delete branch {}: {}",
                    handle.branch,
                    e
                );
            }
        }

        log::info!(
            "[WorktreeManager] Merged {} into {}: {}",
            handle.branch,
            self.base_branch,
            outcome
        );
        Ok(outcome)
    }

    /// Orchestrator-owned worktrees currently registered with git
    pub fn list_worktrees(&self) -> WorktreeResult<Vec<WorktreeInfo>> {
        Ok(self
            .git()?
            .list_worktrees()?
            .into_iter()
            .filter(|w| w.name.starts_with(WORKTREE_NAME_PREFIX))
            .collect())
    }

    /// Prune stale registrations and report which chunks still have a worktree.
    pub fn cleanup_orphaned_worktrees(&self) -> WorktreeResult<BTreeSet<String>> {
        let git = self.git()?;
        let pruned = git.prune_orphaned_worktrees()?;
        if !pruned.is_empty() {
            log::info!(
                "[WorktreeManager] Pruned {} stale worktree registration(s)",
                pruned.len()
            );
        }

        let found = self
            .list_worktrees()?
            .into_iter()
            .filter_map(|w| w.name.strip_prefix(WORKTREE_NAME_PREFIX).map(|s| s.to_string()))
            .collect();
        Ok(found)
    }
}
