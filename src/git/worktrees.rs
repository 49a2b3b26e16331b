// Linked worktree registration, listing and pruning

use git2::{BranchType, Error as GitError, Repository, Worktree, WorktreeAddOptions, WorktreePruneOptions};
use std::path::Path;

use crate::git::types::WorktreeInfo;
use crate::git::GitManager;

/// Registration name for a branch. Git stores it under `.git/worktrees/<name>`,
/// so slashes are not allowed.
pub fn worktree_name_for_branch(branch: &str) -> String {
    branch.replace('/', "-")
}

fn describe(worktree: &Worktree) -> WorktreeInfo {
    let locked = !matches!(
        worktree.is_locked(),
        Ok(git2::WorktreeLockStatus::Unlocked) | Err(_)
    );
    // HEAD can only be read while the directory exists
    let branch = Repository::open(worktree.path()).ok().and_then(|repo| {
        let head = repo.head().ok()?;
        head.is_branch()
            .then(|| head.shorthand().map(str::to_string))
            .flatten()
    });

    WorktreeInfo {
        name: worktree.name().unwrap_or_default().to_string(),
        path: worktree.path().to_path_buf(),
        branch,
        is_locked: locked,
        is_valid: worktree.validate().is_ok(),
    }
}

impl GitManager {
    /// Check `branch` (which must exist) out into a new worktree at `path`.
    pub fn create_worktree(&self, branch: &str, path: &Path) -> Result<WorktreeInfo, GitError> {
        let reference = self.repo.find_branch(branch, BranchType::Local)?.into_reference();
        let mut opts = WorktreeAddOptions::new();
        opts.reference(Some(&reference));

        let worktree = self
            .repo
            .worktree(&worktree_name_for_branch(branch), path, Some(&opts))?;
        Ok(describe(&worktree))
    }

    pub fn find_worktree(&self, name: &str) -> Option<Worktree> {
        self.repo.find_worktree(name).ok()
    }

    /// Registered and its directory still present
    pub fn is_valid_worktree(&self, name: &str) -> bool {
        self.find_worktree(name)
            .is_some_and(|worktree| worktree.validate().is_ok())
    }

    pub fn list_worktrees(&self) -> Result<Vec<WorktreeInfo>, GitError> {
        let names = self.repo.worktrees()?;
        Ok(names
            .iter()
            .flatten()
            .filter_map(|name| self.find_worktree(name))
            .map(|worktree| describe(&worktree))
            .collect())
    }

    /// Delete the working directory and the registration.
    pub fn remove_worktree(&self, name: &str) -> Result<(), GitError> {
        let mut opts = WorktreePruneOptions::new();
        opts.valid(true).working_tree(true);
        self.repo.find_worktree(name)?.prune(Some(&mut opts))
    }

    /// Drop the registration whatever its state, leaving files alone.
    pub fn force_prune_worktree(&self, name: &str) -> Result<(), GitError> {
        let mut opts = WorktreePruneOptions::new();
        opts.valid(true).locked(true).working_tree(false);
        self.repo.find_worktree(name)?.prune(Some(&mut opts))
    }

    /// Detach HEAD in every linked worktree that has `branch` checked out so the
    /// branch can be checked out again. Their files are left as they are.
    /// Returns the names of the released worktrees.
    pub fn detach_branch_holders(&self, branch: &str) -> Result<Vec<String>, GitError> {
        let full_name = format!("refs/heads/{}", branch);
        let mut released = Vec::new();
        for name in self.repo.worktrees()?.iter().flatten() {
            let Some(worktree) = self.find_worktree(name) else {
                continue;
            };
            if worktree.validate().is_err() {
                continue;
            }
            let repo = Repository::open_from_worktree(&worktree)?;
            let commit = match repo.head() {
                Ok(head) if head.name() == Some(full_name.as_str()) => head.target(),
                _ => None,
            };
            let Some(commit) = commit else {
                continue;
            };
            repo.set_head_detached(commit)?;
            log::warn!(
                "[GitManager] Detached HEAD of worktree {} to release {}",
                name,
                branch
            );
            released.push(name.to_string());
        }
        Ok(released)
    }

    /// Prune registrations whose directory is gone. Returns the pruned names.
    pub fn prune_orphaned_worktrees(&self) -> Result<Vec<String>, GitError> {
        let mut pruned = Vec::new();
        for name in self.repo.worktrees()?.iter().flatten() {
            let Some(worktree) = self.find_worktree(name) else {
                continue;
            };
            if worktree.path().exists() {
                continue;
            }
            match worktree.prune(None) {
                Ok(()) => {
                    log::info!(
                        "[GitManager] Pruned orphaned worktree {} ({:?} is gone)",
                        name,
                        worktree.path()
                    );
                    pruned.push(name.to_string());
                }
                Err(e) => log::warn!("[GitManager] Failed to prune worktree {}: {}", name, e),
            }
        }
        Ok(pruned)
    }
}
