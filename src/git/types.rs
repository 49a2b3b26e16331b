//! Value types returned by GitManager

use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize)]
pub struct CommitInfo {
    pub id: String,
    pub short_id: String,
    pub message: String,
    pub parent_ids: Vec<String>,
}

/// A linked worktree registration
#[derive(Debug, Clone, Serialize)]
pub struct WorktreeInfo {
    pub name: String,
    pub path: PathBuf,
    pub branch: Option<String>,
    pub is_locked: bool,
    /// False when the registration exists but the directory is gone
    pub is_valid: bool,
}

/// How a branch landed on its target
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MergeOutcome {
    /// Target already contained the branch
    UpToDate,
    FastForward { commit: String },
    /// Two-parent merge commit
    Merged { commit: String },
    /// Merge stopped with conflicts; the working copy is left mid-merge
    Conflicted { files: Vec<String> },
}

impl MergeOutcome {
    pub fn is_conflicted(&self) -> bool {
        matches!(self, MergeOutcome::Conflicted { .. })
    }
}

impl std::fmt::Display for MergeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MergeOutcome::UpToDate => write!(f, "already up to date"),
            MergeOutcome::FastForward { commit } => write!(f, "fast-forward to {}", commit),
            MergeOutcome::Merged { commit } => write!(f, "merge commit {}", commit),
            MergeOutcome::Conflicted { files } => {
                write!(f, "conflicts in {}", files.join(", "))
            }
        }
    }
}
