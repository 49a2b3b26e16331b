//! Thin git2 wrapper used by the worktree manager
//!
//! - `manager` - `GitManager`, one opened repository or worktree
//! - `branches` - create, delete, checkout, ahead-of-base counts
//! - `worktrees` - add, remove, prune, list
//! - `commits` - staging and committing
//! - `merge` - merging into base and aborting
//! - `status` - dirtiness checks
//!
//! `git2::Repository` is not `Sync`; open a fresh manager per operation.

mod branches;
mod commits;
mod manager;
mod merge;
mod status;
mod types;
mod worktrees;

pub use manager::GitManager;
pub use types::{CommitInfo, MergeOutcome, WorktreeInfo};
