// GitManager: an opened repository or linked worktree

use git2::{Error as GitError, Repository, Signature};
use std::path::Path;

const FALLBACK_AUTHOR_NAME: &str = "Chunk Orchestrator";
const FALLBACK_AUTHOR_EMAIL: &str = "orchestrator@localhost";

/// Git manager for repository operations.
///
/// Works on the main repository as well as on a linked worktree directory;
/// opening a worktree path yields a repository whose HEAD is the worktree's branch.
pub struct GitManager {
    pub(crate) repo: Repository,
}

impl GitManager {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, GitError> {
        let repo = Repository::open(path)?;
        Ok(Self { repo })
    }

    /// Configured user signature, falling back to a fixed orchestrator identity
    pub(crate) fn signature(&self) -> Result<Signature<'static>, GitError> {
        self.repo
            .signature()
            .or_else(|_| Signature::now(FALLBACK_AUTHOR_NAME, FALLBACK_AUTHOR_EMAIL))
    }
}
