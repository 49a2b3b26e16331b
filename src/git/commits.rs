//! Staging and committing inside a chunk worktree

use git2::{Commit, Error as GitError, IndexAddOption};

use crate::git::types::CommitInfo;
use crate::git::GitManager;

impl GitManager {
    /// Stage everything: additions, modifications and deletions
    pub fn stage_all(&self) -> Result<(), GitError> {
        let mut index = self.repo.index()?;
        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        index.update_all(["*"].iter(), None)?;
        index.write()?;
        Ok(())
    }

    /// Commit whatever is staged on top of HEAD.
    /// Returns `None` without committing when the index matches HEAD.
    pub fn commit_staged(&self, message: &str) -> Result<Option<CommitInfo>, GitError> {
        let mut index = self.repo.index()?;
        let tree_id = index.write_tree()?;

        let parent_commit = self.repo.head()?.peel_to_commit()?;
        if parent_commit.tree_id() == tree_id {
            return Ok(None);
        }

        let tree = self.repo.find_tree(tree_id)?;
        let signature = self.signature()?;

        let oid = self.repo.commit(
            Some("HEAD"),
            &signature,
            &signature,
            message,
            &tree,
            &[&parent_commit],
        )?;

        let commit = self.repo.find_commit(oid)?;
        Ok(Some(self.commit_to_info(&commit)?))
    }

    /// The commit HEAD currently points at
    pub fn head_commit(&self) -> Result<CommitInfo, GitError> {
        let commit = self.repo.head()?.peel_to_commit()?;
        self.commit_to_info(&commit)
    }

    /// Number of commits reachable from HEAD
    pub fn commit_count(&self) -> Result<usize, GitError> {
        let mut revwalk = self.repo.revwalk()?;
        revwalk.push_head()?;
        Ok(revwalk.count())
    }

    fn commit_to_info(&self, commit: &Commit) -> Result<CommitInfo, GitError> {
        let id = commit.id().to_string();

        Ok(CommitInfo {
            short_id: id.chars().take(7).collect(),
            id,
            message: commit.message().unwrap_or("").to_string(),
            parent_ids: commit.parent_ids().map(|oid| oid.to_string()).collect(),
        })
    }
}
