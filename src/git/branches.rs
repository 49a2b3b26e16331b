// Branch lookup, creation and comparison

use git2::{BranchType, Commit, Error as GitError};

use crate::git::GitManager;

impl GitManager {
    fn branch_tip(&self, name: &str) -> Result<Commit<'_>, GitError> {
        self.repo
            .find_branch(name, BranchType::Local)?
            .get()
            .peel_to_commit()
    }

    pub fn branch_exists(&self, name: &str) -> bool {
        self.repo.find_branch(name, BranchType::Local).is_ok()
    }

    /// Create `name` at the tip of `base`. Returns the tip commit id.
    pub fn create_branch_from(&self, name: &str, base: &str) -> Result<String, GitError> {
        let tip = self.branch_tip(base)?;
        self.repo.branch(name, &tip, false)?;
        log::info!("[GitManager] Created branch {} from {} at {}", name, base, tip.id());
        Ok(tip.id().to_string())
    }

    /// Fails if the branch is checked out somewhere.
    pub fn delete_branch(&self, name: &str) -> Result<(), GitError> {
        self.repo.find_branch(name, BranchType::Local)?.delete()?;
        log::info!("[GitManager] Deleted branch {}", name);
        Ok(())
    }

    /// Errors on a detached or unborn HEAD
    pub fn current_branch_name(&self) -> Result<String, GitError> {
        let head = self.repo.head()?;
        if !head.is_branch() {
            return Err(GitError::from_str("HEAD is detached"));
        }
        head.shorthand()
            .map(str::to_string)
            .ok_or_else(|| GitError::from_str("HEAD branch name is not valid UTF-8"))
    }

    /// Safe checkout: local edits to files that differ between the two trees
    /// make this fail rather than being overwritten.
    pub fn checkout_branch(&self, name: &str) -> Result<(), GitError> {
        let refname = format!("refs/heads/{}", name);
        let tip = self.branch_tip(name)?;
        self.repo.checkout_tree(
            tip.as_object(),
            Some(git2::build::CheckoutBuilder::new().safe()),
        )?;
        self.repo.set_head(&refname)
    }

    /// Commits on `branch` not reachable from `base`
    pub fn commits_ahead(&self, branch: &str, base: &str) -> Result<usize, GitError> {
        let branch_oid = self.branch_tip(branch)?.id();
        let base_oid = self.branch_tip(base)?.id();
        let (ahead, _behind) = self.repo.graph_ahead_behind(branch_oid, base_oid)?;
        Ok(ahead)
    }
}
