// Working tree dirtiness

use git2::{Error as GitError, StatusOptions};

use crate::git::GitManager;

impl GitManager {
    /// Paths that differ from HEAD in the index or working tree. Untracked files
    /// count; ignored ones do not.
    pub fn dirty_paths(&self) -> Result<Vec<String>, GitError> {
        let mut opts = StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false);

        let statuses = self.repo.statuses(Some(&mut opts))?;
        let mut paths: Vec<String> = statuses
            .iter()
            .filter_map(|entry| entry.path().map(str::to_string))
            .collect();
        paths.sort();
        Ok(paths)
    }

    pub fn is_dirty(&self) -> Result<bool, GitError> {
        Ok(!self.dirty_paths()?.is_empty())
    }
}
