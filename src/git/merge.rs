//! Landing a chunk branch on the base branch
//!
//! Runs in the main working copy, which must already be clean. Conflicts are
//! reported and left for `merge_abort`; nothing is resolved automatically.

use git2::{build::CheckoutBuilder, AnnotatedCommit, BranchType, Commit, Error as GitError, Index};

use crate::git::types::MergeOutcome;
use crate::git::GitManager;

fn conflicted_paths(index: &Index) -> Result<Vec<String>, GitError> {
    let mut files = Vec::new();
    for conflict in index.conflicts()? {
        let conflict = conflict?;
        let entry = conflict.our.or(conflict.their).or(conflict.ancestor);
        if let Some(entry) = entry {
            files.push(String::from_utf8_lossy(&entry.path).into_owned());
        }
    }
    files.sort();
    files.dedup();
    Ok(files)
}

impl GitManager {
    /// Merge `source` into `target`, checking `target` out first.
    pub fn merge_branch(&self, source: &str, target: &str) -> Result<MergeOutcome, GitError> {
        log::info!("[GitManager] Merging {} into {}", source, target);
        self.checkout_branch(target)?;

        let incoming = self
            .repo
            .find_branch(source, BranchType::Local)?
            .get()
            .peel_to_commit()?;
        let annotated = self.repo.find_annotated_commit(incoming.id())?;
        let (analysis, _) = self.repo.merge_analysis(&[&annotated])?;

        if analysis.is_up_to_date() {
            return Ok(MergeOutcome::UpToDate);
        }
        if analysis.is_fast_forward() {
            return self.fast_forward(target, &incoming);
        }
        self.three_way(source, target, &incoming, &annotated)
    }

    fn fast_forward(&self, target: &str, incoming: &Commit) -> Result<MergeOutcome, GitError> {
        // Safe checkout first: a local edit to a touched file aborts before the ref moves
        self.repo
            .checkout_tree(incoming.as_object(), Some(CheckoutBuilder::new().safe()))?;
        self.repo
            .find_reference(&format!("refs/heads/{}", target))?
            .set_target(incoming.id(), &format!("orchestrator: fast-forward {}", target))?;

        Ok(MergeOutcome::FastForward {
            commit: incoming.id().to_string(),
        })
    }

    fn three_way(
        &self,
        source: &str,
        target: &str,
        incoming: &Commit,
        annotated: &AnnotatedCommit,
    ) -> Result<MergeOutcome, GitError> {
        let mut checkout = CheckoutBuilder::new();
        checkout.safe();
        self.repo.merge(&[annotated], None, Some(&mut checkout))?;

        let mut index = self.repo.index()?;
        if index.has_conflicts() {
            let files = conflicted_paths(&index)?;
            log::warn!("[GitManager] {} conflicts with {}: {:?}", source, target, files);
            return Ok(MergeOutcome::Conflicted { files });
        }

        let tree = self.repo.find_tree(index.write_tree()?)?;
        let head = self.repo.head()?.peel_to_commit()?;
        let signature = self.signature()?;
        let oid = self.repo.commit(
            Some("HEAD"),
            &signature,
            &signature,
            &format!("Merge branch '{}' into {}", source, target),
            &tree,
            &[&head, incoming],
        )?;
        self.repo.cleanup_state()?;

        Ok(MergeOutcome::Merged {
            commit: oid.to_string(),
        })
    }

    /// Throw away an in-progress merge: hard reset to HEAD and clear MERGE_HEAD.
    pub fn merge_abort(&self) -> Result<(), GitError> {
        log::info!("[GitManager] Aborting merge");
        let head = self.repo.head()?.peel_to_commit()?;
        self.repo.reset(head.as_object(), git2::ResetType::Hard, None)?;
        self.repo.cleanup_state()
    }
}
