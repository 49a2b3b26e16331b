//! Chunk document reader
//!
//! A chunk is described by `docs/chunks/<chunk>/GOAL.md` (YAML frontmatter plus a
//! markdown body) and an optional free-form `PLAN.md`. This module is read-only.
//!
//! - `frontmatter` - typed frontmatter schema and the fence splitter
//! - `FsChunkReader` - reads documents from the project tree
//! - `InMemoryChunkReader` - fixture-backed reader for embedding and tests

mod frontmatter;

pub use frontmatter::{parse_goal_document, ChunkStatus, CodeReference, GoalFrontmatter};

use crate::utils::{chunk_docs_dir, lock_mutex_recover};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

pub const GOAL_FILE: &str = "GOAL.md";
pub const PLAN_FILE: &str = "PLAN.md";

#[derive(Debug, Error)]
pub enum ChunkDocError {
    #[error("Chunk document not found: {0}")]
    NotFound(String),

    #[error("Chunk document has no frontmatter: {0}")]
    MissingFrontmatter(String),

    #[error("Invalid frontmatter in {location}: {message}")]
    InvalidFrontmatter { location: String, message: String },

    #[error("Failed to read {location}: {source}")]
    Io {
        location: String,
        #[source]
        source: std::io::Error,
    },
}

/// Parsed goal document
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkGoal {
    pub frontmatter: GoalFrontmatter,
    pub body: String,
}

impl ChunkGoal {
    pub fn status(&self) -> ChunkStatus {
        self.frontmatter.status
    }
}

/// Read access to chunk documents
pub trait ChunkReader: Send + Sync {
    /// Parse the goal document. Never returns a partially valid document.
    fn read_goal(&self, chunk: &str) -> Result<ChunkGoal, ChunkDocError>;

    /// Raw plan text, `None` when the chunk has no plan yet.
    fn read_plan(&self, chunk: &str) -> Result<Option<String>, ChunkDocError>;

    /// Parse the goal document as it stands in another checkout of the project,
    /// such as the chunk's worktree. Readers not backed by files ignore `checkout`.
    fn read_goal_in(&self, checkout: &Path, chunk: &str) -> Result<ChunkGoal, ChunkDocError> {
        let _ = checkout;
        self.read_goal(chunk)
    }
}

/// Reads `docs/chunks/<chunk>/` under a project root
pub struct FsChunkReader {
    project_path: PathBuf,
}

impl FsChunkReader {
    pub fn new(project_path: &Path) -> Self {
        Self {
            project_path: project_path.to_path_buf(),
        }
    }

    pub fn goal_path(&self, chunk: &str) -> PathBuf {
        chunk_docs_dir(&self.project_path, chunk).join(GOAL_FILE)
    }

    pub fn plan_path(&self, chunk: &str) -> PathBuf {
        chunk_docs_dir(&self.project_path, chunk).join(PLAN_FILE)
    }
}

fn read_optional(path: &Path) -> Result<Option<String>, ChunkDocError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(ChunkDocError::Io {
            location: path.display().to_string(),
            source,
        }),
    }
}

fn read_goal_file(path: &Path) -> Result<ChunkGoal, ChunkDocError> {
    let location = path.display().to_string();
    let content = read_optional(path)?.ok_or_else(|| ChunkDocError::NotFound(location.clone()))?;
    parse_goal_document(&location, &content)
}

impl ChunkReader for FsChunkReader {
    fn read_goal(&self, chunk: &str) -> Result<ChunkGoal, ChunkDocError> {
        read_goal_file(&self.goal_path(chunk))
    }

    fn read_plan(&self, chunk: &str) -> Result<Option<String>, ChunkDocError> {
        read_optional(&self.plan_path(chunk))
    }

    /// Falls back to the project copy when the checkout has no goal document,
    /// e.g. an uncommitted GOAL.md that never reached the chunk branch.
    fn read_goal_in(&self, checkout: &Path, chunk: &str) -> Result<ChunkGoal, ChunkDocError> {
        match read_goal_file(&chunk_docs_dir(checkout, chunk).join(GOAL_FILE)) {
            Err(ChunkDocError::NotFound(_)) => self.read_goal(chunk),
            other => other,
        }
    }
}

/// Reader over documents held in memory, keyed by chunk name
#[derive(Default)]
pub struct InMemoryChunkReader {
    goals: Mutex<HashMap<String, String>>,
    plans: Mutex<HashMap<String, String>>,
}

impl InMemoryChunkReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the raw GOAL.md content for a chunk
    pub fn set_goal(&self, chunk: &str, content: &str) {
        lock_mutex_recover(&self.goals).insert(chunk.to_string(), content.to_string());
    }

    /// Set the raw PLAN.md content for a chunk
    pub fn set_plan(&self, chunk: &str, content: &str) {
        lock_mutex_recover(&self.plans).insert(chunk.to_string(), content.to_string());
    }

    pub fn remove_goal(&self, chunk: &str) {
        lock_mutex_recover(&self.goals).remove(chunk);
    }
}

impl ChunkReader for InMemoryChunkReader {
    fn read_goal(&self, chunk: &str) -> Result<ChunkGoal, ChunkDocError> {
        let location = format!("{}/{}", chunk, GOAL_FILE);
        let content = lock_mutex_recover(&self.goals)
            .get(chunk)
            .cloned()
            .ok_or_else(|| ChunkDocError::NotFound(location.clone()))?;
        parse_goal_document(&location, &content)
    }

    fn read_plan(&self, chunk: &str) -> Result<Option<String>, ChunkDocError> {
        Ok(lock_mutex_recover(&self.plans).get(chunk).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_chunk(root: &Path, chunk: &str, goal: Option<&str>, plan: Option<&str>) {
        let dir = chunk_docs_dir(root, chunk);
        fs::create_dir_all(&dir).unwrap();
        if let Some(goal) = goal {
            fs::write(dir.join(GOAL_FILE), goal).unwrap();
        }
        if let Some(plan) = plan {
            fs::write(dir.join(PLAN_FILE), plan).unwrap();
        }
    }

    #[test]
    fn test_fs_reader_reads_goal_and_plan() {
        let temp_dir = TempDir::new().unwrap();
        write_chunk(
            temp_dir.path(),
            "auth",
            Some("---\nstatus: IMPLEMENTING\n---\n# Auth\n"),
            Some("Location: src/auth.rs\n"),
        );

        let reader = FsChunkReader::new(temp_dir.path());
        let goal = reader.read_goal("auth").unwrap();
        assert_eq!(goal.status(), ChunkStatus::Implementing);
        assert_eq!(goal.body.trim(), "# Auth");
        assert_eq!(
            reader.read_plan("auth").unwrap().as_deref(),
            Some("Location: src/auth.rs\n")
        );
    }

    #[test]
    fn test_fs_reader_prefers_checkout_copy() {
        let project = TempDir::new().unwrap();
        let checkout = TempDir::new().unwrap();
        write_chunk(project.path(), "auth", Some("---\nstatus: IMPLEMENTING\n---\n"), None);
        write_chunk(project.path(), "docs", Some("---\nstatus: IMPLEMENTING\n---\n"), None);
        write_chunk(checkout.path(), "auth", Some("---\nstatus: ACTIVE\n---\n"), None);

        let reader = FsChunkReader::new(project.path());
        assert_eq!(
            reader.read_goal_in(checkout.path(), "auth").unwrap().status(),
            ChunkStatus::Active
        );
        assert_eq!(
            reader.read_goal_in(checkout.path(), "docs").unwrap().status(),
            ChunkStatus::Implementing
        );
        assert!(matches!(
            reader.read_goal_in(checkout.path(), "ghost"),
            Err(ChunkDocError::NotFound(_))
        ));
    }

    #[test]
    fn test_fs_reader_missing_documents() {
        let temp_dir = TempDir::new().unwrap();
        let reader = FsChunkReader::new(temp_dir.path());
        assert!(matches!(
            reader.read_goal("ghost"),
            Err(ChunkDocError::NotFound(_))
        ));
        assert!(reader.read_plan("ghost").unwrap().is_none());
    }

    #[test]
    fn test_in_memory_reader() {
        let reader = InMemoryChunkReader::new();
        reader.set_goal("a", "---\nstatus: ACTIVE\n---\n");
        assert_eq!(reader.read_goal("a").unwrap().status(), ChunkStatus::Active);

        reader.remove_goal("a");
        assert!(matches!(reader.read_goal("a"), Err(ChunkDocError::NotFound(_))));
        assert!(reader.read_plan("a").unwrap().is_none());
    }
}
