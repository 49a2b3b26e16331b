// Utility functions

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

// =============================================================================
// Path Helpers - the per-project .ve/ layout
// =============================================================================

/// Get the .ve directory path for a project.
#[inline]
pub fn ve_dir(project_path: &Path) -> PathBuf {
    project_path.join(".ve")
}

/// Get the .ve/chunks/<chunk> state directory (worktree + logs live here).
#[inline]
pub fn chunk_state_dir(project_path: &Path, chunk: &str) -> PathBuf {
    ve_dir(project_path).join("chunks").join(chunk)
}

/// Get the docs/chunks/<chunk> directory holding GOAL.md and PLAN.md.
#[inline]
pub fn chunk_docs_dir(project_path: &Path, chunk: &str) -> PathBuf {
    project_path.join("docs").join("chunks").join(chunk)
}

/// Get the .ve/orchestrator.yaml path for a project.
#[inline]
pub fn config_path(project_path: &Path) -> PathBuf {
    ve_dir(project_path).join("orchestrator.yaml")
}

/// Get the .ve/orchestrator.db path for a project.
#[inline]
pub fn db_path(project_path: &Path) -> PathBuf {
    ve_dir(project_path).join("orchestrator.db")
}

/// Validate a chunk name before it is used as a path component and branch suffix.
pub fn validate_chunk_name(chunk: &str) -> Result<(), String> {
    if chunk.is_empty() {
        return Err("Chunk name cannot be empty".to_string());
    }
    if chunk.starts_with('.') || chunk.starts_with('-') {
        return Err(format!(
            "Invalid chunk name '{}': must not start with '.' or '-'",
            chunk
        ));
    }
    if let Some(bad) = chunk
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-' || *c == '.'))
    {
        return Err(format!(
            "Invalid chunk name '{}': unexpected character '{}'",
            chunk, bad
        ));
    }
    if chunk.contains("..") || chunk.ends_with(".lock") {
        return Err(format!("Invalid chunk name '{}'", chunk));
    }
    Ok(())
}

/// Write a file by writing a sibling temp file and renaming it into place,
/// so readers never observe a partially written file.
pub fn write_atomic(path: &Path, contents: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{}.tmp", file_name));
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)
}

/// Remove a file, treating "already gone" as success.
pub fn remove_file_if_exists(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Safely acquire a mutex lock, recovering from poisoning by returning the guard.
/// This is useful when you want to continue even if a previous thread panicked.
/// The mutex state may be inconsistent, so use with caution.
pub fn lock_mutex_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            log::warn!("Mutex was poisoned, recovering: {}", poisoned);
            poisoned.into_inner()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout_paths() {
        let project = Path::new("/home/user/project");
        assert_eq!(ve_dir(project), PathBuf::from("/home/user/project/.ve"));
        assert_eq!(
            chunk_state_dir(project, "auth"),
            PathBuf::from("/home/user/project/.ve/chunks/auth")
        );
        assert_eq!(
            chunk_docs_dir(project, "auth"),
            PathBuf::from("/home/user/project/docs/chunks/auth")
        );
        assert_eq!(
            config_path(project),
            PathBuf::from("/home/user/project/.ve/orchestrator.yaml")
        );
        assert_eq!(
            db_path(project),
            PathBuf::from("/home/user/project/.ve/orchestrator.db")
        );
    }

    #[test]
    fn test_validate_chunk_name() {
        assert!(validate_chunk_name("auth_flow-2").is_ok());
        assert!(validate_chunk_name("v1.2").is_ok());
        assert!(validate_chunk_name("").is_err());
        assert!(validate_chunk_name("../escape").is_err());
        assert!(validate_chunk_name("a/b").is_err());
        assert!(validate_chunk_name("-flag").is_err());
        assert!(validate_chunk_name("has space").is_err());
    }

    #[test]
    fn test_write_atomic_and_remove() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("port");
        write_atomic(&path, "4242").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "4242");

        remove_file_if_exists(&path).unwrap();
        remove_file_if_exists(&path).unwrap();
        assert!(!path.exists());
    }
}
