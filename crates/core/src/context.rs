//! Run-scoped state.
//!
//! A [`RunContext`] is built once per invocation and passed explicitly to
//! everything that needs the project root, the cache or the run history.
//! Its scratch directory is removed when the context is dropped.

use crate::{Error, Result};
use std::path::{Path, PathBuf};
use taskmemo_cache::{CacheStore, RunHistory};
use uuid::Uuid;

/// Scratch directories live under the cache root in this subdirectory.
pub const SCRATCH_DIR: &str = "scratch";

/// State shared by every task of one run
pub struct RunContext {
    run_id: Uuid,
    project_root: PathBuf,
    cache: CacheStore,
    history: RunHistory,
    scratch_dir: PathBuf,
}

impl RunContext {
    /// Create the context for running tasks of the project at `project_root`.
    ///
    /// The project root is canonicalized so that the run history is keyed
    /// by the real location of the project.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the project root does not exist or the
    /// scratch directory cannot be created.
    pub fn new(project_root: &Path, cache: CacheStore) -> Result<Self> {
        let project_root = project_root
            .canonicalize()
            .map_err(|e| Error::io(e, project_root, "resolve project root"))?;
        let cache_root = cache.local().root().to_path_buf();
        let history = RunHistory::open(&cache_root, &project_root);

        let run_id = Uuid::new_v4();
        let scratch_dir = cache_root.join(SCRATCH_DIR).join(run_id.to_string());
        std::fs::create_dir_all(&scratch_dir)
            .map_err(|e| Error::io(e, &scratch_dir, "create scratch dir"))?;

        tracing::debug!(
            %run_id,
            project_root = %project_root.display(),
            cache_root = %cache_root.display(),
            "Created run context"
        );
        Ok(Self {
            run_id,
            project_root,
            cache,
            history,
            scratch_dir,
        })
    }

    /// Unique id of this run
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Canonical project root
    #[must_use]
    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// The tiered cache store
    #[must_use]
    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Run history of this project
    #[must_use]
    pub fn history(&self) -> &RunHistory {
        &self.history
    }

    /// Directory for sandboxes of this run
    #[must_use]
    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("run_id", &self.run_id)
            .field("project_root", &self.project_root)
            .field("scratch_dir", &self.scratch_dir)
            .finish_non_exhaustive()
    }
}

impl Drop for RunContext {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.scratch_dir) {
            tracing::debug!(
                scratch = %self.scratch_dir.display(),
                error = %e,
                "Failed to remove scratch directory"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskmemo_cache::LocalStore;
    use tempfile::TempDir;

    #[test]
    fn test_scratch_dir_lifecycle() {
        let project = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        let store = CacheStore::new(LocalStore::open(cache.path(), None).unwrap());

        let ctx = RunContext::new(project.path(), store).unwrap();
        let scratch = ctx.scratch_dir().to_path_buf();
        assert!(scratch.is_dir());
        assert!(scratch.starts_with(cache.path().join(SCRATCH_DIR)));
        assert_eq!(ctx.project_root(), project.path().canonicalize().unwrap());

        drop(ctx);
        assert!(!scratch.exists());
    }

    #[test]
    fn test_missing_project_root() {
        let cache = TempDir::new().unwrap();
        let store = CacheStore::new(LocalStore::open(cache.path(), None).unwrap());
        let err = RunContext::new(&cache.path().join("nope"), store).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }
}
