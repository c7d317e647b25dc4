//! Run history: what each task looked like after its last successful run.
//!
//! One JSON file per project under `{cache_root}/history/{project_hash}.json`,
//! mapping task names to the fingerprint, per-input digests and output file
//! metadata recorded when the task last executed or was restored. The
//! up-to-date check compares against these records without touching the
//! cache store.

use crate::cas::write_atomic;
use crate::entry::OutputFile;
use crate::{Error, Fingerprint, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const HISTORY_DIR: &str = "history";

/// Per-task record of the last successful execution or restoration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Fingerprint the outputs correspond to
    pub fingerprint: Fingerprint,
    /// Digest of each declared input, keyed by its label
    #[serde(default)]
    pub input_digests: BTreeMap<String, String>,
    /// Output files as they were left on disk
    #[serde(default)]
    pub outputs: Vec<OutputFile>,
    /// When the record was written
    pub recorded_at: DateTime<Utc>,
}

/// Everything recorded for one project root.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectHistory {
    /// Project root the records belong to (informational)
    pub project_root: String,
    /// Records keyed by task name
    #[serde(default)]
    pub tasks: BTreeMap<String, TaskRecord>,
}

/// Short stable key for a project root.
#[must_use]
pub fn project_hash(project_root: &Path) -> String {
    let digest = Sha256::digest(project_root.to_string_lossy().as_bytes());
    hex::encode(&digest[..8])
}

/// History of one project, loaded once and written through on every record.
pub struct RunHistory {
    path: PathBuf,
    state: Mutex<ProjectHistory>,
}

impl RunHistory {
    /// Load the history of `project_root` from the cache at `cache_root`.
    ///
    /// A missing or unreadable file yields an empty history: every task then
    /// starts with "no previous execution recorded".
    #[must_use]
    pub fn open(cache_root: &Path, project_root: &Path) -> Self {
        let path = cache_root
            .join(HISTORY_DIR)
            .join(format!("{}.json", project_hash(project_root)));
        let state = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable run history");
                ProjectHistory::default()
            }),
            Err(_) => ProjectHistory::default(),
        };
        let state = ProjectHistory {
            project_root: project_root.to_string_lossy().into_owned(),
            ..state
        };
        debug!(
            path = %path.display(),
            tasks = state.tasks.len(),
            "Loaded run history"
        );
        Self {
            path,
            state: Mutex::new(state),
        }
    }

    /// Path of the backing file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last record of `task_name`, if any.
    #[must_use]
    pub fn get(&self, task_name: &str) -> Option<TaskRecord> {
        self.state.lock().tasks.get(task_name).cloned()
    }

    /// Store the record for `task_name` and persist the file.
    ///
    /// # Errors
    ///
    /// Returns an I/O or serialization error if the file cannot be written;
    /// the in-memory record is kept either way.
    pub fn record(&self, task_name: &str, record: TaskRecord) -> Result<()> {
        let mut state = self.state.lock();
        state.tasks.insert(task_name.to_string(), record);
        self.persist(&state)
    }

    /// Drop the record of `task_name` (after a failure, so the next run does
    /// not treat stale outputs as up to date).
    ///
    /// # Errors
    ///
    /// Returns an I/O or serialization error if the file cannot be written.
    pub fn forget(&self, task_name: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.tasks.remove(task_name).is_some() {
            self.persist(&state)?;
        }
        Ok(())
    }

    fn persist(&self, state: &ProjectHistory) -> Result<()> {
        let json = serde_json::to_vec_pretty(state)
            .map_err(|e| Error::serialization(format!("Failed to serialize run history: {e}")))?;
        write_atomic(&self.path, &json)
    }

    /// Fingerprints recorded in any project history under `cache_root`.
    ///
    /// Garbage collection keeps these entries regardless of age.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the history directory cannot be listed.
    pub fn recorded_fingerprints(cache_root: &Path) -> Result<HashSet<Fingerprint>> {
        let dir = cache_root.join(HISTORY_DIR);
        let mut found = HashSet::new();
        if !dir.exists() {
            return Ok(found);
        }
        for entry in fs::read_dir(&dir).map_err(|e| Error::io(e, &dir, "read_dir"))? {
            let entry = entry.map_err(|e| Error::io(e, &dir, "read_dir_entry"))?;
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let Ok(bytes) = fs::read(&path) else {
                continue;
            };
            match serde_json::from_slice::<ProjectHistory>(&bytes) {
                Ok(history) => found.extend(history.tasks.values().map(|r| r.fingerprint)),
                Err(e) => debug!(path = %path.display(), error = %e, "Skipping unreadable history"),
            }
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FingerprintBuilder;
    use crate::cas::BlobId;
    use tempfile::TempDir;

    fn record(tag: &str) -> TaskRecord {
        let mut builder = FingerprintBuilder::new();
        builder.text("test", tag);
        TaskRecord {
            fingerprint: builder.finish(),
            input_digests: BTreeMap::from([("src/A.src".to_string(), "abc".to_string())]),
            outputs: vec![OutputFile {
                rel_path: "gen/A.gen".into(),
                size: 3,
                sha256: BlobId::from_data(b"abc"),
            }],
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn test_project_hash_is_stable_and_short() {
        let a = project_hash(Path::new("/work/project"));
        assert_eq!(a, project_hash(Path::new("/work/project")));
        assert_ne!(a, project_hash(Path::new("/other/project")));
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn test_record_persists_across_open() {
        let cache = TempDir::new().unwrap();
        let project = Path::new("/work/project");

        let history = RunHistory::open(cache.path(), project);
        assert!(history.get("stub").is_none());
        history.record("stub", record("one")).unwrap();
        assert!(history.path().is_file());

        let reopened = RunHistory::open(cache.path(), project);
        let loaded = reopened.get("stub").unwrap();
        let expected = record("one");
        assert_eq!(loaded.fingerprint, expected.fingerprint);
        assert_eq!(loaded.input_digests, expected.input_digests);
        assert_eq!(loaded.outputs, expected.outputs);
    }

    #[test]
    fn test_projects_are_separate() {
        let cache = TempDir::new().unwrap();
        RunHistory::open(cache.path(), Path::new("/a"))
            .record("t", record("a"))
            .unwrap();
        assert!(RunHistory::open(cache.path(), Path::new("/b")).get("t").is_none());
    }

    #[test]
    fn test_forget_removes_record() {
        let cache = TempDir::new().unwrap();
        let history = RunHistory::open(cache.path(), Path::new("/p"));
        history.record("t", record("a")).unwrap();
        history.forget("t").unwrap();
        history.forget("t").unwrap();
        assert!(RunHistory::open(cache.path(), Path::new("/p")).get("t").is_none());
    }

    #[test]
    fn test_unreadable_history_starts_empty() {
        let cache = TempDir::new().unwrap();
        let project = Path::new("/p");
        let path = cache
            .path()
            .join("history")
            .join(format!("{}.json", project_hash(project)));
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"{ broken").unwrap();

        let history = RunHistory::open(cache.path(), project);
        assert!(history.get("anything").is_none());
    }

    #[test]
    fn test_recorded_fingerprints_spans_projects() {
        let cache = TempDir::new().unwrap();
        RunHistory::open(cache.path(), Path::new("/a"))
            .record("t", record("a"))
            .unwrap();
        RunHistory::open(cache.path(), Path::new("/b"))
            .record("t", record("b"))
            .unwrap();

        let found = RunHistory::recorded_fingerprints(cache.path()).unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.contains(&record("a").fingerprint));
    }
}
