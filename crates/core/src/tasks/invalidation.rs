//! Per-task invalidation decisions.
//!
//! Evaluated once per task and run:
//! - **UpToDate**: the recorded fingerprint equals the current one and the
//!   declared outputs on disk still match what was recorded. This path
//!   never touches the cache store.
//! - **CacheHit**: not up to date, but the cache store holds an entry for
//!   the current fingerprint.
//! - **Stale**: neither; the task executes.

use super::Task;
use super::hasher::TaskFingerprint;
use super::outputs::{missing_outputs, snapshot_outputs};
use crate::context::RunContext;
use crate::{Error, Result};
use std::path::Path;
use taskmemo_cache::{CacheEntry, TaskRecord};
use tracing::warn;

/// Cause when the task has never succeeded in this project
pub const NO_PREVIOUS_EXECUTION: &str = "No previous execution recorded";
/// Cause when the fingerprint changed but every input digest is the same
pub const ACTION_CHANGED: &str = "Action changed";
/// Cause of a restore
pub const LOADED_FROM_CACHE: &str = "Loaded from cache";
/// Cause when a hit could not be restored
pub const CORRUPT_ENTRY_EVICTED: &str = "Cache entry was corrupt and has been evicted";
/// Cause of an up-to-date task
pub const UP_TO_DATE: &str = "Up-to-date";

/// What to do with a task
#[derive(Debug, Clone)]
pub enum Decision {
    /// Skip; outputs are current
    UpToDate,
    /// Restore `entry`; `cause` says why the task was not up to date
    CacheHit {
        /// The stored entry for the current fingerprint
        entry: CacheEntry,
        /// Why the task was not up to date
        cause: String,
    },
    /// Execute
    Stale {
        /// Why the task was not up to date
        cause: String,
    },
}

/// Decides between skipping, restoring and executing
#[derive(Debug, Clone, Copy)]
pub struct InvalidationEngine<'a> {
    ctx: &'a RunContext,
}

impl<'a> InvalidationEngine<'a> {
    /// Engine for one run
    #[must_use]
    pub fn new(ctx: &'a RunContext) -> Self {
        Self { ctx }
    }

    /// Decide what to do with `task` given its current fingerprint.
    ///
    /// Cache lookup failures are logged and treated as a miss.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the recorded outputs cannot be inspected.
    pub async fn evaluate(&self, task: &Task, current: &TaskFingerprint) -> Result<Decision> {
        let record = self.ctx.history().get(&task.name);
        let (owned_task, owned_current) = (task.clone(), current.clone());
        let root = self.ctx.project_root().to_path_buf();
        let stale = tokio::task::spawn_blocking(move || {
            stale_cause(record.as_ref(), &owned_current, &owned_task, &root)
        })
        .await
        .map_err(|e| Error::execution(&task.name, format!("output check panicked: {e}")))??;

        let Some(cause) = stale else {
            return Ok(Decision::UpToDate);
        };
        if !task.cacheable {
            return Ok(Decision::Stale { cause });
        }

        match self.ctx.cache().get(&current.fingerprint).await {
            Ok(Some(entry)) => Ok(Decision::CacheHit { entry, cause }),
            Ok(None) => Ok(Decision::Stale { cause }),
            Err(e) => {
                warn!(task = %task.name, error = %e, "Cache lookup failed; treating as miss");
                Ok(Decision::Stale { cause })
            }
        }
    }
}

/// Why `task` is not up to date, or `None` when it is.
///
/// # Errors
///
/// Returns an I/O error if the outputs under `project_root` cannot be read.
pub fn stale_cause(
    record: Option<&TaskRecord>,
    current: &TaskFingerprint,
    task: &Task,
    project_root: &Path,
) -> Result<Option<String>> {
    let Some(record) = record else {
        return Ok(Some(NO_PREVIOUS_EXECUTION.to_string()));
    };

    if record.fingerprint != current.fingerprint {
        return Ok(Some(changed_input(record, current, task)));
    }

    if let Some(missing) = missing_outputs(project_root, &task.outputs).first() {
        return Ok(Some(format!("Output '{missing}' was removed")));
    }

    let actual = snapshot_outputs(project_root, &task.outputs)?;
    for recorded in &record.outputs {
        match actual.iter().find(|a| a.rel_path == recorded.rel_path) {
            None => return Ok(Some(format!("Output '{}' was removed", recorded.rel_path))),
            Some(found) if found != recorded => {
                return Ok(Some(format!("Output '{}' was modified", recorded.rel_path)));
            }
            Some(_) => {}
        }
    }
    if let Some(extra) = actual
        .iter()
        .find(|a| !record.outputs.iter().any(|r| r.rel_path == a.rel_path))
    {
        return Ok(Some(format!("Output '{}' was modified", extra.rel_path)));
    }

    Ok(None)
}

/// Name the first input, in declaration order, whose digest differs.
fn changed_input(record: &TaskRecord, current: &TaskFingerprint, task: &Task) -> String {
    for input in &task.inputs {
        let label = input.label();
        if record.input_digests.get(&label) != current.input_digests.get(&label) {
            return format!("Input '{label}' changed");
        }
    }
    if let Some(label) = record
        .input_digests
        .keys()
        .find(|label| !current.input_digests.contains_key(*label))
    {
        return format!("Input '{label}' was removed");
    }
    ACTION_CHANGED.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::InputDescriptor;
    use crate::tasks::action::FunctionAction;
    use crate::tasks::hasher::ContentHasher;
    use chrono::Utc;
    use std::fs;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, data: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, data).unwrap();
    }

    fn task(version: &str) -> Task {
        Task::new("process", FunctionAction::new(version, |_| Ok(())))
            .input(InputDescriptor::path("stubs"))
            .input(InputDescriptor::property("target", "17"))
            .output("gen")
    }

    fn setup() -> (TempDir, TaskFingerprint, TaskRecord) {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "stubs/A.java", "class A {}");
        write(dir.path(), "gen/A.gen", "generated A");
        let current = ContentHasher::new(dir.path()).fingerprint(&task("1")).unwrap();
        let record = TaskRecord {
            fingerprint: current.fingerprint,
            input_digests: current.input_digests.clone(),
            outputs: snapshot_outputs(dir.path(), &["gen".to_string()]).unwrap(),
            recorded_at: Utc::now(),
        };
        (dir, current, record)
    }

    fn cause(dir: &TempDir, record: Option<&TaskRecord>, task: &Task) -> Option<String> {
        let current = ContentHasher::new(dir.path()).fingerprint(task).unwrap();
        stale_cause(record, &current, task, dir.path()).unwrap()
    }

    #[test]
    fn test_up_to_date_when_nothing_changed() {
        let (dir, current, record) = setup();
        assert_eq!(stale_cause(Some(&record), &current, &task("1"), dir.path()).unwrap(), None);
    }

    #[test]
    fn test_no_record() {
        let (dir, _, _) = setup();
        assert_eq!(cause(&dir, None, &task("1")).as_deref(), Some(NO_PREVIOUS_EXECUTION));
    }

    #[test]
    fn test_changed_input_is_named() {
        let (dir, _, record) = setup();
        write(dir.path(), "stubs/A.java", "class A { int x; }");
        assert_eq!(
            cause(&dir, Some(&record), &task("1")).as_deref(),
            Some("Input 'stubs' changed")
        );
    }

    #[test]
    fn test_changed_property_is_named() {
        let (dir, _, record) = setup();
        let mut changed = task("1");
        changed.inputs[1] = InputDescriptor::property("target", "21");
        assert_eq!(
            cause(&dir, Some(&record), &changed).as_deref(),
            Some("Input 'property:target' changed")
        );
    }

    #[test]
    fn test_action_change() {
        let (dir, _, record) = setup();
        assert_eq!(cause(&dir, Some(&record), &task("2")).as_deref(), Some(ACTION_CHANGED));
    }

    #[test]
    fn test_removed_and_modified_outputs() {
        let (dir, _, record) = setup();
        write(dir.path(), "gen/A.gen", "tampered");
        assert_eq!(
            cause(&dir, Some(&record), &task("1")).as_deref(),
            Some("Output 'gen/A.gen' was modified")
        );

        fs::remove_file(dir.path().join("gen/A.gen")).unwrap();
        assert_eq!(
            cause(&dir, Some(&record), &task("1")).as_deref(),
            Some("Output 'gen/A.gen' was removed")
        );

        fs::remove_dir_all(dir.path().join("gen")).unwrap();
        assert_eq!(
            cause(&dir, Some(&record), &task("1")).as_deref(),
            Some("Output 'gen' was removed")
        );
    }

    #[test]
    fn test_extra_output_file_counts_as_modified() {
        let (dir, _, record) = setup();
        write(dir.path(), "gen/B.gen", "stray");
        assert_eq!(
            cause(&dir, Some(&record), &task("1")).as_deref(),
            Some("Output 'gen/B.gen' was modified")
        );
    }
}
