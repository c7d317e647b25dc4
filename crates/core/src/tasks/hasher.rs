//! Content hashing of task inputs.
//!
//! Every input is reduced to a digest of its normalized form: property
//! name and value, or the files under a path (walked in lexicographic
//! order) together with the path form selected by its
//! [`PathSensitivity`]. The task fingerprint combines the input digests in
//! declaration order with the declared outputs and the action identity.

use super::action::Action;
use super::outputs::to_slash;
use super::{InputDescriptor, PathSensitivity, Task};
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use taskmemo_cache::{Fingerprint, FingerprintBuilder, sha256_file};
use walkdir::WalkDir;

/// Input label -> hex digest of its normalized content
pub type InputDigests = BTreeMap<String, String>;

/// Fingerprint of a task plus the digest of each input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFingerprint {
    /// Cache key of the task instance
    pub fingerprint: Fingerprint,
    /// Digest of each declared input
    pub input_digests: InputDigests,
}

/// Computes task fingerprints relative to one project root
#[derive(Debug, Clone)]
pub struct ContentHasher {
    project_root: PathBuf,
}

impl ContentHasher {
    /// Hasher for inputs under `project_root`
    #[must_use]
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
        }
    }

    /// Root that declared paths are resolved against
    #[must_use]
    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Fingerprint the current state of `task`'s inputs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InputUnavailable`] when a declared input path does
    /// not exist, or an I/O error when it cannot be read.
    #[tracing::instrument(name = "fingerprint", skip_all, fields(task = %task.name))]
    pub fn fingerprint(&self, task: &Task) -> Result<TaskFingerprint> {
        let mut builder = FingerprintBuilder::new();
        let mut input_digests = InputDigests::new();

        builder.text("inputs", &task.inputs.len().to_string());
        for input in &task.inputs {
            let digest = self.input_digest(&task.name, input)?;
            builder.text("input", &digest);
            input_digests.insert(input.label(), digest);
        }

        builder.text("outputs", &task.outputs.len().to_string());
        for output in &task.outputs {
            builder.text("output", output);
        }

        builder.text("action", &task.action.identity().to_string());

        let fingerprint = builder.finish();
        tracing::debug!(task = %task.name, fingerprint = %fingerprint.short(), "Computed fingerprint");
        Ok(TaskFingerprint {
            fingerprint,
            input_digests,
        })
    }

    fn input_digest(&self, task: &str, input: &InputDescriptor) -> Result<String> {
        let mut builder = FingerprintBuilder::new();
        match input {
            InputDescriptor::Property { property, value } => {
                builder.text("property", property).text("value", value);
            }
            InputDescriptor::Path { path, sensitivity } => {
                let root = self.project_root.join(path);
                let metadata = match std::fs::metadata(&root) {
                    Ok(metadata) => metadata,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        return Err(Error::input_unavailable(task, path.as_str()));
                    }
                    Err(e) => return Err(Error::io(e, &root, "stat input")),
                };

                if metadata.is_dir() {
                    builder.text("kind", "dir");
                    hash_tree(&mut builder, path, &root, *sensitivity)?;
                } else {
                    builder.text("kind", "file");
                    hash_entry(&mut builder, path, &root, *sensitivity);
                    builder.text("content", &sha256_file(&root)?.0);
                }
            }
        }
        Ok(builder.finish().to_hex())
    }
}

fn hash_tree(
    builder: &mut FingerprintBuilder,
    declared: &str,
    root: &Path,
    sensitivity: PathSensitivity,
) -> Result<()> {
    for entry in WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .min_depth(1)
    {
        let entry = entry.map_err(|e| Error::io(std::io::Error::from(e), root, "walk input"))?;
        let rel = entry
            .path()
            .strip_prefix(root)
            .map(to_slash)
            .unwrap_or_default();
        let project_rel = format!("{declared}/{rel}");

        if entry.file_type().is_dir() {
            builder.text("dir", "");
            hash_entry(builder, &project_rel, entry.path(), sensitivity);
        } else {
            builder.text("file", "");
            hash_entry(builder, &project_rel, entry.path(), sensitivity);
            builder.text("content", &sha256_file(entry.path())?.0);
        }
    }
    Ok(())
}

/// Feed the path form of one file or directory that `sensitivity` keeps.
fn hash_entry(
    builder: &mut FingerprintBuilder,
    project_rel: &str,
    absolute: &Path,
    sensitivity: PathSensitivity,
) {
    match sensitivity {
        PathSensitivity::Relative => {
            builder.text("path", project_rel);
        }
        PathSensitivity::NameOnly => {
            let name = project_rel.rsplit('/').next().unwrap_or(project_rel);
            builder.text("name", name);
        }
        PathSensitivity::ContentOnly => {}
        PathSensitivity::Absolute => {
            builder.text("absolute", &absolute.to_string_lossy());
        }
    }
}
