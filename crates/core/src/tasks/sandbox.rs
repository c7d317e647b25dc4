//! Per-execution working directories.
//!
//! A sandbox is a fresh directory under the run's scratch area holding only
//! copies of the task's declared inputs. Copies, not links, so an action
//! that rewrites an input in place cannot reach the project's sources.
//! After the action succeeds its declared outputs are published back onto
//! the project root.

use super::Task;
use super::outputs::{clear_outputs, list_output_files, missing_outputs};
use crate::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A task's private working directory, removed on drop
#[derive(Debug)]
pub struct Sandbox {
    root: PathBuf,
}

impl Sandbox {
    /// Create a sandbox for `task` under `scratch_dir` and stage its inputs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InputUnavailable`] for a missing input and an I/O
    /// error if staging fails.
    pub fn create(scratch_dir: &Path, project_root: &Path, task: &Task) -> Result<Self> {
        let root = scratch_dir.join(format!(
            "{}-{}",
            sanitize(&task.name),
            uuid::Uuid::new_v4().simple()
        ));
        fs::create_dir_all(&root).map_err(|e| Error::io(e, &root, "create sandbox"))?;
        let sandbox = Self { root };

        for path in task.inputs.iter().filter_map(|input| input.declared_path()) {
            let source = project_root.join(path);
            if source.is_dir() {
                stage_tree(&source, &sandbox.root.join(path))?;
            } else if source.is_file() {
                copy_input(&source, &sandbox.root.join(path))?;
            } else {
                return Err(Error::input_unavailable(&task.name, path));
            }
        }

        tracing::debug!(task = %task.name, sandbox = %sandbox.root.display(), "Created sandbox");
        Ok(sandbox)
    }

    /// The sandbox directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Copy the declared outputs onto `project_root`, replacing whatever
    /// was there. Returns the published files, project-relative.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ExecutionFailure`] if a declared output was not
    /// produced, or an I/O error if copying fails.
    pub fn publish_outputs(&self, task: &Task, project_root: &Path) -> Result<Vec<String>> {
        if let Some(missing) = missing_outputs(&self.root, &task.outputs).first() {
            return Err(Error::execution(
                &task.name,
                format!("declared output '{missing}' not produced"),
            ));
        }

        let files = list_output_files(&self.root, &task.outputs)?;
        clear_outputs(project_root, &task.outputs)?;
        for output in &task.outputs {
            // Empty output directories survive publishing.
            let produced = self.root.join(output);
            if produced.is_dir() {
                let dest = project_root.join(output);
                fs::create_dir_all(&dest).map_err(|e| Error::io(e, &dest, "create output dir"))?;
            }
        }
        for rel in &files {
            let dest = project_root.join(rel);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent).map_err(|e| Error::io(e, parent, "create output dir"))?;
            }
            fs::copy(self.root.join(rel), &dest).map_err(|e| Error::io(e, &dest, "publish output"))?;
        }
        Ok(files)
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.root) {
            tracing::debug!(sandbox = %self.root.display(), error = %e, "Failed to remove sandbox");
        }
    }
}

fn stage_tree(source: &Path, dest: &Path) -> Result<()> {
    for entry in WalkDir::new(source).follow_links(true).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::io(std::io::Error::from(e), source, "walk input"))?;
        let Ok(rel) = entry.path().strip_prefix(source) else {
            continue;
        };
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| Error::io(e, &target, "create dir"))?;
        } else {
            copy_input(entry.path(), &target)?;
        }
    }
    Ok(())
}

fn copy_input(source: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::io(e, parent, "create dir"))?;
    }
    fs::copy(source, dest).map_err(|e| Error::io(e, dest, "copy input"))?;
    Ok(())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}
