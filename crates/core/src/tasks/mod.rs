//! Task model and execution
//!
//! A [`Task`] declares its inputs, its outputs, the tasks it depends on and
//! the [`TaskAction`] that does the real work. The [`Executor`] walks the
//! task graph and, per task, lets the invalidation engine decide between
//! skipping, restoring from cache and executing.

pub mod action;
pub mod executor;
pub mod hasher;
pub mod invalidation;
pub mod outputs;
pub mod report;
pub mod sandbox;

pub use action::{Action, ActionContext, CommandAction, CopyAction, CopySpec, FunctionAction, TaskAction};
pub use executor::{Executor, ExecutorConfig};
pub use hasher::{ContentHasher, InputDigests, TaskFingerprint};
pub use invalidation::{Decision, InvalidationEngine};
pub use report::{RunSummary, TaskOutcome, TaskReport};

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path};
use std::time::Duration;
use taskmemo_task_graph::TaskNodeData;

/// How a path input is normalized before hashing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PathSensitivity {
    /// Project-relative path and content
    #[default]
    Relative,
    /// File name and content
    NameOnly,
    /// Content only
    ContentOnly,
    /// Absolute path and content; the fingerprint changes when the project moves
    Absolute,
}

/// A single declared task input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputDescriptor {
    /// A project-relative file or directory
    Path {
        /// Project-relative path
        path: String,
        /// Normalization applied before hashing
        #[serde(default)]
        sensitivity: PathSensitivity,
    },
    /// A scalar value such as a target version
    Property {
        /// Property name
        property: String,
        /// Serialized value
        value: String,
    },
}

impl InputDescriptor {
    /// A path input with relative sensitivity
    #[must_use]
    pub fn path(path: impl Into<String>) -> Self {
        Self::Path {
            path: path.into(),
            sensitivity: PathSensitivity::Relative,
        }
    }

    /// A property input
    #[must_use]
    pub fn property(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Property {
            property: name.into(),
            value: value.into(),
        }
    }

    /// Replace the sensitivity of a path input; properties are unchanged.
    #[must_use]
    pub fn with_sensitivity(self, sensitivity: PathSensitivity) -> Self {
        match self {
            Self::Path { path, .. } => Self::Path { path, sensitivity },
            property @ Self::Property { .. } => property,
        }
    }

    /// Name used in digests and invalidation causes
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Path { path, .. } => path.clone(),
            Self::Property { property, .. } => format!("property:{property}"),
        }
    }

    /// The declared path, for path inputs
    #[must_use]
    pub fn declared_path(&self) -> Option<&str> {
        match self {
            Self::Path { path, .. } => Some(path),
            Self::Property { .. } => None,
        }
    }
}

/// A unit of work with declared inputs and outputs
#[derive(Debug, Clone)]
pub struct Task {
    /// Unique task name
    pub name: String,
    /// Inputs in declaration order; the order is part of the fingerprint
    pub inputs: Vec<InputDescriptor>,
    /// Project-relative files or directories the task produces
    pub outputs: Vec<String>,
    /// Names of tasks that must finish first
    pub depends_on: Vec<String>,
    /// The work itself
    pub action: TaskAction,
    /// Wall-clock limit, overriding the executor default
    pub timeout: Option<Duration>,
    /// Whether results are stored in and loaded from the cache
    pub cacheable: bool,
}

impl Task {
    /// A cacheable task with no inputs, outputs or dependencies
    #[must_use]
    pub fn new(name: impl Into<String>, action: impl Into<TaskAction>) -> Self {
        Self {
            name: name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            depends_on: Vec::new(),
            action: action.into(),
            timeout: None,
            cacheable: true,
        }
    }

    /// Add an input
    #[must_use]
    pub fn input(mut self, input: InputDescriptor) -> Self {
        self.inputs.push(input);
        self
    }

    /// Add a declared output
    #[must_use]
    pub fn output(mut self, path: impl Into<String>) -> Self {
        self.outputs.push(path.into());
        self
    }

    /// Add a dependency
    #[must_use]
    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.depends_on.push(name.into());
        self
    }

    /// Set a timeout
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Never store or load this task's outputs
    #[must_use]
    pub fn non_cacheable(mut self) -> Self {
        self.cacheable = false;
        self
    }

    /// Normalize declared paths and reject ones outside the project.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an empty name, an absolute path or
    /// a path that climbs out of the project root. Copy sources and
    /// destinations are checked the same way.
    pub fn validate(mut self) -> Result<Self> {
        if self.name.trim().is_empty() {
            return Err(Error::configuration("Task names must not be empty"));
        }
        for input in &mut self.inputs {
            if let InputDescriptor::Path { path, .. } = input {
                *path = normalize_declared_path(&self.name, path)?;
            }
        }
        for output in &mut self.outputs {
            *output = normalize_declared_path(&self.name, output)?;
        }
        if let TaskAction::Copy(copy) = &mut self.action {
            for entry in &mut copy.copies {
                entry.from = normalize_declared_path(&self.name, &entry.from)?;
                entry.to = normalize_declared_path(&self.name, &entry.to)?;
            }
        }
        Ok(self)
    }
}

impl TaskNodeData for Task {
    fn dependency_names(&self) -> impl Iterator<Item = &str> {
        self.depends_on.iter().map(String::as_str)
    }

    fn output_paths(&self) -> impl Iterator<Item = &str> {
        self.outputs.iter().map(String::as_str)
    }
}

/// Lexically normalize a project-relative path to `a/b/c` form.
///
/// # Errors
///
/// Returns a configuration error for absolute paths, paths escaping the
/// project root and paths that normalize to the root itself.
pub fn normalize_declared_path(task: &str, path: &str) -> Result<String> {
    let mut parts: Vec<String> = Vec::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err(Error::configuration(format!(
                        "Task '{task}': path '{path}' escapes the project root"
                    )));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(Error::configuration(format!(
                    "Task '{task}': path '{path}' must be relative to the project root"
                )));
            }
        }
    }
    if parts.is_empty() {
        return Err(Error::configuration(format!(
            "Task '{task}': path '{path}' refers to the project root itself"
        )));
    }
    Ok(parts.join("/"))
}
