//! Error types for task planning and execution

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Main error type for taskmemo core operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// Invalid project configuration
    #[error("Configuration error: {message}")]
    #[diagnostic(
        code(taskmemo::config::invalid),
        help("Check taskmemo.toml for typos and invalid values")
    )]
    Configuration {
        /// What is wrong with the configuration
        message: String,
    },

    /// A declared input does not exist and nothing upstream produces it
    #[error("Input '{path}' of task '{task}' is unavailable")]
    #[diagnostic(
        code(taskmemo::task::input_unavailable),
        help("Declared inputs must exist or be produced by one of the task's dependencies")
    )]
    InputUnavailable {
        /// Task declaring the input
        task: String,
        /// Project-relative input path
        path: String,
    },

    /// The task graph could not be built or ordered
    #[error(transparent)]
    #[diagnostic(
        code(taskmemo::task::graph),
        help("Check `depends_on` and `outputs` of the tasks named above")
    )]
    Graph(#[from] taskmemo_task_graph::Error),

    /// A task action returned an error
    #[error("Task '{task}' failed: {message}")]
    #[diagnostic(code(taskmemo::task::execution_failure))]
    ExecutionFailure {
        /// Failing task
        task: String,
        /// Failure detail
        message: String,
    },

    /// A task ran longer than its timeout
    #[error("Task '{task}' timed out after {timeout:?}")]
    #[diagnostic(
        code(taskmemo::task::timeout),
        help("Raise `timeout_secs` for the task or `default_timeout_secs` for the executor")
    )]
    ExecutionTimeout {
        /// Task that timed out
        task: String,
        /// The limit that expired
        timeout: Duration,
    },

    /// Cache store failure
    #[error(transparent)]
    #[diagnostic(transparent)]
    Cache(#[from] taskmemo_cache::Error),

    /// I/O error
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(
        code(taskmemo::io::error),
        help("Check file permissions and ensure the path exists")
    )]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available
        path: Option<Box<Path>>,
        /// Operation that failed (e.g., "read", "write", "link")
        operation: String,
    },
}

impl Error {
    /// Create a configuration error
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    /// Create an input-unavailable error
    #[must_use]
    pub fn input_unavailable(task: impl Into<String>, path: impl Into<String>) -> Self {
        Self::InputUnavailable {
            task: task.into(),
            path: path.into(),
        }
    }

    /// Create an execution failure
    #[must_use]
    pub fn execution(task: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ExecutionFailure {
            task: task.into(),
            message: msg.into(),
        }
    }

    /// Create a timeout error
    #[must_use]
    pub fn timeout(task: impl Into<String>, timeout: Duration) -> Self {
        Self::ExecutionTimeout {
            task: task.into(),
            timeout,
        }
    }

    /// Create an I/O error with path context
    #[must_use]
    pub fn io(
        source: std::io::Error,
        path: impl AsRef<Path>,
        operation: impl Into<String>,
    ) -> Self {
        Self::Io {
            source,
            path: Some(path.as_ref().into()),
            operation: operation.into(),
        }
    }

    /// Errors caused by the project setup rather than by a task.
    ///
    /// These abort a run before anything executes.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Configuration { .. } | Self::InputUnavailable { .. } | Self::Graph(_)
        )
    }
}

/// Result type alias for taskmemo core operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_classification() {
        assert!(Error::configuration("bad").is_configuration());
        assert!(Error::input_unavailable("stub", "src").is_configuration());
        assert!(
            Error::Graph(taskmemo_task_graph::Error::UnknownTask {
                name: "x".to_string()
            })
            .is_configuration()
        );
        assert!(!Error::execution("stub", "exit 1").is_configuration());
        assert!(!Error::timeout("stub", Duration::from_secs(1)).is_configuration());
    }

    #[test]
    fn test_messages() {
        assert_eq!(
            Error::input_unavailable("process", "stubs/A.java").to_string(),
            "Input 'stubs/A.java' of task 'process' is unavailable"
        );
        assert_eq!(
            Error::timeout("slow", Duration::from_secs(5)).to_string(),
            "Task 'slow' timed out after 5s"
        );
        let io = Error::io(
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
            "/tmp/x",
            "read",
        );
        assert_eq!(io.to_string(), "I/O read failed: /tmp/x");
    }
}
