//! Error types for task graph operations.

use std::fmt;

/// Result type for task graph operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during task graph operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A dependency cycle was detected in the graph.
    CycleDetected {
        /// Task names along the cycle, first name repeated at the end.
        cycle: Vec<String>,
    },

    /// Multiple missing dependencies were found.
    MissingDependencies {
        /// List of (task, missing_dependency) pairs.
        missing: Vec<(String, String)>,
    },

    /// A task with this name is already registered.
    DuplicateTask {
        /// The duplicated name.
        name: String,
    },

    /// A task name was requested that the graph does not contain.
    UnknownTask {
        /// The requested name.
        name: String,
    },

    /// The graph was mutated after its order was computed.
    GraphFrozen {
        /// The rejected operation.
        operation: &'static str,
    },

    /// Two tasks that may run concurrently declare overlapping outputs.
    OverlappingOutputs {
        /// First task and its output path.
        first: (String, String),
        /// Second task and its output path.
        second: (String, String),
    },
}

impl Error {
    /// Render a cycle as `a -> b -> a`.
    #[must_use]
    pub fn cycle_path(cycle: &[String]) -> String {
        cycle.join(" -> ")
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CycleDetected { cycle } => {
                write!(f, "Cycle detected in task graph: {}", Self::cycle_path(cycle))
            }
            Self::MissingDependencies { missing } => {
                let list = missing
                    .iter()
                    .map(|(task, dep)| format!("Task '{task}' depends on missing task '{dep}'"))
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "Missing dependencies: {list}")
            }
            Self::DuplicateTask { name } => {
                write!(f, "Task '{name}' is already registered")
            }
            Self::UnknownTask { name } => write!(f, "Unknown task '{name}'"),
            Self::GraphFrozen { operation } => {
                write!(
                    f,
                    "Cannot {operation}: the task graph is frozen once its order has been computed"
                )
            }
            Self::OverlappingOutputs { first, second } => write!(
                f,
                "Tasks '{}' and '{}' may run concurrently but declare overlapping outputs '{}' and '{}'",
                first.0, second.0, first.1, second.1
            ),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_display_names_path() {
        let err = Error::CycleDetected {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "Cycle detected in task graph: a -> b -> a");
    }

    #[test]
    fn test_missing_dependencies_lists_all() {
        let err = Error::MissingDependencies {
            missing: vec![
                ("b".into(), "x".into()),
                ("c".into(), "y".into()),
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("'b' depends on missing task 'x'"));
        assert!(msg.contains("'c' depends on missing task 'y'"));
    }
}
