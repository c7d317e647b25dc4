//! Task graph DAG algorithms and dependency ordering for taskmemo.
//!
//! This crate provides a directed acyclic graph (DAG) implementation for
//! task dependency resolution and execution ordering using petgraph.
//!
//! # Key Types
//!
//! - [`TaskGraph`]: The main graph structure for building and querying task dependencies
//! - [`TaskNodeData`]: Trait that task types must implement to be stored in the graph
//! - [`GraphNode`]: A node in the graph containing the task name and data
//!
//! # Freezing
//!
//! The first call to [`TaskGraph::topological_order`] (or any method built on
//! it) validates the graph and freezes it. After that, `add_task` and
//! `add_dependency_edges` fail with [`Error::GraphFrozen`], so the order
//! computed for a run cannot drift while the run is in progress.
//!
//! # Example
//!
//! ```ignore
//! use taskmemo_task_graph::{TaskGraph, TaskNodeData};
//!
//! #[derive(Clone)]
//! struct MyTask {
//!     depends_on: Vec<String>,
//! }
//!
//! impl TaskNodeData for MyTask {
//!     fn dependency_names(&self) -> impl Iterator<Item = &str> {
//!         self.depends_on.iter().map(String::as_str)
//!     }
//! }
//!
//! let mut graph = TaskGraph::new();
//! graph.add_task("stub", MyTask { depends_on: vec![] })?;
//! graph.add_task("process", MyTask { depends_on: vec!["stub".to_string()] })?;
//! graph.add_dependency_edges()?;
//!
//! let order = graph.topological_order()?;
//! ```

mod error;
mod graph;
mod traversal;
mod validation;

pub use error::{Error, Result};
pub use graph::{GraphNode, TaskGraph};
pub use traversal::{ParallelGroups, TopologicalOrder};
pub use validation::{ValidationResult, paths_overlap};

/// Trait for task data that can be stored in the task graph.
///
/// Implement this trait for your task type to enable it to be stored
/// in a [`TaskGraph`] and participate in dependency resolution.
pub trait TaskNodeData: Clone {
    /// Returns the names of tasks this task depends on.
    fn dependency_names(&self) -> impl Iterator<Item = &str>;

    /// Returns the project-relative output paths this task declares.
    ///
    /// Used to reject graphs where two tasks that may run concurrently
    /// write to overlapping locations. Defaults to no outputs.
    fn output_paths(&self) -> impl Iterator<Item = &str> {
        std::iter::empty()
    }
}
