//! Task graph builder using petgraph.
//!
//! This module builds directed acyclic graphs (DAGs) from task definitions
//! to handle dependencies and determine execution order.

use crate::traversal::{reachable, stable_topological_indices};
use crate::{Error, ParallelGroups, Result, TaskNodeData, TopologicalOrder};
use petgraph::Direction;
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::IntoNodeReferences;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// A node in the task graph.
#[derive(Debug, Clone)]
pub struct GraphNode<T> {
    /// Name of the task.
    pub name: String,
    /// The task data.
    pub task: T,
}

/// Task graph for dependency resolution and execution ordering.
///
/// Edges point from a dependency to the task that depends on it.
pub struct TaskGraph<T: TaskNodeData> {
    /// The directed graph of tasks.
    graph: DiGraph<GraphNode<T>, ()>,
    /// Map from task names to node indices.
    name_to_node: HashMap<String, NodeIndex>,
    /// Whether `add_dependency_edges` has run since the last `add_task`.
    edges_wired: bool,
    /// Frozen order, set by the first successful `topological_order`.
    order: Option<Vec<NodeIndex>>,
}

impl<T: TaskNodeData> TaskGraph<T> {
    /// Create a new empty task graph.
    #[must_use]
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            name_to_node: HashMap::new(),
            edges_wired: true,
            order: None,
        }
    }

    /// Add a single task to the graph.
    ///
    /// Registration order is remembered and used to break ties in
    /// [`TaskGraph::topological_order`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateTask`] if the name is taken and
    /// [`Error::GraphFrozen`] once the order has been computed.
    pub fn add_task(&mut self, name: &str, task: T) -> Result<NodeIndex> {
        if self.is_frozen() {
            return Err(Error::GraphFrozen {
                operation: "add a task",
            });
        }
        if self.name_to_node.contains_key(name) {
            return Err(Error::DuplicateTask {
                name: name.to_string(),
            });
        }

        let node = GraphNode {
            name: name.to_string(),
            task,
        };

        let node_index = self.graph.add_node(node);
        self.name_to_node.insert(name.to_string(), node_index);
        self.edges_wired = false;
        debug!(task = name, "Added task node");

        Ok(node_index)
    }

    /// Add dependency edges after all tasks have been added.
    ///
    /// Safe to call more than once; an edge is only added once.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingDependencies`] listing every dangling
    /// reference, or [`Error::GraphFrozen`].
    pub fn add_dependency_edges(&mut self) -> Result<()> {
        if self.is_frozen() {
            return Err(Error::GraphFrozen {
                operation: "add dependency edges",
            });
        }

        let mut missing_deps = Vec::new();
        let mut edges_to_add = Vec::new();

        for (node_index, node) in self.graph.node_references() {
            for dep_name in node.task.dependency_names() {
                if let Some(&dep_node_index) = self.name_to_node.get(dep_name) {
                    edges_to_add.push((dep_node_index, node_index));
                } else {
                    missing_deps.push((node.name.clone(), dep_name.to_string()));
                }
            }
        }

        if !missing_deps.is_empty() {
            return Err(Error::MissingDependencies {
                missing: missing_deps,
            });
        }

        for (from, to) in edges_to_add {
            self.graph.update_edge(from, to, ());
        }
        self.edges_wired = true;

        Ok(())
    }

    /// Check if the graph has cycles.
    #[must_use]
    pub fn has_cycles(&self) -> bool {
        is_cyclic_directed(&self.graph)
    }

    /// Whether the order has been computed and the graph is read-only.
    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.order.is_some()
    }

    /// Get the topologically sorted list of tasks and freeze the graph.
    ///
    /// The order is deterministic: whenever several tasks are ready at the
    /// same time, the one registered first comes first. Subsequent calls
    /// return the same order.
    ///
    /// # Errors
    ///
    /// - [`Error::MissingDependencies`] if edges were not yet wired and a
    ///   dependency is missing
    /// - [`Error::CycleDetected`] naming one cycle
    /// - [`Error::OverlappingOutputs`] if two unordered tasks write to the
    ///   same location
    pub fn topological_order(&mut self) -> Result<TopologicalOrder<T>> {
        let order = self.freeze()?;
        Ok(self.nodes_for(&order))
    }

    fn freeze(&mut self) -> Result<Vec<NodeIndex>> {
        if let Some(order) = &self.order {
            return Ok(order.clone());
        }
        if !self.edges_wired {
            self.add_dependency_edges()?;
        }

        let Some(order) = stable_topological_indices(&self.graph) else {
            return Err(self.cycle_error().unwrap_or(Error::CycleDetected { cycle: vec![] }));
        };
        if let Some(overlap) = self.first_output_overlap() {
            return Err(overlap);
        }

        debug!(tasks = order.len(), "Task graph frozen");
        self.order = Some(order.clone());
        Ok(order)
    }

    /// Transitive dependency closure of the selected tasks, selections included.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownTask`] for a selection not in the graph.
    pub fn closure(&self, selected: &[impl AsRef<str>]) -> Result<BTreeSet<String>> {
        let start = self.indices_of(selected)?;
        Ok(reachable(&self.graph, start, Direction::Incoming)
            .into_iter()
            .map(|idx| self.graph[idx].name.clone())
            .collect())
    }

    /// Frozen topological order restricted to the closure of `selected`.
    ///
    /// An empty selection means every task.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownTask`] for unknown selections and any error of
    /// [`TaskGraph::topological_order`].
    pub fn order_for(&mut self, selected: &[impl AsRef<str>]) -> Result<TopologicalOrder<T>> {
        let order = self.freeze()?;
        if selected.is_empty() {
            return Ok(self.nodes_for(&order));
        }

        let start = self.indices_of(selected)?;
        let wanted = reachable(&self.graph, start, Direction::Incoming);
        let filtered: Vec<NodeIndex> = order
            .into_iter()
            .filter(|idx| wanted.contains(idx))
            .collect();
        Ok(self.nodes_for(&filtered))
    }

    /// Tasks that transitively depend on `name`, in registration order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownTask`] if `name` is not in the graph.
    pub fn dependents_of(&self, name: &str) -> Result<Vec<String>> {
        let start = self.indices_of(&[name])?;
        Ok(reachable(&self.graph, start.iter().copied(), Direction::Outgoing)
            .into_iter()
            .filter(|idx| !start.contains(idx))
            .map(|idx| self.graph[idx].name.clone())
            .collect())
    }

    /// Group tasks by dependency level.
    ///
    /// Level 0 holds tasks without dependencies; each other task sits one
    /// level above its deepest dependency. Freezes the graph.
    ///
    /// # Errors
    ///
    /// Any error of [`TaskGraph::topological_order`].
    pub fn parallel_groups(&mut self) -> Result<ParallelGroups<T>> {
        let order = self.freeze()?;
        let mut levels: HashMap<NodeIndex, usize> = HashMap::new();
        let mut groups: ParallelGroups<T> = vec![];

        for idx in order {
            let level = self
                .graph
                .neighbors_directed(idx, Direction::Incoming)
                .filter_map(|dep| levels.get(&dep))
                .map(|dep_level| dep_level + 1)
                .max()
                .unwrap_or(0);

            if level >= groups.len() {
                groups.resize_with(level + 1, Vec::new);
            }
            groups[level].push(self.graph[idx].clone());
            levels.insert(idx, level);
        }

        Ok(groups)
    }

    /// Get the number of tasks in the graph.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Check if a task exists in the graph.
    #[must_use]
    pub fn contains_task(&self, name: &str) -> bool {
        self.name_to_node.contains_key(name)
    }

    /// Get a reference to a task node by name.
    #[must_use]
    pub fn get_node_by_name(&self, name: &str) -> Option<&GraphNode<T>> {
        self.name_to_node
            .get(name)
            .and_then(|&idx| self.graph.node_weight(idx))
    }

    /// Iterate over all nodes in registration order.
    pub fn iter_nodes(&self) -> impl Iterator<Item = (NodeIndex, &GraphNode<T>)> {
        self.graph.node_references()
    }

    pub(crate) fn inner(&self) -> &DiGraph<GraphNode<T>, ()> {
        &self.graph
    }

    pub(crate) fn names_of(&self, indices: &[NodeIndex]) -> Vec<String> {
        indices
            .iter()
            .map(|&idx| self.graph[idx].name.clone())
            .collect()
    }

    fn nodes_for(&self, indices: &[NodeIndex]) -> Vec<GraphNode<T>> {
        indices.iter().map(|&idx| self.graph[idx].clone()).collect()
    }

    fn indices_of(&self, names: &[impl AsRef<str>]) -> Result<Vec<NodeIndex>> {
        names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                self.name_to_node
                    .get(name)
                    .copied()
                    .ok_or_else(|| Error::UnknownTask {
                        name: name.to_string(),
                    })
            })
            .collect()
    }
}

impl<T: TaskNodeData> Default for TaskGraph<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Simple test task implementation
    #[derive(Clone, Debug, Default)]
    struct TestTask {
        depends_on: Vec<String>,
        outputs: Vec<String>,
    }

    impl TestTask {
        fn new(deps: &[&str]) -> Self {
            Self {
                depends_on: deps.iter().map(|s| (*s).to_string()).collect(),
                outputs: vec![],
            }
        }

        fn with_outputs(mut self, outputs: &[&str]) -> Self {
            self.outputs = outputs.iter().map(|s| (*s).to_string()).collect();
            self
        }
    }

    impl TaskNodeData for TestTask {
        fn dependency_names(&self) -> impl Iterator<Item = &str> {
            self.depends_on.iter().map(String::as_str)
        }

        fn output_paths(&self) -> impl Iterator<Item = &str> {
            self.outputs.iter().map(String::as_str)
        }
    }

    fn names(nodes: &[GraphNode<TestTask>]) -> Vec<&str> {
        nodes.iter().map(|node| node.name.as_str()).collect()
    }

    #[test]
    fn test_task_graph_new() {
        let graph: TaskGraph<TestTask> = TaskGraph::new();
        assert_eq!(graph.task_count(), 0);
        assert!(!graph.is_frozen());
    }

    #[test]
    fn test_add_single_task() {
        let mut graph = TaskGraph::new();
        graph.add_task("test", TestTask::new(&[])).unwrap();
        assert!(graph.contains_task("test"));
        assert_eq!(graph.task_count(), 1);
    }

    #[test]
    fn test_duplicate_task_rejected() {
        let mut graph = TaskGraph::new();
        graph.add_task("test", TestTask::new(&[])).unwrap();
        let err = graph.add_task("test", TestTask::new(&[])).unwrap_err();
        assert_eq!(
            err,
            Error::DuplicateTask {
                name: "test".into()
            }
        );
        assert_eq!(graph.task_count(), 1);
    }

    #[test]
    fn test_task_dependencies() {
        let mut graph = TaskGraph::new();
        graph.add_task("task1", TestTask::new(&[])).unwrap();
        graph.add_task("task2", TestTask::new(&["task1"])).unwrap();
        graph
            .add_task("task3", TestTask::new(&["task1", "task2"]))
            .unwrap();
        graph.add_dependency_edges().unwrap();

        assert!(!graph.has_cycles());
        let sorted = graph.topological_order().unwrap();
        assert_eq!(names(&sorted), vec!["task1", "task2", "task3"]);
    }

    #[test]
    fn test_order_is_stable_by_registration() {
        let mut graph = TaskGraph::new();
        graph.add_task("zeta", TestTask::new(&[])).unwrap();
        graph.add_task("alpha", TestTask::new(&[])).unwrap();
        graph.add_task("mid", TestTask::new(&["zeta"])).unwrap();
        graph.add_task("beta", TestTask::new(&[])).unwrap();

        let sorted = graph.topological_order().unwrap();
        assert_eq!(names(&sorted), vec!["zeta", "alpha", "mid", "beta"]);
    }

    #[test]
    fn test_edges_wired_implicitly_on_order() {
        let mut graph = TaskGraph::new();
        graph.add_task("b", TestTask::new(&["a"])).unwrap();
        graph.add_task("a", TestTask::new(&[])).unwrap();

        let sorted = graph.topological_order().unwrap();
        assert_eq!(names(&sorted), vec!["a", "b"]);
    }

    #[test]
    fn test_cycle_detection_names_cycle() {
        let mut graph = TaskGraph::new();
        graph.add_task("a", TestTask::new(&["b"])).unwrap();
        graph.add_task("b", TestTask::new(&["a"])).unwrap();
        graph.add_dependency_edges().unwrap();

        assert!(graph.has_cycles());
        let err = graph.topological_order().unwrap_err();
        assert_eq!(err.to_string(), "Cycle detected in task graph: a -> b -> a");
        assert!(!graph.is_frozen());
    }

    #[test]
    fn test_graph_frozen_after_order() {
        let mut graph = TaskGraph::new();
        graph.add_task("a", TestTask::new(&[])).unwrap();
        graph.topological_order().unwrap();

        assert!(graph.is_frozen());
        assert!(matches!(
            graph.add_task("b", TestTask::new(&[])),
            Err(Error::GraphFrozen { .. })
        ));
        assert!(matches!(
            graph.add_dependency_edges(),
            Err(Error::GraphFrozen { .. })
        ));
        // Reads keep working and return the same order.
        assert_eq!(names(&graph.topological_order().unwrap()), vec!["a"]);
    }

    #[test]
    fn test_missing_dependencies_reported_together() {
        let mut graph = TaskGraph::new();
        graph.add_task("b", TestTask::new(&["x"])).unwrap();
        graph.add_task("c", TestTask::new(&["y", "b"])).unwrap();

        let err = graph.add_dependency_edges().unwrap_err();
        assert_eq!(
            err,
            Error::MissingDependencies {
                missing: vec![("b".into(), "x".into()), ("c".into(), "y".into())]
            }
        );
    }

    #[test]
    fn test_empty_graph() {
        let mut graph: TaskGraph<TestTask> = TaskGraph::new();
        assert!(!graph.has_cycles());
        assert!(graph.topological_order().unwrap().is_empty());
        assert!(graph.parallel_groups().unwrap().is_empty());
    }

    #[test]
    fn test_parallel_groups() {
        let mut graph = TaskGraph::new();

        // Level 0: task1, task2 (no dependencies)
        // Level 1: task3 (depends on task1), task4 (depends on task2)
        // Level 2: task5 (depends on task3 and task4)
        graph.add_task("task1", TestTask::new(&[])).unwrap();
        graph.add_task("task2", TestTask::new(&[])).unwrap();
        graph.add_task("task3", TestTask::new(&["task1"])).unwrap();
        graph.add_task("task4", TestTask::new(&["task2"])).unwrap();
        graph
            .add_task("task5", TestTask::new(&["task3", "task4"]))
            .unwrap();

        let groups = graph.parallel_groups().unwrap();
        assert_eq!(groups.len(), 3);
        assert_eq!(names(&groups[0]), vec!["task1", "task2"]);
        assert_eq!(names(&groups[1]), vec!["task3", "task4"]);
        assert_eq!(names(&groups[2]), vec!["task5"]);
    }

    #[test]
    fn test_diamond_dependency() {
        //     a
        //    / \
        //   b   c
        //    \ /
        //     d
        let mut graph = TaskGraph::new();
        graph.add_task("a", TestTask::new(&[])).unwrap();
        graph.add_task("b", TestTask::new(&["a"])).unwrap();
        graph.add_task("c", TestTask::new(&["a"])).unwrap();
        graph.add_task("d", TestTask::new(&["b", "c"])).unwrap();

        let groups = graph.parallel_groups().unwrap();
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[1].len(), 2);

        assert_eq!(graph.dependents_of("a").unwrap(), vec!["b", "c", "d"]);
        assert_eq!(graph.dependents_of("c").unwrap(), vec!["d"]);
        assert!(graph.dependents_of("d").unwrap().is_empty());
    }

    #[test]
    fn test_closure_and_order_for() {
        let mut graph = TaskGraph::new();
        graph.add_task("stub", TestTask::new(&[])).unwrap();
        graph.add_task("lint", TestTask::new(&[])).unwrap();
        graph.add_task("process", TestTask::new(&["stub"])).unwrap();
        graph.add_task("package", TestTask::new(&["process"])).unwrap();
        graph.add_dependency_edges().unwrap();

        let closure = graph.closure(&["process"]).unwrap();
        assert_eq!(
            closure.into_iter().collect::<Vec<_>>(),
            vec!["process".to_string(), "stub".to_string()]
        );

        let order = graph.order_for(&["package"]).unwrap();
        assert_eq!(names(&order), vec!["stub", "process", "package"]);

        let everything = graph.order_for(&[] as &[&str]).unwrap();
        assert_eq!(everything.len(), 4);
    }

    #[test]
    fn test_unknown_selection() {
        let mut graph = TaskGraph::new();
        graph.add_task("a", TestTask::new(&[])).unwrap();

        assert_eq!(
            graph.closure(&["nope"]).unwrap_err(),
            Error::UnknownTask {
                name: "nope".into()
            }
        );
        assert!(matches!(
            graph.order_for(&["nope"]),
            Err(Error::UnknownTask { .. })
        ));
        assert!(graph.dependents_of("nope").is_err());
    }

    #[test]
    fn test_overlapping_outputs_rejected_at_freeze() {
        let mut graph = TaskGraph::new();
        graph
            .add_task("a", TestTask::new(&[]).with_outputs(&["gen"]))
            .unwrap();
        graph
            .add_task("b", TestTask::new(&[]).with_outputs(&["gen/b"]))
            .unwrap();

        assert!(matches!(
            graph.topological_order(),
            Err(Error::OverlappingOutputs { .. })
        ));
        assert!(!graph.is_frozen());
    }

    #[test]
    fn test_overlapping_outputs_allowed_when_ordered() {
        let mut graph = TaskGraph::new();
        graph
            .add_task("a", TestTask::new(&[]).with_outputs(&["gen"]))
            .unwrap();
        graph
            .add_task("b", TestTask::new(&["a"]).with_outputs(&["gen"]))
            .unwrap();

        assert_eq!(graph.topological_order().unwrap().len(), 2);
    }
}
