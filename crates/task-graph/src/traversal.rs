//! Traversal algorithms and types for task graphs.
//!
//! This module provides the ordering primitives the graph is built on:
//! a registration-stable topological sort and transitive walks in either
//! edge direction.

use crate::GraphNode;
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap};

/// A topologically sorted sequence of task nodes.
///
/// This type represents tasks in an order where all dependencies
/// come before the tasks that depend on them.
pub type TopologicalOrder<T> = Vec<GraphNode<T>>;

/// Groups of tasks that can execute in parallel.
///
/// Each inner vector contains tasks that have no dependencies on each other
/// and can safely execute concurrently. The outer vector is ordered by
/// dependency level - all tasks in group N must complete before tasks
/// in group N+1 can start.
pub type ParallelGroups<T> = Vec<Vec<GraphNode<T>>>;

/// Kahn's algorithm with a min-heap on node index.
///
/// Node indices follow registration order, so among tasks that are ready at
/// the same time the one registered first is emitted first. Returns `None`
/// when the graph has a cycle.
pub(crate) fn stable_topological_indices<N, E>(graph: &DiGraph<N, E>) -> Option<Vec<NodeIndex>> {
    let mut in_degree: Vec<usize> = graph
        .node_indices()
        .map(|idx| graph.neighbors_directed(idx, Direction::Incoming).count())
        .collect();

    let mut ready: BinaryHeap<Reverse<NodeIndex>> = graph
        .node_indices()
        .filter(|idx| in_degree[idx.index()] == 0)
        .map(Reverse)
        .collect();

    let mut order = Vec::with_capacity(graph.node_count());
    while let Some(Reverse(idx)) = ready.pop() {
        order.push(idx);
        for next in graph.neighbors_directed(idx, Direction::Outgoing) {
            let degree = &mut in_degree[next.index()];
            *degree -= 1;
            if *degree == 0 {
                ready.push(Reverse(next));
            }
        }
    }

    (order.len() == graph.node_count()).then_some(order)
}

/// All nodes reachable from `start` following edges in `direction`.
///
/// `Incoming` walks towards dependencies, `Outgoing` towards dependents.
/// The start nodes themselves are included.
pub(crate) fn reachable<N, E>(
    graph: &DiGraph<N, E>,
    start: impl IntoIterator<Item = NodeIndex>,
    direction: Direction,
) -> BTreeSet<NodeIndex> {
    let mut seen = BTreeSet::new();
    let mut frontier: Vec<NodeIndex> = Vec::new();
    for idx in start {
        if seen.insert(idx) {
            frontier.push(idx);
        }
    }

    while let Some(idx) = frontier.pop() {
        for next in graph.neighbors_directed(idx, direction) {
            if seen.insert(next) {
                frontier.push(next);
            }
        }
    }

    seen
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(edges: &[(usize, usize)], nodes: usize) -> DiGraph<(), ()> {
        let mut graph = DiGraph::new();
        let idx: Vec<_> = (0..nodes).map(|_| graph.add_node(())).collect();
        for &(from, to) in edges {
            graph.add_edge(idx[from], idx[to], ());
        }
        graph
    }

    #[test]
    fn test_ties_break_by_registration() {
        // 2 depends on 0, otherwise independent
        let graph = chain(&[(0, 2)], 4);
        let order: Vec<usize> = stable_topological_indices(&graph)
            .unwrap()
            .into_iter()
            .map(NodeIndex::index)
            .collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_later_registered_dependency_is_pulled_forward() {
        // 0 depends on 3
        let graph = chain(&[(3, 0)], 4);
        let order: Vec<usize> = stable_topological_indices(&graph)
            .unwrap()
            .into_iter()
            .map(NodeIndex::index)
            .collect();
        assert_eq!(order, vec![1, 2, 3, 0]);
    }

    #[test]
    fn test_cycle_returns_none() {
        let graph = chain(&[(0, 1), (1, 0)], 3);
        assert!(stable_topological_indices(&graph).is_none());
    }

    #[test]
    fn test_reachable_both_directions() {
        let graph = chain(&[(0, 1), (1, 2), (3, 2)], 4);
        let deps = reachable(&graph, [NodeIndex::new(2)], Direction::Incoming);
        assert_eq!(deps.len(), 4);
        let dependents = reachable(&graph, [NodeIndex::new(0)], Direction::Outgoing);
        assert_eq!(
            dependents.into_iter().map(NodeIndex::index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }
}
