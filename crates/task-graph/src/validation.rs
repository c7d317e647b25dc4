//! Validation utilities for task graphs.
//!
//! Cycles are reported as a concrete path (`a -> b -> a`) rather than a bare
//! flag, and output declarations are checked for overlap between tasks that
//! could be scheduled at the same time.

use crate::{Error, TaskGraph, TaskNodeData};
use petgraph::Direction;
use petgraph::algo::{has_path_connecting, tarjan_scc};
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashSet;

/// Result of graph validation.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    /// Whether the graph is valid (no cycles, no overlapping outputs).
    pub is_valid: bool,
    /// List of validation errors, if any.
    pub errors: Vec<Error>,
}

impl ValidationResult {
    /// Create a valid result.
    #[must_use]
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            errors: vec![],
        }
    }

    /// Create an invalid result with errors.
    #[must_use]
    pub fn invalid(errors: Vec<Error>) -> Self {
        Self {
            is_valid: false,
            errors,
        }
    }
}

impl<T: TaskNodeData> TaskGraph<T> {
    /// Validate the graph structure.
    ///
    /// Checks for:
    /// - Cycles in the dependency graph (one error per strongly connected component)
    /// - Overlapping outputs between tasks with no ordering between them
    ///
    /// Missing dependencies are caught during `add_dependency_edges()`.
    #[must_use]
    pub fn validate(&self) -> ValidationResult {
        let mut errors: Vec<Error> = find_cycles(self.inner())
            .into_iter()
            .map(|cycle| Error::CycleDetected {
                cycle: self.names_of(&cycle),
            })
            .collect();

        // Reachability is meaningless in a cyclic graph.
        if errors.is_empty()
            && let Some(overlap) = self.first_output_overlap()
        {
            errors.push(overlap);
        }

        if errors.is_empty() {
            ValidationResult::valid()
        } else {
            ValidationResult::invalid(errors)
        }
    }

    /// The first cycle found, as an error naming its path.
    pub(crate) fn cycle_error(&self) -> Option<Error> {
        find_cycles(self.inner())
            .into_iter()
            .next()
            .map(|cycle| Error::CycleDetected {
                cycle: self.names_of(&cycle),
            })
    }

    /// Find two unordered tasks declaring overlapping outputs.
    pub(crate) fn first_output_overlap(&self) -> Option<Error> {
        let graph = self.inner();
        let nodes: Vec<NodeIndex> = graph.node_indices().collect();

        for (i, &a) in nodes.iter().enumerate() {
            for &b in &nodes[i + 1..] {
                let Some((path_a, path_b)) = overlapping_pair(&graph[a].task, &graph[b].task)
                else {
                    continue;
                };
                if has_path_connecting(graph, a, b, None) || has_path_connecting(graph, b, a, None)
                {
                    continue;
                }
                return Some(Error::OverlappingOutputs {
                    first: (graph[a].name.clone(), path_a),
                    second: (graph[b].name.clone(), path_b),
                });
            }
        }
        None
    }
}

fn overlapping_pair<T: TaskNodeData>(a: &T, b: &T) -> Option<(String, String)> {
    for path_a in a.output_paths() {
        for path_b in b.output_paths() {
            if paths_overlap(path_a, path_b) {
                return Some((path_a.to_string(), path_b.to_string()));
            }
        }
    }
    None
}

/// Whether two project-relative paths are equal or one contains the other.
///
/// Comparison is per path component, so `gen` overlaps `gen/a.txt` but not
/// `generated`.
#[must_use]
pub fn paths_overlap(a: &str, b: &str) -> bool {
    let a = components(a);
    let b = components(b);
    let shared = a.len().min(b.len());
    a[..shared] == b[..shared]
}

fn components(path: &str) -> Vec<&str> {
    path.split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .collect()
}

/// Every cycle in the graph, one per strongly connected component, each
/// rendered as a closed walk following dependency edges.
fn find_cycles<N, E>(graph: &DiGraph<N, E>) -> Vec<Vec<NodeIndex>> {
    let mut cycles: Vec<Vec<NodeIndex>> = tarjan_scc(graph)
        .into_iter()
        .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
        .filter_map(|scc| {
            let start = scc.iter().copied().min()?;
            let members: HashSet<NodeIndex> = scc.into_iter().collect();
            Some(cycle_through(graph, start, &members))
        })
        .collect();
    cycles.sort_by_key(|cycle| cycle.first().copied());
    cycles
}

/// Walk from `start` along dependency edges inside one component until the
/// walk returns to `start`. Successors are tried lowest index first so the
/// reported path is stable.
fn cycle_through<N, E>(
    graph: &DiGraph<N, E>,
    start: NodeIndex,
    members: &HashSet<NodeIndex>,
) -> Vec<NodeIndex> {
    let mut path = vec![start];
    let mut visited = HashSet::from([start]);
    extend_cycle(graph, start, start, members, &mut visited, &mut path);
    path
}

fn extend_cycle<N, E>(
    graph: &DiGraph<N, E>,
    current: NodeIndex,
    start: NodeIndex,
    members: &HashSet<NodeIndex>,
    visited: &mut HashSet<NodeIndex>,
    path: &mut Vec<NodeIndex>,
) -> bool {
    // Edges run dependency -> dependent; a cycle reads "a depends on b".
    let mut next: Vec<NodeIndex> = graph
        .neighbors_directed(current, Direction::Incoming)
        .filter(|idx| members.contains(idx))
        .collect();
    next.sort();
    next.dedup();

    for idx in next {
        if idx == start {
            path.push(start);
            return true;
        }
        if visited.insert(idx) {
            path.push(idx);
            if extend_cycle(graph, idx, start, members, visited, path) {
                return true;
            }
            path.pop();
        }
    }
    false
}
