//! Property tests for the task graph.
//!
//! Every generated project is a DAG whose tasks are registered in a
//! shuffled order. Each property compares the graph against a small
//! reference model computed straight from the declarations.

use proptest::prelude::*;
use proptest::sample::Index;
use std::collections::{BTreeSet, HashMap};
use taskmemo_task_graph::{Error, TaskGraph, TaskNodeData};

#[derive(Clone, Debug)]
struct Declared {
    name: String,
    deps: Vec<String>,
    outputs: Vec<String>,
}

impl TaskNodeData for Declared {
    fn dependency_names(&self) -> impl Iterator<Item = &str> {
        self.deps.iter().map(String::as_str)
    }

    fn output_paths(&self) -> impl Iterator<Item = &str> {
        self.outputs.iter().map(String::as_str)
    }
}

/// Up to twelve tasks `t0..tn`. Task `ti` may only depend on `tj` with
/// `j < i`, which keeps the graph acyclic; registration order is shuffled
/// so it is independent of the dependency structure. Each task writes its
/// own `out/ti`.
fn project() -> impl Strategy<Value = Vec<Declared>> {
    (1..=12_usize)
        .prop_flat_map(|n| {
            let edges: Vec<_> = (0..n)
                .map(|i| proptest::collection::vec(proptest::bool::weighted(0.3), i))
                .collect();
            (edges, Just((0..n).collect::<Vec<usize>>()).prop_shuffle())
        })
        .prop_map(|(edges, registration)| {
            registration
                .into_iter()
                .map(|i| Declared {
                    name: format!("t{i}"),
                    deps: edges[i]
                        .iter()
                        .enumerate()
                        .filter(|(_, on)| **on)
                        .map(|(j, _)| format!("t{j}"))
                        .collect(),
                    outputs: vec![format!("out/t{i}")],
                })
                .collect()
        })
}

fn build(tasks: &[Declared]) -> TaskGraph<Declared> {
    let mut graph = TaskGraph::new();
    for task in tasks {
        graph.add_task(&task.name, task.clone()).unwrap();
    }
    graph.add_dependency_edges().unwrap();
    graph
}

fn by_name(tasks: &[Declared]) -> HashMap<&str, &Declared> {
    tasks.iter().map(|t| (t.name.as_str(), t)).collect()
}

/// Repeatedly emit the earliest-registered task whose dependencies are done.
fn expected_order(tasks: &[Declared]) -> Vec<String> {
    let mut done: BTreeSet<&str> = BTreeSet::new();
    let mut order = Vec::with_capacity(tasks.len());
    while order.len() < tasks.len() {
        let next = tasks
            .iter()
            .find(|t| !done.contains(t.name.as_str()) && t.deps.iter().all(|d| done.contains(d.as_str())))
            .unwrap();
        done.insert(&next.name);
        order.push(next.name.clone());
    }
    order
}

/// `name` plus everything it transitively depends on.
fn upstream(tasks: &[Declared], name: &str) -> BTreeSet<String> {
    let index = by_name(tasks);
    let mut seen = BTreeSet::new();
    let mut stack = vec![name.to_string()];
    while let Some(current) = stack.pop() {
        if seen.insert(current.clone()) {
            stack.extend(index[current.as_str()].deps.iter().cloned());
        }
    }
    seen
}

fn level(tasks: &[Declared], name: &str) -> usize {
    let index = by_name(tasks);
    index[name]
        .deps
        .iter()
        .map(|dep| level(tasks, dep) + 1)
        .max()
        .unwrap_or(0)
}

fn names<T>(nodes: &[taskmemo_task_graph::GraphNode<T>]) -> Vec<String> {
    nodes.iter().map(|n| n.name.clone()).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn order_breaks_ties_by_registration(tasks in project()) {
        let mut graph = build(&tasks);
        let order = names(&graph.topological_order().unwrap());
        prop_assert_eq!(&order, &expected_order(&tasks));
        // Frozen: asking again gives the same answer.
        prop_assert_eq!(names(&graph.topological_order().unwrap()), order);
    }

    #[test]
    fn frozen_graph_rejects_mutation(tasks in project()) {
        let mut graph = build(&tasks);
        prop_assert!(!graph.is_frozen());
        graph.topological_order().unwrap();
        prop_assert!(graph.is_frozen());

        let late = Declared { name: "late".into(), deps: vec![], outputs: vec![] };
        let added = graph.add_task("late", late);
        let added_frozen = matches!(added, Err(Error::GraphFrozen { .. }));
        prop_assert!(added_frozen);
        let wired = graph.add_dependency_edges();
        let wired_frozen = matches!(wired, Err(Error::GraphFrozen { .. }));
        prop_assert!(wired_frozen);
        prop_assert_eq!(graph.task_count(), tasks.len());
        prop_assert!(!graph.contains_task("late"));
    }

    #[test]
    fn closure_dependents_and_selection_agree_with_reachability(
        tasks in project(),
        pick in any::<Index>(),
    ) {
        let mut graph = build(&tasks);
        let name = tasks[pick.index(tasks.len())].name.clone();
        let closure = upstream(&tasks, &name);

        prop_assert_eq!(&graph.closure(&[name.as_str()]).unwrap(), &closure);

        let dependents: BTreeSet<String> = graph.dependents_of(&name).unwrap().into_iter().collect();
        let expected: BTreeSet<String> = tasks
            .iter()
            .filter(|t| t.name != name && upstream(&tasks, &t.name).contains(&name))
            .map(|t| t.name.clone())
            .collect();
        prop_assert_eq!(dependents, expected);

        let selected = names(&graph.order_for(&[name.as_str()]).unwrap());
        let filtered: Vec<String> = expected_order(&tasks)
            .into_iter()
            .filter(|n| closure.contains(n))
            .collect();
        prop_assert_eq!(selected.last(), Some(&name));
        prop_assert_eq!(selected, filtered);
    }

    #[test]
    fn groups_follow_the_longest_dependency_chain(tasks in project()) {
        let mut graph = build(&tasks);
        let order = expected_order(&tasks);
        let groups = graph.parallel_groups().unwrap();

        prop_assert_eq!(groups.iter().map(Vec::len).sum::<usize>(), tasks.len());
        for (depth, group) in groups.iter().enumerate() {
            prop_assert!(!group.is_empty());
            for node in group {
                prop_assert_eq!(level(&tasks, &node.name), depth);
            }
            let positions: Vec<usize> = group
                .iter()
                .map(|n| order.iter().position(|o| *o == n.name).unwrap())
                .collect();
            prop_assert!(positions.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn overlapping_outputs_need_an_ordering(
        mut tasks in project(),
        first in any::<Index>(),
        second in any::<Index>(),
    ) {
        let (a, b) = (first.index(tasks.len()), second.index(tasks.len()));
        prop_assume!(a != b);
        tasks[a].outputs = vec!["gen".into()];
        tasks[b].outputs = vec!["gen/sub".into()];
        let ordered = upstream(&tasks, &tasks[a].name).contains(&tasks[b].name)
            || upstream(&tasks, &tasks[b].name).contains(&tasks[a].name);

        let mut graph = build(&tasks);
        match graph.topological_order() {
            Ok(_) => prop_assert!(ordered),
            Err(Error::OverlappingOutputs { first, second }) => {
                prop_assert!(!ordered);
                let mut pair = [first.0, second.0];
                pair.sort();
                let mut expected = [tasks[a].name.clone(), tasks[b].name.clone()];
                expected.sort();
                prop_assert_eq!(pair, expected);
                prop_assert!(!graph.is_frozen());
            }
            Err(other) => prop_assert!(false, "unexpected error: {other}"),
        }
    }

    #[test]
    fn reversed_dependency_is_reported_as_a_cycle(
        mut tasks in project(),
        pick in any::<Index>(),
        back in any::<Index>(),
    ) {
        let name = tasks[pick.index(tasks.len())].name.clone();
        let above: Vec<String> = upstream(&tasks, &name).into_iter().filter(|n| *n != name).collect();
        prop_assume!(!above.is_empty());
        let target = above[back.index(above.len())].clone();
        tasks.iter_mut().find(|t| t.name == target).unwrap().deps.push(name.clone());

        let mut graph = build(&tasks);
        prop_assert!(graph.has_cycles());
        prop_assert!(!graph.validate().is_valid);
        match graph.topological_order() {
            Err(Error::CycleDetected { cycle }) => {
                prop_assert!(cycle.len() >= 3);
                prop_assert_eq!(cycle.first(), cycle.last());
                prop_assert!(cycle.contains(&name));
                prop_assert!(cycle.contains(&target));
            }
            other => prop_assert!(false, "expected a cycle, got {:?}", other.map(|o| names(&o))),
        }
    }
}
