use chrono::{NaiveDate, NaiveDateTime};
use gantt_core::graph::{DependencyGraph, NodeView};
use gantt_core::task::{Task, TaskDependency, TaskId, TaskTree};
use gantt_core::time::TimeDuration;
use proptest::prelude::*;

#[derive(Debug, Clone)]
struct Plan {
    parents: Vec<Option<usize>>,
    dependencies: Vec<(usize, usize)>,
}

fn monday() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 1, 6)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

// Task N may only be nested under, or depend on, tasks 0..N-1. Rejected
// loops are still possible through containment and are part of the test.
fn plan_strategy(max_tasks: usize) -> impl Strategy<Value = Plan> {
    (2..=max_tasks).prop_flat_map(|num_tasks| {
        let parents = proptest::collection::vec(proptest::option::weighted(0.3, any::<usize>()), num_tasks);
        let dependencies =
            proptest::collection::vec((any::<usize>(), any::<usize>()), 0..num_tasks * 2);
        (parents, dependencies).prop_map(move |(raw_parents, raw_deps)| {
            let parents = raw_parents
                .into_iter()
                .enumerate()
                .map(|(i, parent)| parent.filter(|_| i > 0).map(|p| p % i.max(1)))
                .collect();
            let dependencies = raw_deps
                .into_iter()
                .filter_map(|(a, b)| {
                    let dependant = a % num_tasks;
                    if dependant == 0 {
                        return None;
                    }
                    Some((dependant, b % dependant))
                })
                .collect();
            Plan {
                parents,
                dependencies,
            }
        })
    })
}

fn tid(index: usize) -> TaskId {
    TaskId(index as i32)
}

fn build(plan: &Plan) -> (TaskTree, DependencyGraph) {
    let mut tree = TaskTree::new();
    let mut graph = DependencyGraph::new();
    for (i, parent) in plan.parents.iter().enumerate() {
        let task = Task::new(i as i32, format!("task{i}"), monday(), TimeDuration::days(1));
        tree.insert(task, parent.map(tid)).unwrap();
        graph.add_task(tid(i), &tree).unwrap();
    }
    for (dependant, dependee) in &plan.dependencies {
        // duplicates and loops are rejected without touching the graph
        let _ = graph.add_dependency(TaskDependency::new(tid(*dependant), tid(*dependee)));
    }
    (tree, graph)
}

fn nodes(graph: &DependencyGraph, count: usize) -> Vec<Option<NodeView>> {
    (0..count).map(|i| graph.get_node(tid(i))).collect()
}

fn levels(graph: &DependencyGraph, count: usize) -> Vec<Option<usize>> {
    (0..count).map(|i| graph.level(tid(i))).collect()
}

fn assert_levels_consistent(graph: &DependencyGraph, count: usize) {
    for node in nodes(graph, count).into_iter().flatten() {
        let expected = node
            .incoming
            .iter()
            .map(|edge| graph.level(edge.source).unwrap() + 1)
            .max()
            .unwrap_or(0);
        assert_eq!(node.level, expected, "level of {}", node.task);
        for edge in &node.outgoing {
            assert!(graph.level(edge.target).unwrap() > node.level);
        }
    }
}

proptest! {
    #[test]
    fn levels_are_longest_paths(plan in plan_strategy(10)) {
        let (_, graph) = build(&plan);
        let count = plan.parents.len();
        assert_levels_consistent(&graph, count);

        for node in nodes(&graph, count).into_iter().flatten() {
            if node.incoming.is_empty() {
                prop_assert_eq!(node.level, 0);
            }
        }
        let layers = graph.layers();
        prop_assert_eq!(graph.check_layer_validity(), layers.len());
        prop_assert_eq!(layers.iter().map(Vec::len).sum::<usize>(), count);
    }

    #[test]
    fn removing_dependencies_never_raises_levels(plan in plan_strategy(10), pick in any::<usize>()) {
        let (_, mut graph) = build(&plan);
        let count = plan.parents.len();
        let existing: Vec<TaskDependency> = plan
            .dependencies
            .iter()
            .filter_map(|(dependant, dependee)| graph.dependency(tid(*dependant), tid(*dependee)))
            .collect();
        prop_assume!(!existing.is_empty());

        let before = levels(&graph, count);
        graph.remove_dependency(&existing[pick % existing.len()]).unwrap();
        let after = levels(&graph, count);

        for (old, new) in before.iter().zip(&after) {
            prop_assert!(new <= old);
        }
        assert_levels_consistent(&graph, count);
    }

    #[test]
    fn rollback_restores_snapshot(
        plan in plan_strategy(8),
        extra in proptest::collection::vec((any::<usize>(), any::<usize>()), 1..6),
        victim in any::<usize>(),
        mover in any::<usize>(),
    ) {
        let (_, mut graph) = build(&plan);
        let count = plan.parents.len();
        let before = nodes(&graph, count);
        let layers_before = graph.check_layer_validity();

        graph.start_transaction().unwrap();
        for (a, b) in extra {
            let _ = graph.add_dependency(TaskDependency::new(tid(a % count), tid(b % count)));
        }
        let _ = graph.move_task(tid(mover % count), None);
        let _ = graph.remove_task(tid(victim % count));
        assert_levels_consistent(&graph, count);
        graph.rollback_transaction().unwrap();

        prop_assert_eq!(nodes(&graph, count), before);
        prop_assert_eq!(graph.check_layer_validity(), layers_before);
    }
}
