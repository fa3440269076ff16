use chrono::{NaiveDate, NaiveDateTime};
use gantt_core::graph::{DependencyGraph, EdgeKind, EdgeView, GraphError, NodeView};
use gantt_core::task::{Task, TaskDependency, TaskId, TaskTree};
use gantt_core::time::TimeDuration;

fn monday() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 1, 6)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

fn id(raw: i32) -> TaskId {
    TaskId(raw)
}

/// Tree from (task, parent) pairs; parents must come before their children.
fn tree_of(entries: &[(i32, Option<i32>)]) -> TaskTree {
    let mut tree = TaskTree::new();
    for (task, parent) in entries {
        let task = Task::new(*task, format!("task{task}"), monday(), TimeDuration::days(1));
        tree.insert(task, parent.map(TaskId)).unwrap();
    }
    tree
}

fn graph_of(tree: &TaskTree) -> DependencyGraph {
    let mut graph = DependencyGraph::new();
    for task in tree.tasks() {
        graph.add_task(task.id, tree).unwrap();
    }
    graph
}

fn dep(dependant: i32, dependee: i32) -> TaskDependency {
    TaskDependency::new(id(dependant), id(dependee))
}

fn level(graph: &DependencyGraph, task: i32) -> usize {
    graph.level(id(task)).unwrap()
}

fn inherited_into(graph: &DependencyGraph, task: i32) -> Vec<EdgeView> {
    graph
        .get_node(id(task))
        .unwrap()
        .incoming
        .into_iter()
        .filter(|edge| edge.kind == EdgeKind::Inherited)
        .collect()
}

fn snapshot(graph: &DependencyGraph, tasks: &[i32]) -> Vec<Option<NodeView>> {
    tasks.iter().map(|task| graph.get_node(id(*task))).collect()
}

#[test]
fn new_tasks_start_at_level_zero() {
    let tree = tree_of(&[(1, None), (2, None)]);
    let graph = graph_of(&tree);
    assert_eq!(graph.len(), 2);
    assert_eq!(level(&graph, 1), 0);
    assert_eq!(level(&graph, 2), 0);
    assert_eq!(graph.check_layer_validity(), 1);
    assert!(graph.get_node(id(3)).is_none());
}

#[test]
fn chain_levels_follow_longest_path() {
    let tree = tree_of(&[(1, None), (2, None), (3, None)]);
    let mut graph = graph_of(&tree);
    graph.add_dependency(dep(3, 2)).unwrap();
    graph.add_dependency(dep(2, 1)).unwrap();

    assert_eq!(level(&graph, 1), 0);
    assert_eq!(level(&graph, 2), 1);
    assert_eq!(level(&graph, 3), 2);
    assert_eq!(graph.check_layer_validity(), 3);
}

#[test]
fn rhombus_layers_keep_insertion_order() {
    let tree = tree_of(&[(1, None), (2, None), (3, None), (4, None), (5, None)]);
    let mut graph = graph_of(&tree);
    graph.add_dependency(dep(5, 4)).unwrap();
    graph.add_dependency(dep(5, 3)).unwrap();
    graph.add_dependency(dep(3, 2)).unwrap();
    graph.add_dependency(dep(2, 1)).unwrap();
    graph.add_dependency(dep(4, 1)).unwrap();

    assert_eq!(
        graph.layers(),
        vec![vec![id(1)], vec![id(2), id(4)], vec![id(3)], vec![id(5)]]
    );
}

#[test]
fn removing_dependency_lowers_downstream_levels() {
    let tree = tree_of(&[(1, None), (2, None), (3, None), (4, None)]);
    let mut graph = graph_of(&tree);
    graph.add_dependency(dep(2, 1)).unwrap();
    graph.add_dependency(dep(3, 2)).unwrap();
    graph.add_dependency(dep(4, 3)).unwrap();
    graph.add_dependency(dep(4, 1)).unwrap();
    assert_eq!(level(&graph, 4), 3);

    graph.remove_dependency(&dep(2, 1)).unwrap();
    assert_eq!(level(&graph, 2), 0);
    assert_eq!(level(&graph, 3), 1);
    assert_eq!(level(&graph, 4), 2);

    let err = graph.remove_dependency(&dep(2, 1)).unwrap_err();
    assert_eq!(
        err,
        GraphError::UnknownDependency {
            dependant: id(2),
            dependee: id(1)
        }
    );
}

#[test]
fn invalid_dependencies_are_rejected() {
    let tree = tree_of(&[(1, None), (2, None)]);
    let mut graph = graph_of(&tree);
    graph.add_dependency(dep(2, 1)).unwrap();

    assert_eq!(
        graph.add_dependency(dep(2, 1)).unwrap_err(),
        GraphError::DuplicateDependency {
            dependant: id(2),
            dependee: id(1)
        }
    );
    assert_eq!(
        graph.add_dependency(dep(1, 1)).unwrap_err(),
        GraphError::SelfDependency(id(1))
    );
    assert_eq!(
        graph.add_dependency(dep(9, 1)).unwrap_err(),
        GraphError::UnknownTask(id(9))
    );
}

#[test]
fn dependency_loop_is_rejected_and_graph_left_untouched() {
    let tree = tree_of(&[(1, None), (2, None), (3, None)]);
    let mut graph = graph_of(&tree);
    graph.add_dependency(dep(2, 1)).unwrap();
    graph.add_dependency(dep(3, 2)).unwrap();
    let before = snapshot(&graph, &[1, 2, 3]);

    let err = graph.add_dependency(dep(1, 3)).unwrap_err();
    assert_eq!(
        err,
        GraphError::DependencyLoop {
            dependee: id(3),
            dependant: id(1)
        }
    );
    assert_eq!(snapshot(&graph, &[1, 2, 3]), before);
    assert!(graph.dependency(id(1), id(3)).is_none());
}

#[test]
fn container_sits_above_its_children() {
    let tree = tree_of(&[(10, None), (11, Some(10)), (12, Some(10))]);
    let mut graph = graph_of(&tree);
    assert_eq!(graph.container_of(id(11)), Some(id(10)));
    assert_eq!(level(&graph, 10), 1);

    graph.add_dependency(dep(12, 11)).unwrap();
    assert_eq!(level(&graph, 12), 1);
    assert_eq!(level(&graph, 10), 2);
    // sibling dependencies do not leak onto the container
    assert!(inherited_into(&graph, 10).is_empty());
}

#[test]
fn children_added_before_container_get_wired() {
    let tree = tree_of(&[(10, None), (11, Some(10)), (12, Some(11))]);
    let mut graph = DependencyGraph::new();
    graph.add_task(id(12), &tree).unwrap();
    graph.add_task(id(11), &tree).unwrap();
    graph.add_task(id(10), &tree).unwrap();

    assert_eq!(graph.container_of(id(12)), Some(id(11)));
    assert_eq!(graph.container_of(id(11)), Some(id(10)));
    assert_eq!(level(&graph, 10), 2);
    assert_eq!(
        graph.add_task(id(10), &tree).unwrap_err(),
        GraphError::TaskAlreadyPresent(id(10))
    );
}

#[test]
fn inherited_edges_count_justifying_descendants() {
    let tree = tree_of(&[(10, None), (11, Some(10)), (12, Some(10)), (20, None)]);
    let mut graph = graph_of(&tree);

    graph.add_dependency(dep(11, 20)).unwrap();
    let inherited = inherited_into(&graph, 10);
    assert_eq!(inherited.len(), 1);
    assert_eq!(inherited[0].source, id(20));
    assert_eq!(inherited[0].ref_count(), 1);
    assert_eq!(level(&graph, 10), 2);

    graph.add_dependency(dep(12, 20)).unwrap();
    assert_eq!(inherited_into(&graph, 10)[0].ref_count(), 2);

    graph.remove_dependency(&dep(11, 20)).unwrap();
    assert_eq!(inherited_into(&graph, 10)[0].origins, vec![id(12)]);

    graph.remove_dependency(&dep(12, 20)).unwrap();
    assert!(inherited_into(&graph, 10).is_empty());
    assert_eq!(level(&graph, 10), 1);
}

#[test]
fn inherited_edges_climb_nested_containers() {
    let tree = tree_of(&[(1, None), (2, Some(1)), (3, Some(2)), (4, None)]);
    let mut graph = graph_of(&tree);
    graph.add_dependency(dep(3, 4)).unwrap();

    assert_eq!(inherited_into(&graph, 2).len(), 1);
    assert_eq!(inherited_into(&graph, 1).len(), 1);
    assert_eq!(level(&graph, 3), 1);
    assert_eq!(level(&graph, 2), 2);
    assert_eq!(level(&graph, 1), 3);
}

#[test]
fn inherited_edge_stops_at_common_ancestor() {
    let tree = tree_of(&[(1, None), (2, Some(1)), (3, Some(2)), (4, Some(1))]);
    let mut graph = graph_of(&tree);
    graph.add_dependency(dep(3, 4)).unwrap();

    assert_eq!(inherited_into(&graph, 2).len(), 1);
    // 1 contains the dependee as well
    assert!(inherited_into(&graph, 1).is_empty());
}

#[test]
fn moving_a_task_rederives_inherited_edges() {
    let tree = tree_of(&[(10, None), (11, Some(10)), (20, None), (30, None)]);
    let mut graph = graph_of(&tree);
    graph.add_dependency(dep(11, 20)).unwrap();
    assert_eq!(inherited_into(&graph, 10).len(), 1);

    graph.move_task(id(11), None).unwrap();
    assert_eq!(graph.container_of(id(11)), None);
    assert!(inherited_into(&graph, 10).is_empty());
    assert_eq!(level(&graph, 10), 0);

    graph.move_task(id(11), Some(id(30))).unwrap();
    assert_eq!(inherited_into(&graph, 30).len(), 1);
    assert_eq!(level(&graph, 30), level(&graph, 11) + 1);
}

#[test]
fn moving_the_dependee_out_creates_inherited_edge() {
    let tree = tree_of(&[(10, None), (11, Some(10)), (12, Some(10))]);
    let mut graph = graph_of(&tree);
    graph.add_dependency(dep(12, 11)).unwrap();
    assert!(inherited_into(&graph, 10).is_empty());

    graph.move_task(id(11), None).unwrap();
    let inherited = inherited_into(&graph, 10);
    assert_eq!(inherited.len(), 1);
    assert_eq!(inherited[0].source, id(11));
    assert_eq!(inherited[0].origins, vec![id(12)]);
}

#[test]
fn containment_loops_are_rejected() {
    let tree = tree_of(&[(1, None), (2, Some(1)), (3, Some(2))]);
    let mut graph = graph_of(&tree);
    let before = snapshot(&graph, &[1, 2, 3]);

    let err = graph.move_task(id(1), Some(id(3))).unwrap_err();
    assert_eq!(
        err,
        GraphError::ContainmentLoop {
            task: id(1),
            container: Some(id(3))
        }
    );
    assert_eq!(snapshot(&graph, &[1, 2, 3]), before);
}

#[test]
fn dependency_through_container_loop_is_rejected() {
    let tree = tree_of(&[(10, None), (11, Some(10)), (20, None)]);
    let mut graph = graph_of(&tree);
    graph.add_dependency(dep(20, 10)).unwrap();
    let before = snapshot(&graph, &[10, 11, 20]);

    let err = graph.add_dependency(dep(11, 20)).unwrap_err();
    assert!(matches!(err, GraphError::DependencyLoop { .. }));
    assert_eq!(snapshot(&graph, &[10, 11, 20]), before);
}

#[test]
fn removing_a_task_drops_edges_and_relevels() {
    let tree = tree_of(&[(10, None), (11, Some(10)), (20, None), (21, None)]);
    let mut graph = graph_of(&tree);
    graph.add_dependency(dep(11, 20)).unwrap();
    graph.add_dependency(dep(21, 10)).unwrap();
    assert_eq!(level(&graph, 21), 3);

    graph.remove_task(id(10)).unwrap();
    assert!(!graph.contains(id(10)));
    assert_eq!(graph.container_of(id(11)), None);
    assert_eq!(level(&graph, 21), 0);
    assert_eq!(level(&graph, 11), 1);
    let outgoing = graph.get_node(id(20)).unwrap().outgoing;
    assert_eq!(outgoing.len(), 1);
    assert_eq!(outgoing[0].kind, EdgeKind::Explicit);

    assert_eq!(graph.remove_task(id(10)).unwrap_err(), GraphError::UnknownTask(id(10)));
}

#[test]
fn rollback_restores_exact_structure() {
    let tree = tree_of(&[(10, None), (11, Some(10)), (12, Some(10)), (20, None), (21, None)]);
    let mut graph = graph_of(&tree);
    graph.add_dependency(dep(11, 20)).unwrap();
    let all = [10, 11, 12, 20, 21];
    let before = snapshot(&graph, &all);
    let layers_before = graph.check_layer_validity();

    graph.start_transaction().unwrap();
    graph.add_dependency(dep(21, 12)).unwrap();
    graph.add_dependency(dep(12, 20)).unwrap();
    graph
        .update_dependency(dep(11, 20).with_lag(TimeDuration::days(2)))
        .unwrap();
    graph.move_task(id(12), None).unwrap();
    graph.remove_task(id(10)).unwrap();
    graph.remove_dependency(&dep(11, 20)).unwrap();
    assert!(graph.in_transaction());
    graph.rollback_transaction().unwrap();

    assert!(!graph.in_transaction());
    assert_eq!(snapshot(&graph, &all), before);
    assert_eq!(graph.check_layer_validity(), layers_before);
    assert_eq!(
        graph.dependency(id(11), id(20)).unwrap().lag,
        TimeDuration::days(0)
    );
}

#[test]
fn committed_transaction_keeps_changes() {
    let tree = tree_of(&[(1, None), (2, None)]);
    let mut graph = graph_of(&tree);
    graph.start_transaction().unwrap();
    graph.add_dependency(dep(2, 1)).unwrap();
    graph.commit_transaction().unwrap();
    assert_eq!(level(&graph, 2), 1);
}

#[test]
fn transactions_are_not_reentrant() {
    let mut graph = DependencyGraph::new();
    assert_eq!(
        graph.rollback_transaction().unwrap_err(),
        GraphError::NoActiveTransaction
    );
    graph.start_transaction().unwrap();
    assert_eq!(
        graph.start_transaction().unwrap_err(),
        GraphError::TransactionAlreadyActive
    );
    graph.rollback_transaction().unwrap();
    assert_eq!(
        graph.commit_transaction().unwrap_err(),
        GraphError::NoActiveTransaction
    );
}

#[test]
fn rejected_edit_inside_transaction_keeps_earlier_edits() {
    let tree = tree_of(&[(1, None), (2, None)]);
    let mut graph = graph_of(&tree);
    graph.start_transaction().unwrap();
    graph.add_dependency(dep(2, 1)).unwrap();
    assert!(graph.add_dependency(dep(1, 2)).is_err());
    assert_eq!(level(&graph, 2), 1);

    graph.rollback_transaction().unwrap();
    assert_eq!(level(&graph, 2), 0);
}

#[test]
fn update_dependency_keeps_structure() {
    let tree = tree_of(&[(1, None), (2, None)]);
    let mut graph = graph_of(&tree);
    graph.add_dependency(dep(2, 1)).unwrap();
    let updated = dep(2, 1).with_lag(TimeDuration::days(3));
    graph.update_dependency(updated).unwrap();

    assert_eq!(graph.dependency(id(2), id(1)), Some(updated));
    assert_eq!(level(&graph, 2), 1);
    assert!(graph.update_dependency(dep(1, 2)).is_err());
}
