//! Dependency graph with incrementally maintained levels.
//!
//! Edges always point from the task that must happen first to the task
//! that waits on it:
//! - `Explicit`: dependee -> dependant, one per user dependency,
//! - `Inherited`: dependee -> ancestor container of the dependant,
//! - `Containment`: child -> container.
//!
//! A node's level is the length of the longest path reaching it. Every
//! mutator adjusts levels by relaxing only the nodes downstream of the
//! edges it touched.

use crate::task::{TaskDependency, TaskHierarchy, TaskId};
use petgraph::Direction::{Incoming, Outgoing};
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use thiserror::Error;
use tracing::{debug, error, warn};

mod journal;

use journal::{Delta, Journal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Explicit,
    Inherited,
    Containment,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("task {0} is not in the dependency graph")]
    UnknownTask(TaskId),
    #[error("task {0} is already in the dependency graph")]
    TaskAlreadyPresent(TaskId),
    #[error("task {dependant} already depends on {dependee}")]
    DuplicateDependency { dependant: TaskId, dependee: TaskId },
    #[error("task {0} cannot depend on itself")]
    SelfDependency(TaskId),
    #[error("task {dependant} has no dependency on {dependee}")]
    UnknownDependency { dependant: TaskId, dependee: TaskId },
    #[error("dependency of {dependant} on {dependee} would create a loop")]
    DependencyLoop { dependee: TaskId, dependant: TaskId },
    #[error("placing task {task} under {container:?} would create a loop")]
    ContainmentLoop {
        task: TaskId,
        container: Option<TaskId>,
    },
    #[error("a transaction is already active")]
    TransactionAlreadyActive,
    #[error("no transaction is active")]
    NoActiveTransaction,
}

#[derive(Debug, Clone)]
struct NodeData {
    task: TaskId,
    level: usize,
    seq: u64,
}

#[derive(Debug, Clone)]
pub(crate) struct EdgeData {
    kind: EdgeKind,
    dependency: Option<TaskDependency>,
    origins: Vec<TaskId>,
}

impl EdgeData {
    fn explicit(dependency: TaskDependency) -> Self {
        Self {
            kind: EdgeKind::Explicit,
            dependency: Some(dependency),
            origins: Vec::new(),
        }
    }

    fn inherited(origin: TaskId) -> Self {
        Self {
            kind: EdgeKind::Inherited,
            dependency: None,
            origins: vec![origin],
        }
    }

    fn containment() -> Self {
        Self {
            kind: EdgeKind::Containment,
            dependency: None,
            origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeView {
    pub source: TaskId,
    pub target: TaskId,
    pub kind: EdgeKind,
    /// The user dependency behind an explicit edge.
    pub dependency: Option<TaskDependency>,
    /// Dependants whose explicit dependencies justify an inherited edge.
    pub origins: Vec<TaskId>,
}

impl EdgeView {
    pub fn ref_count(&self) -> usize {
        self.origins.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeView {
    pub task: TaskId,
    pub level: usize,
    pub incoming: Vec<EdgeView>,
    pub outgoing: Vec<EdgeView>,
}

/// Marker for a relaxation that ran past any possible acyclic level.
struct LevelOverflow;

#[derive(Debug, Default)]
pub struct DependencyGraph {
    graph: StableDiGraph<NodeData, EdgeData>,
    index: HashMap<TaskId, NodeIndex>,
    journal: Journal,
    dirty: Vec<TaskId>,
    next_seq: u64,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains(&self, task: TaskId) -> bool {
        self.index.contains_key(&task)
    }

    pub fn level(&self, task: TaskId) -> Option<usize> {
        self.index.get(&task).map(|ix| self.graph[*ix].level)
    }

    /// Container according to the graph's own containment edges.
    pub fn container_of(&self, task: TaskId) -> Option<TaskId> {
        let ix = *self.index.get(&task)?;
        self.graph
            .edges_directed(ix, Outgoing)
            .find(|edge| edge.weight().kind == EdgeKind::Containment)
            .map(|edge| self.graph[edge.target()].task)
    }

    /// The explicit dependency of `dependant` on `dependee`, if any.
    pub fn dependency(&self, dependant: TaskId, dependee: TaskId) -> Option<TaskDependency> {
        let edge = self.find_edge(dependee, dependant, EdgeKind::Explicit)?;
        self.graph[edge].dependency
    }

    pub fn get_node(&self, task: TaskId) -> Option<NodeView> {
        let ix = *self.index.get(&task)?;
        Some(NodeView {
            task,
            level: self.graph[ix].level,
            incoming: self.edge_views(ix, Incoming),
            outgoing: self.edge_views(ix, Outgoing),
        })
    }

    fn edge_views(&self, ix: NodeIndex, direction: petgraph::Direction) -> Vec<EdgeView> {
        let mut edges: Vec<(u64, EdgeView)> = self
            .graph
            .edges_directed(ix, direction)
            .map(|edge| {
                let other = match direction {
                    Incoming => edge.source(),
                    Outgoing => edge.target(),
                };
                let data = edge.weight();
                let view = EdgeView {
                    source: self.graph[edge.source()].task,
                    target: self.graph[edge.target()].task,
                    kind: data.kind,
                    dependency: data.dependency,
                    origins: data.origins.clone(),
                };
                (self.graph[other].seq, view)
            })
            .collect();
        edges.sort_by_key(|(seq, view)| (*seq, view.kind as u8));
        edges.into_iter().map(|(_, view)| view).collect()
    }

    /// Task ids grouped by level; within a level, in insertion order.
    pub fn layers(&self) -> Vec<Vec<TaskId>> {
        let mut by_level: BTreeMap<usize, Vec<(u64, TaskId)>> = BTreeMap::new();
        for ix in self.graph.node_indices() {
            let node = &self.graph[ix];
            by_level
                .entry(node.level)
                .or_default()
                .push((node.seq, node.task));
        }
        by_level
            .into_values()
            .map(|mut layer| {
                layer.sort_unstable();
                layer.into_iter().map(|(_, task)| task).collect()
            })
            .collect()
    }

    /// Number of distinct levels present. Logs an error if the levels do
    /// not form a contiguous range starting at zero.
    pub fn check_layer_validity(&self) -> usize {
        let mut levels: Vec<usize> = self.graph.node_indices().map(|ix| self.graph[ix].level).collect();
        levels.sort_unstable();
        levels.dedup();
        if let Some(max) = levels.last() {
            if *max + 1 != levels.len() {
                error!(layers = levels.len(), max_level = *max, "dependency graph has a gap in its levels");
            }
        }
        levels.len()
    }

    // ---- transactions ---------------------------------------------------

    pub fn in_transaction(&self) -> bool {
        self.journal.is_active()
    }

    pub fn start_transaction(&mut self) -> Result<(), GraphError> {
        if self.journal.is_active() {
            return Err(GraphError::TransactionAlreadyActive);
        }
        self.journal.begin();
        debug!("dependency graph transaction started");
        Ok(())
    }

    /// Undoes every change since `start_transaction`.
    pub fn rollback_transaction(&mut self) -> Result<(), GraphError> {
        if !self.journal.is_active() {
            return Err(GraphError::NoActiveTransaction);
        }
        let deltas = self.journal.len();
        self.undo_to(0);
        self.journal.end();
        debug!(deltas, "dependency graph transaction rolled back");
        Ok(())
    }

    /// Keeps every change since `start_transaction`.
    pub fn commit_transaction(&mut self) -> Result<(), GraphError> {
        if !self.journal.is_active() {
            return Err(GraphError::NoActiveTransaction);
        }
        let deltas = self.journal.len();
        self.journal.end();
        debug!(deltas, "dependency graph transaction committed");
        Ok(())
    }

    fn atomically<T>(
        &mut self,
        op: impl FnOnce(&mut Self) -> Result<T, GraphError>,
    ) -> Result<T, GraphError> {
        let mark = self.journal.mark();
        let result = op(self);
        if result.is_err() {
            self.undo_to(mark);
        }
        self.dirty.clear();
        self.journal.settle();
        result
    }

    fn undo_to(&mut self, mark: usize) {
        for delta in self.journal.split_off(mark).into_iter().rev() {
            self.revert(delta);
        }
        self.dirty.clear();
    }

    fn revert(&mut self, delta: Delta) {
        match delta {
            Delta::NodeAdded { task } => {
                if let Some(ix) = self.index.remove(&task) {
                    self.graph.remove_node(ix);
                }
            }
            Delta::NodeRemoved { task, level, seq } => {
                let ix = self.graph.add_node(NodeData { task, level, seq });
                self.index.insert(task, ix);
            }
            Delta::EdgeAdded {
                source,
                target,
                kind,
            } => {
                if let Some(edge) = self.find_edge(source, target, kind) {
                    self.graph.remove_edge(edge);
                }
            }
            Delta::EdgeRemoved {
                source,
                target,
                edge,
            } => {
                if let (Some(&src), Some(&dst)) = (self.index.get(&source), self.index.get(&target)) {
                    self.graph.add_edge(src, dst, edge);
                }
            }
            Delta::OriginsChanged {
                source,
                target,
                old,
            } => {
                if let Some(edge) = self.find_edge(source, target, EdgeKind::Inherited) {
                    self.graph[edge].origins = old;
                }
            }
            Delta::LevelChanged { task, old } => {
                if let Some(&ix) = self.index.get(&task) {
                    self.graph[ix].level = old;
                }
            }
            Delta::DependencyChanged { old } => {
                if let Some(edge) = self.find_edge(old.dependee, old.dependant, EdgeKind::Explicit) {
                    self.graph[edge].dependency = Some(old);
                }
            }
        }
    }

    // ---- mutators -------------------------------------------------------

    /// Adds `task` at level 0 and wires containment edges to its container
    /// and to any of its children already in the graph.
    pub fn add_task<H: TaskHierarchy + ?Sized>(
        &mut self,
        task: TaskId,
        hierarchy: &H,
    ) -> Result<(), GraphError> {
        if self.contains(task) {
            return Err(GraphError::TaskAlreadyPresent(task));
        }
        self.atomically(|graph| {
            let seq = graph.next_seq;
            graph.next_seq += 1;
            let ix = graph.graph.add_node(NodeData { task, level: 0, seq });
            graph.index.insert(task, ix);
            graph.journal.record(Delta::NodeAdded { task });

            if let Some(container) = hierarchy.container_of(task) {
                if graph.contains(container) {
                    graph.reparent(task, Some(container))?;
                }
            }
            for child in hierarchy.children_of(task) {
                if graph.contains(child) && graph.container_of(child).is_none() {
                    graph.reparent(child, Some(task))?;
                }
            }
            Ok(())
        })
    }

    /// Removes `task` with every edge touching it. Children still in the
    /// graph become roots.
    pub fn remove_task(&mut self, task: TaskId) -> Result<(), GraphError> {
        let ix = self.node(task)?;
        self.atomically(|graph| {
            for child in graph.children_in_graph(task) {
                graph.reparent(child, None)?;
            }
            let explicit: Vec<TaskDependency> = graph
                .graph
                .edges_directed(ix, Incoming)
                .chain(graph.graph.edges_directed(ix, Outgoing))
                .filter_map(|edge| edge.weight().dependency)
                .collect();
            for dependency in explicit {
                graph.retract_inherited(&dependency);
                if let Some(edge) =
                    graph.find_edge(dependency.dependee, dependency.dependant, EdgeKind::Explicit)
                {
                    graph.delete_edge(edge);
                }
            }
            let remaining: Vec<EdgeIndex> = graph
                .graph
                .edges_directed(ix, Incoming)
                .chain(graph.graph.edges_directed(ix, Outgoing))
                .map(|edge| edge.id())
                .collect();
            for edge in remaining {
                graph.delete_edge(edge);
            }

            if let Some(node) = graph.graph.remove_node(ix) {
                graph.index.remove(&task);
                graph.journal.record(Delta::NodeRemoved {
                    task,
                    level: node.level,
                    seq: node.seq,
                });
            }
            let releveled = graph.relevel();
            debug_assert!(releveled.is_ok(), "removing edges cannot close a loop");
            Ok(())
        })
    }

    pub fn add_dependency(&mut self, dependency: TaskDependency) -> Result<(), GraphError> {
        let TaskDependency {
            dependant,
            dependee,
            ..
        } = dependency;
        if dependant == dependee {
            return Err(GraphError::SelfDependency(dependant));
        }
        let src = self.node(dependee)?;
        let dst = self.node(dependant)?;
        if self.find_edge(dependee, dependant, EdgeKind::Explicit).is_some() {
            return Err(GraphError::DuplicateDependency {
                dependant,
                dependee,
            });
        }
        self.atomically(|graph| {
            graph.insert_edge(src, dst, EdgeData::explicit(dependency));
            graph.derive_inherited(&dependency);
            graph.relevel().map_err(|LevelOverflow| {
                warn!(%dependant, %dependee, "rejected dependency that would create a loop");
                GraphError::DependencyLoop {
                    dependee,
                    dependant,
                }
            })
        })
    }

    pub fn remove_dependency(&mut self, dependency: &TaskDependency) -> Result<(), GraphError> {
        let TaskDependency {
            dependant,
            dependee,
            ..
        } = *dependency;
        let edge = self
            .find_edge(dependee, dependant, EdgeKind::Explicit)
            .ok_or(GraphError::UnknownDependency {
                dependant,
                dependee,
            })?;
        self.atomically(|graph| {
            let stored = graph.graph[edge].dependency.unwrap_or(*dependency);
            graph.retract_inherited(&stored);
            graph.delete_edge(edge);
            let releveled = graph.relevel();
            debug_assert!(releveled.is_ok(), "removing edges cannot close a loop");
            Ok(())
        })
    }

    /// Replaces constraint kind, hardness and lag of an existing dependency.
    pub fn update_dependency(&mut self, dependency: TaskDependency) -> Result<(), GraphError> {
        let TaskDependency {
            dependant,
            dependee,
            ..
        } = dependency;
        let edge = self
            .find_edge(dependee, dependant, EdgeKind::Explicit)
            .ok_or(GraphError::UnknownDependency {
                dependant,
                dependee,
            })?;
        self.atomically(|graph| {
            if let Some(old) = graph.graph[edge].dependency.replace(dependency) {
                graph.journal.record(Delta::DependencyChanged { old });
            }
            Ok(())
        })
    }

    /// Moves `task` under `new_parent`, or to the top level for `None`.
    pub fn move_task(&mut self, task: TaskId, new_parent: Option<TaskId>) -> Result<(), GraphError> {
        self.node(task)?;
        if let Some(parent) = new_parent {
            self.node(parent)?;
        }
        self.atomically(|graph| graph.reparent(task, new_parent))
    }

    // ---- internals ------------------------------------------------------

    fn node(&self, task: TaskId) -> Result<NodeIndex, GraphError> {
        self.index
            .get(&task)
            .copied()
            .ok_or(GraphError::UnknownTask(task))
    }

    fn find_edge(&self, source: TaskId, target: TaskId, kind: EdgeKind) -> Option<EdgeIndex> {
        let src = *self.index.get(&source)?;
        let dst = *self.index.get(&target)?;
        self.graph
            .edges_directed(dst, Incoming)
            .find(|edge| edge.source() == src && edge.weight().kind == kind)
            .map(|edge| edge.id())
    }

    fn insert_edge(&mut self, src: NodeIndex, dst: NodeIndex, data: EdgeData) {
        let source = self.graph[src].task;
        let target = self.graph[dst].task;
        let kind = data.kind;
        self.graph.add_edge(src, dst, data);
        self.journal.record(Delta::EdgeAdded {
            source,
            target,
            kind,
        });
        self.dirty.push(target);
    }

    fn delete_edge(&mut self, edge: EdgeIndex) {
        let Some((src, dst)) = self.graph.edge_endpoints(edge) else {
            return;
        };
        let source = self.graph[src].task;
        let target = self.graph[dst].task;
        if let Some(data) = self.graph.remove_edge(edge) {
            self.journal.record(Delta::EdgeRemoved {
                source,
                target,
                edge: data,
            });
            self.dirty.push(target);
        }
    }

    fn children_in_graph(&self, task: TaskId) -> Vec<TaskId> {
        let Some(&ix) = self.index.get(&task) else {
            return Vec::new();
        };
        let mut children: Vec<(u64, TaskId)> = self
            .graph
            .edges_directed(ix, Incoming)
            .filter(|edge| edge.weight().kind == EdgeKind::Containment)
            .map(|edge| {
                let child = &self.graph[edge.source()];
                (child.seq, child.task)
            })
            .collect();
        children.sort_unstable();
        children.into_iter().map(|(_, task)| task).collect()
    }

    fn ancestors(&self, task: TaskId) -> Vec<TaskId> {
        let mut ancestors = Vec::new();
        let mut current = self.container_of(task);
        while let Some(container) = current {
            if container == task || ancestors.contains(&container) {
                break;
            }
            ancestors.push(container);
            current = self.container_of(container);
        }
        ancestors
    }

    fn subtree(&self, task: TaskId) -> Vec<TaskId> {
        let mut result = vec![task];
        let mut cursor = 0;
        while cursor < result.len() {
            for child in self.children_in_graph(result[cursor]) {
                if !result.contains(&child) {
                    result.push(child);
                }
            }
            cursor += 1;
        }
        result
    }

    /// Adds the dependant as an origin of an inherited edge on every
    /// ancestor of the dependant that does not also contain the dependee.
    fn derive_inherited(&mut self, dependency: &TaskDependency) {
        let dependee_ancestors = self.ancestors(dependency.dependee);
        let Some(&src) = self.index.get(&dependency.dependee) else {
            return;
        };
        for ancestor in self.ancestors(dependency.dependant) {
            if ancestor == dependency.dependee || dependee_ancestors.contains(&ancestor) {
                break;
            }
            match self.find_edge(dependency.dependee, ancestor, EdgeKind::Inherited) {
                Some(edge) => {
                    let origins = &mut self.graph[edge].origins;
                    if !origins.contains(&dependency.dependant) {
                        let old = origins.clone();
                        origins.push(dependency.dependant);
                        self.journal.record(Delta::OriginsChanged {
                            source: dependency.dependee,
                            target: ancestor,
                            old,
                        });
                    }
                }
                None => {
                    if let Some(&dst) = self.index.get(&ancestor) {
                        self.insert_edge(src, dst, EdgeData::inherited(dependency.dependant));
                    }
                }
            }
        }
    }

    /// Inverse of `derive_inherited` for the current hierarchy.
    fn retract_inherited(&mut self, dependency: &TaskDependency) {
        for ancestor in self.ancestors(dependency.dependant) {
            let Some(edge) = self.find_edge(dependency.dependee, ancestor, EdgeKind::Inherited) else {
                continue;
            };
            let origins = &self.graph[edge].origins;
            if !origins.contains(&dependency.dependant) {
                continue;
            }
            if origins.len() == 1 {
                self.delete_edge(edge);
            } else {
                let old = origins.clone();
                self.graph[edge]
                    .origins
                    .retain(|origin| *origin != dependency.dependant);
                self.journal.record(Delta::OriginsChanged {
                    source: dependency.dependee,
                    target: ancestor,
                    old,
                });
            }
        }
    }

    /// Swaps the containment edge of `task` and re-derives the inherited
    /// edges of every explicit dependency touching its subtree.
    fn reparent(&mut self, task: TaskId, new_parent: Option<TaskId>) -> Result<(), GraphError> {
        let subtree = self.subtree(task);
        if let Some(parent) = new_parent {
            if subtree.contains(&parent) {
                warn!(%task, %parent, "rejected move of a task under its own subtree");
                return Err(GraphError::ContainmentLoop {
                    task,
                    container: new_parent,
                });
            }
        }

        let mut touching: Vec<TaskDependency> = Vec::new();
        for member in &subtree {
            let ix = self.node(*member)?;
            for edge in self
                .graph
                .edges_directed(ix, Incoming)
                .chain(self.graph.edges_directed(ix, Outgoing))
            {
                if let Some(dependency) = edge.weight().dependency {
                    if !touching.contains(&dependency) {
                        touching.push(dependency);
                    }
                }
            }
        }

        for dependency in &touching {
            self.retract_inherited(dependency);
        }

        let ix = self.node(task)?;
        let old_containment: Vec<EdgeIndex> = self
            .graph
            .edges_directed(ix, Outgoing)
            .filter(|edge| edge.weight().kind == EdgeKind::Containment)
            .map(|edge| edge.id())
            .collect();
        for edge in old_containment {
            self.delete_edge(edge);
        }
        if let Some(parent) = new_parent {
            let dst = self.node(parent)?;
            self.insert_edge(ix, dst, EdgeData::containment());
        }

        for dependency in &touching {
            self.derive_inherited(dependency);
        }

        self.relevel().map_err(|LevelOverflow| {
            warn!(%task, container = ?new_parent, "rejected move that would create a loop");
            GraphError::ContainmentLoop {
                task,
                container: new_parent,
            }
        })
    }

    /// Worklist relaxation from every dirty node. A level reaching the node
    /// count can only come from a loop.
    fn relevel(&mut self) -> Result<(), LevelOverflow> {
        let limit = self.graph.node_count();
        let mut queue: VecDeque<TaskId> = self.dirty.drain(..).collect();
        while let Some(task) = queue.pop_front() {
            let Some(&ix) = self.index.get(&task) else {
                continue;
            };
            let level = self
                .graph
                .edges_directed(ix, Incoming)
                .map(|edge| self.graph[edge.source()].level + 1)
                .max()
                .unwrap_or(0);
            let old = self.graph[ix].level;
            if level == old {
                continue;
            }
            if level >= limit {
                return Err(LevelOverflow);
            }
            self.graph[ix].level = level;
            self.journal.record(Delta::LevelChanged { task, old });
            for edge in self.graph.edges_directed(ix, Outgoing) {
                queue.push_back(self.graph[edge.target()].task);
            }
        }
        Ok(())
    }
}
