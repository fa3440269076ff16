use super::{EdgeData, EdgeKind};
use crate::task::{TaskDependency, TaskId};

/// One reversible structural change. Deltas name tasks rather than arena
/// indices so that a node removed and restored gets its edges back.
#[derive(Debug, Clone)]
pub(crate) enum Delta {
    NodeAdded {
        task: TaskId,
    },
    NodeRemoved {
        task: TaskId,
        level: usize,
        seq: u64,
    },
    EdgeAdded {
        source: TaskId,
        target: TaskId,
        kind: EdgeKind,
    },
    EdgeRemoved {
        source: TaskId,
        target: TaskId,
        edge: EdgeData,
    },
    OriginsChanged {
        source: TaskId,
        target: TaskId,
        old: Vec<TaskId>,
    },
    LevelChanged {
        task: TaskId,
        old: usize,
    },
    DependencyChanged {
        old: TaskDependency,
    },
}

/// Delta log. Outside a transaction it only lives for the duration of a
/// single mutation.
#[derive(Debug, Default)]
pub(crate) struct Journal {
    entries: Vec<Delta>,
    active: bool,
}

impl Journal {
    pub(crate) fn is_active(&self) -> bool {
        self.active
    }

    pub(crate) fn begin(&mut self) {
        self.entries.clear();
        self.active = true;
    }

    pub(crate) fn end(&mut self) {
        self.entries.clear();
        self.active = false;
    }

    pub(crate) fn mark(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn record(&mut self, delta: Delta) {
        self.entries.push(delta);
    }

    /// Takes every delta recorded after `mark`, oldest first.
    pub(crate) fn split_off(&mut self, mark: usize) -> Vec<Delta> {
        self.entries.split_off(mark.min(self.entries.len()))
    }

    pub(crate) fn settle(&mut self) {
        if !self.active {
            self.entries.clear();
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
