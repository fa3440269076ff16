use crate::time::TimeDuration;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub i32);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<i32> for TaskId {
    fn from(id: i32) -> Self {
        TaskId(id)
    }
}

/// Which boundary of the dependee constrains which boundary of the dependant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    #[default]
    FinishStart,
    StartStart,
    FinishFinish,
    StartFinish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hardness {
    /// The computed date is snapped onto working time.
    #[default]
    Strong,
    /// The computed date is used as is, even on non-working time.
    Rubber,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskDependency {
    pub dependant: TaskId,
    pub dependee: TaskId,
    #[serde(default)]
    pub constraint: ConstraintKind,
    #[serde(default)]
    pub hardness: Hardness,
    #[serde(default)]
    pub lag: TimeDuration,
}

impl TaskDependency {
    /// Finish-start, strong, no lag.
    pub fn new(dependant: TaskId, dependee: TaskId) -> Self {
        Self {
            dependant,
            dependee,
            constraint: ConstraintKind::FinishStart,
            hardness: Hardness::Strong,
            lag: TimeDuration::default(),
        }
    }

    pub fn with_constraint(mut self, constraint: ConstraintKind) -> Self {
        self.constraint = constraint;
        self
    }

    pub fn with_hardness(mut self, hardness: Hardness) -> Self {
        self.hardness = hardness;
        self
    }

    pub fn with_lag(mut self, lag: TimeDuration) -> Self {
        self.lag = lag;
        self
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaskModelError {
    #[error("task {0} does not exist")]
    UnknownTask(TaskId),
    #[error("task {0} already exists")]
    DuplicateTask(TaskId),
    #[error("task {task} cannot be placed under {parent}: parent does not exist")]
    ParentNotFound { task: TaskId, parent: TaskId },
    #[error("task {task} cannot be placed under its own descendant {parent}")]
    WouldCreateCycle { task: TaskId, parent: TaskId },
    #[error("task {task} would end ({end}) before it starts ({start})")]
    InvalidDates {
        task: TaskId,
        start: NaiveDateTime,
        end: NaiveDateTime,
    },
}

/// Read access to the task hierarchy.
pub trait TaskHierarchy {
    fn container_of(&self, task: TaskId) -> Option<TaskId>;

    /// Direct children, in document order.
    fn children_of(&self, task: TaskId) -> Vec<TaskId>;

    /// Ancestors from the direct container up to the root.
    fn ancestors_of(&self, task: TaskId) -> Vec<TaskId> {
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

    /// All nested children, depth first in document order.
    fn descendants_of(&self, task: TaskId) -> Vec<TaskId> {
        let mut result = Vec::new();
        let mut stack: Vec<TaskId> = self.children_of(task).into_iter().rev().collect();
        while let Some(next) = stack.pop() {
            if next == task || result.contains(&next) {
                continue;
            }
            result.push(next);
            stack.extend(self.children_of(next).into_iter().rev());
        }
        result
    }

    fn is_descendant(&self, ancestor: TaskId, task: TaskId) -> bool {
        self.ancestors_of(task).contains(&ancestor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskDates {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub duration: TimeDuration,
    pub earliest_start: Option<NaiveDateTime>,
}

/// New dates for a task, applied together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskMutation {
    pub task: TaskId,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

/// Task storage the scheduler reads dates from and writes dates back to.
pub trait TaskModel: TaskHierarchy {
    fn dates(&self, task: TaskId) -> Option<TaskDates>;

    fn commit(&mut self, mutation: TaskMutation) -> Result<(), TaskModelError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub duration: TimeDuration,
    pub earliest_start: Option<NaiveDateTime>,
}

impl Task {
    /// The end is a plain time offset until a scheduler run places the task
    /// on the calendar. A duration too large for that offset leaves the end
    /// at the start.
    pub fn new(
        id: impl Into<TaskId>,
        name: impl Into<String>,
        start: NaiveDateTime,
        duration: TimeDuration,
    ) -> Self {
        let end = duration
            .to_offset()
            .and_then(|offset| start.checked_add_signed(offset))
            .unwrap_or(start);
        Self {
            id: id.into(),
            name: name.into(),
            start,
            end,
            duration,
            earliest_start: None,
        }
    }

    pub fn with_earliest_start(mut self, earliest_start: NaiveDateTime) -> Self {
        self.earliest_start = Some(earliest_start);
        self
    }

    pub fn dates(&self) -> TaskDates {
        TaskDates {
            start: self.start,
            end: self.end,
            duration: self.duration,
            earliest_start: self.earliest_start,
        }
    }
}

/// In-memory task store with an ordered hierarchy.
#[derive(Debug, Clone, Default)]
pub struct TaskTree {
    tasks: HashMap<TaskId, Task>,
    order: Vec<TaskId>,
    parents: HashMap<TaskId, TaskId>,
    children: HashMap<TaskId, Vec<TaskId>>,
}

impl TaskTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn contains(&self, task: TaskId) -> bool {
        self.tasks.contains_key(&task)
    }

    pub fn get(&self, task: TaskId) -> Option<&Task> {
        self.tasks.get(&task)
    }

    pub fn get_mut(&mut self, task: TaskId) -> Option<&mut Task> {
        self.tasks.get_mut(&task)
    }

    /// Tasks in insertion order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.order.iter().filter_map(|id| self.tasks.get(id))
    }

    pub fn roots(&self) -> Vec<TaskId> {
        self.order
            .iter()
            .copied()
            .filter(|id| !self.parents.contains_key(id))
            .collect()
    }

    pub fn insert(&mut self, task: Task, parent: Option<TaskId>) -> Result<(), TaskModelError> {
        let id = task.id;
        if self.tasks.contains_key(&id) {
            return Err(TaskModelError::DuplicateTask(id));
        }
        if let Some(parent) = parent {
            if !self.tasks.contains_key(&parent) {
                return Err(TaskModelError::ParentNotFound { task: id, parent });
            }
            self.parents.insert(id, parent);
            self.children.entry(parent).or_default().push(id);
        }
        self.tasks.insert(id, task);
        self.order.push(id);
        Ok(())
    }

    /// Removes `task` and everything nested below it. Returned tasks are
    /// ordered children first.
    pub fn remove_subtree(&mut self, task: TaskId) -> Result<Vec<Task>, TaskModelError> {
        if !self.tasks.contains_key(&task) {
            return Err(TaskModelError::UnknownTask(task));
        }
        let mut doomed = self.descendants_of(task);
        doomed.reverse();
        doomed.push(task);

        self.detach(task);
        let mut removed = Vec::with_capacity(doomed.len());
        for id in doomed {
            self.parents.remove(&id);
            self.children.remove(&id);
            if let Some(removed_task) = self.tasks.remove(&id) {
                removed.push(removed_task);
            }
        }
        self.order.retain(|id| self.tasks.contains_key(id));
        Ok(removed)
    }

    /// Re-parents `task` under `new_parent` (or to the root) at `position`
    /// among its new siblings; a position past the end appends.
    pub fn move_task(
        &mut self,
        task: TaskId,
        new_parent: Option<TaskId>,
        position: Option<usize>,
    ) -> Result<(), TaskModelError> {
        if !self.tasks.contains_key(&task) {
            return Err(TaskModelError::UnknownTask(task));
        }
        if let Some(parent) = new_parent {
            if !self.tasks.contains_key(&parent) {
                return Err(TaskModelError::ParentNotFound { task, parent });
            }
            if parent == task || self.is_descendant(task, parent) {
                return Err(TaskModelError::WouldCreateCycle { task, parent });
            }
        }

        self.detach(task);
        if let Some(parent) = new_parent {
            self.parents.insert(task, parent);
            let siblings = self.children.entry(parent).or_default();
            let at = position.unwrap_or(siblings.len()).min(siblings.len());
            siblings.insert(at, task);
        }
        Ok(())
    }

    fn detach(&mut self, task: TaskId) {
        if let Some(parent) = self.parents.remove(&task) {
            if let Some(siblings) = self.children.get_mut(&parent) {
                siblings.retain(|id| *id != task);
                if siblings.is_empty() {
                    self.children.remove(&parent);
                }
            }
        }
    }

    pub fn set_start(&mut self, task: TaskId, start: NaiveDateTime) -> Result<(), TaskModelError> {
        let entry = self
            .tasks
            .get_mut(&task)
            .ok_or(TaskModelError::UnknownTask(task))?;
        let shift = start - entry.start;
        entry.start = start;
        entry.end += shift;
        Ok(())
    }

    pub fn set_earliest_start(
        &mut self,
        task: TaskId,
        earliest_start: Option<NaiveDateTime>,
    ) -> Result<(), TaskModelError> {
        let entry = self
            .tasks
            .get_mut(&task)
            .ok_or(TaskModelError::UnknownTask(task))?;
        entry.earliest_start = earliest_start;
        Ok(())
    }
}

impl TaskHierarchy for TaskTree {
    fn container_of(&self, task: TaskId) -> Option<TaskId> {
        self.parents.get(&task).copied()
    }

    fn children_of(&self, task: TaskId) -> Vec<TaskId> {
        self.children.get(&task).cloned().unwrap_or_default()
    }
}

impl TaskModel for TaskTree {
    fn dates(&self, task: TaskId) -> Option<TaskDates> {
        self.tasks.get(&task).map(Task::dates)
    }

    fn commit(&mut self, mutation: TaskMutation) -> Result<(), TaskModelError> {
        let TaskMutation { task, start, end } = mutation;
        if end < start {
            return Err(TaskModelError::InvalidDates { task, start, end });
        }
        let entry = self
            .tasks
            .get_mut(&task)
            .ok_or(TaskModelError::UnknownTask(task))?;
        entry.start = start;
        entry.end = end;
        Ok(())
    }
}
