use super::constraint::candidate_start;
use crate::calendar::{Calendar, CalendarError};
use crate::graph::{DependencyGraph, EdgeKind, GraphError, NodeView};
use crate::task::{Hardness, TaskDates, TaskDependency, TaskId, TaskModel, TaskModelError, TaskMutation};
use chrono::NaiveDateTime;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("could not compute dates of task {task}: {source}")]
    Calendar {
        task: TaskId,
        #[source]
        source: CalendarError,
    },
    #[error("task {0} is unknown to the task model")]
    UnknownTask(TaskId),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Model(#[from] TaskModelError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunSummary {
    pub visited: usize,
    pub modified: usize,
    pub skipped: bool,
}

impl RunSummary {
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

/// Walks the dependency graph level by level and writes dates back through
/// the task model. Holds no task state between runs.
#[derive(Debug, Clone)]
pub struct Scheduler {
    enabled: bool,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn run<M: TaskModel + ?Sized>(
        &self,
        graph: &DependencyGraph,
        calendar: &Calendar,
        model: &mut M,
    ) -> Result<RunSummary, ScheduleError> {
        if !self.enabled {
            debug!("scheduler disabled, run skipped");
            return Ok(RunSummary::skipped());
        }

        let mut summary = RunSummary::default();
        for layer in graph.layers() {
            for task in layer {
                let Some(node) = graph.get_node(task) else {
                    continue;
                };
                let dates = model.dates(task).ok_or(ScheduleError::UnknownTask(task))?;
                let children = model.children_of(task);
                let (start, end) = if children.is_empty() {
                    schedule_leaf(&node, &dates, calendar, &*model)?
                } else {
                    schedule_container(&node, &dates, &children, calendar, &*model)?
                };

                summary.visited += 1;
                if start != dates.start || end != dates.end {
                    model.commit(TaskMutation { task, start, end })?;
                    summary.modified += 1;
                    debug!(%task, %start, %end, "task rescheduled");
                }
            }
        }

        info!(
            visited = summary.visited,
            modified = summary.modified,
            "scheduler run finished"
        );
        Ok(summary)
    }
}

/// Dependencies declared on `node` itself. Inherited edges only order a
/// container after its descendants' predecessors.
fn constraining_dependencies(node: &NodeView) -> Vec<TaskDependency> {
    node.incoming
        .iter()
        .filter(|edge| edge.kind == EdgeKind::Explicit)
        .filter_map(|edge| edge.dependency)
        .collect()
}

fn candidate_starts<M: TaskModel + ?Sized>(
    task: TaskId,
    dependencies: &[TaskDependency],
    dates: &TaskDates,
    calendar: &Calendar,
    model: &M,
) -> Result<Vec<NaiveDateTime>, ScheduleError> {
    dependencies
        .iter()
        .map(|dependency| {
            let dependee = model
                .dates(dependency.dependee)
                .ok_or(ScheduleError::UnknownTask(dependency.dependee))?;
            candidate_start(dependency, &dependee, dates.duration, calendar)
                .map_err(|source| ScheduleError::Calendar { task, source })
        })
        .collect()
}

fn schedule_leaf<M: TaskModel + ?Sized>(
    node: &NodeView,
    dates: &TaskDates,
    calendar: &Calendar,
    model: &M,
) -> Result<(NaiveDateTime, NaiveDateTime), ScheduleError> {
    let task = node.task;
    let dependencies = constraining_dependencies(node);
    let mut candidates = candidate_starts(task, &dependencies, dates, calendar, model)?;

    let start = if candidates.is_empty() {
        dates.earliest_start.unwrap_or(dates.start)
    } else {
        candidates.extend(dates.earliest_start);
        if dependencies
            .iter()
            .all(|dependency| dependency.hardness == Hardness::Rubber)
        {
            candidates.push(dates.start);
        }
        candidates.into_iter().max().unwrap_or(dates.start)
    };

    let end = calendar
        .shift_date(start, dates.duration)
        .map_err(|source| ScheduleError::Calendar { task, source })?;
    Ok((start, end))
}

/// Envelope of the children, pushed later only by dependencies declared on
/// the container itself.
fn schedule_container<M: TaskModel + ?Sized>(
    node: &NodeView,
    dates: &TaskDates,
    children: &[TaskId],
    calendar: &Calendar,
    model: &M,
) -> Result<(NaiveDateTime, NaiveDateTime), ScheduleError> {
    let task = node.task;
    let child_dates: Vec<TaskDates> = children.iter().filter_map(|child| model.dates(*child)).collect();
    let envelope_start = child_dates.iter().map(|child| child.start).min();
    let envelope_end = child_dates.iter().map(|child| child.end).max();
    let (Some(envelope_start), Some(envelope_end)) = (envelope_start, envelope_end) else {
        return schedule_leaf(node, dates, calendar, model);
    };

    let dependencies = constraining_dependencies(node);
    let candidates = candidate_starts(task, &dependencies, dates, calendar, model)?;
    let start = candidates
        .into_iter()
        .fold(envelope_start, |latest, candidate| latest.max(candidate));
    Ok((start, envelope_end.max(start)))
}
