use crate::calculations::{RunSummary, ScheduleError, Scheduler};
use crate::calendar::Calendar;
use crate::graph::DependencyGraph;
use crate::task::{Task, TaskDependency, TaskHierarchy, TaskId, TaskTree};
use chrono::NaiveDateTime;
use tracing::debug;

/// Editor-level entry point: keeps the task tree, the dependency graph and
/// the calendar in sync and reschedules after every edit unless batched.
#[derive(Debug, Default)]
pub struct Schedule {
    tasks: TaskTree,
    calendar: Calendar,
    graph: DependencyGraph,
    scheduler: Scheduler,
}

impl Schedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_calendar(calendar: Calendar) -> Self {
        Self {
            calendar,
            ..Self::default()
        }
    }

    pub fn tasks(&self) -> &TaskTree {
        &self.tasks
    }

    pub fn task(&self, task: TaskId) -> Option<&Task> {
        self.tasks.get(task)
    }

    pub fn calendar(&self) -> &Calendar {
        &self.calendar
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn set_calendar(&mut self, calendar: Calendar) -> Result<RunSummary, ScheduleError> {
        self.calendar = calendar;
        self.refresh()
    }

    /// Applies a calendar edit, then reschedules.
    pub fn update_calendar<F>(&mut self, edit: F) -> Result<RunSummary, ScheduleError>
    where
        F: FnOnce(&mut Calendar),
    {
        edit(&mut self.calendar);
        self.refresh()
    }

    pub fn add_task(&mut self, task: Task, parent: Option<TaskId>) -> Result<RunSummary, ScheduleError> {
        let id = task.id;
        self.tasks.insert(task, parent)?;
        if let Err(err) = self.graph.add_task(id, &self.tasks) {
            self.tasks.remove_subtree(id)?;
            return Err(err.into());
        }
        self.refresh()
    }

    /// Removes the task and everything nested under it, children first.
    pub fn remove_task(&mut self, task: TaskId) -> Result<Vec<Task>, ScheduleError> {
        if !self.tasks.contains(task) {
            return Err(ScheduleError::UnknownTask(task));
        }
        let mut doomed = self.tasks.descendants_of(task);
        doomed.reverse();
        doomed.push(task);

        self.in_graph_transaction(|graph| {
            for id in &doomed {
                if graph.contains(*id) {
                    graph.remove_task(*id)?;
                }
            }
            Ok(())
        })?;
        let removed = self.tasks.remove_subtree(task)?;
        debug!(%task, removed = removed.len(), "removed task subtree");
        self.refresh()?;
        Ok(removed)
    }

    pub fn add_dependency(&mut self, dependency: TaskDependency) -> Result<RunSummary, ScheduleError> {
        self.graph.add_dependency(dependency)?;
        self.refresh()
    }

    pub fn remove_dependency(
        &mut self,
        dependency: &TaskDependency,
    ) -> Result<RunSummary, ScheduleError> {
        self.graph.remove_dependency(dependency)?;
        self.refresh()
    }

    pub fn update_dependency(
        &mut self,
        dependency: TaskDependency,
    ) -> Result<RunSummary, ScheduleError> {
        self.graph.update_dependency(dependency)?;
        self.refresh()
    }

    /// Re-parents `task` in both the tree and the graph; `position` is the
    /// index among the new siblings (appends when `None`).
    pub fn move_task(
        &mut self,
        task: TaskId,
        new_parent: Option<TaskId>,
        position: Option<usize>,
    ) -> Result<RunSummary, ScheduleError> {
        let tasks = &mut self.tasks;
        self.graph.start_transaction()?;
        let moved = self
            .graph
            .move_task(task, new_parent)
            .map_err(ScheduleError::from)
            .and_then(|()| {
                tasks
                    .move_task(task, new_parent, position)
                    .map_err(ScheduleError::from)
            });
        match moved {
            Ok(()) => self.graph.commit_transaction()?,
            Err(err) => {
                self.graph.rollback_transaction()?;
                return Err(err);
            }
        }
        self.refresh()
    }

    pub fn set_task_start(
        &mut self,
        task: TaskId,
        start: NaiveDateTime,
    ) -> Result<RunSummary, ScheduleError> {
        self.tasks.set_start(task, start)?;
        self.refresh()
    }

    pub fn set_earliest_start(
        &mut self,
        task: TaskId,
        earliest_start: Option<NaiveDateTime>,
    ) -> Result<RunSummary, ScheduleError> {
        self.tasks.set_earliest_start(task, earliest_start)?;
        self.refresh()
    }

    /// Runs `edits` with the scheduler disabled, then reschedules once.
    pub fn batch<T, F>(&mut self, edits: F) -> Result<T, ScheduleError>
    where
        F: FnOnce(&mut Schedule) -> Result<T, ScheduleError>,
    {
        let was_enabled = self.scheduler.is_enabled();
        self.scheduler.set_enabled(false);
        let result = edits(self);
        self.scheduler.set_enabled(was_enabled);
        let value = result?;
        self.refresh()?;
        Ok(value)
    }

    /// Runs the scheduler regardless of batching.
    pub fn reschedule(&mut self) -> Result<RunSummary, ScheduleError> {
        let mut scheduler = self.scheduler.clone();
        scheduler.set_enabled(true);
        scheduler.run(&self.graph, &self.calendar, &mut self.tasks)
    }

    fn refresh(&mut self) -> Result<RunSummary, ScheduleError> {
        self.scheduler
            .run(&self.graph, &self.calendar, &mut self.tasks)
    }

    fn in_graph_transaction<F>(&mut self, op: F) -> Result<(), ScheduleError>
    where
        F: FnOnce(&mut DependencyGraph) -> Result<(), ScheduleError>,
    {
        self.graph.start_transaction()?;
        match op(&mut self.graph) {
            Ok(()) => {
                self.graph.commit_transaction()?;
                Ok(())
            }
            Err(err) => {
                self.graph.rollback_transaction()?;
                Err(err)
            }
        }
    }
}
