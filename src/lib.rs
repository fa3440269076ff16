pub mod calculations;
pub mod calendar;
pub mod graph;
pub mod schedule;
pub mod task;
pub mod time;

pub use calculations::{RunSummary, ScheduleError, Scheduler};
pub use calendar::{Calendar, CalendarConfig, CalendarError, DayType, Holiday, HolidayKind};
pub use graph::{DependencyGraph, EdgeKind, GraphError};
pub use schedule::Schedule;
pub use task::{ConstraintKind, Hardness, Task, TaskDependency, TaskId, TaskTree};
pub use time::{MoveDirection, TimeDuration, TimeUnit};
