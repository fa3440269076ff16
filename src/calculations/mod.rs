pub mod constraint;
pub mod scheduler;

pub use scheduler::{RunSummary, ScheduleError, Scheduler};
