use crate::calendar::{Calendar, CalendarError};
use crate::task::{ConstraintKind, Hardness, TaskDates, TaskDependency};
use crate::time::TimeDuration;
use chrono::NaiveDateTime;

/// Earliest start the dependant may take under `dependency`, given the
/// dependee's current dates and the dependant's own duration.
///
/// Finish-finish and start-finish constrain the dependant's end; the start
/// is then solved backwards through the calendar. Strong dependencies snap
/// the result onto working time, rubber ones leave it where it lands.
pub fn candidate_start(
    dependency: &TaskDependency,
    dependee: &TaskDates,
    duration: TimeDuration,
    calendar: &Calendar,
) -> Result<NaiveDateTime, CalendarError> {
    let start = match dependency.constraint {
        ConstraintKind::FinishStart => calendar.shift_date(dependee.end, dependency.lag)?,
        ConstraintKind::StartStart => calendar.shift_date(dependee.start, dependency.lag)?,
        ConstraintKind::FinishFinish => {
            let end = calendar.shift_date(dependee.end, dependency.lag)?;
            calendar.shift_date(end, duration.negated())?
        }
        ConstraintKind::StartFinish => {
            let end = calendar.shift_date(dependee.start, dependency.lag)?;
            calendar.shift_date(end, duration.negated())?
        }
    };
    match dependency.hardness {
        Hardness::Strong => calendar.find_closest_working_time(start),
        Hardness::Rubber => Ok(start),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskId;
    use chrono::NaiveDate;

    fn at(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn dates(start: NaiveDateTime, end: NaiveDateTime) -> TaskDates {
        TaskDates {
            start,
            end,
            duration: TimeDuration::days(1),
            earliest_start: None,
        }
    }

    #[test]
    fn finish_start_with_lag_skips_weekend() {
        let calendar = Calendar::new();
        // Dependee runs on Thursday; one day of lag uses up Friday.
        let dependee = dates(at(2025, 1, 9), at(2025, 1, 10));
        let dependency =
            TaskDependency::new(TaskId(2), TaskId(1)).with_lag(TimeDuration::days(1));
        let start = candidate_start(&dependency, &dependee, TimeDuration::days(1), &calendar)
            .unwrap();
        assert_eq!(start, at(2025, 1, 13));
    }

    #[test]
    fn finish_finish_solves_start_backwards() {
        let calendar = Calendar::new();
        // Dependee runs on Wednesday; a two day task finishing with it starts
        // on Tuesday.
        let dependee = dates(at(2025, 1, 8), at(2025, 1, 9));
        let dependency = TaskDependency::new(TaskId(2), TaskId(1))
            .with_constraint(ConstraintKind::FinishFinish);
        let start = candidate_start(&dependency, &dependee, TimeDuration::days(2), &calendar)
            .unwrap();
        assert_eq!(start, at(2025, 1, 7));
    }

    #[test]
    fn rubber_may_land_on_weekend() {
        let calendar = Calendar::new();
        let dependee = dates(at(2025, 1, 10), at(2025, 1, 11));
        let rubber = TaskDependency::new(TaskId(2), TaskId(1)).with_hardness(Hardness::Rubber);
        let strong = TaskDependency::new(TaskId(2), TaskId(1));

        let soft = candidate_start(&rubber, &dependee, TimeDuration::days(1), &calendar).unwrap();
        let hard = candidate_start(&strong, &dependee, TimeDuration::days(1), &calendar).unwrap();
        assert_eq!(soft, at(2025, 1, 11));
        assert_eq!(hard, at(2025, 1, 13));
    }
}
