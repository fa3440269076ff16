use chrono::{Datelike, Duration, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Granularity used to frame instants when walking a calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    Hour,
    Day,
    Week,
}

impl TimeUnit {
    pub fn step(self) -> Duration {
        match self {
            TimeUnit::Hour => Duration::hours(1),
            TimeUnit::Day => Duration::days(1),
            TimeUnit::Week => Duration::weeks(1),
        }
    }

    /// Start of the frame containing `time`.
    pub fn adjust_left(self, time: NaiveDateTime) -> NaiveDateTime {
        let midnight = time.date().and_time(NaiveTime::default());
        match self {
            TimeUnit::Hour => midnight + Duration::hours(i64::from(time.hour())),
            TimeUnit::Day => midnight,
            TimeUnit::Week => {
                midnight - Duration::days(i64::from(time.weekday().num_days_from_monday()))
            }
        }
    }

    /// Start of the frame following the one containing `time`.
    pub fn adjust_right(self, time: NaiveDateTime) -> NaiveDateTime {
        self.adjust_left(time) + self.step()
    }

    /// Start of the frame preceding the one containing `time`.
    pub fn jump_left(self, time: NaiveDateTime) -> NaiveDateTime {
        self.adjust_left(time) - self.step()
    }

    pub fn symbol(self) -> &'static str {
        match self {
            TimeUnit::Hour => "h",
            TimeUnit::Day => "d",
            TimeUnit::Week => "w",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MoveDirection {
    Forward,
    Backward,
}

/// Signed length expressed in whole time units. Negative lengths walk
/// backwards through the calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeDuration {
    pub unit: TimeUnit,
    pub length: i64,
}

impl TimeDuration {
    pub fn new(unit: TimeUnit, length: i64) -> Self {
        Self { unit, length }
    }

    pub fn hours(length: i64) -> Self {
        Self::new(TimeUnit::Hour, length)
    }

    pub fn days(length: i64) -> Self {
        Self::new(TimeUnit::Day, length)
    }

    pub fn weeks(length: i64) -> Self {
        Self::new(TimeUnit::Week, length)
    }

    pub fn is_zero(&self) -> bool {
        self.length == 0
    }

    pub fn is_negative(&self) -> bool {
        self.length < 0
    }

    pub fn negated(&self) -> Self {
        Self::new(self.unit, -self.length)
    }

    /// Plain wall-clock offset, ignoring any calendar. `None` when the
    /// length does not fit a `chrono::Duration`.
    pub fn to_offset(&self) -> Option<Duration> {
        let length = i32::try_from(self.length).ok()?;
        self.unit.step().checked_mul(length)
    }
}

impl Default for TimeDuration {
    fn default() -> Self {
        Self::days(0)
    }
}

impl fmt::Display for TimeDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.length, self.unit.symbol())
    }
}
