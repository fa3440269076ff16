//! Working-time calendar: weekday table, one-off and repeating holidays,
//! and the date arithmetic the scheduler runs on.
//!
//! Classification of a date, first match wins:
//! 1. a one-off event on that date (`Holiday` or `WorkingDay`; `Neutral` defers),
//! 2. a repeating event on the same month/day (same rules),
//! 3. the weekday table, unless `only_show_weekends` is on,
//! 4. otherwise the date is working time.

use crate::time::{MoveDirection, TimeDuration, TimeUnit};
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::hash::{Hash, Hasher};
use thiserror::Error;
use tracing::{debug, warn};

pub mod config;
pub mod presets;

pub use config::CalendarConfig;

/// Longest span a calendar walk without an explicit limit searches before
/// giving up.
pub const SEARCH_HORIZON_DAYS: i64 = 3660;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DayType {
    Working,
    Weekend,
    Holiday,
    NonWorking,
}

/// Everything known about a date, including facts that do not affect
/// scheduling (a weekend while `only_show_weekends` is on).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DayMask {
    pub working: bool,
    pub weekend: bool,
    pub holiday: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HolidayKind {
    #[default]
    Holiday,
    WorkingDay,
    Neutral,
}

/// A calendar event. Two events are equal when they share the date and the
/// recurrence flag; kind and title do not take part.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Holiday {
    pub date: NaiveDate,
    #[serde(default)]
    pub recurring: bool,
    #[serde(default)]
    pub kind: HolidayKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl Holiday {
    pub fn one_off(date: NaiveDate) -> Self {
        Self {
            date,
            recurring: false,
            kind: HolidayKind::Holiday,
            title: None,
        }
    }

    pub fn recurring(date: NaiveDate) -> Self {
        Self {
            recurring: true,
            ..Self::one_off(date)
        }
    }

    pub fn with_kind(mut self, kind: HolidayKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

impl PartialEq for Holiday {
    fn eq(&self, other: &Self) -> bool {
        self.date == other.date && self.recurring == other.recurring
    }
}

impl Eq for Holiday {}

impl Hash for Holiday {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.date.hash(state);
        self.recurring.hash(state);
    }
}

/// A maximal interval of uniform working/non-working status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarActivity {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub is_working: bool,
}

impl CalendarActivity {
    fn new(start: NaiveDateTime, end: NaiveDateTime, is_working: bool) -> Self {
        Self {
            start,
            end,
            is_working,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportMode {
    No,
    Replace,
    Merge,
}

/// What changed, passed to every registered listener.
#[derive(Debug, Clone, PartialEq)]
pub enum CalendarChange {
    WeekDayType { weekday: Weekday, day_type: DayType },
    PublicHolidays,
    OnlyShowWeekends(bool),
    Reset,
    Imported(ImportMode),
}

pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

type Listener = Box<dyn FnMut(&CalendarChange) -> Result<(), ListenerError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Debug, Error)]
pub enum CalendarError {
    #[error("no calendar activities found for {duration} starting from {start}")]
    NoActivities {
        start: NaiveDateTime,
        duration: TimeDuration,
    },
    #[error("no working time found within {horizon_days} days of {from}")]
    NoWorkingTime {
        from: NaiveDateTime,
        horizon_days: i64,
    },
    #[error("weekday {weekday} can only be working or weekend, got {day_type:?}")]
    InvalidWeekDayType { weekday: Weekday, day_type: DayType },
    #[error("calendar configuration has no working weekday")]
    NoWorkingDays,
    #[error("calendar configuration could not be parsed: {0}")]
    Config(#[from] serde_json::Error),
}

/// Insertion-ordered event map.
#[derive(Debug, Clone)]
struct HolidaySet<K> {
    order: Vec<K>,
    events: HashMap<K, Holiday>,
}

impl<K: Copy + Eq + Hash> HolidaySet<K> {
    fn new() -> Self {
        Self {
            order: Vec::new(),
            events: HashMap::new(),
        }
    }

    fn insert(&mut self, key: K, holiday: Holiday) {
        if self.events.insert(key, holiday).is_none() {
            self.order.push(key);
        }
    }

    fn get(&self, key: &K) -> Option<&Holiday> {
        self.events.get(key)
    }

    fn clear(&mut self) {
        self.order.clear();
        self.events.clear();
    }

    fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn values(&self) -> impl Iterator<Item = &Holiday> {
        self.order.iter().filter_map(|key| self.events.get(key))
    }
}

pub struct Calendar {
    week_days: [DayType; 7],
    only_show_weekends: bool,
    one_off: HolidaySet<NaiveDate>,
    recurring: HolidaySet<(u32, u32)>,
    base_calendar_id: Option<String>,
    listeners: Vec<(ListenerId, Listener)>,
    next_listener_id: u64,
}

impl Default for Calendar {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Calendar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Calendar")
            .field("week_days", &self.week_days)
            .field("only_show_weekends", &self.only_show_weekends)
            .field("one_off", &self.one_off.order)
            .field("recurring", &self.recurring.order)
            .field("base_calendar_id", &self.base_calendar_id)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl Calendar {
    pub const ALL_WEEKDAYS: [Weekday; 7] = [
        Weekday::Mon,
        Weekday::Tue,
        Weekday::Wed,
        Weekday::Thu,
        Weekday::Fri,
        Weekday::Sat,
        Weekday::Sun,
    ];

    /// Monday to Friday working, Saturday and Sunday weekend, no holidays.
    pub fn new() -> Self {
        let mut calendar = Self {
            week_days: [DayType::Working; 7],
            only_show_weekends: false,
            one_off: HolidaySet::new(),
            recurring: HolidaySet::new(),
            base_calendar_id: None,
            listeners: Vec::new(),
            next_listener_id: 0,
        };
        calendar.reset_state();
        calendar
    }

    pub fn with_base_calendar(id: impl Into<String>) -> Self {
        let mut calendar = Self::new();
        calendar.base_calendar_id = Some(id.into());
        calendar
    }

    fn reset_state(&mut self) {
        self.one_off.clear();
        self.recurring.clear();
        self.week_days = [DayType::Working; 7];
        self.week_days[Self::weekday_index(Weekday::Sat)] = DayType::Weekend;
        self.week_days[Self::weekday_index(Weekday::Sun)] = DayType::Weekend;
    }

    /// Restores the default weekends and drops every holiday.
    pub fn reset(&mut self) {
        self.reset_state();
        self.fire(CalendarChange::Reset);
    }

    fn weekday_index(weekday: Weekday) -> usize {
        weekday.num_days_from_monday() as usize
    }

    fn recurring_key(date: NaiveDate) -> (u32, u32) {
        (date.month(), date.day())
    }

    pub fn base_calendar_id(&self) -> Option<&str> {
        self.base_calendar_id.as_deref()
    }

    pub fn set_base_calendar_id(&mut self, id: Option<String>) {
        self.base_calendar_id = id;
    }

    // ---- weekday table ------------------------------------------------

    pub fn week_day_type(&self, weekday: Weekday) -> DayType {
        self.week_days[Self::weekday_index(weekday)]
    }

    pub fn set_week_day_type(
        &mut self,
        weekday: Weekday,
        day_type: DayType,
    ) -> Result<(), CalendarError> {
        if !matches!(day_type, DayType::Working | DayType::Weekend) {
            return Err(CalendarError::InvalidWeekDayType { weekday, day_type });
        }
        self.week_days[Self::weekday_index(weekday)] = day_type;
        self.fire(CalendarChange::WeekDayType { weekday, day_type });
        Ok(())
    }

    pub fn only_show_weekends(&self) -> bool {
        self.only_show_weekends
    }

    pub fn set_only_show_weekends(&mut self, only_show_weekends: bool) {
        self.only_show_weekends = only_show_weekends;
        self.fire(CalendarChange::OnlyShowWeekends(only_show_weekends));
    }

    fn weekend_days_count(&self) -> usize {
        if self.only_show_weekends {
            return 0;
        }
        self.week_days
            .iter()
            .filter(|day_type| **day_type == DayType::Weekend)
            .count()
    }

    // ---- holidays -----------------------------------------------------

    /// Repeating events first, then one-off events, each in insertion order.
    pub fn public_holidays(&self) -> Vec<Holiday> {
        self.recurring
            .values()
            .chain(self.one_off.values())
            .cloned()
            .collect()
    }

    pub fn set_public_holidays<I>(&mut self, holidays: I)
    where
        I: IntoIterator<Item = Holiday>,
    {
        self.replace_holidays(holidays);
        self.fire(CalendarChange::PublicHolidays);
    }

    pub fn clear_public_holidays(&mut self) {
        self.one_off.clear();
        self.recurring.clear();
        self.fire(CalendarChange::PublicHolidays);
    }

    fn replace_holidays<I>(&mut self, holidays: I)
    where
        I: IntoIterator<Item = Holiday>,
    {
        self.one_off.clear();
        self.recurring.clear();
        for holiday in holidays {
            if holiday.recurring {
                self.recurring
                    .insert(Self::recurring_key(holiday.date), holiday);
            } else {
                self.one_off.insert(holiday.date, holiday);
            }
        }
    }

    /// The one-off event on `date`, else the repeating event on its month/day.
    pub fn event(&self, date: NaiveDate) -> Option<&Holiday> {
        self.one_off
            .get(&date)
            .or_else(|| self.recurring.get(&Self::recurring_key(date)))
    }

    fn event_override(&self, date: NaiveDate) -> Option<HolidayKind> {
        let decisive = |holiday: &Holiday| match holiday.kind {
            HolidayKind::Neutral => None,
            kind => Some(kind),
        };
        self.one_off
            .get(&date)
            .and_then(decisive)
            .or_else(|| {
                self.recurring
                    .get(&Self::recurring_key(date))
                    .and_then(decisive)
            })
    }

    /// True when no weekend or event can ever make time non-working.
    pub fn has_non_working_time(&self) -> bool {
        self.weekend_days_count() > 0 || !self.one_off.is_empty() || !self.recurring.is_empty()
    }

    // ---- classification ---------------------------------------------

    pub fn day_mask(&self, date: NaiveDate) -> DayMask {
        let weekend = self.week_day_type(date.weekday()) == DayType::Weekend;
        match self.event_override(date) {
            Some(HolidayKind::Holiday) => DayMask {
                working: false,
                weekend,
                holiday: true,
            },
            Some(HolidayKind::WorkingDay) => DayMask {
                working: true,
                weekend,
                holiday: false,
            },
            _ => DayMask {
                working: !weekend || self.only_show_weekends,
                weekend,
                holiday: false,
            },
        }
    }

    pub fn day_type(&self, instant: NaiveDateTime) -> DayType {
        let date = instant.date();
        match self.event_override(date) {
            Some(HolidayKind::Holiday) => DayType::Holiday,
            Some(HolidayKind::WorkingDay) => DayType::Working,
            _ => {
                if !self.only_show_weekends
                    && self.week_day_type(date.weekday()) == DayType::Weekend
                {
                    DayType::Weekend
                } else {
                    DayType::Working
                }
            }
        }
    }

    pub fn is_non_working_day(&self, instant: NaiveDateTime) -> bool {
        self.day_type(instant) != DayType::Working
    }

    fn is_working(&self, instant: NaiveDateTime) -> bool {
        self.day_type(instant) == DayType::Working
    }

    // ---- searching ----------------------------------------------------

    /// Steps one frame at a time from `time` until a frame start whose
    /// classification matches `day_type`. `Working` matches working time
    /// only; every other day type matches non-working time.
    ///
    /// Returns `None` once `limit` is reached or passed, or, without a
    /// limit, once the walk leaves the search horizon.
    pub fn find_closest(
        &self,
        time: NaiveDateTime,
        unit: TimeUnit,
        direction: MoveDirection,
        day_type: DayType,
        limit: Option<NaiveDateTime>,
    ) -> Option<NaiveDateTime> {
        let horizon = Duration::days(SEARCH_HORIZON_DAYS);
        let mut current = time;
        loop {
            let next = match direction {
                MoveDirection::Forward => unit.adjust_right(current),
                MoveDirection::Backward => unit.jump_left(current),
            };
            let working = self.is_working(next);
            let hit = match day_type {
                DayType::Working => working,
                DayType::Weekend | DayType::Holiday | DayType::NonWorking => !working,
            };
            if hit {
                return Some(next);
            }
            match limit {
                Some(limit) => {
                    let reached = match direction {
                        MoveDirection::Forward => next >= limit,
                        MoveDirection::Backward => next <= limit,
                    };
                    if reached {
                        return None;
                    }
                }
                None => {
                    if next > time + horizon || next < time - horizon {
                        return None;
                    }
                }
            }
            current = next;
        }
    }

    pub fn find_closest_working_time(
        &self,
        time: NaiveDateTime,
    ) -> Result<NaiveDateTime, CalendarError> {
        if !self.has_non_working_time() || self.is_working(time) {
            return Ok(time);
        }
        self.find_closest(
            time,
            TimeUnit::Day,
            MoveDirection::Forward,
            DayType::Working,
            None,
        )
        .ok_or(CalendarError::NoWorkingTime {
            from: time,
            horizon_days: SEARCH_HORIZON_DAYS,
        })
    }

    // ---- activities ---------------------------------------------------

    /// Partitions `[start, end)` into alternating working and non-working
    /// runs, in time order.
    pub fn activities(&self, start: NaiveDateTime, end: NaiveDateTime) -> Vec<CalendarActivity> {
        if start >= end {
            return Vec::new();
        }
        if !self.has_non_working_time() {
            return vec![CalendarActivity::new(start, end, true)];
        }
        let mut result = Vec::new();
        let mut current = start;
        let mut working = self.is_working(current);
        while current < end {
            let wanted = if working {
                DayType::NonWorking
            } else {
                DayType::Working
            };
            let change = self
                .find_closest(current, TimeUnit::Day, MoveDirection::Forward, wanted, Some(end))
                .filter(|change| *change < end)
                .unwrap_or(end);
            result.push(CalendarActivity::new(current, change, working));
            current = change;
            working = !working;
        }
        result
    }

    pub fn activities_for(
        &self,
        start: NaiveDateTime,
        duration: TimeDuration,
    ) -> Result<Vec<CalendarActivity>, CalendarError> {
        self.activities_by_count(start, duration.unit, duration.length)
    }

    /// Walks `count` working units forward (positive) or backward
    /// (negative) from `start`. Non-working stretches crossed on the way
    /// show up as non-working activities and do not consume the count.
    pub fn activities_by_count(
        &self,
        start: NaiveDateTime,
        unit: TimeUnit,
        count: i64,
    ) -> Result<Vec<CalendarActivity>, CalendarError> {
        let activities = if count >= 0 {
            self.activities_forward(start, unit, count)?
        } else {
            self.activities_backward(start, unit, -count)?
        };
        Ok(merge_adjacent(activities))
    }

    fn activities_forward(
        &self,
        start: NaiveDateTime,
        unit: TimeUnit,
        count: i64,
    ) -> Result<Vec<CalendarActivity>, CalendarError> {
        let mut result = Vec::new();
        let mut remaining = count;
        let mut unit_start = unit.adjust_left(start);
        while remaining > 0 {
            if !self.is_working(unit_start) {
                let working_start = self
                    .find_closest(
                        unit_start,
                        unit,
                        MoveDirection::Forward,
                        DayType::Working,
                        None,
                    )
                    .ok_or(CalendarError::NoWorkingTime {
                        from: unit_start,
                        horizon_days: SEARCH_HORIZON_DAYS,
                    })?;
                result.push(CalendarActivity::new(unit_start, working_start, false));
                unit_start = working_start;
                continue;
            }
            let next_unit_start = unit.adjust_right(unit_start);
            result.push(CalendarActivity::new(unit_start, next_unit_start, true));
            remaining -= 1;
            unit_start = next_unit_start;
        }
        Ok(result)
    }

    fn activities_backward(
        &self,
        start: NaiveDateTime,
        unit: TimeUnit,
        count: i64,
    ) -> Result<Vec<CalendarActivity>, CalendarError> {
        let mut result = VecDeque::new();
        let mut remaining = count;
        let mut unit_start = unit.adjust_left(start);
        while remaining > 0 {
            let prev_unit_start = unit.jump_left(unit_start);
            if self.is_working(prev_unit_start) {
                result.push_front(CalendarActivity::new(prev_unit_start, unit_start, true));
                remaining -= 1;
                unit_start = prev_unit_start;
                continue;
            }
            let last_working = self
                .find_closest(
                    prev_unit_start,
                    unit,
                    MoveDirection::Backward,
                    DayType::Working,
                    None,
                )
                .ok_or(CalendarError::NoWorkingTime {
                    from: prev_unit_start,
                    horizon_days: SEARCH_HORIZON_DAYS,
                })?;
            let first_non_working = unit.adjust_right(last_working);
            result.push_front(CalendarActivity::new(first_non_working, unit_start, false));
            unit_start = first_non_working;
        }
        Ok(result.into_iter().collect())
    }

    /// Moves `start` by `duration` working units. A zero-length duration
    /// returns `start` untouched.
    pub fn shift_date(
        &self,
        start: NaiveDateTime,
        duration: TimeDuration,
    ) -> Result<NaiveDateTime, CalendarError> {
        if duration.is_zero() {
            return Ok(start);
        }
        let activities = self.activities_for(start, duration)?;
        let shifted = if duration.is_negative() {
            activities.first().map(|activity| activity.start)
        } else {
            activities.last().map(|activity| activity.end)
        };
        shifted.ok_or(CalendarError::NoActivities { start, duration })
    }

    // ---- copying and importing ---------------------------------------

    /// Value copy without listeners.
    pub fn copy(&self) -> Calendar {
        Calendar {
            week_days: self.week_days,
            only_show_weekends: self.only_show_weekends,
            one_off: self.one_off.clone(),
            recurring: self.recurring.clone(),
            base_calendar_id: self.base_calendar_id.clone(),
            listeners: Vec::new(),
            next_listener_id: 0,
        }
    }

    pub fn import_calendar(&mut self, other: &Calendar, mode: ImportMode) {
        match mode {
            ImportMode::No => return,
            ImportMode::Replace => {
                self.reset_state();
                self.replace_holidays(other.public_holidays());
                self.week_days = other.week_days;
            }
            ImportMode::Merge => {
                let mut merged = self.public_holidays();
                for holiday in other.public_holidays() {
                    if !merged.contains(&holiday) {
                        merged.push(holiday);
                    }
                }
                self.replace_holidays(merged);
                for weekday in Self::ALL_WEEKDAYS {
                    if other.week_day_type(weekday) == DayType::Weekend {
                        self.week_days[Self::weekday_index(weekday)] = DayType::Weekend;
                    }
                }
            }
        }
        debug!(?mode, "imported calendar");
        self.fire(CalendarChange::Imported(mode));
    }

    // ---- listeners ----------------------------------------------------

    pub fn add_listener<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&CalendarChange) -> Result<(), ListenerError> + 'static,
    {
        let id = ListenerId(self.next_listener_id);
        self.next_listener_id += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(listener_id, _)| *listener_id != id);
        self.listeners.len() != before
    }

    fn fire(&mut self, change: CalendarChange) {
        for (id, listener) in self.listeners.iter_mut() {
            if let Err(err) = (*listener)(&change) {
                warn!(listener = id.0, error = %err, ?change, "calendar listener failed");
            }
        }
    }
}

fn merge_adjacent(activities: Vec<CalendarActivity>) -> Vec<CalendarActivity> {
    let mut merged: Vec<CalendarActivity> = Vec::with_capacity(activities.len());
    for activity in activities {
        match merged.last_mut() {
            Some(last) if last.is_working == activity.is_working && last.end == activity.start => {
                last.end = activity.end;
            }
            _ => merged.push(activity),
        }
    }
    merged
}
