use super::{Calendar, CalendarError, DayType, Holiday};
use chrono::Weekday;
use serde::{Deserialize, Serialize};

/// Serializable snapshot of a calendar. Listeners are not part of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarConfig {
    weekend_days: Vec<Weekday>,
    #[serde(default)]
    holidays: Vec<Holiday>,
    #[serde(default)]
    only_show_weekends: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    base_calendar_id: Option<String>,
}

impl CalendarConfig {
    pub fn new<I, J>(weekend_days: I, holidays: J) -> Self
    where
        I: IntoIterator<Item = Weekday>,
        J: IntoIterator<Item = Holiday>,
    {
        let mut weekend: Vec<Weekday> = weekend_days.into_iter().collect();
        weekend.sort_by_key(|wd| wd.num_days_from_monday());
        weekend.dedup();

        let mut unique: Vec<Holiday> = Vec::new();
        for holiday in holidays {
            if !unique.contains(&holiday) {
                unique.push(holiday);
            }
        }

        Self {
            weekend_days: weekend,
            holidays: unique,
            only_show_weekends: false,
            base_calendar_id: None,
        }
    }

    pub fn with_only_show_weekends(mut self, only_show_weekends: bool) -> Self {
        self.only_show_weekends = only_show_weekends;
        self
    }

    pub fn with_base_calendar_id(mut self, id: impl Into<String>) -> Self {
        self.base_calendar_id = Some(id.into());
        self
    }

    pub fn weekend_days(&self) -> &[Weekday] {
        &self.weekend_days
    }

    pub fn holidays(&self) -> &[Holiday] {
        &self.holidays
    }

    pub fn only_show_weekends(&self) -> bool {
        self.only_show_weekends
    }

    pub fn base_calendar_id(&self) -> Option<&str> {
        self.base_calendar_id.as_deref()
    }

    pub fn from_json(json: &str) -> Result<Self, CalendarError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, CalendarError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl Default for CalendarConfig {
    fn default() -> Self {
        CalendarConfig::from(&Calendar::new())
    }
}

impl From<&Calendar> for CalendarConfig {
    fn from(calendar: &Calendar) -> Self {
        let weekend = Calendar::ALL_WEEKDAYS
            .into_iter()
            .filter(|day| calendar.week_day_type(*day) == DayType::Weekend);

        let mut config = CalendarConfig::new(weekend, calendar.public_holidays())
            .with_only_show_weekends(calendar.only_show_weekends());
        config.base_calendar_id = calendar.base_calendar_id().map(str::to_owned);
        config
    }
}

impl Calendar {
    /// Builds a calendar from a snapshot. A week without any working day is
    /// rejected.
    pub fn from_config(config: &CalendarConfig) -> Result<Self, CalendarError> {
        let weekend_days: Vec<Weekday> = Calendar::ALL_WEEKDAYS
            .into_iter()
            .filter(|day| config.weekend_days.contains(day))
            .collect();
        if weekend_days.len() == Calendar::ALL_WEEKDAYS.len() {
            return Err(CalendarError::NoWorkingDays);
        }

        let mut calendar = Calendar::new();
        for day in Calendar::ALL_WEEKDAYS {
            let day_type = if weekend_days.contains(&day) {
                DayType::Weekend
            } else {
                DayType::Working
            };
            calendar.set_week_day_type(day, day_type)?;
        }
        calendar.set_public_holidays(config.holidays.iter().cloned());
        calendar.set_only_show_weekends(config.only_show_weekends);
        calendar.set_base_calendar_id(config.base_calendar_id.clone());
        Ok(calendar)
    }

    pub fn to_config(&self) -> CalendarConfig {
        CalendarConfig::from(self)
    }
}
