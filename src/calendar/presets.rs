use super::{Calendar, Holiday};
use chrono::{Datelike, Duration, NaiveDate, Weekday};

pub const US_FEDERAL_ID: &str = "us-federal";

impl Calendar {
    /// Monday to Friday calendar carrying the US federal holidays. Fixed-date
    /// holidays repeat every year; floating ones are added per year of the
    /// range (inclusive, either order).
    pub fn us_federal(start_year: i32, end_year: i32) -> Self {
        let (start, end) = if start_year <= end_year {
            (start_year, end_year)
        } else {
            (end_year, start_year)
        };

        let mut holidays: Vec<Holiday> = fixed_holidays(start);
        holidays.extend((start..=end).flat_map(floating_holidays));

        let mut calendar = Calendar::with_base_calendar(US_FEDERAL_ID);
        calendar.set_public_holidays(holidays);
        calendar
    }
}

fn fixed_holidays(year: i32) -> Vec<Holiday> {
    [
        (1, 1, "New Year's Day"),
        (7, 4, "Independence Day"),
        (11, 11, "Veterans Day"),
        (12, 25, "Christmas Day"),
    ]
    .into_iter()
    .filter_map(|(month, day, title)| {
        NaiveDate::from_ymd_opt(year, month, day)
            .map(|date| Holiday::recurring(date).with_title(title))
    })
    .collect()
}

fn floating_holidays(year: i32) -> Vec<Holiday> {
    [
        (nth_weekday(year, 1, Weekday::Mon, 3), "Martin Luther King Jr. Day"),
        (nth_weekday(year, 2, Weekday::Mon, 3), "Presidents' Day"),
        (last_weekday(year, 5, Weekday::Mon), "Memorial Day"),
        (nth_weekday(year, 9, Weekday::Mon, 1), "Labor Day"),
        (nth_weekday(year, 10, Weekday::Mon, 2), "Columbus Day"),
        (nth_weekday(year, 11, Weekday::Thu, 4), "Thanksgiving"),
    ]
    .into_iter()
    .filter_map(|(date, title)| date.map(|date| Holiday::one_off(date).with_title(title)))
    .collect()
}

/// The nth occurrence of `weekday` in the month, if the month has one.
fn nth_weekday(year: i32, month: u32, weekday: Weekday, n: u32) -> Option<NaiveDate> {
    let mut date = NaiveDate::from_ymd_opt(year, month, 1)?;
    let mut count = 0;
    while date.month() == month {
        if date.weekday() == weekday {
            count += 1;
            if count == n {
                return Some(date);
            }
        }
        date += Duration::days(1);
    }
    None
}

fn last_weekday(year: i32, month: u32, weekday: Weekday) -> Option<NaiveDate> {
    let first_of_next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    let mut date = first_of_next - Duration::days(1);
    while date.weekday() != weekday {
        date -= Duration::days(1);
    }
    Some(date)
}
