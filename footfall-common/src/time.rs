//! Timestamp and calendar utilities

use chrono::{Datelike, Days, NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;

/// Number of weekdays treated as working days (Monday through Friday)
pub const WORKDAYS_PER_WEEK: u32 = 5;

/// Current wall-clock time in the given timezone
pub fn local_now(tz: Tz) -> NaiveDateTime {
    Utc::now().with_timezone(&tz).naive_local()
}

/// True for Saturday and Sunday
pub fn is_weekend(date: NaiveDate) -> bool {
    date.weekday().num_days_from_monday() >= WORKDAYS_PER_WEEK
}

/// Monday commencing the given week of `year`
///
/// Week 1 starts on the first Monday on or before January 1st, so this is not
/// ISO week numbering: week 1 of 2023 starts on 2022-12-26.
pub fn monday_of_week(week: u32, year: i32) -> Option<NaiveDate> {
    let jan_1 = NaiveDate::from_ymd_opt(year, 1, 1)?;
    let back = u64::from(jan_1.weekday().num_days_from_monday());
    let first_monday = jan_1.checked_sub_days(Days::new(back))?;
    first_monday.checked_add_days(Days::new(7 * u64::from(week.saturating_sub(1))))
}
