//! Calendar arithmetic helpers.
//!
//! All date construction in the engine is normalizing: out-of-range month and
//! day components roll forward into subsequent periods instead of being
//! rejected. `normalized_date(2001, 0, 31)` is 2001-02-01, and a day offset
//! past a February boundary lands in March with leap years accounted for.

use chrono::{
    DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Utc,
};
use chrono_tz::Tz;

/// Build a date from a year, 0-based month, and 0-based day offset,
/// normalizing any overflow. Month 12 is January of the next year; day
/// offsets continue past the end of the month.
pub(crate) fn normalized_date(year: i32, month0: i32, day0: i32) -> NaiveDate {
    let months = i64::from(year) * 12 + i64::from(month0);
    let year = months.div_euclid(12) as i32;
    let month = months.rem_euclid(12) as u32 + 1;
    let first = NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MAX);
    first
        .checked_add_signed(Duration::days(i64::from(day0)))
        .unwrap_or(NaiveDate::MAX)
}

/// Number of days in the given (year, 0-based month), leap-year aware.
pub(crate) fn days_in_month(year: i32, month0: i32) -> i32 {
    normalized_date(year, month0 + 1, 0)
        .pred_opt()
        .map(|d| d.day() as i32)
        .unwrap_or(31)
}

/// The timezone a schedule materializes instants in: a named IANA zone or
/// the system-local zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Zone {
    Local,
    Named(Tz),
}

impl Zone {
    /// Project a UTC instant onto this zone's wall clock.
    pub(crate) fn to_wall(self, at: DateTime<Utc>) -> NaiveDateTime {
        match self {
            Zone::Local => at.with_timezone(&chrono::Local).naive_local(),
            Zone::Named(tz) => at.with_timezone(&tz).naive_local(),
        }
    }

    /// Resolve a wall-clock time in this zone back to a UTC instant.
    ///
    /// Ambiguous wall times (DST fold) take the earliest mapping; nonexistent
    /// wall times (DST gap) slide forward an hour until a mapping exists.
    pub(crate) fn from_wall(self, wall: NaiveDateTime) -> DateTime<Utc> {
        match self {
            Zone::Local => resolve(&chrono::Local, wall),
            Zone::Named(tz) => resolve(&tz, wall),
        }
    }

    /// The current year on this zone's wall clock.
    pub(crate) fn current_year(self, now: DateTime<Utc>) -> i32 {
        self.to_wall(now).year()
    }
}

fn resolve<T: TimeZone>(tz: &T, wall: NaiveDateTime) -> DateTime<Utc> {
    let mut wall = wall;
    for _ in 0..3 {
        match tz.from_local_datetime(&wall) {
            LocalResult::Single(dt) => return dt.with_timezone(&Utc),
            LocalResult::Ambiguous(earliest, _) => return earliest.with_timezone(&Utc),
            LocalResult::None => wall += Duration::hours(1),
        }
    }
    // No zone has a gap spanning three hours; fall back to a UTC reading.
    Utc.from_utc_datetime(&wall)
}
