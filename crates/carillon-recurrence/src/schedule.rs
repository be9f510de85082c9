//! The compiled schedule: candidate wheels, cursor alignment, and the
//! occurrence engine.
//!
//! A compiled rule holds one wheel per numeric time unit. Alignment walks
//! the wheels most-significant-first until the cursor denotes the first
//! admissible instant at or after the start; after that every call to
//! [`Recurrence::next_occurrence`] materializes the cursor and advances it
//! by exactly one tick, finest unit first with carry.

use chrono::{DateTime, Datelike, Duration, NaiveDateTime, NaiveTime, Timelike, Utc};
use tracing::debug;

use crate::calendar::{Zone, days_in_month, normalized_date};
use crate::error::RecurrenceError;

/// Hard ceiling on the absolute year value during cursor advance.
const MAX_YEAR: i32 = 9999;

/// One time unit's ascending candidate values plus the cursor position.
///
/// Invariant: `values` is strictly ascending, duplicate-free, and non-empty,
/// and the cursor's current value is always `values[index]`.
#[derive(Debug, Clone)]
pub(crate) struct Wheel {
    values: Vec<i32>,
    index: usize,
}

/// Outcome of aligning a wheel to a reference value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Align {
    /// The reference value itself is admissible.
    Exact,
    /// The cursor jumped forward to a later candidate in the same cycle.
    Gap(i32),
    /// No candidate at or after the reference value; wrapped to the first.
    Overflow,
}

impl Wheel {
    /// Candidate values from an admission mask; an empty mask is
    /// unconstrained and admits the full `0..unit_size` range.
    pub(crate) fn from_mask(mask: &[bool], unit_size: usize) -> Self {
        let values: Vec<i32> = if mask.is_empty() {
            (0..unit_size as i32).collect()
        } else {
            mask.iter()
                .enumerate()
                .filter(|&(_, &admitted)| admitted)
                .map(|(value, _)| value as i32)
                .collect()
        };
        Wheel { values, index: 0 }
    }

    /// Candidate values given directly, already ascending and deduplicated.
    pub(crate) fn from_values(values: Vec<i32>) -> Self {
        Wheel { values, index: 0 }
    }

    pub(crate) fn values(&self) -> &[i32] {
        &self.values
    }

    fn value(&self) -> i32 {
        self.values[self.index]
    }

    /// Move the cursor to the smallest candidate at or after `current`.
    /// Wraps to the first candidate when none qualifies.
    fn align_to(&mut self, current: i32) -> Align {
        match self.values.iter().position(|&v| v >= current) {
            Some(index) => {
                self.index = index;
                if self.values[index] == current {
                    Align::Exact
                } else {
                    Align::Gap(self.values[index])
                }
            }
            None => {
                self.index = 0;
                Align::Overflow
            }
        }
    }

    /// Advance the cursor one step. Wraps (returning true) when the next
    /// candidate runs past the array or meets the unit's hard bound, e.g. a
    /// day value that does not exist in the month just rolled into.
    fn step(&mut self, bound: i32) -> bool {
        let next = self.index + 1;
        if next >= self.values.len() || self.values[next] >= bound {
            self.index = 0;
            true
        } else {
            self.index = next;
            false
        }
    }
}

/// A compiled, aligned recurrence rule with its occurrence cursor.
///
/// Obtained from [`crate::RecurrenceBuilder::schedule`]. The cursor is
/// single-writer by construction: producing an occurrence requires `&mut`
/// access, and the value is owned by whoever drives it.
#[derive(Debug)]
pub struct Recurrence {
    pub(crate) seconds: Wheel,
    pub(crate) minutes: Wheel,
    pub(crate) hours: Wheel,
    /// 0-based day-of-month offsets.
    pub(crate) days: Wheel,
    /// 0-based months.
    pub(crate) months: Wheel,
    pub(crate) years: Wheel,
    /// Admission set indexed by days-from-Sunday.
    pub(crate) weekdays: [bool; 7],
    pub(crate) zone: Zone,
    pub(crate) till: Option<DateTime<Utc>>,
    pub(crate) skip_overdue: bool,
    pub(crate) completed: bool,
}

impl Recurrence {
    /// Walk the cursor to the first admissible instant at or after `start`.
    ///
    /// Each pass either finishes, strictly advances the search instant, or
    /// reports the year set exhausted, so the loop always terminates.
    pub(crate) fn align(&mut self, start: DateTime<Utc>) -> Result<(), RecurrenceError> {
        let mut at = self.zone.to_wall(start);
        let mut passes = 0u32;
        loop {
            passes += 1;
            match self.align_pass(at)? {
                None => {
                    debug!(passes, cursor = %at, "aligned recurrence cursor");
                    return Ok(());
                }
                Some(next) => at = next,
            }
        }
    }

    /// One refinement pass, most-significant unit first.
    ///
    /// Returns `None` once every unit matches the instant exactly, otherwise
    /// the adjusted instant the next pass restarts from: the start of the
    /// bumped unit's period on a forward jump, or the next coarser period
    /// when a unit's candidates wrapped.
    fn align_pass(&mut self, at: NaiveDateTime) -> Result<Option<NaiveDateTime>, RecurrenceError> {
        let year = at.year();
        match self.years.align_to(year) {
            // A year overflow is terminal: nothing at or after `at` exists.
            Align::Overflow => return Err(RecurrenceError::Exhausted),
            Align::Gap(next) => {
                return Ok(Some(normalized_date(next, 0, 0).and_time(NaiveTime::MIN)));
            }
            Align::Exact => {}
        }

        let month = at.month0() as i32;
        match self.months.align_to(month) {
            Align::Overflow => {
                return Ok(Some(
                    normalized_date(year + 1, 0, 0).and_time(NaiveTime::MIN),
                ));
            }
            Align::Gap(next) => {
                return Ok(Some(
                    normalized_date(year, next, 0).and_time(NaiveTime::MIN),
                ));
            }
            Align::Exact => {}
        }

        let day = at.day0() as i32;
        match self.days.align_to(day) {
            Align::Overflow => {
                return Ok(Some(
                    normalized_date(year, month + 1, 0).and_time(NaiveTime::MIN),
                ));
            }
            Align::Gap(next) => {
                // The candidate may run past the month's end; the normalized
                // date rolls forward and the next pass re-aligns the month.
                return Ok(Some(
                    normalized_date(year, month, next).and_time(NaiveTime::MIN),
                ));
            }
            Align::Exact => {}
        }

        // Weekday is a filter over the fixed (year, month, day), not a wheel:
        // a mismatch restarts from the following midnight.
        if !self.weekdays[at.weekday().num_days_from_sunday() as usize] {
            return Ok(Some(
                (at.date() + Duration::days(1)).and_time(NaiveTime::MIN),
            ));
        }

        let midnight = at.date().and_time(NaiveTime::MIN);

        let hour = at.hour() as i32;
        match self.hours.align_to(hour) {
            Align::Overflow => {
                return Ok(Some(
                    (at.date() + Duration::days(1)).and_time(NaiveTime::MIN),
                ));
            }
            Align::Gap(next) => {
                return Ok(Some(midnight + Duration::hours(i64::from(next))));
            }
            Align::Exact => {}
        }

        let minute = at.minute() as i32;
        match self.minutes.align_to(minute) {
            Align::Overflow => {
                return Ok(Some(midnight + Duration::hours(i64::from(hour) + 1)));
            }
            Align::Gap(next) => {
                return Ok(Some(
                    midnight + Duration::hours(i64::from(hour)) + Duration::minutes(i64::from(next)),
                ));
            }
            Align::Exact => {}
        }

        let second = at.second() as i32;
        match self.seconds.align_to(second) {
            Align::Overflow => Ok(Some(
                midnight
                    + Duration::hours(i64::from(hour))
                    + Duration::minutes(i64::from(minute) + 1),
            )),
            Align::Gap(next) => Ok(Some(
                midnight
                    + Duration::hours(i64::from(hour))
                    + Duration::minutes(i64::from(minute))
                    + Duration::seconds(i64::from(next)),
            )),
            Align::Exact => Ok(None),
        }
    }

    /// Concrete timestamp for the cursor's current position.
    ///
    /// Construction is normalizing on purpose: day candidates are bounded
    /// against real month lengths during advance, not here.
    fn materialize(&self) -> DateTime<Utc> {
        let date = normalized_date(self.years.value(), self.months.value(), self.days.value());
        let wall = date.and_time(NaiveTime::MIN)
            + Duration::hours(i64::from(self.hours.value()))
            + Duration::minutes(i64::from(self.minutes.value()))
            + Duration::seconds(i64::from(self.seconds.value()));
        self.zone.from_wall(wall)
    }

    /// One cascading tick, finest unit first. A unit advances only when the
    /// unit before it wrapped; a year wrap completes the schedule.
    fn advance(&mut self) {
        if !self.seconds.step(60) {
            return;
        }
        if !self.minutes.step(60) {
            return;
        }
        if !self.hours.step(24) {
            return;
        }
        // Day candidates are bounded by the pre-advance month's true length.
        let bound = days_in_month(self.years.value(), self.months.value());
        if !self.days.step(bound) {
            return;
        }
        if !self.months.step(12) {
            return;
        }
        if self.years.step(MAX_YEAR) {
            self.completed = true;
        }
    }

    /// Produce the next occurrence and advance the cursor.
    ///
    /// Returns `None` once the rule is exhausted or the `until` bound has
    /// passed. Without overdue-skip the occurrence is returned even when it
    /// lies in the past; the caller owns catch-up semantics.
    pub fn next_occurrence(&mut self) -> Option<DateTime<Utc>> {
        self.next_occurrence_at(Utc::now())
    }

    /// Like [`next_occurrence`](Self::next_occurrence) with an explicit
    /// wall-clock reference (useful for testing).
    pub fn next_occurrence_at(&mut self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        loop {
            if self.completed {
                return None;
            }
            if self.till.is_some_and(|till| till < now) {
                return None;
            }
            let occurrence = self.materialize();
            self.advance();
            if !self.skip_overdue || occurrence >= now {
                return Some(occurrence);
            }
        }
    }

    /// True once no further occurrence can be produced.
    pub fn is_completed(&self) -> bool {
        self.completed
    }
}
