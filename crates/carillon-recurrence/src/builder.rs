//! Fluent construction and compilation of recurrence rules.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc, Weekday};
use chrono_tz::Tz;

use crate::calendar::Zone;
use crate::error::RecurrenceError;
use crate::schedule::{Recurrence, Wheel};

/// Years synthesized ahead when no explicit year set is given. An unbounded
/// rule would otherwise be infinite to search.
const YEARS_AHEAD: i32 = 100;

/// Mark chosen positions in a unit's admission mask.
///
/// An empty `chosen` list means unconstrained: every position is admitted.
/// Values are taken modulo the unit size, absorbing 1-based callers that
/// pre-shift their input.
fn normalize(mask: &mut Vec<bool>, unit_size: usize, chosen: &[u32]) {
    if mask.is_empty() {
        mask.resize(unit_size, false);
    }
    if chosen.is_empty() {
        mask.fill(true);
        return;
    }
    for &value in chosen {
        mask[value as usize % unit_size] = true;
    }
}

/// Accumulates the allow-sets and bounds of a recurrence rule.
///
/// Every setter consumes and returns the builder, so a rule reads as one
/// chained expression:
///
/// ```
/// use carillon_recurrence::RecurrenceBuilder;
///
/// let schedule = RecurrenceBuilder::new()
///     .on_seconds(&[0, 30])
///     .at_hours(&[9, 17])
///     .schedule()?;
/// # Ok::<(), carillon_recurrence::RecurrenceError>(())
/// ```
///
/// Units never constrained admit every value in their range. Without an
/// explicit year set, the hundred years from the current one are admitted.
#[derive(Debug, Clone, Default)]
pub struct RecurrenceBuilder {
    seconds: Vec<bool>,
    minutes: Vec<bool>,
    hours: Vec<bool>,
    days: Vec<bool>,
    months: Vec<bool>,
    weekdays: Vec<bool>,
    years: BTreeSet<i32>,
    from: Option<DateTime<Utc>>,
    till: Option<DateTime<Utc>>,
    tz: Option<Tz>,
    skip_overdue: bool,
}

impl RecurrenceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admissible seconds (0 to 59); an empty list admits all.
    pub fn on_seconds(mut self, seconds: &[u32]) -> Self {
        normalize(&mut self.seconds, 60, seconds);
        self
    }

    /// Admissible minutes (0 to 59); an empty list admits all.
    pub fn on_minutes(mut self, minutes: &[u32]) -> Self {
        normalize(&mut self.minutes, 60, minutes);
        self
    }

    /// Admissible hours (0 to 23); an empty list admits all.
    pub fn at_hours(mut self, hours: &[u32]) -> Self {
        normalize(&mut self.hours, 24, hours);
        self
    }

    /// Admissible weekdays; an empty list admits all.
    pub fn on_weekdays(mut self, weekdays: &[Weekday]) -> Self {
        let chosen: Vec<u32> = weekdays.iter().map(|w| w.num_days_from_sunday()).collect();
        normalize(&mut self.weekdays, 7, &chosen);
        self
    }

    /// Admissible days of the month, 1-based as humans write them (1 to 31);
    /// an empty list admits all. Stored 0-based.
    pub fn on_days(mut self, days: &[u32]) -> Self {
        let shifted: Vec<u32> = days.iter().map(|d| d.wrapping_sub(1)).collect();
        normalize(&mut self.days, 31, &shifted);
        self
    }

    /// Admissible months, 1-based (1 = January); an empty list admits all.
    /// Stored 0-based.
    pub fn in_months(mut self, months: &[u32]) -> Self {
        let shifted: Vec<u32> = months.iter().map(|m| m.wrapping_sub(1)).collect();
        normalize(&mut self.months, 12, &shifted);
        self
    }

    /// Admissible years. Years are unbounded, so they accumulate in a sparse
    /// set instead of a mask. An empty set keeps the default window of the
    /// next hundred years.
    pub fn in_years(mut self, years: &[i32]) -> Self {
        self.years.extend(years.iter().copied());
        self
    }

    /// Earliest instant to align from. Defaults to the construction time.
    pub fn starting(mut self, from: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self
    }

    /// Hard stop: once the wall clock passes this instant, no further
    /// occurrence is produced.
    pub fn until(mut self, till: DateTime<Utc>) -> Self {
        self.till = Some(till);
        self
    }

    /// Timezone occurrences are materialized in. `None` resets to the
    /// system-local zone, which is also the default.
    pub fn timezone(mut self, tz: Option<Tz>) -> Self {
        self.tz = tz;
        self
    }

    /// Discard occurrences already in the past when iterating, instead of
    /// returning them for immediate catch-up.
    pub fn skip_overdue(mut self) -> Self {
        self.skip_overdue = true;
        self
    }

    /// Compile the rule and align it to the first occurrence at or after
    /// [`starting`](Self::starting) (if set and still in the future) or the
    /// current instant.
    pub fn schedule(self) -> Result<Recurrence, RecurrenceError> {
        self.schedule_at(Utc::now())
    }

    /// Like [`schedule`](Self::schedule) with an explicit reference instant
    /// (useful for testing).
    pub fn schedule_at(self, now: DateTime<Utc>) -> Result<Recurrence, RecurrenceError> {
        let start = match self.from {
            Some(from) if from > now => from,
            _ => now,
        };
        let mut recurrence = self.compile(now);
        recurrence.align(start)?;
        Ok(recurrence)
    }

    /// Turn the accumulated masks into candidate wheels, cursors at index 0.
    fn compile(self, now: DateTime<Utc>) -> Recurrence {
        let zone = match self.tz {
            Some(tz) => Zone::Named(tz),
            None => Zone::Local,
        };

        let years: Vec<i32> = if self.years.is_empty() {
            let base = zone.current_year(now);
            (base..base + YEARS_AHEAD).collect()
        } else {
            self.years.into_iter().collect()
        };

        let mut weekdays = [true; 7];
        if !self.weekdays.is_empty() {
            for (day, admitted) in weekdays.iter_mut().zip(&self.weekdays) {
                *day = *admitted;
            }
        }

        Recurrence {
            seconds: Wheel::from_mask(&self.seconds, 60),
            minutes: Wheel::from_mask(&self.minutes, 60),
            hours: Wheel::from_mask(&self.hours, 24),
            days: Wheel::from_mask(&self.days, 31),
            months: Wheel::from_mask(&self.months, 12),
            years: Wheel::from_values(years),
            weekdays,
            zone,
            till: self.till,
            skip_overdue: self.skip_overdue,
            completed: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    #[test]
    fn normalize_allocates_on_first_use() {
        let mut mask = Vec::new();
        normalize(&mut mask, 24, &[3, 7]);
        assert_eq!(mask.len(), 24);
        assert!(mask[3] && mask[7]);
        assert_eq!(mask.iter().filter(|&&b| b).count(), 2);
    }

    #[test]
    fn normalize_empty_chosen_admits_all() {
        let mut mask = Vec::new();
        normalize(&mut mask, 7, &[]);
        assert!(mask.iter().all(|&b| b));
    }

    #[test]
    fn normalize_wraps_out_of_range_values() {
        let mut mask = Vec::new();
        normalize(&mut mask, 60, &[61]);
        assert!(mask[1]);
    }

    #[test]
    fn one_based_days_are_stored_zero_based() {
        let mut built = RecurrenceBuilder::new()
            .on_seconds(&[0])
            .on_minutes(&[0])
            .at_hours(&[0])
            .on_days(&[1, 15])
            .in_months(&[4])
            .in_years(&[2001])
            .timezone(Some(chrono_tz::UTC))
            .schedule_at(Utc.with_ymd_and_hms(2001, 1, 1, 0, 0, 0).unwrap())
            .unwrap();
        assert_eq!(
            built.next_occurrence_at(Utc.with_ymd_and_hms(2001, 1, 1, 0, 0, 0).unwrap()),
            Some(Utc.with_ymd_and_hms(2001, 4, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(
            built.next_occurrence_at(Utc.with_ymd_and_hms(2001, 1, 1, 0, 0, 0).unwrap()),
            Some(Utc.with_ymd_and_hms(2001, 4, 15, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn unconstrained_years_synthesize_a_window_from_now() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let mut built = RecurrenceBuilder::new()
            .on_seconds(&[0])
            .on_minutes(&[0])
            .at_hours(&[0])
            .on_days(&[1])
            .in_months(&[7])
            .timezone(Some(chrono_tz::UTC))
            .schedule_at(now)
            .unwrap();
        assert_eq!(
            built.next_occurrence_at(now),
            Some(Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn weekday_setter_builds_admission_set() {
        let now = Utc.with_ymd_and_hms(2001, 4, 1, 0, 0, 0).unwrap(); // a Sunday
        let mut built = RecurrenceBuilder::new()
            .on_seconds(&[0])
            .on_minutes(&[0])
            .at_hours(&[0])
            .on_weekdays(&[Weekday::Mon])
            .in_years(&[2001])
            .timezone(Some(chrono_tz::UTC))
            .schedule_at(now)
            .unwrap();
        assert_eq!(
            built.next_occurrence_at(now),
            Some(Utc.with_ymd_and_hms(2001, 4, 2, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn starting_in_the_past_is_ignored() {
        let now = Utc.with_ymd_and_hms(2001, 6, 1, 0, 0, 0).unwrap();
        let mut built = RecurrenceBuilder::new()
            .on_seconds(&[0])
            .on_minutes(&[0])
            .at_hours(&[0])
            .on_days(&[1])
            .in_years(&[2001])
            .timezone(Some(chrono_tz::UTC))
            .starting(Utc.with_ymd_and_hms(2001, 1, 1, 0, 0, 0).unwrap())
            .schedule_at(now)
            .unwrap();
        // Alignment proceeds from `now`, not the stale `starting` bound.
        assert_eq!(
            built.next_occurrence_at(now),
            Some(Utc.with_ymd_and_hms(2001, 6, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn exhausted_years_fail_construction() {
        let now = Utc.with_ymd_and_hms(2010, 1, 1, 0, 0, 0).unwrap();
        let result = RecurrenceBuilder::new()
            .in_years(&[1999, 2003])
            .timezone(Some(chrono_tz::UTC))
            .schedule_at(now);
        assert!(matches!(result, Err(RecurrenceError::Exhausted)));
    }

    proptest! {
        // Normalizing the same chosen set twice yields the same mask.
        #[test]
        fn normalize_is_idempotent(
            chosen in proptest::collection::vec(0u32..60, 0..10),
        ) {
            let mut once = Vec::new();
            normalize(&mut once, 60, &chosen);
            let mut twice = once.clone();
            normalize(&mut twice, 60, &chosen);
            prop_assert_eq!(once, twice);
        }

        // No chosen values means every position admitted, for any unit size.
        #[test]
        fn normalize_unconstrained_is_all_true(unit_size in 1usize..64) {
            let mut mask = Vec::new();
            normalize(&mut mask, unit_size, &[]);
            prop_assert_eq!(mask.len(), unit_size);
            prop_assert!(mask.iter().all(|&b| b));
        }

        // Compiled candidate arrays are ascending, duplicate-free, non-empty
        // regardless of how messy the chosen input is.
        #[test]
        fn candidate_arrays_ascending_and_deduplicated(
            seconds in proptest::collection::vec(0u32..60, 0..8),
            hours in proptest::collection::vec(0u32..24, 0..8),
            days in proptest::collection::vec(1u32..=31, 0..8),
            years in proptest::collection::vec(2000i32..2100, 0..5),
        ) {
            let now = Utc.with_ymd_and_hms(1999, 1, 1, 0, 0, 0).unwrap();
            let compiled = RecurrenceBuilder::new()
                .on_seconds(&seconds)
                .at_hours(&hours)
                .on_days(&days)
                .in_years(&years)
                .timezone(Some(chrono_tz::UTC))
                .compile(now);
            for values in [
                compiled.seconds.values(),
                compiled.minutes.values(),
                compiled.hours.values(),
                compiled.days.values(),
                compiled.months.values(),
                compiled.years.values(),
            ] {
                prop_assert!(!values.is_empty());
                prop_assert!(values.windows(2).all(|w| w[0] < w[1]));
            }
        }
    }
}
