//! Calendar recurrence engine for Carillon.
//!
//! This crate computes the successive execution instants of a recurring job:
//! - A fluent builder accumulates allow-sets per time unit (seconds, minutes,
//!   hours, weekdays, days of month, months, years) plus bounds and timezone
//! - Compilation turns the rule into ascending candidate arrays with a cursor
//! - Alignment walks the cursor to the first admissible instant at or after a
//!   start instant
//! - [`Recurrence::next_occurrence`] then yields each later occurrence on
//!   demand
//!
//! The engine never sleeps, spawns, or schedules timers. It is a synchronous
//! stateful computation; the hosting run loop owns all waiting.

mod builder;
mod calendar;
mod error;
mod schedule;

pub use builder::RecurrenceBuilder;
pub use error::RecurrenceError;
pub use schedule::Recurrence;
