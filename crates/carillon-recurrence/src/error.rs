//! Error types for the recurrence engine.

use thiserror::Error;

/// Errors that can occur while building a schedule.
///
/// Iteration itself never errors: exhaustion and end-of-life states are
/// reported as "no occurrence" from [`crate::Recurrence::next_occurrence`].
#[derive(Debug, Error)]
pub enum RecurrenceError {
    /// The configured years are exhausted relative to the requested start:
    /// the rule cannot produce even one occurrence.
    #[error("no valid next execution time available: configured years are exhausted")]
    Exhausted,
}
