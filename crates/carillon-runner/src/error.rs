//! Error types for the runner.

use thiserror::Error;

/// Errors that can occur while loading or starting jobs.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Invalid job configuration.
    #[error("invalid job configuration: {0}")]
    InvalidConfig(String),

    /// The recurrence rule can never fire.
    #[error(transparent)]
    Schedule(#[from] carillon_recurrence::RecurrenceError),
}
