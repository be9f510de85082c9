//! Job configuration and run loop for Carillon.
//!
//! This crate hosts the recurrence engine:
//! - [`JobConfig`] describes a job declaratively (rule, command, instances)
//! - [`build_recurrence`] compiles a validated config into an aligned engine
//! - [`Runner`] sleeps until each occurrence and fans out worker instances,
//!   with overlap control across ticks
//!
//! The run loop is the only place in the system that waits; the engine
//! itself is a synchronous cursor.

mod config;
mod error;
mod runner;

pub use config::{JobConfig, RuleConfig, build_recurrence, build_recurrence_at};
pub use error::RunnerError;
pub use runner::{JobExecutor, JobRun, Runner};
