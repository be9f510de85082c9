//! Declarative job configuration.

use chrono::{DateTime, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use carillon_recurrence::{Recurrence, RecurrenceBuilder};

use crate::error::RunnerError;

/// One recurring job as written in a job file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Unique job name, used in logs and the tick environment.
    pub name: String,
    /// The recurrence rule driving this job.
    #[serde(default)]
    pub rule: RuleConfig,
    /// Command and arguments executed at each tick.
    #[serde(default)]
    pub command: Vec<String>,
    /// Worker instances launched per tick.
    #[serde(default = "default_instances")]
    pub instances: usize,
    /// Let a tick fire while a previous tick's instances are still running.
    #[serde(default)]
    pub allow_overlap: bool,
    /// Kill an instance that runs longer than this many seconds.
    #[serde(default)]
    pub timeout_sec: Option<u64>,
}

fn default_instances() -> usize {
    1
}

/// Allow-set recurrence rule. Empty lists leave a unit unconstrained.
///
/// Days and months are 1-based as humans write them; weekdays are
/// 0 = Sunday through 6 = Saturday.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleConfig {
    pub seconds: Vec<u32>,
    pub minutes: Vec<u32>,
    pub hours: Vec<u32>,
    pub weekdays: Vec<u8>,
    pub days: Vec<u32>,
    pub months: Vec<u32>,
    pub years: Vec<i32>,
    /// Earliest instant to align from.
    pub from: Option<DateTime<Utc>>,
    /// Hard stop; no occurrence once the clock passes this.
    pub till: Option<DateTime<Utc>>,
    /// IANA zone name; unset means the system-local zone.
    pub timezone: Option<String>,
    /// Discard occurrences already in the past instead of catching up.
    pub skip_overdue: bool,
}

impl JobConfig {
    /// Validate ranges and references before a schedule is ever built.
    pub fn validate(&self) -> Result<(), RunnerError> {
        if self.name.trim().is_empty() {
            return Err(RunnerError::InvalidConfig(
                "job name must not be empty".into(),
            ));
        }
        if self.instances == 0 {
            return Err(RunnerError::InvalidConfig(format!(
                "job '{}': instances must be >= 1",
                self.name
            )));
        }
        if self.timeout_sec == Some(0) {
            return Err(RunnerError::InvalidConfig(format!(
                "job '{}': timeout_sec must be >= 1 when set",
                self.name
            )));
        }
        self.rule.validate(&self.name)
    }
}

impl RuleConfig {
    fn validate(&self, job: &str) -> Result<(), RunnerError> {
        let check = |unit: &str, values: &[u32], lo: u32, hi: u32| {
            match values.iter().find(|&&v| v < lo || v > hi) {
                Some(v) => Err(RunnerError::InvalidConfig(format!(
                    "job '{job}': {unit} value {v} outside {lo}..={hi}"
                ))),
                None => Ok(()),
            }
        };
        check("second", &self.seconds, 0, 59)?;
        check("minute", &self.minutes, 0, 59)?;
        check("hour", &self.hours, 0, 23)?;
        check("day", &self.days, 1, 31)?;
        check("month", &self.months, 1, 12)?;
        if let Some(d) = self.weekdays.iter().find(|&&d| d > 6) {
            return Err(RunnerError::InvalidConfig(format!(
                "job '{job}': weekday value {d} outside 0..=6"
            )));
        }
        self.parse_timezone()?;
        Ok(())
    }

    /// Parse the configured timezone name, if any.
    pub fn parse_timezone(&self) -> Result<Option<Tz>, RunnerError> {
        match &self.timezone {
            None => Ok(None),
            Some(name) => name.parse::<Tz>().map(Some).map_err(|_| {
                RunnerError::InvalidConfig(format!("unknown timezone: {name}"))
            }),
        }
    }
}

/// Build an aligned recurrence engine from a job config.
pub fn build_recurrence(config: &JobConfig) -> Result<Recurrence, RunnerError> {
    build_recurrence_at(config, Utc::now())
}

/// Build an aligned recurrence engine at a specific reference instant
/// (useful for testing).
pub fn build_recurrence_at(
    config: &JobConfig,
    now: DateTime<Utc>,
) -> Result<Recurrence, RunnerError> {
    config.validate()?;
    let rule = &config.rule;
    let weekdays: Vec<Weekday> = rule
        .weekdays
        .iter()
        .map(|&d| weekday_from_sunday0(d))
        .collect();

    let builder = RecurrenceBuilder::new()
        .on_seconds(&rule.seconds)
        .on_minutes(&rule.minutes)
        .at_hours(&rule.hours)
        .on_weekdays(&weekdays)
        .on_days(&rule.days)
        .in_months(&rule.months)
        .in_years(&rule.years)
        .timezone(rule.parse_timezone()?);
    let builder = match rule.from {
        Some(from) => builder.starting(from),
        None => builder,
    };
    let builder = match rule.till {
        Some(till) => builder.until(till),
        None => builder,
    };
    let builder = if rule.skip_overdue {
        builder.skip_overdue()
    } else {
        builder
    };

    Ok(builder.schedule_at(now)?)
}

fn weekday_from_sunday0(day: u8) -> Weekday {
    match day % 7 {
        0 => Weekday::Sun,
        1 => Weekday::Mon,
        2 => Weekday::Tue,
        3 => Weekday::Wed,
        4 => Weekday::Thu,
        5 => Weekday::Fri,
        _ => Weekday::Sat,
    }
}
