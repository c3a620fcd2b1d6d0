//! Cron grammar: six fields with seconds resolution, plus `@now`,
//! `@once`, and the standard `@daily`/`@hourly` descriptors. Validated
//! at registration.

use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;

use crate::error::{RegSyncError, Result};

/// A validated, parsed schedule expression.
#[derive(Clone)]
pub enum ParsedSchedule {
    /// `@now` or `@once`: fires exactly once, immediately.
    Immediate,
    /// A standard six-field cron expression.
    Recurring(Schedule),
}

impl ParsedSchedule {
    /// Parse and validate a schedule expression. Descriptor rewrites
    /// (`@daily`, `@hourly`) happen before the `cron` crate ever sees the
    /// string; `@now`/`@once` never reach it.
    pub fn parse(expr: &str) -> Result<Self> {
        match expr.trim() {
            "@now" | "@once" => Ok(ParsedSchedule::Immediate),
            "@daily" => Self::parse_recurring("0 0 0 * * *"),
            "@hourly" => Self::parse_recurring("0 0 * * * *"),
            other => Self::parse_recurring(other),
        }
    }

    fn parse_recurring(expr: &str) -> Result<Self> {
        Schedule::from_str(expr)
            .map(ParsedSchedule::Recurring)
            .map_err(|err| RegSyncError::InvalidInput(format!("invalid cron expression '{expr}': {err}")))
    }

    /// Compute the next fire time. `@now`/`@once` always returns `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            ParsedSchedule::Immediate => Some(now),
            ParsedSchedule::Recurring(schedule) => schedule.after(&now).next(),
        }
    }

    /// True for `@now`/`@once`: the job is removed after firing rather
    /// than rescheduled.
    pub fn is_one_shot(&self) -> bool {
        matches!(self, ParsedSchedule::Immediate)
    }
}
