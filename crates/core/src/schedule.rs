//! Recurrence rules for scheduled jobs.
//!
//! A schedule string is either a cron expression (standard 5-field, or
//! 6/7-field with seconds/years as accepted by the `cron` crate) or a human
//! interval such as `"30 minutes"` or `"6 hours"`. One-shot jobs carry no
//! schedule at all, only an explicit run time (see [`Trigger`]).

use std::fmt;
use std::str::FromStr;

use chrono::Duration;

use crate::types::Timestamp;

/// Error parsing a schedule expression.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("Empty schedule expression")]
    Empty,

    #[error("Invalid interval '{0}': expected a positive amount of a time unit")]
    InvalidInterval(String),

    #[error("Invalid cron expression '{expression}': {message}")]
    InvalidCron { expression: String, message: String },
}

/// A parsed recurrence rule.
#[derive(Debug, Clone)]
pub enum Schedule {
    Cron {
        expression: String,
        schedule: Box<cron::Schedule>,
    },
    Interval {
        expression: String,
        every: Duration,
    },
}

impl Schedule {
    pub fn parse(expression: &str) -> Result<Self, ScheduleError> {
        let expression = expression.trim();
        if expression.is_empty() {
            return Err(ScheduleError::Empty);
        }

        if let Some(every) = parse_interval(expression)? {
            return Ok(Schedule::Interval {
                expression: expression.to_string(),
                every,
            });
        }

        // The `cron` crate wants a leading seconds field.
        let fields = expression.split_whitespace().count();
        let normalized = if fields == 5 {
            format!("0 {expression}")
        } else {
            expression.to_string()
        };

        let schedule =
            cron::Schedule::from_str(&normalized).map_err(|e| ScheduleError::InvalidCron {
                expression: expression.to_string(),
                message: e.to_string(),
            })?;

        Ok(Schedule::Cron {
            expression: expression.to_string(),
            schedule: Box::new(schedule),
        })
    }

    /// The expression as written, which is what gets persisted.
    pub fn expression(&self) -> &str {
        match self {
            Schedule::Cron { expression, .. } | Schedule::Interval { expression, .. } => {
                expression
            }
        }
    }

    /// First tick strictly after `after`. `None` when a cron rule has no
    /// future occurrence (e.g. a year field in the past) or the next tick
    /// falls outside the representable time range.
    pub fn next_after(&self, after: Timestamp) -> Option<Timestamp> {
        match self {
            Schedule::Cron { schedule, .. } => schedule.after(&after).next(),
            Schedule::Interval { every, .. } => after.checked_add_signed(*every),
        }
    }
}

impl PartialEq for Schedule {
    fn eq(&self, other: &Self) -> bool {
        self.expression() == other.expression()
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.expression())
    }
}

impl FromStr for Schedule {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// When a job should run: on a recurrence, or once at a fixed time.
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    Every(Schedule),
    At(Timestamp),
}

/// `Ok(None)` when the expression does not look like an interval at all.
fn parse_interval(expression: &str) -> Result<Option<Duration>, ScheduleError> {
    let mut parts = expression.split_whitespace();
    let (Some(amount), Some(unit), None) = (parts.next(), parts.next(), parts.next()) else {
        return Ok(None);
    };

    let unit_secs: i64 = match unit.to_ascii_lowercase().trim_end_matches('s') {
        "second" | "sec" => 1,
        "minute" | "min" => 60,
        "hour" => 3600,
        "day" => 86_400,
        "week" => 604_800,
        _ => return Ok(None),
    };

    let invalid = || ScheduleError::InvalidInterval(expression.to_string());
    let amount: i64 = amount.parse().map_err(|_| invalid())?;
    if amount <= 0 {
        return Err(invalid());
    }

    let every = amount
        .checked_mul(unit_secs)
        .and_then(Duration::try_seconds)
        .ok_or_else(invalid)?;
    Ok(Some(every))
}
