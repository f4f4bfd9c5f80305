// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job schedules: cron expressions, fixed intervals, or manual-only.

use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::clock::add_duration;

/// Shortest accepted interval for `with <duration> interval` schedules
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Keyword for jobs that only run on manual triggers
pub const TRIGGERED: &str = "triggered";

/// Errors from parsing a schedule expression
#[derive(Debug, Error, PartialEq)]
pub enum ScheduleError {
    #[error("empty schedule")]
    Empty,
    #[error("invalid interval {0:?}: {1}")]
    InvalidInterval(String, String),
    #[error("interval {0:?} is shorter than 1s")]
    IntervalTooShort(String),
    #[error("invalid cron expression {0:?}: {1}")]
    InvalidCron(String, String),
}

#[derive(Debug, Clone)]
enum Kind {
    Cron(Box<cron::Schedule>),
    Interval(Duration),
    Triggered,
}

/// A parsed schedule. Displays as the text it was parsed from.
#[derive(Debug, Clone)]
pub struct Schedule {
    source: String,
    kind: Kind,
}

impl Schedule {
    pub fn parse(text: &str) -> Result<Self, ScheduleError> {
        let source = text.trim();
        if source.is_empty() {
            return Err(ScheduleError::Empty);
        }

        let kind = if source == TRIGGERED {
            Kind::Triggered
        } else if let Some(rest) = source.strip_prefix("with ") {
            let Some(raw) = rest.strip_suffix(" interval") else {
                return Err(ScheduleError::InvalidInterval(
                    source.to_string(),
                    "expected \"with <duration> interval\"".to_string(),
                ));
            };
            let interval = humantime::parse_duration(raw.trim()).map_err(|e| {
                ScheduleError::InvalidInterval(source.to_string(), e.to_string())
            })?;
            if interval < MIN_INTERVAL {
                return Err(ScheduleError::IntervalTooShort(source.to_string()));
            }
            Kind::Interval(interval)
        } else {
            Kind::Cron(Box::new(parse_cron(source)?))
        };

        Ok(Self {
            source: source.to_string(),
            kind,
        })
    }

    /// A schedule that never ticks on its own
    pub fn triggered() -> Self {
        Self {
            source: TRIGGERED.to_string(),
            kind: Kind::Triggered,
        }
    }

    /// Whether the schedule produces ticks without a manual trigger
    pub fn is_periodic(&self) -> bool {
        !matches!(self.kind, Kind::Triggered)
    }

    /// Fixed interval, if this is an interval schedule
    pub fn interval(&self) -> Option<Duration> {
        match self.kind {
            Kind::Interval(d) => Some(d),
            _ => None,
        }
    }

    /// Time of the next tick planned at `now`.
    ///
    /// Interval schedules count from `now`. Cron schedules return the first
    /// matching time strictly after `now`.
    pub fn next_tick(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match &self.kind {
            Kind::Cron(cron) => cron.after(&now).next(),
            Kind::Interval(interval) => Some(add_duration(now, *interval)),
            Kind::Triggered => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

fn parse_cron(source: &str) -> Result<cron::Schedule, ScheduleError> {
    let fields = source.split_whitespace().count();
    let normalized = match fields {
        5 => format!("0 {}", source),
        6 | 7 => source.to_string(),
        n => {
            return Err(ScheduleError::InvalidCron(
                source.to_string(),
                format!("expected 5 to 7 fields, got {}", n),
            ))
        }
    };
    cron::Schedule::from_str(&normalized)
        .map_err(|e| ScheduleError::InvalidCron(source.to_string(), e.to_string()))
}

impl FromStr for Schedule {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl PartialEq for Schedule {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

#[cfg(test)]
#[path = "schedule_tests.rs"]
mod tests;
