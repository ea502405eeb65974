//! Cron expression evaluation.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

use crate::error::SchedulerError;

/// A parsed recurrence expression.
///
/// Accepts classic five-field expressions (`*/5 * * * *`), which are
/// evaluated at second zero, as well as six/seven-field expressions with a
/// leading seconds field and the `@hourly`-style aliases.
///
/// In five-field expressions day-of-week uses classic numbering, where 0
/// and 7 are Sunday, and may also be given by name (`Mon-Fri`). Expressions
/// with a seconds field are passed to the `cron` crate unchanged, so there
/// 1 is Sunday.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: Schedule,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self, SchedulerError> {
        let normalized = normalize(expression);
        let schedule =
            Schedule::from_str(&normalized).map_err(|e| SchedulerError::InvalidCron {
                expression: expression.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            expression: expression.trim().to_string(),
            schedule,
        })
    }

    /// The expression as given by the caller.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First occurrence strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    /// Like [`next_after`](Self::next_after), but an expression with no
    /// future occurrence is an error.
    pub fn require_next_after(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>, SchedulerError> {
        self.next_after(after)
            .ok_or_else(|| SchedulerError::InvalidCron {
                expression: self.expression.clone(),
                reason: format!("no occurrence after {after}"),
            })
    }
}

fn normalize(expression: &str) -> String {
    let trimmed = expression.trim();
    if trimmed.starts_with('@') {
        return trimmed.to_string();
    }
    let fields: Vec<&str> = trimmed.split_whitespace().collect();
    match fields.as_slice() {
        [minute, hour, day, month, weekday] => {
            format!("0 {minute} {hour} {day} {month} {}", classic_weekdays(weekday))
        }
        _ => trimmed.to_string(),
    }
}

const WEEKDAY_NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// Rewrite numeric day-of-week items (0-7, Sunday first) as names.
fn classic_weekdays(field: &str) -> String {
    field
        .split(',')
        .map(|item| classic_weekday_item(item).unwrap_or_else(|| item.to_string()))
        .collect::<Vec<_>>()
        .join(",")
}

/// `None` leaves the item for the `cron` crate to interpret or reject.
fn classic_weekday_item(item: &str) -> Option<String> {
    let (range, step) = match item.split_once('/') {
        Some((range, step)) => (range, step.parse::<usize>().ok().filter(|s| *s > 0)?),
        None => (item, 1),
    };
    let (start, end) = match range.split_once('-') {
        Some((start, end)) => (start.parse::<usize>().ok()?, end.parse::<usize>().ok()?),
        None if item.contains('/') => (range.parse::<usize>().ok()?, 6),
        None => {
            let day = range.parse::<usize>().ok()?;
            (day, day)
        }
    };
    if start > end || end > 7 {
        return None;
    }

    let mut names: Vec<&str> = Vec::new();
    for day in (start..=end).step_by(step) {
        let name = WEEKDAY_NAMES[day % 7];
        if !names.contains(&name) {
            names.push(name);
        }
    }
    Some(names.join(","))
}
