use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Serialize, Serializer};
use serde_with::serde_as;

use crate::error::SchedulerError;

/// Parsed cron expression. Accepts standard five-field crontab syntax (minute, hour, day of
/// month, month, day of week with 0 or 7 for Sunday) as well as six or seven field expressions
/// that lead with a seconds column. Fire times are computed in UTC.
#[derive(Clone)]
pub struct CronExpr {
    expression: String,
    schedule: cron::Schedule,
}

impl CronExpr {
    pub fn parse(expression: &str) -> Result<Self, SchedulerError> {
        let invalid = |reason: String| SchedulerError::InvalidCron { expression: expression.to_string(), reason };

        let normalized = normalize_crontab(expression).map_err(invalid)?;
        let schedule = cron::Schedule::from_str(&normalized).map_err(|err| invalid(err.to_string()))?;
        Ok(Self { expression: expression.trim().to_string(), schedule })
    }

    pub fn expression(&self) -> &str {
        self.expression.as_str()
    }

    pub fn next_after(&self, after: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(after).next()
    }
}

impl fmt::Debug for CronExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CronExpr").field(&self.expression).finish()
    }
}

impl PartialEq for CronExpr {
    fn eq(&self, other: &Self) -> bool {
        self.expression == other.expression
    }
}

impl Serialize for CronExpr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.expression)
    }
}

fn normalize_crontab(expression: &str) -> Result<String, String> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    match fields.as_slice() {
        [minute, hour, day_of_month, month, day_of_week] => {
            let day_of_week = shift_days_of_week(day_of_week)?;
            Ok(format!("0 {minute} {hour} {day_of_month} {month} {day_of_week}"))
        },
        fields if fields.len() == 6 || fields.len() == 7 => Ok(fields.join(" ")),
        fields => Err(format!("expected 5, 6 or 7 fields but found {}", fields.len())),
    }
}

/// Crontab numbers days of the week 0-7 with Sunday as both 0 and 7, while the cron engine
/// numbers them 1-7 starting at Sunday.
fn shift_days_of_week(field: &str) -> Result<String, String> {
    fn parse_day(rep: &str) -> Result<Option<u32>, String> {
        if rep.chars().all(|c| c.is_ascii_digit()) {
            let day: u32 = rep.parse().map_err(|_| format!("invalid day of week: {rep}"))?;
            if 7 < day {
                return Err(format!("day of week out of range: {day}"));
            }
            Ok(Some(day))
        } else {
            Ok(None)
        }
    }

    const fn shift(day: u32) -> u32 {
        if day == 7 {
            1
        } else {
            day + 1
        }
    }

    let items: Result<Vec<String>, String> = field
        .split(',')
        .map(|item| {
            let (range, step) = match item.split_once('/') {
                Some((range, step)) => (range, Some(step)),
                None => (item, None),
            };
            let step_suffix = step.map(|s| format!("/{s}")).unwrap_or_default();

            match range.split_once('-') {
                Some((start, end)) => match (parse_day(start)?, parse_day(end)?) {
                    (Some(start), Some(7)) if start < 7 => {
                        let step_by = step.and_then(|s| s.parse::<u32>().ok()).unwrap_or(1).max(1);
                        let sunday = if (7 - start) % step_by == 0 { ",1" } else { "" };
                        Ok(format!("{}-7{step_suffix}{sunday}", shift(start)))
                    },
                    (Some(start), Some(end)) => Ok(format!("{}-{}{step_suffix}", shift(start), shift(end))),
                    _ => Ok(item.to_string()),
                },
                None => match parse_day(range)? {
                    Some(day) => Ok(format!("{}{step_suffix}", shift(day))),
                    None => Ok(item.to_string()),
                },
            }
        })
        .collect();

    Ok(items?.into_iter().join(","))
}

/// When a job runs: on a cron schedule or at a fixed period.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSpec {
    Cron(CronExpr),
    Interval(#[serde_as(as = "serde_with::DurationSecondsWithFrac<f64>")] Duration),
}

impl TriggerSpec {
    pub fn cron(expression: &str) -> Result<Self, SchedulerError> {
        CronExpr::parse(expression).map(Self::Cron)
    }

    pub fn interval(period: Duration) -> Result<Self, SchedulerError> {
        if period.is_zero() {
            return Err(SchedulerError::InvalidInterval(period));
        }
        Ok(Self::Interval(period))
    }

    /// The first fire time strictly after `previous`.
    pub fn next_fire(&self, previous: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Cron(expr) => expr.next_after(previous),
            Self::Interval(period) => chrono::Duration::from_std(*period)
                .ok()
                .and_then(|period| previous.checked_add_signed(period)),
        }
    }
}

impl fmt::Display for TriggerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cron(expr) => write!(f, "cron[{}]", expr.expression()),
            Self::Interval(period) => write!(f, "interval[{period:?}]"),
        }
    }
}
