//! Schedule expressions for recurring tasks.
//!
//! Two forms are accepted:
//!
//! - `@every <duration>` with Go-style compound durations (`10ms`, `90s`,
//!   `1m30s`, `2h`) for fixed intervals, and
//! - cron expressions, including the common 5-field form (padded to the
//!   7-field form the `cron` crate expects) and descriptors like `@hourly`.
//!
//! Cron occurrences are computed in the runtime's configured timezone.

use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::error::BuildError;

/// A parsed task schedule.
#[derive(Clone, Debug)]
pub enum Schedule {
    /// Fire at a fixed interval, anchored at the previous firing.
    Every(Duration),
    /// Fire at cron-determined instants.
    Cron(Box<cron::Schedule>),
}

impl Schedule {
    /// Parses a schedule expression.
    pub fn parse(expr: &str) -> Result<Self, BuildError> {
        let trimmed = expr.trim();
        if trimmed.is_empty() {
            return Err(BuildError::InvalidSchedule {
                expr: expr.to_owned(),
                reason: "empty expression".to_owned(),
            });
        }

        if let Some(rest) = trimmed.strip_prefix("@every") {
            let interval =
                parse_duration(rest.trim()).ok_or_else(|| BuildError::InvalidSchedule {
                    expr: trimmed.to_owned(),
                    reason: "expected a duration like '30s' or '1m30s'".to_owned(),
                })?;
            if interval.is_zero() {
                return Err(BuildError::InvalidSchedule {
                    expr: trimmed.to_owned(),
                    reason: "interval must be positive".to_owned(),
                });
            }
            return Ok(Schedule::Every(interval));
        }

        match trimmed.parse::<cron::Schedule>() {
            Ok(schedule) => Ok(Schedule::Cron(Box::new(schedule))),
            Err(parse_err) => {
                // The cron crate wants seconds and year fields; the common
                // 5-field form gets "0" seconds and "*" year.
                let padded = format!("0 {trimmed} *");
                padded
                    .parse::<cron::Schedule>()
                    .map(|schedule| Schedule::Cron(Box::new(schedule)))
                    .map_err(|_| BuildError::InvalidSchedule {
                        expr: trimmed.to_owned(),
                        reason: parse_err.to_string(),
                    })
            }
        }
    }

    /// Computes the next firing strictly after `after`, or `None` when the
    /// schedule has no future occurrence.
    pub fn next_after(&self, after: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        match self {
            Schedule::Every(interval) => {
                let step = chrono::Duration::from_std(*interval).ok()?;
                after.checked_add_signed(step)
            }
            Schedule::Cron(schedule) => schedule
                .after(&after.with_timezone(&tz))
                .next()
                .map(|next| next.with_timezone(&Utc)),
        }
    }
}

/// Parses Go-style compound durations: `10ms`, `90s`, `1m30s`, `2h`.
fn parse_duration(s: &str) -> Option<Duration> {
    if s.is_empty() {
        return None;
    }
    let bytes = s.as_bytes();
    let mut total = Duration::ZERO;
    let mut i = 0;
    while i < s.len() {
        let digits_start = i;
        while i < s.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i == digits_start {
            return None;
        }
        let value: u64 = s[digits_start..i].parse().ok()?;

        let unit_start = i;
        while i < s.len() && bytes[i].is_ascii_alphabetic() {
            i += 1;
        }
        let segment = match &s[unit_start..i] {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value.checked_mul(60)?),
            "h" => Duration::from_secs(value.checked_mul(3600)?),
            _ => return None,
        };
        total = total.checked_add(segment)?;
    }
    Some(total)
}
