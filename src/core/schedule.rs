//! Timer schedules and duration parsing.
//!
//! A [`Schedule`] pairs a non-zero interval with a [`TimerKind`]. Schedules can
//! be written as expressions:
//!
//! - `@every 250ms` fires every 250 milliseconds
//! - `@after 2s` fires once, two seconds after being armed
//! - `1m30s` (a bare duration) is the same as `@every 1m30s`

use std::time::Duration;
use thiserror::Error;

use super::types::TimerKind;

/// Errors that can occur when building or parsing schedules.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    /// The interval is zero.
    #[error("interval must be greater than zero")]
    ZeroInterval,

    /// A duration string could not be parsed.
    #[error("invalid duration: {0}")]
    InvalidDuration(String),

    /// A schedule expression could not be parsed.
    #[error("invalid schedule expression: {0}")]
    InvalidExpression(String),
}

/// When and how often a timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    interval: Duration,
    kind: TimerKind,
}

impl Schedule {
    /// Create a schedule, rejecting a zero interval.
    pub fn new(interval: Duration, kind: TimerKind) -> Result<Self, ScheduleError> {
        if interval.is_zero() {
            return Err(ScheduleError::ZeroInterval);
        }
        Ok(Self { interval, kind })
    }

    /// A schedule that fires every `interval`.
    pub fn periodic(interval: Duration) -> Result<Self, ScheduleError> {
        Self::new(interval, TimerKind::Periodic)
    }

    /// A schedule that fires once after `delay`.
    pub fn single_shot(delay: Duration) -> Result<Self, ScheduleError> {
        Self::new(delay, TimerKind::SingleShot)
    }

    /// Parse a schedule expression (`@every <duration>`, `@after <duration>`,
    /// or a bare duration).
    pub fn parse(expression: &str) -> Result<Self, ScheduleError> {
        let trimmed = expression.trim();

        if let Some(rest) = trimmed.strip_prefix('@') {
            let (keyword, duration) = rest
                .split_once(char::is_whitespace)
                .ok_or_else(|| ScheduleError::InvalidExpression(expression.to_string()))?;

            let kind = match keyword.to_lowercase().as_str() {
                "every" => TimerKind::Periodic,
                "after" | "once" => TimerKind::SingleShot,
                _ => return Err(ScheduleError::InvalidExpression(expression.to_string())),
            };
            return Self::new(parse_duration(duration)?, kind);
        }

        Self::periodic(parse_duration(trimmed)?)
    }

    /// Time between arming and the first expiration, and between expirations
    /// for periodic schedules.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether the schedule repeats.
    pub fn kind(&self) -> TimerKind {
        self.kind
    }

    /// Shorthand for `kind() == TimerKind::Periodic`.
    pub fn is_periodic(&self) -> bool {
        self.kind == TimerKind::Periodic
    }
}

/// Parse a duration string like `500ms`, `2s`, `1m30s` or `1h`.
///
/// Supported units: `ns`, `us`, `ms`, `s`, `m`, `h`, `d`. Segments add up.
/// A total of zero is rejected.
pub fn parse_duration(s: &str) -> Result<Duration, ScheduleError> {
    let trimmed = s.trim();
    let invalid = || ScheduleError::InvalidDuration(trimmed.to_string());

    if trimmed.is_empty() {
        return Err(invalid());
    }

    let mut total = Duration::ZERO;
    let mut rest = trimmed;

    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        if digits == 0 {
            return Err(invalid());
        }
        let value: u64 = rest[..digits].parse().map_err(|_| invalid())?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];

        let secs = |multiplier: u64| {
            value
                .checked_mul(multiplier)
                .map(Duration::from_secs)
                .ok_or_else(invalid)
        };

        let part = match unit {
            "ns" => Duration::from_nanos(value),
            "us" => Duration::from_micros(value),
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => secs(60)?,
            "h" => secs(3600)?,
            "d" => secs(86400)?,
            _ => return Err(invalid()),
        };
        total = total.checked_add(part).ok_or_else(invalid)?;
    }

    if total.is_zero() {
        return Err(ScheduleError::ZeroInterval);
    }

    Ok(total)
}
