//! Rollout interval parsing.
//!
//! Intervals are a count plus an optional unit: `30s`, `5m`, `12h`, `1d`,
//! `2w`. A bare count is read as seconds.

use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use thiserror::Error;

static INTERVAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9]+)(s|m|h|d|w)?$").expect("interval pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntervalError {
    #[error("interval {0:?} does not match <count>[s|m|h|d|w]")]
    Malformed(String),

    #[error("interval {0:?} must be greater than zero")]
    NonPositive(String),

    #[error("interval {0:?} is too large")]
    Overflow(String),
}

/// A validated, strictly positive rollout interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Interval(Duration);

impl Interval {
    /// Parse `<count>[s|m|h|d|w]`. A count without a unit is seconds, so
    /// `"90"` and `"90s"` are the same interval.
    pub fn parse(raw: &str) -> Result<Self, IntervalError> {
        let s = raw.trim();
        let caps = INTERVAL_RE
            .captures(s)
            .ok_or_else(|| IntervalError::Malformed(raw.to_string()))?;

        let count: u64 = caps[1]
            .parse()
            .map_err(|_| IntervalError::Overflow(raw.to_string()))?;
        let unit_secs: u64 = match caps.get(2).map(|m| m.as_str()) {
            None | Some("s") => 1,
            Some("m") => 60,
            Some("h") => 60 * 60,
            Some("d") => 24 * 60 * 60,
            Some("w") => 7 * 24 * 60 * 60,
            Some(_) => return Err(IntervalError::Malformed(raw.to_string())),
        };

        let secs = count
            .checked_mul(unit_secs)
            .ok_or_else(|| IntervalError::Overflow(raw.to_string()))?;
        if secs == 0 {
            return Err(IntervalError::NonPositive(raw.to_string()));
        }
        Ok(Self(Duration::from_secs(secs)))
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0.as_secs())
    }
}
