//! Fixed candle durations and the period boundary arithmetic built on them.
//!
//! Periods are aligned against the Unix epoch in UTC. Every [`Timeframe`] evenly divides a
//! day, so an hourly period always starts at minute 0 and a 15 minute period always starts
//! at minute 0, 15, 30 or 45.

use crate::error::{TimeframeError, parse_error};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

const SECONDS_PER_DAY: u32 = 86_400;

/// Fixed duration of one candle bucket, in whole seconds.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct Timeframe {
    seconds: u32,
}

impl Timeframe {
    pub const M1: Self = Self { seconds: 60 };
    pub const M5: Self = Self { seconds: 5 * 60 };
    pub const M15: Self = Self { seconds: 15 * 60 };
    pub const M30: Self = Self { seconds: 30 * 60 };
    pub const H1: Self = Self { seconds: 60 * 60 };
    pub const H4: Self = Self { seconds: 4 * 60 * 60 };
    pub const D1: Self = Self {
        seconds: SECONDS_PER_DAY,
    };

    /// Construct a validated [`Timeframe`] from a number of seconds.
    pub fn from_seconds(seconds: u32) -> Result<Self, TimeframeError> {
        if seconds == 0 {
            return Err(TimeframeError::Zero);
        }
        if SECONDS_PER_DAY % seconds != 0 {
            return Err(TimeframeError::NotDayAligned { seconds });
        }
        Ok(Self { seconds })
    }

    /// Construct a validated [`Timeframe`] from a number of minutes.
    pub fn from_minutes(minutes: u32) -> Result<Self, TimeframeError> {
        minutes
            .checked_mul(60)
            .ok_or_else(|| parse_error(format!("{minutes}m")))
            .and_then(Self::from_seconds)
    }

    pub fn seconds(&self) -> u32 {
        self.seconds
    }

    pub fn duration(&self) -> TimeDelta {
        TimeDelta::seconds(i64::from(self.seconds))
    }

    /// Time elapsed since the start of the period containing `time`.
    pub fn elapsed(&self, time: DateTime<Utc>) -> TimeDelta {
        let into_period = time.timestamp().rem_euclid(i64::from(self.seconds));
        TimeDelta::seconds(into_period)
            + TimeDelta::nanoseconds(i64::from(time.timestamp_subsec_nanos()))
    }

    /// Timeframe aligned start of the period containing `time`.
    pub fn period_start(&self, time: DateTime<Utc>) -> DateTime<Utc> {
        time - self.elapsed(time)
    }

    /// Half-open window `[start, start + timeframe)` of the period containing `time`.
    pub fn window(&self, time: DateTime<Utc>) -> PeriodWindow {
        let start = self.period_start(time);
        PeriodWindow {
            start,
            end: start + self.duration(),
        }
    }

    /// True if `time` lies exactly on a period boundary.
    pub fn is_boundary(&self, time: DateTime<Utc>) -> bool {
        self.elapsed(time).is_zero()
    }

    /// True if `self` is strictly shorter than `higher` and evenly divides it.
    pub fn divides(&self, higher: Timeframe) -> bool {
        self.seconds < higher.seconds && higher.seconds % self.seconds == 0
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.seconds {
            s if s % SECONDS_PER_DAY == 0 => write!(f, "{}d", s / SECONDS_PER_DAY),
            s if s % 3600 == 0 => write!(f, "{}h", s / 3600),
            s if s % 60 == 0 => write!(f, "{}m", s / 60),
            s => write!(f, "{s}s"),
        }
    }
}

impl fmt::Debug for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timeframe({self})")
    }
}

impl FromStr for Timeframe {
    type Err = TimeframeError;

    /// Parses `"30s"`, `"15m"`, `"15min"`, `"1h"`, `"1d"`, or a bare number of minutes.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim().to_ascii_lowercase();
        let split = trimmed
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(trimmed.len());
        let (amount, unit) = trimmed.split_at(split);

        let amount = amount.parse::<u32>().map_err(|_| parse_error(input))?;
        let multiplier = match unit {
            "s" | "sec" => 1,
            "" | "m" | "min" => 60,
            "h" | "hr" | "hour" => 3600,
            "d" | "day" => SECONDS_PER_DAY,
            _ => return Err(parse_error(input)),
        };

        amount
            .checked_mul(multiplier)
            .ok_or_else(|| parse_error(input))
            .and_then(Self::from_seconds)
    }
}

impl TryFrom<String> for Timeframe {
    type Error = TimeframeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Timeframe> for String {
    fn from(value: Timeframe) -> Self {
        value.to_string()
    }
}

/// Half-open interval `[start, end)` covering exactly one period of some [`Timeframe`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct PeriodWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl PeriodWindow {
    pub fn contains(&self, time: DateTime<Utc>) -> bool {
        self.start <= time && time < self.end
    }
}

impl fmt::Display for PeriodWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} - {})",
            self.start.format("%Y-%m-%d %H:%M:%S"),
            self.end.format("%H:%M:%S")
        )
    }
}
