//! Normalised OHLCV candle models shared by the aggregator, the store and the regime filter.

use crate::timeframe::{PeriodWindow, Timeframe};
use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Where a [`Candle`] came from.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CandleSource {
    /// Closed by a natural period rollover.
    #[display("aggregated")]
    Aggregated,
    /// Closed early by a forced flush, typically at shutdown.
    #[display("flushed")]
    Flushed,
    /// Estimated from lower timeframe candles of an unfinished period; never persisted.
    #[display("forming")]
    Forming,
}

/// Barter OHLCV candle for one (symbol, timeframe, period).
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct Candle {
    pub symbol: SmolStr,
    pub timeframe: Timeframe,
    /// Timeframe aligned start of the period this candle summarises.
    pub period_start: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// Number of ticks (or, for a forming candle, ticks across all contributors).
    pub tick_count: u64,
    pub completed: bool,
    pub source: CandleSource,
}

impl Candle {
    pub fn window(&self) -> PeriodWindow {
        PeriodWindow {
            start: self.period_start,
            end: self.period_start + self.timeframe.duration(),
        }
    }

    /// True if the OHLC ordering `low <= min(open, close) <= max(open, close) <= high` holds.
    pub fn is_consistent(&self) -> bool {
        self.low <= self.open.min(self.close)
            && self.open.max(self.close) <= self.high
            && self.volume >= 0.0
            && self.timeframe.is_boundary(self.period_start)
    }

    /// True if this candle was closed early rather than at its natural period end.
    pub fn is_partial(&self) -> bool {
        self.source == CandleSource::Flushed
    }
}

/// Estimate of the current, unfinished candle of a higher timeframe, built from completed
/// lower timeframe candles of the same period.
#[derive(Clone, PartialEq, Debug, Serialize)]
pub struct SyntheticCandle {
    pub candle: Candle,
    /// How many lower timeframe candles were aggregated.
    pub contributor_count: usize,
}

impl SyntheticCandle {
    pub fn into_candle(self) -> Candle {
        self.candle
    }
}

impl AsRef<Candle> for SyntheticCandle {
    fn as_ref(&self) -> &Candle {
        &self.candle
    }
}
