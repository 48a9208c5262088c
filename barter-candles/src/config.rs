//! Configuration for the [`CandleAggregator`](crate::aggregator::CandleAggregator) and the
//! [`RegimeEvaluator`](crate::regime::RegimeEvaluator).

use crate::{
    aggregator::VolumeMode,
    error::{EvaluationError, timeframe_pairing},
    timeframe::Timeframe,
};
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

/// [`CandleAggregator`](crate::aggregator::CandleAggregator) configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Timeframes every tick is aggregated into.
    pub timeframes: Vec<Timeframe>,
    /// How tick volume figures are interpreted.
    pub volume_mode: VolumeMode,
    /// How far before the active period start a late tick may arrive and still be folded in.
    pub late_tick_grace_ms: u64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            timeframes: vec![Timeframe::M15, Timeframe::H1],
            volume_mode: VolumeMode::Delta,
            late_tick_grace_ms: 2_000,
        }
    }
}

impl AggregatorConfig {
    /// Create a new configuration with custom timeframes.
    pub fn new(timeframes: impl IntoIterator<Item = Timeframe>) -> Self {
        Self {
            timeframes: timeframes.into_iter().collect(),
            ..Default::default()
        }
    }

    /// Set volume mode
    pub fn with_volume_mode(mut self, volume_mode: VolumeMode) -> Self {
        self.volume_mode = volume_mode;
        self
    }

    /// Set late tick grace window
    pub fn with_late_tick_grace(mut self, grace: std::time::Duration) -> Self {
        self.late_tick_grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn late_tick_grace(&self) -> TimeDelta {
        TimeDelta::milliseconds(i64::try_from(self.late_tick_grace_ms).unwrap_or(i64::MAX))
    }

    /// Sorted, de-duplicated timeframes.
    pub(crate) fn normalised_timeframes(&self) -> Vec<Timeframe> {
        let mut timeframes = self.timeframes.clone();
        timeframes.sort();
        timeframes.dedup();
        timeframes
    }
}

/// [`RegimeEvaluator`](crate::regime::RegimeEvaluator) configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RegimeConfig {
    /// Fast EMA lookback.
    pub fast_length: usize,
    /// Slow EMA lookback.
    pub slow_length: usize,
    /// Timeframe the trend is measured on.
    pub higher_timeframe: Timeframe,
    /// Timeframe used to build the forming higher timeframe candle.
    pub lower_timeframe: Timeframe,
    /// Maximum number of completed higher timeframe candles fetched per evaluation.
    pub history_lookback: usize,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            fast_length: 20,
            slow_length: 50,
            higher_timeframe: Timeframe::H1,
            lower_timeframe: Timeframe::M15,
            history_lookback: 100,
        }
    }
}

impl RegimeConfig {
    /// Set fast & slow EMA lengths
    pub fn with_lengths(mut self, fast_length: usize, slow_length: usize) -> Self {
        self.fast_length = fast_length;
        self.slow_length = slow_length;
        self
    }

    /// Set higher & lower timeframes
    pub fn with_timeframes(mut self, higher: Timeframe, lower: Timeframe) -> Self {
        self.higher_timeframe = higher;
        self.lower_timeframe = lower;
        self
    }

    /// Set history lookback
    pub fn with_history_lookback(mut self, lookback: usize) -> Self {
        self.history_lookback = lookback;
        self
    }

    pub fn validate(&self) -> Result<(), EvaluationError> {
        validate_lengths(self.fast_length, self.slow_length)?;
        validate_timeframes(self.higher_timeframe, self.lower_timeframe)?;
        if self.history_lookback < self.slow_length {
            return Err(EvaluationError::InvalidArgument(format!(
                "history_lookback {} is shorter than slow_length {}",
                self.history_lookback, self.slow_length
            )));
        }
        Ok(())
    }
}

pub(crate) fn validate_lengths(fast: usize, slow: usize) -> Result<(), EvaluationError> {
    if fast == 0 || slow == 0 {
        return Err(EvaluationError::InvalidArgument(
            "EMA lengths must be positive".to_string(),
        ));
    }
    if fast >= slow {
        return Err(EvaluationError::InvalidArgument(format!(
            "fast_length {fast} must be shorter than slow_length {slow}"
        )));
    }
    Ok(())
}

pub(crate) fn validate_timeframes(
    higher: Timeframe,
    lower: Timeframe,
) -> Result<(), EvaluationError> {
    if lower.divides(higher) {
        Ok(())
    } else {
        Err(timeframe_pairing(higher, lower))
    }
}
