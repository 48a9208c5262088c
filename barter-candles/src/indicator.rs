//! Moving average indicators computed over candle closes.

use serde::Serialize;
use std::collections::BTreeMap;

/// Exponential Moving Average (EMA) calculator.
///
/// Seeded with the simple average of the first `length` values, then smoothed with
/// `alpha = 2 / (length + 1)`. No value is reported until `length` values have been seen.
#[derive(Debug, Clone)]
pub struct Ema {
    /// EMA lookback length
    length: usize,
    /// Smoothing factor (alpha)
    alpha: f64,
    /// Running seed average, then the EMA once ready
    value: Option<f64>,
    /// Number of data points processed
    count: usize,
}

impl Ema {
    pub fn new(length: usize) -> Self {
        Self {
            length,
            alpha: 2.0 / (length as f64 + 1.0),
            value: None,
            count: 0,
        }
    }

    /// Update EMA with a new value
    pub fn update(&mut self, new_value: f64) {
        self.count += 1;

        self.value = match self.value {
            None => Some(new_value),
            Some(current) if self.count <= self.length => {
                // Running simple average until the seed window is full
                Some(current + (new_value - current) / self.count as f64)
            }
            Some(current) => Some(self.alpha * new_value + (1.0 - self.alpha) * current),
        };
    }

    /// Current EMA value, if enough data points have been processed.
    pub fn value(&self) -> Option<f64> {
        self.is_ready().then_some(self.value).flatten()
    }

    /// Check if EMA has enough data points
    pub fn is_ready(&self) -> bool {
        self.length > 0 && self.count >= self.length
    }
}

/// EMA of `length` over the whole `values` sequence, oldest first.
pub fn ema(values: impl IntoIterator<Item = f64>, length: usize) -> Option<f64> {
    let mut ema = Ema::new(length);
    values.into_iter().for_each(|value| ema.update(value));
    ema.value()
}

/// Ordered mapping from lookback length to its computed moving average.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MovingAverageSeries(pub BTreeMap<usize, f64>);

impl MovingAverageSeries {
    /// Compute the EMA of every length in `lengths` over `closes`. Lengths longer than the
    /// series are absent from the result.
    pub fn compute(closes: &[f64], lengths: impl IntoIterator<Item = usize>) -> Self {
        Self(
            lengths
                .into_iter()
                .filter_map(|length| {
                    ema(closes.iter().copied(), length).map(|value| (length, value))
                })
                .collect(),
        )
    }

    pub fn get(&self, length: usize) -> Option<f64> {
        self.0.get(&length).copied()
    }
}
