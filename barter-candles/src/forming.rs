//! Forming candle construction.
//!
//! A higher timeframe candle is only persisted once its period closes, so during the period
//! the latest history is stale. These helpers estimate the in-progress candle from completed
//! lower timeframe candles of the same period.

use crate::{
    candle::{Candle, CandleSource, SyntheticCandle},
    timeframe::Timeframe,
};
use chrono::{DateTime, TimeDelta, Utc};
use itertools::Itertools;
use smol_str::SmolStr;

/// True if `now` lies strictly inside a period of `timeframe` (ie/ not exactly on a boundary).
pub fn is_incomplete_period(now: DateTime<Utc>, timeframe: Timeframe) -> bool {
    timeframe.elapsed(now) != TimeDelta::zero()
}

/// Build the [`SyntheticCandle`] of the `timeframe` period containing `now` from lower
/// timeframe `subcandles`.
///
/// Subcandles outside the period are ignored. Returns `None` if none fall inside, which is the
/// normal state at the very start of a period.
pub fn build(
    symbol: &str,
    now: DateTime<Utc>,
    timeframe: Timeframe,
    subcandles: &[Candle],
) -> Option<SyntheticCandle> {
    let window = timeframe.window(now);
    let contributors = subcandles
        .iter()
        .filter(|candle| window.contains(candle.period_start))
        .collect_vec();

    let first = contributors.iter().min_by_key(|candle| candle.period_start)?;
    let last = contributors.iter().max_by_key(|candle| candle.period_start)?;

    let high = contributors
        .iter()
        .map(|candle| candle.high)
        .fold(f64::NEG_INFINITY, f64::max);
    let low = contributors
        .iter()
        .map(|candle| candle.low)
        .fold(f64::INFINITY, f64::min);

    Some(SyntheticCandle {
        candle: Candle {
            symbol: SmolStr::new(symbol),
            timeframe,
            period_start: window.start,
            open: first.open,
            high,
            low,
            close: last.close,
            volume: contributors.iter().map(|candle| candle.volume).sum(),
            tick_count: contributors.iter().map(|candle| candle.tick_count).sum(),
            completed: false,
            source: CandleSource::Forming,
        },
        contributor_count: contributors.len(),
    })
}

/// New sequence of `history` followed by the forming candle. `history` is left untouched.
pub fn append(history: &[Candle], synthetic: &SyntheticCandle) -> Vec<Candle> {
    history
        .iter()
        .chain(std::iter::once(&synthetic.candle))
        .cloned()
        .collect()
}
