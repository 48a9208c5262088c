#![warn(
    unused,
    clippy::cognitive_complexity,
    unused_extern_crates,
    clippy::unused_self,
    clippy::useless_let_if_seq,
    missing_debug_implementations,
    rust_2018_idioms
)]
#![allow(clippy::type_complexity)]

//! # Barter-Candles
//! Multi-timeframe tick to OHLCV candle aggregation, plus a trend regime filter that never
//! evaluates against a stale higher timeframe candle.
//!
//! **It is:**
//! * **Multi-Timeframe**: every [`Tick`] updates one in-progress [`Candle`] per configured
//!   [`Timeframe`], with exactly one completion event per period.
//! * **Concurrent**: ticks for unrelated symbols never contend on the same lock.
//! * **Fresh**: the [`RegimeEvaluator`] appends a forming candle, synthesised from completed
//!   lower timeframe candles, before computing its moving averages.
//! * **Fail Closed**: missing history or a failing [`CandleStore`] always yields a definitive
//!   non-pass with a reason.
//!
//! ## Overview
//! Ticks flow into the [`CandleAggregator`], which pushes completed candles onto a channel.
//! [`spawn_persistence`](store::spawn_persistence) drains that channel into a [`CandleStore`].
//! When a signal needs confirming, the [`RegimeEvaluator`] queries the store, builds the
//! forming candle via [`forming`], and compares a fast and a slow EMA.

/// [`CandleAggregator`] and its [`VolumeMode`](aggregator::VolumeMode) accounting.
pub mod aggregator;

/// [`Candle`] and [`SyntheticCandle`](candle::SyntheticCandle) models.
pub mod candle;

/// Aggregator and regime evaluator configuration.
pub mod config;

/// All [`Error`](std::error::Error)s generated in Barter-Candles.
pub mod error;

/// Forming (synthetic) candle construction from lower timeframe candles.
pub mod forming;

/// Moving average indicators.
pub mod indicator;

/// Trend regime filter and additional signal check composition.
pub mod regime;

/// [`CandleStore`] persistence interface and implementations.
pub mod store;

/// Normalised [`Tick`] input model.
pub mod tick;

/// [`Timeframe`] period arithmetic.
pub mod timeframe;

pub use aggregator::{AggregatorStatistics, CandleAggregator, TickOutcome, VolumeMode};
pub use candle::{Candle, CandleSource, SyntheticCandle};
pub use config::{AggregatorConfig, RegimeConfig};
pub use regime::{Direction, EvaluationResult, RegimeEvaluator};
pub use store::{CandleStore, InMemoryCandleStore};
pub use tick::Tick;
pub use timeframe::{PeriodWindow, Timeframe};

