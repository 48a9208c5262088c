//! Multi-timeframe tick to OHLCV candle aggregation.
//!
//! Uses tick timestamps (not wall clock) for candle boundaries, so replayed feeds aggregate
//! exactly like live ones. Every symbol owns its own lock; ticks for unrelated symbols never
//! serialise on each other.

use crate::{
    candle::{Candle, CandleSource},
    config::AggregatorConfig,
    error::TickError,
    tick::Tick,
    timeframe::Timeframe,
};
use chrono::{DateTime, TimeDelta, Utc};
use fnv::FnvHashMap;
use itertools::Itertools;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use smol_str::SmolStr;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

mod volume;

pub use volume::VolumeMode;
use volume::VolumeTracker;

/// The single in-progress candle of one (symbol, timeframe) key.
#[derive(Debug, Clone)]
struct ActiveCandle {
    candle: Candle,
    /// Timestamp of the most recent tick applied, used to keep `close` on the latest price.
    last_tick_time: DateTime<Utc>,
}

impl ActiveCandle {
    fn open(tick: &Tick, timeframe: Timeframe, period_start: DateTime<Utc>, volume: f64) -> Self {
        Self {
            candle: Candle {
                symbol: tick.symbol.clone(),
                timeframe,
                period_start,
                open: tick.price,
                high: tick.price,
                low: tick.price,
                close: tick.price,
                volume,
                tick_count: 1,
                completed: false,
                source: CandleSource::Aggregated,
            },
            last_tick_time: tick.time,
        }
    }

    /// Fold a tick into the candle. A tick older than the latest one applied still widens
    /// the range and adds volume, but never moves `close`.
    fn update(&mut self, tick: &Tick, volume: f64) {
        let candle = &mut self.candle;
        candle.high = candle.high.max(tick.price);
        candle.low = candle.low.min(tick.price);
        candle.volume += volume;
        candle.tick_count += 1;

        if tick.time >= self.last_tick_time {
            candle.close = tick.price;
            self.last_tick_time = tick.time;
        }
    }

    fn finalise(self, source: CandleSource) -> Candle {
        Candle {
            completed: true,
            source,
            ..self.candle
        }
    }
}

/// Every active candle of one symbol, plus that symbol's volume accounting.
#[derive(Debug, Default)]
struct SymbolCandles {
    volume: VolumeTracker,
    active: FnvHashMap<Timeframe, ActiveCandle>,
}

/// Result of applying one [`Tick`] across every configured [`Timeframe`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickOutcome {
    /// Number of candles finalised (and emitted) because this tick opened a new period.
    pub finalised: usize,
    /// Timeframes for which the tick arrived too late and was dropped.
    pub late: Vec<Timeframe>,
}

/// Point-in-time aggregator statistics, suitable for heartbeat logging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregatorStatistics {
    pub timeframes: Vec<Timeframe>,
    pub active_candles: Vec<(Timeframe, usize)>,
    pub ticks_processed: u64,
    pub ticks_malformed: u64,
    pub ticks_late: u64,
    pub candles_completed: u64,
    pub candles_flushed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    ticks_processed: AtomicU64,
    ticks_malformed: AtomicU64,
    ticks_late: AtomicU64,
    candles_completed: AtomicU64,
    candles_flushed: AtomicU64,
}

/// Aggregates [`Tick`]s into [`Candle`]s across several timeframes simultaneously.
///
/// Owns the set of active (in-progress) candles. Completed candles are pushed onto the
/// channel returned by [`CandleAggregator::new`], while the owning symbol's lock is still
/// held, so a consumer always sees a period's completion before anything from the next one.
#[derive(Debug)]
pub struct CandleAggregator {
    timeframes: Vec<Timeframe>,
    volume_mode: VolumeMode,
    late_tick_grace: TimeDelta,
    symbols: RwLock<FnvHashMap<SmolStr, Arc<Mutex<SymbolCandles>>>>,
    completed_tx: mpsc::UnboundedSender<Candle>,
    counters: Counters,
}

impl CandleAggregator {
    /// Construct a new [`CandleAggregator`] and the receiver of its completed candles.
    pub fn new(config: AggregatorConfig) -> (Self, mpsc::UnboundedReceiver<Candle>) {
        let (completed_tx, completed_rx) = mpsc::unbounded_channel();

        let aggregator = Self {
            timeframes: config.normalised_timeframes(),
            volume_mode: config.volume_mode,
            late_tick_grace: config.late_tick_grace(),
            symbols: RwLock::new(FnvHashMap::default()),
            completed_tx,
            counters: Counters::default(),
        };

        info!(
            timeframes = %aggregator.timeframes.iter().join(","),
            volume_mode = ?aggregator.volume_mode,
            "CandleAggregator initialised"
        );

        (aggregator, completed_rx)
    }

    pub fn timeframes(&self) -> &[Timeframe] {
        &self.timeframes
    }

    /// Apply a tick to every configured timeframe of its symbol.
    ///
    /// Never fails for other keys: a malformed or late tick is logged and dropped.
    ///
    /// A tick stamped at most `late_tick_grace` before the start of a timeframe's active
    /// period is not dropped. It is folded into that active candle, widening its high, low and
    /// volume, while leaving its open and close unchanged.
    pub fn process_tick(&self, tick: &Tick) -> Result<TickOutcome, TickError> {
        if let Err(error) = tick.validate() {
            self.counters.ticks_malformed.fetch_add(1, Ordering::Relaxed);
            warn!(%error, "dropping malformed tick");
            return Err(error);
        }

        let state = self.symbol_state(&tick.symbol);
        let mut state = state.lock();
        let volume = state.volume.delta(self.volume_mode, tick.volume, tick.time);

        let mut outcome = TickOutcome::default();
        for &timeframe in &self.timeframes {
            let period_start = timeframe.period_start(tick.time);

            let needs_rollover = match state.active.get_mut(&timeframe) {
                Some(active) if period_start == active.candle.period_start => {
                    active.update(tick, volume);
                    false
                }
                Some(active) if period_start < active.candle.period_start => {
                    if active.candle.period_start - tick.time <= self.late_tick_grace {
                        active.update(tick, volume);
                    } else {
                        outcome.late.push(timeframe);
                    }
                    false
                }
                _ => true,
            };

            if !needs_rollover {
                continue;
            }

            if let Some(previous) = state.active.remove(&timeframe) {
                self.emit(previous.finalise(CandleSource::Aggregated));
                outcome.finalised += 1;
            }

            debug!(
                symbol = %tick.symbol,
                %timeframe,
                %period_start,
                price = tick.price,
                "opening candle"
            );
            let opening_volume = self.volume_mode.opening_volume(volume);
            state.active.insert(
                timeframe,
                ActiveCandle::open(tick, timeframe, period_start, opening_volume),
            );
        }
        drop(state);

        self.counters.ticks_processed.fetch_add(1, Ordering::Relaxed);

        if !outcome.late.is_empty() {
            self.counters.ticks_late.fetch_add(1, Ordering::Relaxed);
            warn!(
                symbol = %tick.symbol,
                time = %tick.time,
                late_for = %outcome.late.iter().join(","),
                "dropping late tick for already finalised period"
            );

            if outcome.late.len() == self.timeframes.len() {
                return Err(TickError::Late {
                    symbol: tick.symbol.clone(),
                    time: tick.time,
                });
            }
        }

        Ok(outcome)
    }

    /// Finalise and emit every active candle, optionally for a single symbol, regardless of
    /// whether its period has elapsed. Flushed candles are tagged [`CandleSource::Flushed`].
    ///
    /// Used at shutdown so no partially aggregated candle is silently lost.
    pub fn force_flush(&self, symbol: Option<&str>) -> Vec<Candle> {
        let states = {
            let symbols = self.symbols.read();
            match symbol {
                Some(symbol) => symbols.get(symbol).cloned().into_iter().collect_vec(),
                None => symbols.values().cloned().collect_vec(),
            }
        };

        let mut flushed = Vec::new();
        for state in states {
            let mut state = state.lock();
            let drained = state
                .active
                .drain()
                .map(|(_, active)| active)
                .sorted_by_key(|active| active.candle.timeframe)
                .collect_vec();

            for active in drained {
                let candle = active.finalise(CandleSource::Flushed);
                self.emit(candle.clone());
                flushed.push(candle);
            }
        }

        self.counters
            .candles_flushed
            .fetch_add(flushed.len() as u64, Ordering::Relaxed);
        info!(
            scope = symbol.unwrap_or("all"),
            count = flushed.len(),
            "force flushed active candles"
        );

        flushed
    }

    /// Snapshot of the in-progress candles for a timeframe, optionally for one symbol.
    pub fn active_candles(&self, timeframe: Timeframe, symbol: Option<&str>) -> Vec<Candle> {
        let states = {
            let symbols = self.symbols.read();
            symbols
                .iter()
                .filter(|(key, _)| symbol.is_none_or(|symbol| key.as_str() == symbol))
                .map(|(_, state)| Arc::clone(state))
                .collect_vec()
        };

        states
            .iter()
            .filter_map(|state| {
                state
                    .lock()
                    .active
                    .get(&timeframe)
                    .map(|active| active.candle.clone())
            })
            .sorted_by(|a, b| a.symbol.cmp(&b.symbol))
            .collect()
    }

    pub fn statistics(&self) -> AggregatorStatistics {
        let active_candles = self
            .timeframes
            .iter()
            .map(|&timeframe| (timeframe, self.active_candles(timeframe, None).len()))
            .collect();

        AggregatorStatistics {
            timeframes: self.timeframes.clone(),
            active_candles,
            ticks_processed: self.counters.ticks_processed.load(Ordering::Relaxed),
            ticks_malformed: self.counters.ticks_malformed.load(Ordering::Relaxed),
            ticks_late: self.counters.ticks_late.load(Ordering::Relaxed),
            candles_completed: self.counters.candles_completed.load(Ordering::Relaxed),
            candles_flushed: self.counters.candles_flushed.load(Ordering::Relaxed),
        }
    }

    fn symbol_state(&self, symbol: &SmolStr) -> Arc<Mutex<SymbolCandles>> {
        if let Some(state) = self.symbols.read().get(symbol) {
            return Arc::clone(state);
        }

        Arc::clone(self.symbols.write().entry(symbol.clone()).or_default())
    }

    fn emit(&self, candle: Candle) {
        if candle.source == CandleSource::Aggregated {
            self.counters.candles_completed.fetch_add(1, Ordering::Relaxed);
            info!(
                symbol = %candle.symbol,
                timeframe = %candle.timeframe,
                period_start = %candle.period_start,
                "Candle O={:.2} H={:.2} L={:.2} C={:.2} V={} ({} ticks)",
                candle.open,
                candle.high,
                candle.low,
                candle.close,
                candle.volume,
                candle.tick_count
            );
        }

        if let Err(error) = self.completed_tx.send(candle) {
            warn!(
                symbol = %error.0.symbol,
                timeframe = %error.0.timeframe,
                "completed candle receiver dropped, candle not delivered"
            );
        }
    }
}
