use crate::{
    candle::Candle,
    error::StoreError,
    timeframe::{PeriodWindow, Timeframe},
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

/// In-memory [`CandleStore`] implementation.
pub mod in_memory;

pub use in_memory::InMemoryCandleStore;

/// Persistence collaborator for completed [`Candle`]s.
///
/// Implementations own any timeout or retry policy; the core only sees a [`StoreError`].
#[async_trait]
pub trait CandleStore: Send + Sync {
    /// Persist a completed (or force flushed) candle.
    async fn append_candle(&self, candle: Candle) -> Result<(), StoreError>;

    /// Up to `lookback` most recent completed candles, ordered oldest to newest.
    async fn query_completed(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        lookback: usize,
    ) -> Result<Vec<Candle>, StoreError>;

    /// Completed `lower_timeframe` candles whose period starts inside `window`, ordered oldest
    /// to newest.
    async fn query_subperiod(
        &self,
        symbol: &str,
        lower_timeframe: Timeframe,
        window: PeriodWindow,
    ) -> Result<Vec<Candle>, StoreError>;
}

#[async_trait]
impl<S> CandleStore for Arc<S>
where
    S: CandleStore + ?Sized,
{
    async fn append_candle(&self, candle: Candle) -> Result<(), StoreError> {
        (**self).append_candle(candle).await
    }

    async fn query_completed(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        lookback: usize,
    ) -> Result<Vec<Candle>, StoreError> {
        (**self).query_completed(symbol, timeframe, lookback).await
    }

    async fn query_subperiod(
        &self,
        symbol: &str,
        lower_timeframe: Timeframe,
        window: PeriodWindow,
    ) -> Result<Vec<Candle>, StoreError> {
        (**self).query_subperiod(symbol, lower_timeframe, window).await
    }
}

/// Spawn a task draining completed candles into the `store` until every sender is dropped.
///
/// Write failures are logged and the candle skipped. The task resolves to the number of
/// candles successfully persisted.
pub fn spawn_persistence<S>(store: S, mut completed_rx: mpsc::UnboundedReceiver<Candle>) -> JoinHandle<usize>
where
    S: CandleStore + 'static,
{
    tokio::spawn(async move {
        let mut persisted = 0;

        while let Some(candle) = completed_rx.recv().await {
            let symbol = candle.symbol.clone();
            let timeframe = candle.timeframe;
            let period_start = candle.period_start;

            match store.append_candle(candle).await {
                Ok(()) => {
                    persisted += 1;
                    debug!(%symbol, %timeframe, %period_start, "persisted candle");
                }
                Err(error) => {
                    warn!(%symbol, %timeframe, %period_start, %error, "failed to persist candle");
                }
            }
        }

        info!(persisted, "candle persistence task finished");
        persisted
    })
}
