use super::CandleStore;
use crate::{
    candle::Candle,
    error::StoreError,
    timeframe::{PeriodWindow, Timeframe},
};
use async_trait::async_trait;
use fnv::FnvHashMap;
use parking_lot::RwLock;
use smol_str::SmolStr;
use tracing::warn;

/// [`CandleStore`] holding every candle in memory, keyed by (symbol, timeframe).
///
/// Each series is kept sorted by `period_start`. Appending a candle for a period that is
/// already stored replaces it. Zero volume candles are kept, since a period with ticks but no
/// traded volume (eg/ an index, or the opening tick of a cumulative feed) is still a period.
#[derive(Debug, Default)]
pub struct InMemoryCandleStore {
    series: RwLock<FnvHashMap<(SmolStr, Timeframe), Vec<Candle>>>,
}

impl InMemoryCandleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct a store pre-populated with `candles`, eg/ historical fixtures.
    pub fn from_candles(candles: impl IntoIterator<Item = Candle>) -> Self {
        let store = Self::new();
        for candle in candles {
            // Rejections are logged by insert
            let _ = store.insert(candle);
        }
        store
    }

    /// Total number of stored candles across every series.
    pub fn len(&self) -> usize {
        self.series.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&self, candle: Candle) -> Result<(), StoreError> {
        if !candle.is_consistent() {
            warn!(
                symbol = %candle.symbol,
                timeframe = %candle.timeframe,
                period_start = %candle.period_start,
                "rejecting inconsistent candle"
            );
            return Err(StoreError::Write(format!(
                "inconsistent candle for {} {} @ {}",
                candle.symbol, candle.timeframe, candle.period_start
            )));
        }

        let mut series = self.series.write();
        let candles = series
            .entry((candle.symbol.clone(), candle.timeframe))
            .or_default();

        match candles.binary_search_by_key(&candle.period_start, |stored| stored.period_start) {
            Ok(index) => candles[index] = candle,
            Err(index) => candles.insert(index, candle),
        }
        Ok(())
    }
}

#[async_trait]
impl CandleStore for InMemoryCandleStore {
    async fn append_candle(&self, candle: Candle) -> Result<(), StoreError> {
        self.insert(candle)
    }

    async fn query_completed(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        lookback: usize,
    ) -> Result<Vec<Candle>, StoreError> {
        let series = self.series.read();
        let Some(candles) = series.get(&(SmolStr::new(symbol), timeframe)) else {
            return Ok(vec![]);
        };

        let completed = candles
            .iter()
            .filter(|candle| candle.completed)
            .collect::<Vec<_>>();
        let skip = completed.len().saturating_sub(lookback);

        Ok(completed.into_iter().skip(skip).cloned().collect())
    }

    async fn query_subperiod(
        &self,
        symbol: &str,
        lower_timeframe: Timeframe,
        window: PeriodWindow,
    ) -> Result<Vec<Candle>, StoreError> {
        let series = self.series.read();
        let Some(candles) = series.get(&(SmolStr::new(symbol), lower_timeframe)) else {
            return Ok(vec![]);
        };

        Ok(candles
            .iter()
            .filter(|candle| candle.completed && window.contains(candle.period_start))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candle::test_utils::{candle, flat, time};

    #[tokio::test]
    async fn test_query_completed_returns_most_recent_oldest_first() {
        let store = InMemoryCandleStore::from_candles(
            [12, 9, 11, 10].map(|hour| flat("HDFC", Timeframe::H1, time(hour, 0, 0), hour as f64)),
        );

        let actual = store.query_completed("HDFC", Timeframe::H1, 3).await.unwrap();
        let closes = actual.iter().map(|candle| candle.close).collect::<Vec<_>>();
        assert_eq!(closes, vec![10.0, 11.0, 12.0]);

        let unknown = store.query_completed("WIPRO", Timeframe::H1, 3).await.unwrap();
        assert!(unknown.is_empty());
    }

    #[tokio::test]
    async fn test_append_upserts_same_period() {
        let store = InMemoryCandleStore::new();
        store
            .append_candle(flat("HDFC", Timeframe::H1, time(9, 0, 0), 10.0))
            .await
            .unwrap();
        store
            .append_candle(flat("HDFC", Timeframe::H1, time(9, 0, 0), 11.0))
            .await
            .unwrap();

        assert_eq!(store.len(), 1);
        let actual = store.query_completed("HDFC", Timeframe::H1, 10).await.unwrap();
        assert_eq!(actual[0].close, 11.0);
    }

    #[tokio::test]
    async fn test_append_keeps_zero_volume_and_rejects_inconsistent() {
        struct TestCase {
            input: Candle,
            expected_ok: bool,
        }

        let tests = vec![
            TestCase {
                // TC0: zero volume period is still stored
                input: candle("NIFTY50", Timeframe::H1, time(9, 0, 0), 1.0, 1.0, 1.0, 1.0, 0.0),
                expected_ok: true,
            },
            TestCase {
                // TC1: high below close is reported as a failed write
                input: candle("NIFTY50", Timeframe::H1, time(10, 0, 0), 1.0, 1.0, 0.5, 2.0, 5.0),
                expected_ok: false,
            },
        ];

        let store = InMemoryCandleStore::new();
        for (index, test) in tests.into_iter().enumerate() {
            let actual = store.append_candle(test.input).await;
            assert_eq!(actual.is_ok(), test.expected_ok, "TC{} failed", index);
        }

        let stored = store.query_completed("NIFTY50", Timeframe::H1, 10).await.unwrap();
        assert_eq!(
            stored.iter().map(|candle| candle.period_start).collect::<Vec<_>>(),
            vec![time(9, 0, 0)]
        );
    }

    #[tokio::test]
    async fn test_query_subperiod_restricts_to_window() {
        let store = InMemoryCandleStore::from_candles(
            [(12, 45), (13, 0), (13, 15), (13, 30), (14, 0)]
                .map(|(hour, minute)| flat("HDFC", Timeframe::M15, time(hour, minute, 0), 1.0)),
        );

        let window = Timeframe::H1.window(time(13, 40, 0));
        let actual = store
            .query_subperiod("HDFC", Timeframe::M15, window)
            .await
            .unwrap();

        assert_eq!(
            actual.iter().map(|candle| candle.period_start).collect::<Vec<_>>(),
            vec![time(13, 0, 0), time(13, 15, 0), time(13, 30, 0)]
        );
    }
}
