use crate::{
    candle::Candle,
    config::{RegimeConfig, validate_lengths, validate_timeframes},
    error::EvaluationError,
    forming,
    indicator::MovingAverageSeries,
    store::CandleStore,
    timeframe::Timeframe,
};
use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Ordered, named signal checks composed with the regime decision.
pub mod check;

use check::{CheckContext, CheckResult, CompositeResult, SignalCheck};

/// Direction of the signal being confirmed.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Display, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    #[display("LONG")]
    Long,
    #[display("SHORT")]
    Short,
}

impl FromStr for Direction {
    type Err = EvaluationError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_ascii_lowercase().as_str() {
            "long" | "buy" => Ok(Direction::Long),
            "short" | "sell" => Ok(Direction::Short),
            _ => Err(EvaluationError::InvalidArgument(format!(
                "unrecognised direction '{input}', expected LONG or SHORT"
            ))),
        }
    }
}

/// Moving averages over the freshest available close sequence of one symbol.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendValues {
    pub averages: MovingAverageSeries,
    /// True if a forming candle was appended to the completed history.
    pub used_synthetic: bool,
    /// Lower timeframe candles aggregated into the forming candle, 0 if unused.
    pub contributor_count: usize,
    /// Number of closes the averages were computed over.
    pub closes: usize,
}

/// Regime decision for one signal. Always carries a human readable `reason`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationResult {
    pub passes: bool,
    pub fast_value: Option<f64>,
    pub slow_value: Option<f64>,
    pub used_synthetic: bool,
    pub contributor_count: usize,
    pub reason: String,
}

impl EvaluationResult {
    /// Definitive non-pass result for a data availability failure.
    pub fn fail_closed(error: &EvaluationError) -> Self {
        Self {
            passes: false,
            fast_value: None,
            slow_value: None,
            used_synthetic: false,
            contributor_count: 0,
            reason: error.to_string(),
        }
    }
}

/// Trend confirmation gate for directional signals.
///
/// Combines persisted higher timeframe history with a forming candle built from the current
/// period's completed lower timeframe candles, so the averages never lag by up to a full
/// higher timeframe period. Holds no mutable state; evaluations may run concurrently.
#[derive(Debug, Clone)]
pub struct RegimeEvaluator<Store> {
    store: Store,
    config: RegimeConfig,
}

impl<Store> RegimeEvaluator<Store>
where
    Store: CandleStore,
{
    /// Construct a new [`RegimeEvaluator`], validating the provided [`RegimeConfig`].
    pub fn new(store: Store, config: RegimeConfig) -> Result<Self, EvaluationError> {
        config.validate()?;
        Ok(Self { store, config })
    }

    pub fn config(&self) -> &RegimeConfig {
        &self.config
    }

    /// Compute the `fast_length` and `slow_length` EMAs of `symbol` as of `now`.
    ///
    /// If `now` is strictly inside a `higher_timeframe` period, a forming candle is built from
    /// that period's completed `lower_timeframe` candles and appended to the history, replacing
    /// any stored candle of that same period. No such candles simply means the completed history
    /// is used on its own.
    pub async fn compute_trend_values(
        &self,
        symbol: &str,
        now: DateTime<Utc>,
        fast_length: usize,
        slow_length: usize,
        higher_timeframe: Timeframe,
        lower_timeframe: Timeframe,
    ) -> Result<TrendValues, EvaluationError> {
        validate_lengths(fast_length, slow_length)?;
        validate_timeframes(higher_timeframe, lower_timeframe)?;

        let lookback = self.config.history_lookback.max(slow_length);
        let history = self
            .store
            .query_completed(symbol, higher_timeframe, lookback)
            .await?;

        let (series, contributor_count) = if forming::is_incomplete_period(now, higher_timeframe)
        {
            let window = higher_timeframe.window(now);
            let subcandles = self
                .store
                .query_subperiod(symbol, lower_timeframe, window)
                .await?;

            match forming::build(symbol, now, higher_timeframe, &subcandles) {
                Some(synthetic) => {
                    debug!(
                        %symbol,
                        %window,
                        contributors = synthetic.contributor_count,
                        close = synthetic.candle.close,
                        "built forming candle"
                    );
                    // A partial candle already persisted for this period (eg/ flushed at
                    // shutdown) is superseded by the forming candle
                    let settled = history
                        .iter()
                        .take_while(|candle| candle.period_start < window.start)
                        .count();
                    (
                        forming::append(&history[..settled], &synthetic),
                        synthetic.contributor_count,
                    )
                }
                None => {
                    debug!(%symbol, %window, "no completed subcandles yet, using completed history");
                    (history, 0)
                }
            }
        } else {
            (history, 0)
        };

        let closes = series.iter().map(|candle: &Candle| candle.close).collect::<Vec<_>>();
        if closes.len() < slow_length {
            return Err(EvaluationError::InsufficientData {
                available: closes.len(),
                required: slow_length,
            });
        }

        Ok(TrendValues {
            averages: MovingAverageSeries::compute(&closes, [fast_length, slow_length]),
            used_synthetic: contributor_count > 0,
            contributor_count,
            closes: closes.len(),
        })
    }

    /// Decide whether `direction` is confirmed by the current trend of `symbol`.
    ///
    /// [`Direction::Long`] passes iff the fast EMA is above the slow EMA, and
    /// [`Direction::Short`] iff it is below. Missing data or a store failure fails closed.
    pub async fn evaluate(
        &self,
        symbol: &str,
        now: DateTime<Utc>,
        direction: Direction,
    ) -> EvaluationResult {
        let RegimeConfig {
            fast_length,
            slow_length,
            higher_timeframe,
            lower_timeframe,
            ..
        } = self.config;

        let trend = match self
            .compute_trend_values(
                symbol,
                now,
                fast_length,
                slow_length,
                higher_timeframe,
                lower_timeframe,
            )
            .await
        {
            Ok(trend) => trend,
            Err(error) => {
                warn!(%symbol, %direction, %now, %error, "regime filter failing closed");
                return EvaluationResult::fail_closed(&error);
            }
        };

        let (Some(fast), Some(slow)) = (
            trend.averages.get(fast_length),
            trend.averages.get(slow_length),
        ) else {
            let error = EvaluationError::InsufficientData {
                available: trend.closes,
                required: slow_length,
            };
            warn!(%symbol, %direction, %now, %error, "regime filter failing closed");
            return EvaluationResult::fail_closed(&error);
        };

        let passes = match direction {
            Direction::Long => fast > slow,
            Direction::Short => fast < slow,
        };
        let comparison = match (direction, passes) {
            (Direction::Long, true) => "UPTREND",
            (Direction::Long, false) => "NOT UPTREND",
            (Direction::Short, true) => "DOWNTREND",
            (Direction::Short, false) => "NOT DOWNTREND",
        };
        let operator = match (direction, passes) {
            (Direction::Long, true) => ">",
            (Direction::Long, false) => "<=",
            (Direction::Short, true) => "<",
            (Direction::Short, false) => ">=",
        };

        let mut reason = format!(
            "{comparison}: EMA{fast_length} ({fast:.4}) {operator} EMA{slow_length} ({slow:.4})"
        );
        if trend.used_synthetic {
            reason.push_str(&format!(
                " incl. forming {higher_timeframe} candle from {} {lower_timeframe} candles",
                trend.contributor_count
            ));
        }

        if passes {
            info!(%symbol, %direction, fast, slow, used_synthetic = trend.used_synthetic, "{reason}");
        } else {
            warn!(%symbol, %direction, fast, slow, used_synthetic = trend.used_synthetic, "{reason}");
        }

        EvaluationResult {
            passes,
            fast_value: Some(fast),
            slow_value: Some(slow),
            used_synthetic: trend.used_synthetic,
            contributor_count: trend.contributor_count,
            reason,
        }
    }

    /// Run the regime decision followed by every `checks` entry, in order.
    ///
    /// All checks run even after one fails, so the result attributes every rejection. The
    /// signal passes only if the regime and every check pass.
    pub async fn evaluate_with_checks(
        &self,
        symbol: &str,
        now: DateTime<Utc>,
        direction: Direction,
        checks: &[Box<dyn SignalCheck>],
    ) -> CompositeResult {
        let regime = self.evaluate(symbol, now, direction).await;

        let context = CheckContext {
            symbol,
            now,
            direction,
            regime: &regime,
        };

        let results = std::iter::once(CheckResult::from(&regime))
            .chain(checks.iter().map(|check| check.evaluate(&context)))
            .collect::<Vec<_>>();

        let composite = CompositeResult::new(regime, results);
        if composite.passes {
            info!(%symbol, %direction, checks = composite.checks.len(), "signal confirmed");
        } else {
            warn!(%symbol, %direction, rejected_by = ?composite.rejected_by(), "signal rejected");
        }

        composite
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        candle::{
            CandleSource,
            test_utils::{candle, flat, time},
        },
        error::StoreError,
        regime::check::{CheckOutcome, FlagCheck, FnCheck},
        store::InMemoryCandleStore,
        timeframe::PeriodWindow,
    };
    use async_trait::async_trait;
    use chrono::TimeDelta;
    use std::sync::Arc;

    /// Hourly candles with the given closes, the last one ending at the period of `before`.
    fn hourly(symbol: &str, closes: &[f64], before: DateTime<Utc>) -> Vec<Candle> {
        let end = Timeframe::H1.period_start(before);
        closes
            .iter()
            .enumerate()
            .map(|(index, close)| {
                let offset = TimeDelta::hours((closes.len() - index) as i64);
                flat(symbol, Timeframe::H1, end - offset, *close)
            })
            .collect()
    }

    fn rising(count: usize) -> Vec<f64> {
        (0..count).map(|index| 100.0 + index as f64).collect()
    }

    fn falling(count: usize) -> Vec<f64> {
        (0..count).map(|index| 200.0 - index as f64).collect()
    }

    fn evaluator(candles: Vec<Candle>) -> RegimeEvaluator<InMemoryCandleStore> {
        RegimeEvaluator::new(
            InMemoryCandleStore::from_candles(candles),
            RegimeConfig::default(),
        )
        .unwrap()
    }

    #[derive(Debug)]
    struct FailingStore {
        completed: Result<Vec<Candle>, StoreError>,
    }

    #[async_trait]
    impl CandleStore for FailingStore {
        async fn append_candle(&self, _: Candle) -> Result<(), StoreError> {
            Err(StoreError::Write("read only".to_string()))
        }

        async fn query_completed(
            &self,
            _: &str,
            _: Timeframe,
            _: usize,
        ) -> Result<Vec<Candle>, StoreError> {
            self.completed.clone()
        }

        async fn query_subperiod(
            &self,
            _: &str,
            _: Timeframe,
            _: PeriodWindow,
        ) -> Result<Vec<Candle>, StoreError> {
            Err(StoreError::Timeout("subperiod query exceeded 5s".to_string()))
        }
    }

    #[tokio::test]
    async fn test_evaluate_follows_ema_ordering() {
        struct TestCase {
            closes: Vec<f64>,
            direction: Direction,
            expected_passes: bool,
            expected_reason: &'static str,
        }

        let tests = vec![
            TestCase {
                // TC0: rising series confirms LONG
                closes: rising(60),
                direction: Direction::Long,
                expected_passes: true,
                expected_reason: "UPTREND: EMA20",
            },
            TestCase {
                // TC1: rising series rejects SHORT
                closes: rising(60),
                direction: Direction::Short,
                expected_passes: false,
                expected_reason: "NOT DOWNTREND: EMA20",
            },
            TestCase {
                // TC2: falling series confirms SHORT
                closes: falling(60),
                direction: Direction::Short,
                expected_passes: true,
                expected_reason: "DOWNTREND: EMA20",
            },
            TestCase {
                // TC3: falling series rejects LONG
                closes: falling(60),
                direction: Direction::Long,
                expected_passes: false,
                expected_reason: "NOT UPTREND: EMA20",
            },
            TestCase {
                // TC4: flat series has equal EMAs, which is not an uptrend
                closes: vec![100.0; 60],
                direction: Direction::Long,
                expected_passes: false,
                expected_reason: "NOT UPTREND",
            },
        ];

        let now = time(13, 0, 0);
        for (index, test) in tests.into_iter().enumerate() {
            let evaluator = evaluator(hourly("SBIN", &test.closes, now));
            let actual = evaluator.evaluate("SBIN", now, test.direction).await;

            assert_eq!(actual.passes, test.expected_passes, "TC{} failed", index);
            assert!(
                actual.reason.starts_with(test.expected_reason),
                "TC{} failed: {}",
                index,
                actual.reason
            );
            assert!(actual.fast_value.is_some() && actual.slow_value.is_some());
        }
    }

    #[tokio::test]
    async fn test_evaluate_at_boundary_never_uses_synthetic() {
        let now = time(13, 0, 0);
        let mut candles = hourly("SBIN", &rising(60), now);
        // A subcandle that would belong to the 12:00 hour must not be used at 13:00:00
        candles.push(flat("SBIN", Timeframe::M15, time(12, 45, 0), 1.0));
        candles.push(flat("SBIN", Timeframe::M15, time(13, 0, 0), 1.0));

        let actual = evaluator(candles).evaluate("SBIN", now, Direction::Long).await;

        assert!(!actual.used_synthetic);
        assert_eq!(actual.contributor_count, 0);
        assert!(actual.passes);
    }

    #[tokio::test]
    async fn test_forming_candle_changes_decision() {
        let now = time(13, 30, 57);
        let mut candles = hourly("SBIN", &[100.0; 60], now);
        candles.push(candle("SBIN", Timeframe::M15, time(13, 0, 0), 100.0, 150.0, 99.0, 150.0, 10.0));
        candles.push(candle("SBIN", Timeframe::M15, time(13, 15, 0), 150.0, 205.0, 149.0, 200.0, 10.0));
        let evaluator = evaluator(candles);

        let actual = evaluator.evaluate("SBIN", now, Direction::Long).await;
        assert!(actual.passes, "{}", actual.reason);
        assert!(actual.used_synthetic);
        assert_eq!(actual.contributor_count, 2);
        assert!(actual.reason.contains("forming 1h candle from 2 15m candles"));

        // Seeded at 100, then a single smoothing step towards 200
        let fast = actual.fast_value.unwrap();
        let slow = actual.slow_value.unwrap();
        assert!((fast - (100.0 + 100.0 * 2.0 / 21.0)).abs() < 1e-9);
        assert!((slow - (100.0 + 100.0 * 2.0 / 51.0)).abs() < 1e-9);

        let trend = evaluator
            .compute_trend_values("SBIN", now, 20, 50, Timeframe::H1, Timeframe::M15)
            .await
            .unwrap();
        assert_eq!(trend.closes, 61);
    }

    #[tokio::test]
    async fn test_forming_candle_supersedes_flushed_candle_of_same_period() {
        let now = time(13, 30, 0);
        let mut candles = hourly("SBIN", &rising(60), now);
        candles.push(Candle {
            source: CandleSource::Flushed,
            ..flat("SBIN", Timeframe::H1, time(13, 0, 0), 500.0)
        });
        candles.push(flat("SBIN", Timeframe::M15, time(13, 0, 0), 161.0));
        let evaluator = evaluator(candles);

        let actual = evaluator
            .compute_trend_values("SBIN", now, 20, 50, Timeframe::H1, Timeframe::M15)
            .await
            .unwrap();
        assert_eq!(actual.closes, 61);
        assert!(actual.used_synthetic);

        // Same answer as if the flushed candle had never been stored
        let expected = MovingAverageSeries::compute(
            &rising(60).into_iter().chain([161.0]).collect::<Vec<_>>(),
            [20, 50],
        );
        assert_eq!(actual.averages, expected);
    }

    #[tokio::test]
    async fn test_evaluate_mid_period_without_subcandles_falls_back() {
        let now = time(13, 5, 0);
        let actual = evaluator(hourly("SBIN", &falling(60), now))
            .evaluate("SBIN", now, Direction::Short)
            .await;

        assert!(actual.passes);
        assert!(!actual.used_synthetic);
        assert_eq!(actual.contributor_count, 0);
    }

    #[tokio::test]
    async fn test_evaluate_insufficient_data_fails_closed() {
        let now = time(13, 0, 0);
        let actual = evaluator(hourly("SBIN", &rising(30), now))
            .evaluate("SBIN", now, Direction::Long)
            .await;

        assert!(!actual.passes);
        assert!(actual.reason.contains("insufficient data"), "{}", actual.reason);
        assert_eq!(actual.fast_value, None);

        let unknown = evaluator(vec![]).evaluate("UNKNOWN", now, Direction::Short).await;
        assert!(!unknown.passes);
        assert!(unknown.reason.contains("insufficient data"));
    }

    #[tokio::test]
    async fn test_evaluate_store_error_fails_closed() {
        let history = hourly("SBIN", &rising(60), time(13, 0, 0));

        struct TestCase {
            store: FailingStore,
            now: DateTime<Utc>,
        }

        let tests = vec![
            TestCase {
                // TC0: history query fails
                store: FailingStore {
                    completed: Err(StoreError::Connection("refused".to_string())),
                },
                now: time(13, 0, 0),
            },
            TestCase {
                // TC1: history is fine, but the subperiod query mid period fails
                store: FailingStore {
                    completed: Ok(history),
                },
                now: time(13, 20, 0),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let evaluator = RegimeEvaluator::new(test.store, RegimeConfig::default()).unwrap();
            let actual = evaluator.evaluate("SBIN", test.now, Direction::Long).await;
            assert!(!actual.passes, "TC{} failed", index);
            assert!(
                actual.reason.starts_with("store error"),
                "TC{} failed: {}",
                index,
                actual.reason
            );
        }
    }

    #[tokio::test]
    async fn test_compute_trend_values_rejects_invalid_arguments() {
        let evaluator = evaluator(vec![]);

        let actual = evaluator
            .compute_trend_values("SBIN", time(13, 0, 0), 50, 20, Timeframe::H1, Timeframe::M15)
            .await;
        assert!(matches!(actual, Err(EvaluationError::InvalidArgument(_))));

        let actual = evaluator
            .compute_trend_values("SBIN", time(13, 0, 0), 20, 50, Timeframe::H1, Timeframe::H4)
            .await;
        assert!(actual.unwrap_err().is_contract_violation());
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let actual = RegimeEvaluator::new(
            InMemoryCandleStore::new(),
            RegimeConfig::default().with_lengths(50, 50),
        );
        assert!(matches!(actual, Err(EvaluationError::InvalidArgument(_))));
    }

    #[test]
    fn test_direction_from_str() {
        struct TestCase {
            input: &'static str,
            expected: Option<Direction>,
        }

        let tests = vec![
            TestCase {
                // TC0: lowercase long
                input: "long",
                expected: Some(Direction::Long),
            },
            TestCase {
                // TC1: uppercase short with whitespace
                input: " SHORT ",
                expected: Some(Direction::Short),
            },
            TestCase {
                // TC2: unknown direction
                input: "sideways",
                expected: None,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = test.input.parse::<Direction>();
            match test.expected {
                Some(expected) => assert_eq!(actual, Ok(expected), "TC{} failed", index),
                None => assert!(
                    matches!(actual, Err(EvaluationError::InvalidArgument(_))),
                    "TC{} failed",
                    index
                ),
            }
        }
    }

    #[tokio::test]
    async fn test_evaluate_with_checks_records_every_check_in_order() {
        let now = time(13, 0, 0);
        let evaluator = evaluator(hourly("SBIN", &rising(60), now));

        let checks: Vec<Box<dyn SignalCheck>> = vec![
            Box::new(FlagCheck::new("volume_confirmation", false)),
            Box::new(FnCheck::new("fast_above_100", |context: &CheckContext<'_>| {
                match context.regime.fast_value {
                    Some(fast) if fast > 100.0 => CheckOutcome::pass(format!("fast {fast:.2}")),
                    _ => CheckOutcome::fail("fast EMA at or below 100"),
                }
            })),
            Box::new(FlagCheck::new("price_level", true)),
        ];

        let actual = evaluator
            .evaluate_with_checks("SBIN", now, Direction::Long, &checks)
            .await;

        assert!(!actual.passes);
        assert!(actual.regime.passes);
        assert_eq!(
            actual.checks.iter().map(|check| check.name.as_str()).collect::<Vec<_>>(),
            vec!["regime", "volume_confirmation", "fast_above_100", "price_level"]
        );
        assert_eq!(actual.rejected_by(), vec!["volume_confirmation"]);

        let checks: Vec<Box<dyn SignalCheck>> = vec![Box::new(FlagCheck::new("price_level", true))];
        let actual = evaluator
            .evaluate_with_checks("SBIN", now, Direction::Short, &checks)
            .await;
        assert!(!actual.passes);
        assert_eq!(actual.rejected_by(), vec!["regime"]);
    }

    #[tokio::test]
    async fn test_concurrent_evaluations_share_store() {
        let now = time(13, 45, 0);
        let mut candles = hourly("UP", &rising(60), now);
        candles.extend(hourly("DOWN", &falling(60), now));
        candles.push(flat("UP", Timeframe::M15, time(13, 0, 0), 170.0));

        let evaluator = Arc::new(evaluator(candles));
        let results = futures::future::join_all(
            ["UP", "DOWN", "UP", "DOWN"].into_iter().map(|symbol| {
                let evaluator = Arc::clone(&evaluator);
                async move { evaluator.evaluate(symbol, now, Direction::Long).await }
            }),
        )
        .await;

        let actual = results.iter().map(|result| result.passes).collect::<Vec<_>>();
        assert_eq!(actual, vec![true, false, true, false]);
        assert!(results[0].used_synthetic);
        assert!(!results[1].used_synthetic);
    }
}
