use crate::timeframe::Timeframe;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use thiserror::Error;

/// Errors generated when a [`Tick`](crate::tick::Tick) cannot be applied by the
/// [`CandleAggregator`](crate::aggregator::CandleAggregator).
///
/// None of these are fatal: the offending tick is dropped and every other
/// (symbol, timeframe) key carries on unaffected.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Error)]
pub enum TickError {
    #[error("malformed tick for symbol '{symbol}': {reason}")]
    Malformed { symbol: SmolStr, reason: String },

    #[error(
        "late tick for {symbol} @ {time}: every configured timeframe has already finalised that period"
    )]
    Late { symbol: SmolStr, time: DateTime<Utc> },
}

/// Errors generated when constructing or parsing a [`Timeframe`].
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Error)]
pub enum TimeframeError {
    #[error("timeframe must be a positive number of seconds")]
    Zero,

    #[error("timeframe of {seconds}s does not evenly divide a day")]
    NotDayAligned { seconds: u32 },

    #[error("failed to parse timeframe '{input}': expected e.g. '30s', '15m', '1h', '1d'")]
    Parse { input: String },
}

/// Errors generated by a [`CandleStore`](crate::store::CandleStore) collaborator.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Error)]
pub enum StoreError {
    #[error("store query timed out: {0}")]
    Timeout(String),

    #[error("store connection failed: {0}")]
    Connection(String),

    #[error("store rejected write: {0}")]
    Write(String),
}

/// Errors generated by the [`RegimeEvaluator`](crate::regime::RegimeEvaluator).
///
/// Only [`EvaluationError::InvalidArgument`] ever reaches a caller of `evaluate`; the data
/// availability variants are folded into a fail-closed result.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Error)]
pub enum EvaluationError {
    #[error("insufficient data: have {available} closes, need {required}")]
    InsufficientData { available: usize, required: usize },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid timeframe: {0}")]
    Timeframe(#[from] TimeframeError),
}

impl EvaluationError {
    /// Determine if an error is caller misuse rather than a market data condition.
    #[allow(clippy::match_like_matches_macro)]
    pub fn is_contract_violation(&self) -> bool {
        match self {
            EvaluationError::InvalidArgument(_) | EvaluationError::Timeframe(_) => true,
            _ => false,
        }
    }

    /// Short, stable prefix used in fail-closed result reasons.
    pub fn kind(&self) -> &'static str {
        match self {
            EvaluationError::InsufficientData { .. } => "insufficient data",
            EvaluationError::Store(_) => "store error",
            EvaluationError::InvalidArgument(_) => "invalid argument",
            EvaluationError::Timeframe(_) => "invalid timeframe",
        }
    }
}

/// Convenience for building the [`TimeframeError`] that echoes the rejected input.
pub(crate) fn parse_error(input: impl Into<String>) -> TimeframeError {
    TimeframeError::Parse {
        input: input.into(),
    }
}

/// Convenience for building the [`EvaluationError`] raised for a bad timeframe pairing.
pub(crate) fn timeframe_pairing(higher: Timeframe, lower: Timeframe) -> EvaluationError {
    EvaluationError::InvalidArgument(format!(
        "lower timeframe {lower} must be shorter than and evenly divide higher timeframe {higher}"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluation_error_is_contract_violation() {
        struct TestCase {
            input: EvaluationError,
            expected: bool,
        }

        let tests = vec![
            TestCase {
                // TC0: insufficient data is a market data condition
                input: EvaluationError::InsufficientData {
                    available: 3,
                    required: 50,
                },
                expected: false,
            },
            TestCase {
                // TC1: store failures are a market data condition
                input: EvaluationError::from(StoreError::Timeout("5s elapsed".to_string())),
                expected: false,
            },
            TestCase {
                // TC2: unknown direction is caller misuse
                input: EvaluationError::InvalidArgument("unknown direction 'SIDEWAYS'".into()),
                expected: true,
            },
            TestCase {
                // TC3: bad timeframe is caller misuse
                input: EvaluationError::from(TimeframeError::Zero),
                expected: true,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = test.input.is_contract_violation();
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_evaluation_error_display_carries_kind_prefix() {
        let errors = [
            EvaluationError::InsufficientData {
                available: 10,
                required: 50,
            },
            EvaluationError::from(StoreError::Connection("refused".into())),
        ];

        for error in errors {
            assert!(
                error.to_string().starts_with(error.kind()),
                "'{}' should start with '{}'",
                error,
                error.kind()
            );
        }
    }
}
