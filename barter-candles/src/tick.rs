use crate::error::TickError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Normalised price tick for a single instrument.
///
/// How `volume` is interpreted depends on the [`VolumeMode`](crate::aggregator::VolumeMode)
/// the consuming aggregator is configured with.
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct Tick {
    pub symbol: SmolStr,
    pub price: f64,
    #[serde(default)]
    pub volume: f64,
    #[serde(alias = "timestamp")]
    pub time: DateTime<Utc>,
}

impl Tick {
    pub fn new(symbol: impl Into<SmolStr>, price: f64, volume: f64, time: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            volume,
            time,
        }
    }

    /// Basic payload validation performed before any candle state is touched.
    pub fn validate(&self) -> Result<(), TickError> {
        let malformed = |reason: &str| TickError::Malformed {
            symbol: self.symbol.clone(),
            reason: reason.to_string(),
        };

        if self.symbol.trim().is_empty() {
            return Err(malformed("missing symbol"));
        }
        if !self.price.is_finite() {
            return Err(malformed("non-finite price"));
        }
        if self.price < 0.0 {
            return Err(malformed("negative price"));
        }
        if !self.volume.is_finite() || self.volume < 0.0 {
            return Err(malformed("volume must be finite and non-negative"));
        }
        Ok(())
    }
}
