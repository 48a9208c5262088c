use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// How the `volume` figure carried by each [`Tick`](crate::tick::Tick) of a feed is
/// interpreted.
///
/// Picking the wrong mode does not raise any error; it silently corrupts the volume of
/// every candle, so it must match the feed.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeMode {
    /// Each tick carries the volume traded since the previous tick. Candle volume is the sum.
    #[default]
    Delta,
    /// Each tick carries the running session total. Candle volume is derived by subtracting
    /// the previous total seen for the same symbol.
    Cumulative,
}

impl VolumeMode {
    /// Volume a freshly opened candle starts with.
    pub(crate) fn opening_volume(&self, tick_volume: f64) -> f64 {
        match self {
            VolumeMode::Delta => tick_volume,
            VolumeMode::Cumulative => 0.0,
        }
    }
}

impl FromStr for VolumeMode {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_ascii_lowercase().as_str() {
            "delta" | "tick" => Ok(VolumeMode::Delta),
            "cumulative" | "session" => Ok(VolumeMode::Cumulative),
            other => Err(format!(
                "unknown volume mode '{other}', expected 'delta' or 'cumulative'"
            )),
        }
    }
}

/// Per-symbol volume accounting shared by every timeframe of that symbol.
#[derive(Copy, Clone, PartialEq, Debug, Default)]
pub(crate) struct VolumeTracker {
    last_cumulative: Option<(DateTime<Utc>, f64)>,
}

impl VolumeTracker {
    /// Volume attributable to this tick alone.
    ///
    /// In [`VolumeMode::Cumulative`] a total lower than the previous one is a session reset,
    /// so the new total counts in full. An out of order tick carries a stale total and
    /// contributes nothing.
    pub(crate) fn delta(&mut self, mode: VolumeMode, tick_volume: f64, time: DateTime<Utc>) -> f64 {
        match mode {
            VolumeMode::Delta => tick_volume,
            VolumeMode::Cumulative => {
                let delta = match self.last_cumulative {
                    None => 0.0,
                    Some((last_time, _)) if time < last_time => return 0.0,
                    Some((_, previous)) if tick_volume >= previous => tick_volume - previous,
                    Some(_) => tick_volume,
                };
                self.last_cumulative = Some((time, tick_volume));
                delta
            }
        }
    }
}
