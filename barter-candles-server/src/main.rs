use barter_candles::{
    AggregatorConfig, CandleAggregator, InMemoryCandleStore, Tick, Timeframe, VolumeMode,
    store::spawn_persistence,
};
use std::{sync::Arc, time::Duration};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    time::interval,
};
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() {
    // Initialize logging
    init_logging();

    info!("Starting barter-candles server");

    let config = aggregator_config_from_env();
    info!(
        timeframes = ?config.timeframes,
        volume_mode = ?config.volume_mode,
        late_tick_grace_ms = config.late_tick_grace_ms,
        "aggregator configuration"
    );

    // Heartbeat cadence via HEARTBEAT_INTERVAL_SECS env var (default: 30s)
    let heartbeat_secs = std::env::var("HEARTBEAT_INTERVAL_SECS")
        .ok()
        .and_then(|secs| secs.parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .unwrap_or(30);

    let store = Arc::new(InMemoryCandleStore::new());
    let (aggregator, completed_rx) = CandleAggregator::new(config);
    let persistence = spawn_persistence(Arc::clone(&store), completed_rx);

    consume_ticks(&aggregator, Duration::from_secs(heartbeat_secs)).await;

    // Flush every partial candle before the channel closes so nothing is lost
    let flushed = aggregator.force_flush(None);
    let statistics = aggregator.statistics();
    drop(aggregator);

    match persistence.await {
        Ok(persisted) => info!(persisted, flushed = flushed.len(), "persistence drained"),
        Err(error) => error!(%error, "persistence task failed"),
    }

    info!(
        ticks_processed = statistics.ticks_processed,
        ticks_malformed = statistics.ticks_malformed,
        ticks_late = statistics.ticks_late,
        candles_completed = statistics.candles_completed,
        candles_flushed = statistics.candles_flushed,
        stored = store.len(),
        "barter-candles server stopped"
    );
}

/// Read line delimited JSON ticks from stdin until EOF or Ctrl-C.
async fn consume_ticks(aggregator: &CandleAggregator, heartbeat_interval: Duration) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut heartbeat = interval(heartbeat_interval);
    heartbeat.tick().await;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("received Ctrl-C, shutting down");
                break;
            }
            _ = heartbeat.tick() => {
                let statistics = aggregator.statistics();
                info!(
                    ticks_processed = statistics.ticks_processed,
                    ticks_late = statistics.ticks_late,
                    candles_completed = statistics.candles_completed,
                    active = ?statistics.active_candles,
                    "heartbeat"
                );
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => handle_line(aggregator, &line),
                Ok(None) => {
                    info!("tick feed closed");
                    break;
                }
                Err(error) => {
                    error!(%error, "failed to read tick feed");
                    break;
                }
            }
        }
    }
}

fn handle_line(aggregator: &CandleAggregator, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }

    let tick = match serde_json::from_str::<Tick>(line) {
        Ok(tick) => tick,
        Err(error) => {
            warn!(%error, payload = line, "failed to deserialise tick");
            return;
        }
    };

    // Rejected ticks are logged by the aggregator itself
    if let Ok(outcome) = aggregator.process_tick(&tick) {
        if outcome.finalised > 0 {
            debug!(symbol = %tick.symbol, finalised = outcome.finalised, "candles completed");
        }
    }
}

/// Build the [`AggregatorConfig`] from environment variables, falling back to defaults.
fn aggregator_config_from_env() -> AggregatorConfig {
    let mut config = AggregatorConfig::default();

    if let Ok(raw) = std::env::var("CANDLE_TIMEFRAMES") {
        let parsed = raw
            .split(',')
            .filter(|timeframe| !timeframe.trim().is_empty())
            .filter_map(|timeframe| match timeframe.trim().parse::<Timeframe>() {
                Ok(timeframe) => Some(timeframe),
                Err(error) => {
                    warn!(%error, "ignoring invalid CANDLE_TIMEFRAMES entry");
                    None
                }
            })
            .collect::<Vec<_>>();

        if parsed.is_empty() {
            warn!(value = %raw, "CANDLE_TIMEFRAMES has no valid entries, using defaults");
        } else {
            config.timeframes = parsed;
        }
    }

    if let Ok(raw) = std::env::var("VOLUME_MODE") {
        match raw.parse::<VolumeMode>() {
            Ok(mode) => config.volume_mode = mode,
            Err(error) => warn!(%error, "invalid VOLUME_MODE, using delta"),
        }
    }

    if let Some(grace_ms) = std::env::var("LATE_TICK_GRACE_MS")
        .ok()
        .and_then(|ms| ms.parse::<u64>().ok())
    {
        config.late_tick_grace_ms = grace_ms;
    }

    config
}

/// Initialize logging, with JSON output if LOG_FORMAT=json
fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let json = std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
