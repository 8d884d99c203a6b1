#![allow(dead_code)]

use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use tradeflow::adapters::file_config_adapter::FileConfigAdapter;
use tradeflow::adapters::memory_position_store::MemoryPositionStore;
use tradeflow::adapters::strategy_file_adapter::load_strategy;
use tradeflow::domain::context::ExecutionMode;
use tradeflow::domain::expression_eval::MarketExpressionEvaluator;
use tradeflow::domain::graph::StrategyGraph;
use tradeflow::domain::market::{Candle, CandleSeries, MarketSnapshot, Tick, Timeframe};
use tradeflow::domain::run::{RunConfig, StrategyRun};

pub const BREAKOUT_STRATEGY: &str = r#"
[strategy]
name = Breakout

[node.start]
type = start
children = signal

[node.signal]
type = entry_signal
label = Breakout above previous high
condition = AND(ltp > candle(1m, -1).high, time >= 09:20)
var.level = candle(1m, -1).high
children = entry

[node.entry]
type = entry
quantity = 50
children = stop

[node.stop]
type = exit_signal
condition = OR(ltp < var(entry, entry_price) - 3, ltp >= var(signal, level) + 6)
children = exit

[node.exit]
type = exit
target = entry
"#;

pub fn ist() -> FixedOffset {
    FixedOffset::east_opt(5 * 3600 + 30 * 60).unwrap()
}

/// Instant on 2024-03-04 at the given IST wall-clock time.
pub fn ist_time(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    ist()
        .with_ymd_and_hms(2024, 3, 4, h, m, s)
        .unwrap()
        .with_timezone(&Utc)
}

pub fn tick(ltp: f64, at: DateTime<Utc>) -> Tick {
    Tick {
        symbol: "NIFTY".into(),
        ltp,
        quantity: 25,
        open_interest: 0,
        timestamp: at,
    }
}

/// Snapshot whose last completed 1m candle has the given high.
pub fn snapshot_with_previous_high(tick: Tick, high: f64) -> Arc<MarketSnapshot> {
    let previous = Candle {
        timestamp: tick.timestamp - chrono::Duration::minutes(1),
        open: high - 2.0,
        high,
        low: high - 5.0,
        close: high - 1.0,
        volume: 1_000,
    };
    let mut snapshot = MarketSnapshot::with_tick(tick);
    snapshot.candles = HashMap::from([(Timeframe::from("1m"), CandleSeries::new(vec![previous], None))]);
    Arc::new(snapshot)
}

pub fn graph_from(content: &str) -> Arc<StrategyGraph> {
    let config = FileConfigAdapter::from_string(content).unwrap();
    Arc::new(load_strategy(&config).unwrap())
}

pub fn config(mode: ExecutionMode) -> RunConfig {
    RunConfig {
        mode,
        timezone: ist(),
        async_workers: 2,
        ..RunConfig::default()
    }
}

pub fn new_run(graph: Arc<StrategyGraph>, mode: ExecutionMode) -> (StrategyRun, Arc<MemoryPositionStore>) {
    let store = Arc::new(MemoryPositionStore::new());
    let run = StrategyRun::new(
        graph,
        store.clone(),
        Arc::new(MarketExpressionEvaluator::new()),
        config(mode),
    )
    .unwrap();
    (run, store)
}

pub fn write_temp(content: &str, suffix: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}
