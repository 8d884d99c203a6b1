//! Market data seen by a strategy during one tick.
//!
//! - `Tick`: one market data update
//! - `Candle` / `CandleSeries`: OHLCV history per timeframe, offset addressed
//! - `CandleAggregator`: builds a series from a tick stream
//! - `MarketSnapshot`: everything installed by the driver before a traversal

use chrono::{DateTime, Duration, DurationRound, Utc};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    pub symbol: String,
    pub ltp: f64,
    pub quantity: i64,
    pub open_interest: i64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TickField {
    Ltp,
    Quantity,
    OpenInterest,
}

impl TickField {
    pub fn read(self, tick: &Tick) -> f64 {
        match self {
            TickField::Ltp => tick.ltp,
            TickField::Quantity => tick.quantity as f64,
            TickField::OpenInterest => tick.open_interest as f64,
        }
    }
}

impl fmt::Display for TickField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TickField::Ltp => "ltp",
            TickField::Quantity => "qty",
            TickField::OpenInterest => "oi",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

impl Candle {
    pub fn from_tick(bucket: DateTime<Utc>, tick: &Tick) -> Self {
        Candle {
            timestamp: bucket,
            open: tick.ltp,
            high: tick.ltp,
            low: tick.ltp,
            close: tick.ltp,
            volume: tick.quantity,
        }
    }

    pub fn update(&mut self, tick: &Tick) {
        self.high = self.high.max(tick.ltp);
        self.low = self.low.min(tick.ltp);
        self.close = tick.ltp;
        self.volume += tick.quantity;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CandleField {
    Open,
    High,
    Low,
    Close,
    Volume,
}

impl CandleField {
    pub fn read(self, candle: &Candle) -> f64 {
        match self {
            CandleField::Open => candle.open,
            CandleField::High => candle.high,
            CandleField::Low => candle.low,
            CandleField::Close => candle.close,
            CandleField::Volume => candle.volume as f64,
        }
    }
}

impl fmt::Display for CandleField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CandleField::Open => "open",
            CandleField::High => "high",
            CandleField::Low => "low",
            CandleField::Close => "close",
            CandleField::Volume => "volume",
        };
        f.write_str(name)
    }
}

/// Candle timeframe label such as `1m`, `5m`, `1h`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Timeframe(String);

impl Timeframe {
    pub fn new(label: impl Into<String>) -> Self {
        Timeframe(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Bucket width, or `None` when the label is not `<count><s|m|h|d>`.
    pub fn duration(&self) -> Option<Duration> {
        let label = self.0.trim();
        let unit = label.chars().last()?;
        let count: i64 = label[..label.len() - unit.len_utf8()].parse().ok()?;
        if count <= 0 {
            return None;
        }
        match unit {
            's' => Some(Duration::seconds(count)),
            'm' => Some(Duration::minutes(count)),
            'h' => Some(Duration::hours(count)),
            'd' => Some(Duration::days(count)),
            _ => None,
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Timeframe {
    fn from(label: &str) -> Self {
        Timeframe::new(label)
    }
}

/// Completed candles oldest first plus the candle still forming.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandleSeries {
    pub completed: Vec<Candle>,
    pub current: Option<Candle>,
}

impl CandleSeries {
    pub fn new(completed: Vec<Candle>, current: Option<Candle>) -> Self {
        CandleSeries { completed, current }
    }

    /// `0` is the forming candle, `-1` the last completed one, `-2` the one
    /// before it. Positive offsets and offsets beyond history are absent.
    pub fn at_offset(&self, offset: i32) -> Option<&Candle> {
        if offset == 0 {
            return self.current.as_ref();
        }
        if offset > 0 {
            return None;
        }
        let back = offset.unsigned_abs() as usize;
        if back > self.completed.len() {
            return None;
        }
        self.completed.get(self.completed.len() - back)
    }

    pub fn previous(&self) -> Option<&Candle> {
        self.at_offset(-1)
    }
}

/// Rolls ticks into fixed-width candles for one timeframe.
#[derive(Debug, Clone)]
pub struct CandleAggregator {
    timeframe: Timeframe,
    width: Duration,
    history_limit: usize,
    series: CandleSeries,
}

impl CandleAggregator {
    pub fn new(timeframe: Timeframe, history_limit: usize) -> Option<Self> {
        let width = timeframe.duration()?;
        Some(CandleAggregator {
            timeframe,
            width,
            history_limit: history_limit.max(1),
            series: CandleSeries::default(),
        })
    }

    pub fn timeframe(&self) -> &Timeframe {
        &self.timeframe
    }

    pub fn series(&self) -> &CandleSeries {
        &self.series
    }

    /// Feed one tick. Returns `true` when the tick closed the previous candle.
    pub fn on_tick(&mut self, tick: &Tick) -> bool {
        let bucket = match tick.timestamp.duration_trunc(self.width) {
            Ok(b) => b,
            Err(_) => tick.timestamp,
        };

        match self.series.current.as_mut() {
            Some(candle) if candle.timestamp == bucket => {
                candle.update(tick);
                false
            }
            Some(_) => {
                if let Some(done) = self.series.current.take() {
                    self.series.completed.push(done);
                }
                if self.series.completed.len() > self.history_limit {
                    let excess = self.series.completed.len() - self.history_limit;
                    self.series.completed.drain(..excess);
                }
                self.series.current = Some(Candle::from_tick(bucket, tick));
                true
            }
            None => {
                self.series.current = Some(Candle::from_tick(bucket, tick));
                false
            }
        }
    }
}

/// Tick-scoped market view installed by the driver. Immutable during a
/// traversal and shared with background logic through an `Arc`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarketSnapshot {
    pub tick: Option<Tick>,
    pub timestamp: Option<DateTime<Utc>>,
    pub candles: HashMap<Timeframe, CandleSeries>,
    pub indicators: HashMap<String, f64>,
}

impl MarketSnapshot {
    pub fn with_tick(tick: Tick) -> Self {
        MarketSnapshot {
            timestamp: Some(tick.timestamp),
            tick: Some(tick),
            ..Default::default()
        }
    }

    pub fn candle(&self, timeframe: &Timeframe, offset: i32) -> Option<&Candle> {
        self.candles.get(timeframe)?.at_offset(offset)
    }

    pub fn previous_candle(&self, timeframe: &Timeframe) -> Option<&Candle> {
        self.candle(timeframe, -1)
    }

    /// Indicator value; NaN counts as absent.
    pub fn indicator(&self, id: &str) -> Option<f64> {
        self.indicators.get(id).copied().filter(|v| !v.is_nan())
    }
}
