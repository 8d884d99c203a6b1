//! CSV tick feed adapter.
//!
//! Columns are matched by header name: `timestamp` (RFC 3339), `symbol`,
//! `ltp`, optional `qty` and `oi`. Any other column is read as an indicator;
//! blank cells are skipped.

use crate::domain::error::TradeflowError;
use crate::domain::market::Tick;
use crate::ports::tick_port::{TickRecord, TickSource};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::info;

pub struct CsvTickAdapter {
    path: PathBuf,
}

struct Columns {
    timestamp: usize,
    symbol: usize,
    ltp: usize,
    qty: Option<usize>,
    oi: Option<usize>,
    indicators: Vec<(usize, String)>,
}

impl Columns {
    fn from_headers(headers: &csv::StringRecord) -> Result<Self, TradeflowError> {
        let find = |name: &str| headers.iter().position(|h| h.trim().eq_ignore_ascii_case(name));
        let required = |name: &str| {
            find(name).ok_or_else(|| TradeflowError::Data {
                reason: format!("missing {} column", name),
            })
        };
        let timestamp = required("timestamp")?;
        let symbol = required("symbol")?;
        let ltp = required("ltp")?;
        let qty = find("qty");
        let oi = find("oi");
        let known = [Some(timestamp), Some(symbol), Some(ltp), qty, oi];
        let indicators = headers
            .iter()
            .enumerate()
            .filter(|(i, _)| !known.contains(&Some(*i)))
            .map(|(i, h)| (i, h.trim().to_string()))
            .collect();
        Ok(Self {
            timestamp,
            symbol,
            ltp,
            qty,
            oi,
            indicators,
        })
    }
}

impl CsvTickAdapter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn parse_record(
        columns: &Columns,
        record: &csv::StringRecord,
        line: usize,
    ) -> Result<TickRecord, TradeflowError> {
        let cell = |idx: usize| record.get(idx).map(str::trim).unwrap_or("");
        let bad = |column: &str, e: &dyn std::fmt::Display| TradeflowError::Data {
            reason: format!("line {}: invalid {} value: {}", line, column, e),
        };

        let timestamp = DateTime::parse_from_rfc3339(cell(columns.timestamp))
            .map_err(|e| bad("timestamp", &e))?
            .with_timezone(&Utc);
        let ltp = cell(columns.ltp)
            .parse::<f64>()
            .map_err(|e| bad("ltp", &e))?;
        let whole = |idx: Option<usize>, column: &str| -> Result<i64, TradeflowError> {
            match idx.map(cell).filter(|s| !s.is_empty()) {
                None => Ok(0),
                Some(s) => s.parse::<i64>().map_err(|e| bad(column, &e)),
            }
        };
        let quantity = whole(columns.qty, "qty")?;
        let open_interest = whole(columns.oi, "oi")?;

        let mut indicators = HashMap::new();
        for (idx, name) in &columns.indicators {
            let raw = cell(*idx);
            if raw.is_empty() {
                continue;
            }
            let value = raw.parse::<f64>().map_err(|e| bad(name.as_str(), &e))?;
            indicators.insert(name.clone(), value);
        }

        Ok(TickRecord {
            tick: Tick {
                symbol: cell(columns.symbol).to_string(),
                ltp,
                quantity,
                open_interest,
                timestamp,
            },
            indicators,
        })
    }
}

impl TickSource for CsvTickAdapter {
    fn load_ticks(&self, symbol: Option<&str>) -> Result<Vec<TickRecord>, TradeflowError> {
        let mut rdr = csv::Reader::from_path(&self.path).map_err(|e| TradeflowError::Data {
            reason: format!("failed to read {}: {}", self.path.display(), e),
        })?;
        let headers = rdr.headers().map_err(|e| TradeflowError::Data {
            reason: format!("CSV header error: {}", e),
        })?;
        let columns = Columns::from_headers(headers)?;

        let mut ticks = Vec::new();
        for (i, result) in rdr.records().enumerate() {
            let record = result.map_err(|e| TradeflowError::Data {
                reason: format!("CSV parse error: {}", e),
            })?;
            let parsed = Self::parse_record(&columns, &record, i + 2)?;
            if symbol.is_some_and(|s| s != parsed.tick.symbol) {
                continue;
            }
            ticks.push(parsed);
        }

        ticks.sort_by_key(|r| r.tick.timestamp);
        info!(path = %self.path.display(), ticks = ticks.len(), "tick feed loaded");
        Ok(ticks)
    }
}
