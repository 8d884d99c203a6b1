//! Tick feed port.

use crate::domain::error::TradeflowError;
use crate::domain::market::Tick;
use std::collections::HashMap;

/// One row of a feed: the tick plus indicator values published with it.
#[derive(Debug, Clone, PartialEq)]
pub struct TickRecord {
    pub tick: Tick,
    pub indicators: HashMap<String, f64>,
}

pub trait TickSource {
    /// Returns the feed in timestamp order, restricted to `symbol` when given.
    fn load_ticks(&self, symbol: Option<&str>) -> Result<Vec<TickRecord>, TradeflowError>;
}
