//! In-memory position and node-variable store.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::domain::node::NodeId;
use crate::domain::position::{ClosedPosition, Position};
use crate::ports::position_port::PositionStore;

#[derive(Debug, Default)]
struct StoreInner {
    variables: HashMap<(NodeId, String), f64>,
    open: Vec<Position>,
    closed: Vec<ClosedPosition>,
    marks: HashMap<String, f64>,
}

#[derive(Debug, Default)]
pub struct MemoryPositionStore {
    inner: RwLock<StoreInner>,
}

impl MemoryPositionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn realized_pnl(&self) -> f64 {
        self.inner.read().closed.iter().map(|c| c.pnl).sum()
    }

    /// Unrealised PnL at the last mark of each symbol.
    pub fn unrealized_pnl(&self) -> f64 {
        let inner = self.inner.read();
        inner
            .open
            .iter()
            .filter_map(|p| inner.marks.get(&p.symbol).map(|price| p.unrealized_pnl(*price)))
            .sum()
    }

    pub fn last_mark(&self, symbol: &str) -> Option<f64> {
        self.inner.read().marks.get(symbol).copied()
    }
}

impl PositionStore for MemoryPositionStore {
    fn set_node_variable(&self, node_id: &NodeId, name: &str, value: f64) {
        debug!(node_id = %node_id, name, value, "node variable stored");
        self.inner
            .write()
            .variables
            .insert((node_id.clone(), name.to_string()), value);
    }

    fn get_node_variable(&self, node_id: &NodeId, name: &str) -> Option<f64> {
        self.inner
            .read()
            .variables
            .get(&(node_id.clone(), name.to_string()))
            .copied()
    }

    fn open_positions(&self) -> Vec<Position> {
        self.inner.read().open.clone()
    }

    fn add_position(&self, position: Position) {
        info!(
            position_id = %position.id,
            node_id = %position.node_id,
            quantity = position.quantity,
            entry_price = position.entry_price,
            "position opened"
        );
        self.inner.write().open.push(position);
    }

    fn close_position(
        &self,
        position_id: &str,
        exit_price: f64,
        exit_time: DateTime<Utc>,
        reason: &str,
    ) -> Option<ClosedPosition> {
        let mut inner = self.inner.write();
        let idx = inner.open.iter().position(|p| p.id == position_id)?;
        let closed = inner.open.remove(idx).close(exit_price, exit_time, reason);
        info!(
            position_id,
            exit_price,
            pnl = closed.pnl,
            reason,
            "position closed"
        );
        inner.closed.push(closed.clone());
        Some(closed)
    }

    fn closed_positions(&self) -> Vec<ClosedPosition> {
        self.inner.read().closed.clone()
    }

    fn mark_to_market(&self, symbol: &str, price: f64) {
        self.inner.write().marks.insert(symbol.to_string(), price);
    }
}
