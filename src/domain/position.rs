//! Positions opened and closed by action nodes.

use chrono::{DateTime, Utc};

use crate::domain::node::NodeId;

#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub id: String,
    pub node_id: NodeId,
    pub symbol: String,
    pub quantity: i64,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub re_entry_num: u32,
    pub position_num: u32,
}

impl Position {
    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.quantity as f64 * (price - self.entry_price)
    }

    pub fn close(self, exit_price: f64, exit_time: DateTime<Utc>, reason: &str) -> ClosedPosition {
        let pnl = self.unrealized_pnl(exit_price);
        ClosedPosition {
            position: self,
            exit_price,
            exit_time,
            pnl,
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClosedPosition {
    pub position: Position,
    pub exit_price: f64,
    pub exit_time: DateTime<Utc>,
    pub pnl: f64,
    pub reason: String,
}
