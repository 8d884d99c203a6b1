//! Position and node-variable store port ("GPS").

use chrono::{DateTime, Utc};

use crate::domain::node::NodeId;
use crate::domain::position::{ClosedPosition, Position};

/// Shared between the driver thread and background node logic, so every
/// method takes `&self` and implementations own their synchronisation.
pub trait PositionStore: Send + Sync {
    fn set_node_variable(&self, node_id: &NodeId, name: &str, value: f64);

    fn get_node_variable(&self, node_id: &NodeId, name: &str) -> Option<f64>;

    fn open_positions(&self) -> Vec<Position>;

    fn add_position(&self, position: Position);

    fn close_position(
        &self,
        position_id: &str,
        exit_price: f64,
        exit_time: DateTime<Utc>,
        reason: &str,
    ) -> Option<ClosedPosition>;

    fn closed_positions(&self) -> Vec<ClosedPosition>;

    /// Default: no-op for stores that do not track marks.
    fn mark_to_market(&self, _symbol: &str, _price: f64) {}

    fn has_open_positions(&self) -> bool {
        !self.open_positions().is_empty()
    }
}
