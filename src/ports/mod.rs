//! Port traits the domain depends on.

pub mod config_port;
pub mod expression_port;
pub mod position_port;
pub mod tick_port;
