//! Concrete adapter implementations for ports.

pub mod csv_tick_adapter;
pub mod file_config_adapter;
pub mod memory_position_store;
pub mod strategy_file_adapter;
