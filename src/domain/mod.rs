//! Core domain types and logic.

pub mod market;
pub mod expression;
pub mod expression_eval;
pub mod condition;
pub mod condition_parser;
pub mod analyzer;
pub mod condition_eval;
pub mod position;
pub mod node;
pub mod graph;
pub mod dispatch;
pub mod context;
pub mod run;
pub mod config_validation;
pub mod error;
