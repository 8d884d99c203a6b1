//! Expression evaluation port.

use chrono::{FixedOffset, Offset, Utc};

use crate::domain::error::EvalError;
use crate::domain::expression::Expression;
use crate::domain::market::MarketSnapshot;
use crate::ports::position_port::PositionStore;

/// Tick-scoped, read-only inputs for resolving an expression.
#[derive(Clone, Copy)]
pub struct EvalContext<'a> {
    pub market: &'a MarketSnapshot,
    pub store: &'a dyn PositionStore,
    /// Zone in which time-of-day literals are interpreted.
    pub timezone: FixedOffset,
}

impl<'a> EvalContext<'a> {
    pub fn new(market: &'a MarketSnapshot, store: &'a dyn PositionStore) -> Self {
        Self {
            market,
            store,
            timezone: Utc.fix(),
        }
    }

    pub fn with_timezone(mut self, timezone: FixedOffset) -> Self {
        self.timezone = timezone;
        self
    }
}

pub trait ExpressionEvaluator: Send + Sync {
    /// `Ok(None)` is expected absence (no tick yet, short history, unknown
    /// variable); `Err` is a defect in the expression or the evaluator.
    fn evaluate(&self, expression: &Expression, ctx: &EvalContext<'_>) -> Result<Option<f64>, EvalError>;
}
