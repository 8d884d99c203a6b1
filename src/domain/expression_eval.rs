//! Reference [`ExpressionEvaluator`] reading straight from the market
//! snapshot and the position store.

use crate::domain::error::EvalError;
use crate::domain::expression::{Expression, PositionField};
use crate::ports::expression_port::{EvalContext, ExpressionEvaluator};

#[derive(Debug, Clone, Copy, Default)]
pub struct MarketExpressionEvaluator;

impl MarketExpressionEvaluator {
    pub fn new() -> Self {
        MarketExpressionEvaluator
    }

    fn resolve_position(field: PositionField, ctx: &EvalContext<'_>) -> Option<f64> {
        let open = ctx.store.open_positions();
        let unrealized = || {
            let ltp = ctx.market.tick.as_ref()?.ltp;
            Some(open.iter().map(|p| p.unrealized_pnl(ltp)).sum::<f64>())
        };
        let realized = || ctx.store.closed_positions().iter().map(|c| c.pnl).sum::<f64>();
        match field {
            PositionField::OpenCount => Some(open.len() as f64),
            PositionField::EntryPrice => open
                .iter()
                .max_by_key(|p| p.position_num)
                .map(|p| p.entry_price),
            PositionField::UnrealizedPnl if open.is_empty() => None,
            PositionField::UnrealizedPnl => unrealized(),
            PositionField::RealizedPnl => Some(realized()),
            // Flat books need no price.
            PositionField::TotalPnl if open.is_empty() => Some(realized()),
            PositionField::TotalPnl => Some(realized() + unrealized()?),
        }
    }
}

impl ExpressionEvaluator for MarketExpressionEvaluator {
    fn evaluate(&self, expression: &Expression, ctx: &EvalContext<'_>) -> Result<Option<f64>, EvalError> {
        let value = match expression {
            Expression::Constant(v) => Some(*v),
            Expression::Live(field) => ctx.market.tick.as_ref().map(|t| field.read(t)),
            Expression::Candle {
                timeframe,
                field,
                offset,
            } => ctx.market.candle(timeframe, *offset).map(|c| field.read(c)),
            Expression::Indicator(id) => ctx.market.indicator(id),
            Expression::NodeVariable { node_id, name } => ctx.store.get_node_variable(node_id, name),
            Expression::Position(field) => Self::resolve_position(*field, ctx),
            Expression::Time | Expression::TimeOfDay(_) => {
                return Err(EvalError::UnsupportedExpression {
                    expression: expression.to_string(),
                    reason: "time values are only valid inside a time comparison".into(),
                });
            }
            Expression::Binary { op, left, right } => {
                let l = self.evaluate(left, ctx)?;
                let r = self.evaluate(right, ctx)?;
                match (l, r) {
                    (Some(l), Some(r)) => op.apply(l, r),
                    _ => None,
                }
            }
        };
        Ok(value.filter(|v| !v.is_nan()))
    }
}
