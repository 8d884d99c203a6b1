//! Typed expressions compared by condition leaves.

use chrono::NaiveTime;
use std::fmt;

use crate::domain::market::{CandleField, TickField, Timeframe};
use crate::domain::node::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PositionField {
    OpenCount,
    EntryPrice,
    UnrealizedPnl,
    /// Sum over closed positions.
    RealizedPnl,
    /// Realized plus unrealized.
    TotalPnl,
}

impl fmt::Display for PositionField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PositionField::OpenCount => "open_count",
            PositionField::EntryPrice => "entry_price",
            PositionField::UnrealizedPnl => "unrealized_pnl",
            PositionField::RealizedPnl => "realized_pnl",
            PositionField::TotalPnl => "total_pnl",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl ArithOp {
    /// Division by zero is absent rather than infinite.
    pub fn apply(self, left: f64, right: f64) -> Option<f64> {
        match self {
            ArithOp::Add => Some(left + right),
            ArithOp::Sub => Some(left - right),
            ArithOp::Mul => Some(left * right),
            ArithOp::Div if right == 0.0 => None,
            ArithOp::Div => Some(left / right),
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Constant(f64),
    Live(TickField),
    Candle {
        timeframe: Timeframe,
        field: CandleField,
        offset: i32,
    },
    Indicator(String),
    NodeVariable {
        node_id: NodeId,
        name: String,
    },
    Position(PositionField),
    /// The current timestamp; only meaningful inside a time comparison.
    Time,
    /// `HH:MM[:SS]` literal paired with [`Expression::Time`].
    TimeOfDay(NaiveTime),
    Binary {
        op: ArithOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
}

impl Expression {
    pub fn binary(op: ArithOp, left: Expression, right: Expression) -> Self {
        Expression::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn candle(timeframe: impl Into<Timeframe>, field: CandleField, offset: i32) -> Self {
        Expression::Candle {
            timeframe: timeframe.into(),
            field,
            offset,
        }
    }

    pub fn node_variable(node_id: impl Into<NodeId>, name: impl Into<String>) -> Self {
        Expression::NodeVariable {
            node_id: node_id.into(),
            name: name.into(),
        }
    }

    /// True when the expression reads the live tick anywhere in its tree.
    pub fn contains_live(&self) -> bool {
        match self {
            Expression::Live(_) => true,
            Expression::Binary { left, right, .. } => left.contains_live() || right.contains_live(),
            _ => false,
        }
    }

    pub fn is_time(&self) -> bool {
        matches!(self, Expression::Time)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Constant(v) => write!(f, "{}", v),
            Expression::Live(field) => write!(f, "{}", field),
            Expression::Candle {
                timeframe,
                field,
                offset,
            } => write!(f, "candle({}, {}).{}", timeframe, offset, field),
            Expression::Indicator(id) => write!(f, "indicator({})", id),
            Expression::NodeVariable { node_id, name } => write!(f, "var({}, {})", node_id, name),
            Expression::Position(field) => write!(f, "position.{}", field),
            Expression::Time => f.write_str("time"),
            Expression::TimeOfDay(t) => write!(f, "{}", t.format("%H:%M:%S")),
            Expression::Binary { op, left, right } => {
                write!(f, "({} {} {})", left, op.symbol(), right)
            }
        }
    }
}
