//! Condition tree data structures.
//!
//! - `Condition`: nested AND/OR groups of comparison leaves
//! - `GroupLogic`: how a group combines its children
//! - `Comparator`: the six comparison operators

use std::fmt;

use crate::domain::expression::Expression;
use crate::domain::node::NodeId;

const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupLogic {
    And,
    Or,
}

impl fmt::Display for GroupLogic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupLogic::And => f.write_str("AND"),
            GroupLogic::Or => f.write_str("OR"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Comparator {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Comparator {
    pub fn apply(self, left: f64, right: f64) -> bool {
        match self {
            Comparator::Lt => left < right,
            Comparator::Le => left <= right,
            Comparator::Gt => left > right,
            Comparator::Ge => left >= right,
            Comparator::Eq => (left - right).abs() < EPSILON,
            Comparator::Ne => (left - right).abs() >= EPSILON,
        }
    }

    /// Ordering comparison used for instants, where equality is exact.
    pub fn compare_ord<T: PartialOrd>(self, left: &T, right: &T) -> bool {
        match self {
            Comparator::Lt => left < right,
            Comparator::Le => left <= right,
            Comparator::Gt => left > right,
            Comparator::Ge => left >= right,
            Comparator::Eq => left == right,
            Comparator::Ne => left != right,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Comparator::Lt => "<",
            Comparator::Le => "<=",
            Comparator::Gt => ">",
            Comparator::Ge => ">=",
            Comparator::Eq => "==",
            Comparator::Ne => "!=",
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Group {
        logic: GroupLogic,
        conditions: Vec<Condition>,
    },
    Compare {
        left: Expression,
        op: Comparator,
        right: Expression,
    },
}

impl Condition {
    pub fn and(conditions: Vec<Condition>) -> Self {
        Condition::Group {
            logic: GroupLogic::And,
            conditions,
        }
    }

    pub fn or(conditions: Vec<Condition>) -> Self {
        Condition::Group {
            logic: GroupLogic::Or,
            conditions,
        }
    }

    pub fn compare(left: Expression, op: Comparator, right: Expression) -> Self {
        Condition::Compare { left, op, right }
    }

    /// A leaf with a `time` side on either end.
    pub fn is_time_comparison(&self) -> bool {
        match self {
            Condition::Compare { left, right, .. } => left.is_time() || right.is_time(),
            Condition::Group { .. } => false,
        }
    }

    pub fn leaf_count(&self) -> usize {
        match self {
            Condition::Group { conditions, .. } => conditions.iter().map(|c| c.leaf_count()).sum(),
            Condition::Compare { .. } => 1,
        }
    }

    /// Every `var(node, name)` reference in the tree.
    pub fn node_variable_refs(&self) -> Vec<(&NodeId, &str)> {
        fn walk<'a>(expr: &'a Expression, out: &mut Vec<(&'a NodeId, &'a str)>) {
            match expr {
                Expression::NodeVariable { node_id, name } => out.push((node_id, name.as_str())),
                Expression::Binary { left, right, .. } => {
                    walk(left, out);
                    walk(right, out);
                }
                _ => {}
            }
        }

        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(cond) = stack.pop() {
            match cond {
                Condition::Group { conditions, .. } => stack.extend(conditions.iter().rev()),
                Condition::Compare { left, right, .. } => {
                    walk(left, &mut out);
                    walk(right, &mut out);
                }
            }
        }
        out
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Group { logic, conditions } => {
                write!(f, "{}(", logic)?;
                for (i, c) in conditions.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", c)?;
                }
                f.write_str(")")
            }
            Condition::Compare { left, op, right } => write!(f, "{} {} {}", left, op, right),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::{CandleField, TickField};

    fn ltp_above(v: f64) -> Condition {
        Condition::compare(
            Expression::Live(TickField::Ltp),
            Comparator::Gt,
            Expression::Constant(v),
        )
    }

    #[test]
    fn comparator_semantics() {
        assert!(Comparator::Lt.apply(1.0, 2.0));
        assert!(Comparator::Le.apply(2.0, 2.0));
        assert!(Comparator::Gt.apply(3.0, 2.0));
        assert!(Comparator::Ge.apply(2.0, 2.0));
        assert!(Comparator::Eq.apply(0.1 + 0.2, 0.3));
        assert!(Comparator::Ne.apply(1.0, 1.01));
        assert!(!Comparator::Ne.apply(0.1 + 0.2, 0.3));
    }

    #[test]
    fn nan_never_satisfies_ordering() {
        assert!(!Comparator::Gt.apply(f64::NAN, 1.0));
        assert!(!Comparator::Lt.apply(f64::NAN, 1.0));
    }

    #[test]
    fn time_comparison_detection() {
        let time_leaf = Condition::compare(
            Expression::Time,
            Comparator::Ge,
            Expression::TimeOfDay(chrono::NaiveTime::from_hms_opt(9, 20, 0).unwrap()),
        );
        assert!(time_leaf.is_time_comparison());
        assert!(!ltp_above(100.0).is_time_comparison());
        assert!(!Condition::and(vec![time_leaf]).is_time_comparison());
    }

    #[test]
    fn leaf_count_nested() {
        let tree = Condition::and(vec![
            ltp_above(1.0),
            Condition::or(vec![ltp_above(2.0), ltp_above(3.0)]),
            Condition::and(vec![]),
        ]);
        assert_eq!(tree.leaf_count(), 3);
    }

    #[test]
    fn collects_node_variable_refs_in_order() {
        let tree = Condition::and(vec![
            Condition::compare(
                Expression::Live(TickField::Ltp),
                Comparator::Gt,
                Expression::node_variable("entry", "entry_price"),
            ),
            Condition::compare(
                Expression::candle("1m", CandleField::Low, -1),
                Comparator::Lt,
                Expression::node_variable("signal", "level"),
            ),
        ]);
        let refs = tree.node_variable_refs();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0], (&NodeId::from("entry"), "entry_price"));
        assert_eq!(refs[1], (&NodeId::from("signal"), "level"));
    }

    #[test]
    fn display_nested_group() {
        let tree = Condition::or(vec![ltp_above(100.0), Condition::and(vec![])]);
        assert_eq!(tree.to_string(), "OR(ltp > 100, AND())");
    }
}
