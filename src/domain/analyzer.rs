//! One-time static analysis of a condition tree.
//!
//! Classifies every leaf by the data it needs so the evaluator can run either
//! a full tick-level pass or a coarser candle-level pass without re-inspecting
//! expressions on every tick.

use crate::domain::condition::{Comparator, Condition, GroupLogic};
use crate::domain::expression::Expression;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeafClass {
    /// Reads the live tick on at least one side.
    Live,
    /// Reads only candles, indicators, node variables, positions or constants.
    Historical,
    /// Compares the current timestamp against a time-of-day literal.
    Time,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlanNode {
    Group {
        logic: GroupLogic,
        children: Vec<PlanNode>,
    },
    Leaf {
        class: LeafClass,
        left: Expression,
        op: Comparator,
        right: Expression,
    },
}

impl PlanNode {
    pub fn text(&self) -> String {
        match self {
            PlanNode::Leaf {
                left, op, right, ..
            } => format!("{} {} {}", left, op, right),
            PlanNode::Group { logic, children } => {
                let inner: Vec<String> = children.iter().map(|c| c.text()).collect();
                format!("{}({})", logic, inner.join(", "))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConditionAnalysis {
    pub plan: PlanNode,
    pub has_live_data: bool,
    pub live_leaves: usize,
    pub historical_leaves: usize,
    pub time_leaves: usize,
}

impl ConditionAnalysis {
    /// Tick-level evaluation only adds information when some leaf reads the
    /// live tick.
    pub fn should_use_stage2(&self) -> bool {
        self.has_live_data
    }

    pub fn total_leaves(&self) -> usize {
        self.live_leaves + self.historical_leaves + self.time_leaves
    }

    pub fn root_logic(&self) -> Option<GroupLogic> {
        match &self.plan {
            PlanNode::Group { logic, .. } => Some(*logic),
            PlanNode::Leaf { .. } => None,
        }
    }
}

pub fn classify_leaf(left: &Expression, right: &Expression) -> LeafClass {
    if left.is_time() || right.is_time() {
        LeafClass::Time
    } else if left.contains_live() || right.contains_live() {
        LeafClass::Live
    } else {
        LeafClass::Historical
    }
}

pub fn analyze(condition: &Condition) -> ConditionAnalysis {
    let mut analysis = ConditionAnalysis {
        plan: PlanNode::Group {
            logic: GroupLogic::And,
            children: Vec::new(),
        },
        has_live_data: false,
        live_leaves: 0,
        historical_leaves: 0,
        time_leaves: 0,
    };
    analysis.plan = build_plan(condition, &mut analysis);
    analysis.has_live_data = analysis.live_leaves > 0;
    analysis
}

fn build_plan(condition: &Condition, analysis: &mut ConditionAnalysis) -> PlanNode {
    match condition {
        Condition::Group { logic, conditions } => PlanNode::Group {
            logic: *logic,
            children: conditions.iter().map(|c| build_plan(c, analysis)).collect(),
        },
        Condition::Compare { left, op, right } => {
            let class = classify_leaf(left, right);
            match class {
                LeafClass::Live => analysis.live_leaves += 1,
                LeafClass::Historical => analysis.historical_leaves += 1,
                LeafClass::Time => analysis.time_leaves += 1,
            }
            PlanNode::Leaf {
                class,
                left: left.clone(),
                op: *op,
                right: right.clone(),
            }
        }
    }
}
