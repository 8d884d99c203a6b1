//! Condition tree evaluation.
//!
//! A [`ConditionEvaluator`] owns one immutable tree plus its one-time
//! [`ConditionAnalysis`]. Evaluation is a pure function of the tree and the
//! tick-scoped [`EvalContext`]:
//!
//! - groups evaluate children left to right and short-circuit (AND on the
//!   first false, OR on the first true); an empty group is true
//! - a leaf with an absent side is false
//! - a time leaf compares the current timestamp against a time-of-day literal
//!   placed on the current local date of the context's timezone
//! - evaluator defects are logged and propagated

use chrono::{DateTime, FixedOffset, NaiveTime, TimeZone, Timelike, Utc};
use tracing::error;

use crate::domain::analyzer::{ConditionAnalysis, LeafClass, PlanNode, analyze};
use crate::domain::condition::{Comparator, Condition, GroupLogic};
use crate::domain::error::EvalError;
use crate::domain::expression::Expression;
use crate::ports::expression_port::{EvalContext, ExpressionEvaluator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalStage {
    /// Tick-level evaluation.
    Full,
    /// Candle-level feasibility pre-check.
    Stage1,
}

/// One evaluated leaf. Time leaves report seconds since local midnight.
#[derive(Debug, Clone, PartialEq)]
pub struct LeafTrace {
    pub text: String,
    pub class: LeafClass,
    pub stage: EvalStage,
    pub left: Option<f64>,
    pub right: Option<f64>,
    pub satisfied: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub satisfied: bool,
    /// Leaves in evaluation order; short-circuited leaves are absent.
    pub trace: Vec<LeafTrace>,
}

#[derive(Debug, Clone)]
pub struct ConditionEvaluator {
    condition: Condition,
    analysis: ConditionAnalysis,
}

impl ConditionEvaluator {
    pub fn new(condition: Condition) -> Self {
        let analysis = analyze(&condition);
        Self {
            condition,
            analysis,
        }
    }

    pub fn condition(&self) -> &Condition {
        &self.condition
    }

    pub fn analysis(&self) -> &ConditionAnalysis {
        &self.analysis
    }

    pub fn evaluate(
        &self,
        ctx: &EvalContext<'_>,
        evaluator: &dyn ExpressionEvaluator,
    ) -> Result<Evaluation, EvalError> {
        self.run(EvalStage::Full, ctx, evaluator)
    }

    /// Coarse pass a caller can use to reject a candle before per-tick
    /// evaluation. Live leaves read the current tick, so they agree with
    /// [`ConditionEvaluator::evaluate`].
    pub fn evaluate_stage1(
        &self,
        ctx: &EvalContext<'_>,
        evaluator: &dyn ExpressionEvaluator,
    ) -> Result<Evaluation, EvalError> {
        self.run(EvalStage::Stage1, ctx, evaluator)
    }

    fn run(
        &self,
        stage: EvalStage,
        ctx: &EvalContext<'_>,
        evaluator: &dyn ExpressionEvaluator,
    ) -> Result<Evaluation, EvalError> {
        let mut walk = Walk {
            stage,
            ctx,
            evaluator,
            trace: Vec::new(),
        };
        let satisfied = walk.node(&self.analysis.plan)?;
        Ok(Evaluation {
            satisfied,
            trace: walk.trace,
        })
    }
}

struct Walk<'a, 'b> {
    stage: EvalStage,
    ctx: &'a EvalContext<'b>,
    evaluator: &'a dyn ExpressionEvaluator,
    trace: Vec<LeafTrace>,
}

impl Walk<'_, '_> {
    fn node(&mut self, plan: &PlanNode) -> Result<bool, EvalError> {
        match plan {
            PlanNode::Group { logic, children } => {
                for child in children {
                    let result = self.node(child)?;
                    match logic {
                        GroupLogic::And if !result => return Ok(false),
                        GroupLogic::Or if result => return Ok(true),
                        _ => {}
                    }
                }
                Ok(match logic {
                    GroupLogic::And => true,
                    // An empty OR is the same identity as an empty AND.
                    GroupLogic::Or => children.is_empty(),
                })
            }
            PlanNode::Leaf {
                class,
                left,
                op,
                right,
            } => {
                let (l, r, satisfied) = match class {
                    LeafClass::Time => self.time_leaf(plan, left, *op, right)?,
                    LeafClass::Live | LeafClass::Historical => self.value_leaf(plan, left, *op, right)?,
                };
                self.trace.push(LeafTrace {
                    text: plan.text(),
                    class: *class,
                    stage: self.stage,
                    left: l,
                    right: r,
                    satisfied,
                });
                Ok(satisfied)
            }
        }
    }

    fn value_leaf(
        &self,
        plan: &PlanNode,
        left: &Expression,
        op: Comparator,
        right: &Expression,
    ) -> Result<(Option<f64>, Option<f64>, bool), EvalError> {
        let l = self.resolve(plan, left)?;
        let r = self.resolve(plan, right)?;
        let satisfied = match (l, r) {
            (Some(l), Some(r)) => op.apply(l, r),
            _ => false,
        };
        Ok((l, r, satisfied))
    }

    fn resolve(&self, plan: &PlanNode, expression: &Expression) -> Result<Option<f64>, EvalError> {
        self.evaluator.evaluate(expression, self.ctx).inspect_err(|err| {
            error!(
                condition = %plan.text(),
                expression = %expression,
                timestamp = ?self.ctx.market.timestamp,
                stage = ?self.stage,
                %err,
                "condition evaluation failed"
            );
        })
    }

    fn time_leaf(
        &self,
        plan: &PlanNode,
        left: &Expression,
        op: Comparator,
        right: &Expression,
    ) -> Result<(Option<f64>, Option<f64>, bool), EvalError> {
        let Some(now) = self.ctx.market.timestamp else {
            return Ok((None, None, false));
        };
        let zone = self.ctx.timezone;
        let l = time_side(plan, left, now, zone)?;
        let r = time_side(plan, right, now, zone)?;
        let seconds = |t: &DateTime<FixedOffset>| Some(f64::from(t.num_seconds_from_midnight()));
        Ok((seconds(&l), seconds(&r), op.compare_ord(&l, &r)))
    }
}

fn time_side(
    plan: &PlanNode,
    side: &Expression,
    now: DateTime<Utc>,
    zone: FixedOffset,
) -> Result<DateTime<FixedOffset>, EvalError> {
    let local_now = now.with_timezone(&zone);
    match side {
        Expression::Time => Ok(local_now),
        Expression::TimeOfDay(at) => Ok(localize(local_now, *at, zone)),
        other => {
            let err = EvalError::InvalidTimeComparison {
                condition: plan.text(),
                reason: format!("{} is not a time-of-day literal", other),
            };
            error!(condition = %plan.text(), %err, "condition evaluation failed");
            Err(err)
        }
    }
}

/// `at` on the local date of `local_now`. A fixed offset maps every local
/// time to exactly one instant.
fn localize(local_now: DateTime<FixedOffset>, at: NaiveTime, zone: FixedOffset) -> DateTime<FixedOffset> {
    let local = local_now.date_naive().and_time(at);
    zone.from_utc_datetime(&(local - zone))
}
