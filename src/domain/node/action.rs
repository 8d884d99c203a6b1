//! Action node logic: open, close and square off positions.
//!
//! Logic only describes the position changes; they reach the store when the
//! state machine applies a completed outcome.

use tracing::{debug, info};

use crate::domain::condition::Condition;
use crate::domain::condition_eval::ConditionEvaluator;
use crate::domain::error::EvalError;
use crate::domain::market::Tick;
use crate::domain::node::{LogicInputs, LogicOutcome, NodeId, PositionAction};
use crate::domain::position::Position;

#[derive(Debug, Clone, PartialEq)]
pub struct EntrySpec {
    /// Signed: negative opens a short.
    pub quantity: i64,
}

impl EntrySpec {
    pub fn new(quantity: i64) -> Self {
        Self { quantity }
    }

    pub fn run(&self, node_id: &NodeId, re_entry_num: u32, inputs: &LogicInputs) -> Result<LogicOutcome, EvalError> {
        let Some(tick) = inputs.market.tick.as_ref() else {
            debug!(node_id = %node_id, "entry waiting for first tick");
            return Ok(LogicOutcome::not_completed());
        };

        let previous = inputs
            .store
            .open_positions()
            .iter()
            .filter(|p| &p.node_id == node_id)
            .count()
            + inputs
                .store
                .closed_positions()
                .iter()
                .filter(|c| &c.position.node_id == node_id)
                .count();
        let position_num = u32::try_from(previous).unwrap_or(u32::MAX).saturating_add(1);

        let position = Position {
            id: format!("{}#{}", node_id, position_num),
            node_id: node_id.clone(),
            symbol: tick.symbol.clone(),
            quantity: self.quantity,
            entry_price: tick.ltp,
            entry_time: tick.timestamp,
            re_entry_num,
            position_num,
        };
        debug!(node_id = %node_id, position_id = %position.id, "entry prepared");

        Ok(LogicOutcome {
            logic_completed: true,
            variables: vec![
                ("entry_price".to_string(), tick.ltp),
                ("quantity".to_string(), self.quantity as f64),
            ],
            actions: vec![PositionAction::Open(position)],
            ..LogicOutcome::default()
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExitSpec {
    /// Entry node whose positions are closed; all open positions when unset.
    pub target: Option<NodeId>,
    /// Recorded on closed positions; "exit" when unset.
    pub reason: Option<String>,
}

impl ExitSpec {
    pub fn new(target: Option<NodeId>) -> Self {
        Self { target, reason: None }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn run(&self, inputs: &LogicInputs) -> Result<LogicOutcome, EvalError> {
        let Some(tick) = inputs.market.tick.as_ref() else {
            return Ok(LogicOutcome::not_completed());
        };
        let reason = self.reason.as_deref().unwrap_or("exit");
        let actions = close_actions(inputs, tick, reason, |p| {
            self.target.as_ref().is_none_or(|target| &p.node_id == target)
        });
        if actions.is_empty() {
            debug!(target = ?self.target, "exit found nothing to close");
        }
        Ok(LogicOutcome {
            logic_completed: true,
            actions,
            ..LogicOutcome::default()
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct SquareOffSpec {
    condition: Option<ConditionEvaluator>,
}

impl SquareOffSpec {
    pub fn new(condition: Option<Condition>) -> Self {
        Self {
            condition: condition.map(ConditionEvaluator::new),
        }
    }

    pub fn condition(&self) -> Option<&ConditionEvaluator> {
        self.condition.as_ref()
    }

    pub fn run(&self, inputs: &LogicInputs) -> Result<LogicOutcome, EvalError> {
        if let Some(condition) = &self.condition {
            let ctx = inputs.eval_context();
            if !condition.evaluate(&ctx, inputs.evaluator.as_ref())?.satisfied {
                return Ok(LogicOutcome::not_completed());
            }
        }
        let Some(tick) = inputs.market.tick.as_ref() else {
            return Ok(LogicOutcome::not_completed());
        };
        let actions = close_actions(inputs, tick, "square_off", |_| true);
        info!(
            positions = actions.len(),
            timestamp = %tick.timestamp,
            "square off requested"
        );
        Ok(LogicOutcome {
            logic_completed: true,
            actions,
            terminate: true,
            ..LogicOutcome::default()
        })
    }
}

fn close_actions<F>(inputs: &LogicInputs, tick: &Tick, reason: &str, select: F) -> Vec<PositionAction>
where
    F: Fn(&Position) -> bool,
{
    inputs
        .store
        .open_positions()
        .into_iter()
        .filter(|p| select(p))
        .map(|p| PositionAction::Close {
            position_id: p.id,
            exit_price: tick.ltp,
            exit_time: tick.timestamp,
            reason: reason.to_string(),
        })
        .collect()
}
