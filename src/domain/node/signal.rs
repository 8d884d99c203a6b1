//! Entry, exit and re-entry signal logic.

use tracing::{debug, info};

use crate::domain::condition::Condition;
use crate::domain::condition_eval::ConditionEvaluator;
use crate::domain::error::EvalError;
use crate::domain::expression::Expression;
use crate::domain::node::{LogicInputs, LogicOutcome, NodeId, SignalRecord};

#[derive(Debug, Clone)]
pub struct SignalSpec {
    condition: ConditionEvaluator,
    re_entry_condition: Option<ConditionEvaluator>,
    variables: Vec<(String, Expression)>,
}

impl SignalSpec {
    pub fn new(condition: Condition) -> Self {
        Self {
            condition: ConditionEvaluator::new(condition),
            re_entry_condition: None,
            variables: Vec::new(),
        }
    }

    pub fn with_re_entry_condition(mut self, condition: Condition) -> Self {
        self.re_entry_condition = Some(ConditionEvaluator::new(condition));
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, expression: Expression) -> Self {
        self.variables.push((name.into(), expression));
        self
    }

    pub fn condition(&self) -> &ConditionEvaluator {
        &self.condition
    }

    pub fn re_entry_condition(&self) -> Option<&ConditionEvaluator> {
        self.re_entry_condition.as_ref()
    }

    pub fn variables(&self) -> &[(String, Expression)] {
        &self.variables
    }

    /// Re-entry tree when the counter is positive and one is configured,
    /// otherwise the normal tree.
    pub fn select(&self, re_entry_num: u32) -> &ConditionEvaluator {
        match (&self.re_entry_condition, re_entry_num) {
            (Some(re_entry), n) if n > 0 => re_entry,
            _ => &self.condition,
        }
    }

    pub fn run(&self, node_id: &NodeId, re_entry_num: u32, inputs: &LogicInputs) -> Result<LogicOutcome, EvalError> {
        let tree = self.select(re_entry_num);
        let ctx = inputs.eval_context();
        let evaluation = tree.evaluate(&ctx, inputs.evaluator.as_ref())?;
        if !evaluation.satisfied {
            debug!(node_id = %node_id, re_entry_num, "signal condition not met");
            return Ok(LogicOutcome::not_completed());
        }

        let mut variables = Vec::with_capacity(self.variables.len());
        for (name, expression) in &self.variables {
            match inputs.evaluator.evaluate(expression, &ctx)? {
                Some(value) => variables.push((name.clone(), value)),
                None => debug!(node_id = %node_id, name = %name, "signal variable absent, not stored"),
            }
        }

        let condition = tree.condition().to_string();
        info!(
            node_id = %node_id,
            re_entry_num,
            condition = %condition,
            timestamp = ?inputs.market.timestamp,
            "signal fired"
        );

        Ok(LogicOutcome {
            logic_completed: true,
            signal: Some(SignalRecord {
                node_id: node_id.clone(),
                timestamp: inputs.market.timestamp,
                condition,
                re_entry_num,
                variables: variables.clone(),
                trace: evaluation.trace,
            }),
            variables,
            ..LogicOutcome::default()
        })
    }
}
