//! The per-node execute protocol.
//!
//! Every tick the driver calls [`execute`] on each start node. A node:
//!
//! 1. returns immediately if it was already visited this tick
//! 2. marks itself visited
//! 3. when Active, goes Pending and runs its logic once; completion applies
//!    the logic's effects, activates the children (clearing their visited
//!    flags) and deactivates the node, anything else (including an error) puts it back to Active
//! 4. when Pending, applies a finished background result if there is one
//! 5. when Inactive, skips logic
//! 6. always recurses into its children, in order

use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::domain::context::RunContext;
use crate::domain::dispatch::{LogicResult, run_guarded};
use crate::domain::error::EvalError;
use crate::domain::node::{LogicOutcome, Node, NodeId, NodeStatus, PositionAction};

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    AlreadyVisited,
    /// Id not present in the graph or the runtime table.
    Unknown,
    Inactive,
    Completed,
    /// Logic ran and did not complete; Active again.
    Retrying,
    /// Logic failed; Active again.
    Failed(EvalError),
    /// Logic handed to the background pool; Pending.
    Dispatched,
    /// Background logic still running.
    StillPending,
}

impl ExecutionOutcome {
    /// True when logic ran or resolved during this visit.
    pub fn ran_logic(&self) -> bool {
        matches!(
            self,
            ExecutionOutcome::Completed
                | ExecutionOutcome::Retrying
                | ExecutionOutcome::Failed(_)
                | ExecutionOutcome::Dispatched
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeExecution {
    pub node_id: NodeId,
    pub outcome: ExecutionOutcome,
    pub children: Vec<NodeExecution>,
}

impl NodeExecution {
    fn leaf(node_id: &NodeId, outcome: ExecutionOutcome) -> Self {
        Self {
            node_id: node_id.clone(),
            outcome,
            children: Vec::new(),
        }
    }

    /// Every visit in depth-first order, including already-visited stubs.
    pub fn flatten(&self) -> Vec<(&NodeId, &ExecutionOutcome)> {
        let mut out = vec![(&self.node_id, &self.outcome)];
        for child in &self.children {
            out.extend(child.flatten());
        }
        out
    }

    /// Outcomes of every visit of `node_id` that was not an already-visited
    /// stub. More than one only when a parent activated the node after it
    /// had been passed this tick.
    pub fn outcomes_of(&self, node_id: &NodeId) -> Vec<&ExecutionOutcome> {
        self.flatten()
            .into_iter()
            .filter(|(id, outcome)| *id == node_id && **outcome != ExecutionOutcome::AlreadyVisited)
            .map(|(_, outcome)| outcome)
            .collect()
    }

    /// Outcome of the last real visit of `node_id`.
    pub fn outcome_of(&self, node_id: &NodeId) -> Option<&ExecutionOutcome> {
        self.outcomes_of(node_id).pop()
    }
}

pub fn execute(ctx: &mut RunContext, node_id: &NodeId) -> NodeExecution {
    let graph = Arc::clone(&ctx.graph);
    let Some(node) = graph.node(node_id) else {
        warn!(node_id = %node_id, "execute called for unknown node");
        return NodeExecution::leaf(node_id, ExecutionOutcome::Unknown);
    };
    let Some(state) = ctx.states.get_mut(node_id) else {
        warn!(node_id = %node_id, "node has no runtime state");
        return NodeExecution::leaf(node_id, ExecutionOutcome::Unknown);
    };

    if state.visited {
        return NodeExecution::leaf(node_id, ExecutionOutcome::AlreadyVisited);
    }
    state.visited = true;

    let status = state.status;
    let re_entry_num = state.re_entry_num;
    let outcome = match status {
        NodeStatus::Active => {
            state.status = NodeStatus::Pending;
            run_logic(ctx, node, re_entry_num)
        }
        NodeStatus::Pending => match ctx.dispatcher.as_ref().and_then(|d| d.take(node_id)) {
            Some(result) => apply_completion(ctx, node, result),
            None => ExecutionOutcome::StillPending,
        },
        NodeStatus::Inactive => ExecutionOutcome::Inactive,
    };
    debug!(node_id = %node_id, ?status, ?outcome, "node executed");

    let children = node.children.iter().map(|child| execute(ctx, child)).collect();
    NodeExecution {
        node_id: node_id.clone(),
        outcome,
        children,
    }
}

fn run_logic(ctx: &mut RunContext, node: &Node, re_entry_num: u32) -> ExecutionOutcome {
    let inputs = ctx.logic_inputs();

    if node.kind().is_action()
        && let Some(dispatcher) = ctx.dispatcher.as_ref()
    {
        let behavior = node.behavior.clone();
        let id = node.id.clone();
        if dispatcher.dispatch(node.id.clone(), move || behavior.run(&id, re_entry_num, &inputs)) {
            return ExecutionOutcome::Dispatched;
        }
        set_status(ctx, &node.id, NodeStatus::Active);
        return ExecutionOutcome::Retrying;
    }

    let result = run_guarded(&node.id, || node.behavior.run(&node.id, re_entry_num, &inputs));
    apply_completion(ctx, node, result)
}

/// The completion/retry rule shared by inline and background logic.
pub fn apply_completion(ctx: &mut RunContext, node: &Node, result: LogicResult) -> ExecutionOutcome {
    match result {
        Ok(outcome) if outcome.logic_completed => {
            let own = ctx.states.get(&node.id).map_or(0, |s| s.re_entry_num);
            apply_effects(ctx, &node.id, outcome);

            let child_re_entry = node.behavior.child_re_entry_num(own);
            for child in &node.children {
                let Some(state) = ctx.states.get_mut(child) else {
                    continue;
                };
                if state.status == NodeStatus::Pending {
                    debug!(node_id = %child, "child has logic in flight, left pending");
                    continue;
                }
                // A child already passed this tick through another parent
                // runs again when this node recurses into it.
                state.status = NodeStatus::Active;
                state.visited = false;
                state.re_entry_num = child_re_entry;
            }
            set_status(ctx, &node.id, NodeStatus::Inactive);
            ExecutionOutcome::Completed
        }
        Ok(_) => {
            set_status(ctx, &node.id, NodeStatus::Active);
            ExecutionOutcome::Retrying
        }
        Err(err) => {
            error!(
                node_id = %node.id,
                kind = %node.kind(),
                timestamp = ?ctx.market.timestamp,
                %err,
                "node logic failed, retrying next tick"
            );
            set_status(ctx, &node.id, NodeStatus::Active);
            ExecutionOutcome::Failed(err)
        }
    }
}

fn apply_effects(ctx: &mut RunContext, node_id: &NodeId, outcome: LogicOutcome) {
    for (name, value) in &outcome.variables {
        ctx.store.set_node_variable(node_id, name, *value);
    }
    for action in outcome.actions {
        match action {
            PositionAction::Open(position) => ctx.store.add_position(position),
            PositionAction::Close {
                position_id,
                exit_price,
                exit_time,
                reason,
            } => {
                if ctx
                    .store
                    .close_position(&position_id, exit_price, exit_time, &reason)
                    .is_none()
                {
                    debug!(node_id = %node_id, position_id = %position_id, "position already closed");
                }
            }
        }
    }
    if let Some(signal) = outcome.signal {
        ctx.signals.push(signal);
    }
    if outcome.terminate {
        ctx.terminate_requested = true;
    }
}

fn set_status(ctx: &mut RunContext, node_id: &NodeId, status: NodeStatus) {
    if let Some(state) = ctx.states.get_mut(node_id) {
        state.status = status;
    }
}
