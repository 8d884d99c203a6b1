//! Per-run execution context.
//!
//! One [`RunContext`] per run. The graph is shared and read-only; node
//! runtime state lives here in a table keyed by node id.

use chrono::FixedOffset;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::dispatch::AsyncDispatcher;
use crate::domain::graph::StrategyGraph;
use crate::domain::market::MarketSnapshot;
use crate::domain::node::{LogicInputs, NodeId, NodeRuntimeState, NodeStatus, SignalRecord};
use crate::ports::expression_port::ExpressionEvaluator;
use crate::ports::position_port::PositionStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    #[default]
    Sync,
    Async,
}

impl ExecutionMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sync" => Some(ExecutionMode::Sync),
            "async" => Some(ExecutionMode::Async),
            _ => None,
        }
    }
}

pub struct RunContext {
    pub(crate) graph: Arc<StrategyGraph>,
    pub(crate) states: HashMap<NodeId, NodeRuntimeState>,
    pub(crate) market: Arc<MarketSnapshot>,
    pub(crate) store: Arc<dyn PositionStore>,
    pub(crate) evaluator: Arc<dyn ExpressionEvaluator>,
    pub(crate) timezone: FixedOffset,
    pub(crate) dispatcher: Option<AsyncDispatcher>,
    pub(crate) signals: Vec<SignalRecord>,
    pub(crate) terminate_requested: bool,
}

impl RunContext {
    /// Seeds runtime state: start nodes Active, every other node Inactive,
    /// all counters zero. Passing a dispatcher selects asynchronous mode for
    /// action nodes.
    pub fn new(
        graph: Arc<StrategyGraph>,
        store: Arc<dyn PositionStore>,
        evaluator: Arc<dyn ExpressionEvaluator>,
        timezone: FixedOffset,
        dispatcher: Option<AsyncDispatcher>,
    ) -> Self {
        let mut states: HashMap<NodeId, NodeRuntimeState> = graph
            .nodes()
            .iter()
            .map(|n| (n.id.clone(), NodeRuntimeState::default()))
            .collect();
        for id in graph.start_nodes() {
            states.insert(id.clone(), NodeRuntimeState::active());
        }
        Self {
            graph,
            states,
            market: Arc::new(MarketSnapshot::default()),
            store,
            evaluator,
            timezone,
            dispatcher,
            signals: Vec::new(),
            terminate_requested: false,
        }
    }

    pub fn graph(&self) -> &Arc<StrategyGraph> {
        &self.graph
    }

    pub fn mode(&self) -> ExecutionMode {
        if self.dispatcher.is_some() {
            ExecutionMode::Async
        } else {
            ExecutionMode::Sync
        }
    }

    pub fn market(&self) -> &Arc<MarketSnapshot> {
        &self.market
    }

    /// Installs the snapshot for the next tick. Called by the driver
    /// between traversals only.
    pub fn set_market(&mut self, market: Arc<MarketSnapshot>) {
        self.market = market;
    }

    pub fn store(&self) -> &Arc<dyn PositionStore> {
        &self.store
    }

    pub fn state(&self, id: &NodeId) -> Option<NodeRuntimeState> {
        self.states.get(id).copied()
    }

    pub fn status(&self, id: &NodeId) -> Option<NodeStatus> {
        self.states.get(id).map(|s| s.status)
    }

    pub fn states(&self) -> &HashMap<NodeId, NodeRuntimeState> {
        &self.states
    }

    pub fn signals(&self) -> &[SignalRecord] {
        &self.signals
    }

    pub fn reset_visited(&mut self) {
        for state in self.states.values_mut() {
            state.visited = false;
        }
    }

    /// True while any node can still run logic or has logic in flight.
    pub fn has_live_nodes(&self) -> bool {
        self.states
            .values()
            .any(|s| matches!(s.status, NodeStatus::Active | NodeStatus::Pending))
    }

    pub fn deactivate_all(&mut self) {
        for state in self.states.values_mut() {
            state.status = NodeStatus::Inactive;
        }
    }

    pub fn take_terminate_request(&mut self) -> bool {
        std::mem::take(&mut self.terminate_requested)
    }

    pub(crate) fn logic_inputs(&self) -> LogicInputs {
        LogicInputs {
            market: Arc::clone(&self.market),
            store: Arc::clone(&self.store),
            evaluator: Arc::clone(&self.evaluator),
            timezone: self.timezone,
        }
    }
}
