//! Strategy graph nodes.
//!
//! A [`Node`] is immutable once loaded. Everything that changes while a run
//! progresses lives in a [`NodeRuntimeState`] kept by the run context, keyed
//! by [`NodeId`], so one graph can back several runs at once.

pub mod action;
pub mod signal;
pub mod state_machine;

use chrono::{DateTime, FixedOffset, Utc};
use std::fmt;
use std::sync::Arc;

use crate::domain::condition_eval::LeafTrace;
use crate::domain::error::EvalError;
use crate::domain::market::MarketSnapshot;
use crate::domain::position::Position;
use crate::ports::expression_port::{EvalContext, ExpressionEvaluator};
use crate::ports::position_port::PositionStore;

use action::{EntrySpec, ExitSpec, SquareOffSpec};
use signal::SignalSpec;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        NodeId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        NodeId(id.to_string())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        NodeId(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NodeStatus {
    #[default]
    Inactive,
    Active,
    /// Logic is executing; never re-entered until it resolves.
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeRuntimeState {
    pub status: NodeStatus,
    pub visited: bool,
    pub re_entry_num: u32,
}

impl NodeRuntimeState {
    pub fn active() -> Self {
        Self {
            status: NodeStatus::Active,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Start,
    EntrySignal,
    ExitSignal,
    ReEntrySignal,
    Entry,
    Exit,
    SquareOff,
}

impl NodeKind {
    pub const ALL: [NodeKind; 7] = [
        NodeKind::Start,
        NodeKind::EntrySignal,
        NodeKind::ExitSignal,
        NodeKind::ReEntrySignal,
        NodeKind::Entry,
        NodeKind::Exit,
        NodeKind::SquareOff,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            NodeKind::Start => "start",
            NodeKind::EntrySignal => "entry_signal",
            NodeKind::ExitSignal => "exit_signal",
            NodeKind::ReEntrySignal => "re_entry_signal",
            NodeKind::Entry => "entry",
            NodeKind::Exit => "exit",
            NodeKind::SquareOff => "square_off",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.tag() == tag)
    }

    /// Action kinds place or close positions and may run off the driver
    /// thread in asynchronous mode.
    pub fn is_action(self) -> bool {
        matches!(self, NodeKind::Entry | NodeKind::Exit | NodeKind::SquareOff)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Clone)]
pub enum NodeBehavior {
    Start,
    EntrySignal(SignalSpec),
    ExitSignal(SignalSpec),
    ReEntrySignal { spec: SignalSpec, max_re_entries: u32 },
    Entry(EntrySpec),
    Exit(ExitSpec),
    SquareOff(SquareOffSpec),
}

impl NodeBehavior {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeBehavior::Start => NodeKind::Start,
            NodeBehavior::EntrySignal(_) => NodeKind::EntrySignal,
            NodeBehavior::ExitSignal(_) => NodeKind::ExitSignal,
            NodeBehavior::ReEntrySignal { .. } => NodeKind::ReEntrySignal,
            NodeBehavior::Entry(_) => NodeKind::Entry,
            NodeBehavior::Exit(_) => NodeKind::Exit,
            NodeBehavior::SquareOff(_) => NodeKind::SquareOff,
        }
    }

    /// Counter handed to children when this node completes.
    pub fn child_re_entry_num(&self, own: u32) -> u32 {
        match self {
            NodeBehavior::ReEntrySignal { .. } => own.saturating_add(1),
            _ => own,
        }
    }

    pub fn run(&self, node_id: &NodeId, re_entry_num: u32, inputs: &LogicInputs) -> Result<LogicOutcome, EvalError> {
        match self {
            NodeBehavior::Start => Ok(LogicOutcome::completed()),
            NodeBehavior::EntrySignal(spec) => spec.run(node_id, re_entry_num, inputs),
            NodeBehavior::ExitSignal(spec) => spec.run(node_id, re_entry_num, inputs),
            NodeBehavior::ReEntrySignal {
                spec,
                max_re_entries,
            } => {
                if re_entry_num >= *max_re_entries {
                    return Ok(LogicOutcome::not_completed());
                }
                spec.run(node_id, re_entry_num, inputs)
            }
            NodeBehavior::Entry(spec) => spec.run(node_id, re_entry_num, inputs),
            NodeBehavior::Exit(spec) => spec.run(inputs),
            NodeBehavior::SquareOff(spec) => spec.run(inputs),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub label: String,
    /// Filled in by the graph from the children lists.
    pub parents: Vec<NodeId>,
    pub children: Vec<NodeId>,
    pub behavior: NodeBehavior,
}

impl Node {
    pub fn new(id: impl Into<NodeId>, behavior: NodeBehavior) -> Self {
        let id = id.into();
        Self {
            label: id.to_string(),
            id,
            parents: Vec::new(),
            children: Vec::new(),
            behavior,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_children<I, S>(mut self, children: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        self.children = children.into_iter().map(Into::into).collect();
        self
    }

    pub fn kind(&self) -> NodeKind {
        self.behavior.kind()
    }
}

/// Owned, thread-safe inputs for one logic invocation.
#[derive(Clone)]
pub struct LogicInputs {
    pub market: Arc<MarketSnapshot>,
    pub store: Arc<dyn PositionStore>,
    pub evaluator: Arc<dyn ExpressionEvaluator>,
    pub timezone: FixedOffset,
}

impl LogicInputs {
    pub fn eval_context(&self) -> EvalContext<'_> {
        EvalContext::new(&self.market, self.store.as_ref()).with_timezone(self.timezone)
    }
}

/// Payload recorded when a signal node fires.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalRecord {
    pub node_id: NodeId,
    pub timestamp: Option<DateTime<Utc>>,
    pub condition: String,
    pub re_entry_num: u32,
    pub variables: Vec<(String, f64)>,
    pub trace: Vec<LeafTrace>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PositionAction {
    Open(Position),
    Close {
        position_id: String,
        exit_price: f64,
        exit_time: DateTime<Utc>,
        reason: String,
    },
}

/// What a logic function decided. Effects are applied by the state machine
/// only when `logic_completed` is true.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LogicOutcome {
    pub logic_completed: bool,
    pub variables: Vec<(String, f64)>,
    pub signal: Option<SignalRecord>,
    pub actions: Vec<PositionAction>,
    pub terminate: bool,
}

impl LogicOutcome {
    pub fn completed() -> Self {
        Self {
            logic_completed: true,
            ..Self::default()
        }
    }

    pub fn not_completed() -> Self {
        Self::default()
    }
}
