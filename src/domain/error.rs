//! Domain error types.

use crate::domain::node::NodeId;

/// A parse error with position information for condition parsing.
#[derive(Debug, Clone, thiserror::Error)]
#[error("parse error at position {position}: {message}")]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

impl ParseError {
    /// Format the error with a caret pointing at the error position in the input.
    pub fn display_with_context(&self, input: &str) -> String {
        let caret = " ".repeat(self.position) + "^";
        format!(
            "{input}\n{caret}\n{err}",
            input = input,
            caret = caret,
            err = self
        )
    }
}

/// Evaluation defects. Expected absence of data is never one of these; it
/// resolves to `None` instead.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error("unsupported expression {expression}: {reason}")]
    UnsupportedExpression { expression: String, reason: String },

    #[error("invalid time comparison {condition}: {reason}")]
    InvalidTimeComparison { condition: String, reason: String },

    #[error("evaluator failed on {expression}: {reason}")]
    Evaluator { expression: String, reason: String },

    #[error("logic of node {node_id} panicked: {reason}")]
    LogicPanicked { node_id: NodeId, reason: String },
}

/// Strategy graph configuration errors, detected once at load.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GraphError {
    #[error("duplicate node id {0}")]
    DuplicateNode(NodeId),

    #[error("node {node} references unknown child {child}")]
    UnknownChild { node: NodeId, child: NodeId },

    #[error("node {0} lists itself as a child")]
    SelfLoop(NodeId),

    #[error("strategy graph has no start node")]
    MissingStart,

    #[error("strategy graph contains a cycle through {0}")]
    Cycle(NodeId),
}

/// Top-level error type for tradeflow.
#[derive(Debug, thiserror::Error)]
pub enum TradeflowError {
    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("condition in [{section}] {key}: {source}")]
    ConditionParse {
        section: String,
        key: String,
        /// The rejected text, for caret rendering.
        text: String,
        #[source]
        source: ParseError,
    },

    #[error("invalid strategy: {reason}")]
    StrategyInvalid { reason: String },

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("tick data error: {reason}")]
    Data { reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<&TradeflowError> for std::process::ExitCode {
    fn from(err: &TradeflowError) -> Self {
        let code: u8 = match err {
            TradeflowError::Io(_) => 1,
            TradeflowError::ConfigParse { .. }
            | TradeflowError::ConfigMissing { .. }
            | TradeflowError::ConfigInvalid { .. } => 2,
            TradeflowError::Data { .. } => 3,
            TradeflowError::ConditionParse { .. }
            | TradeflowError::StrategyInvalid { .. }
            | TradeflowError::Graph(_) => 4,
        };
        std::process::ExitCode::from(code)
    }
}
