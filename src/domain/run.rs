//! Tick-by-tick driver for one strategy run.

use chrono::{FixedOffset, Offset, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain::context::{ExecutionMode, RunContext};
use crate::domain::dispatch::AsyncDispatcher;
use crate::domain::error::TradeflowError;
use crate::domain::graph::StrategyGraph;
use crate::domain::market::{CandleAggregator, MarketSnapshot, Tick, Timeframe};
use crate::domain::node::state_machine::{NodeExecution, apply_completion, execute};
use crate::domain::node::{NodeStatus, SignalRecord};
use crate::domain::position::{ClosedPosition, Position};
use crate::ports::expression_port::ExpressionEvaluator;
use crate::ports::position_port::PositionStore;

/// Validated run settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub mode: ExecutionMode,
    pub timezone: FixedOffset,
    pub timeframes: Vec<Timeframe>,
    pub history_limit: usize,
    pub async_workers: usize,
    pub force_square_off: bool,
    pub symbol: Option<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Sync,
            timezone: Utc.fix(),
            timeframes: vec![Timeframe::from("1m")],
            history_limit: 500,
            async_workers: 4,
            force_square_off: true,
            symbol: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// Every node went inactive with no positions left open.
    AllNodesInactive,
    /// A square-off node fired.
    SquareOff,
    /// The feed ran out first.
    EndOfData,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::AllNodesInactive => f.write_str("all nodes inactive"),
            TerminationReason::SquareOff => f.write_str("square off"),
            TerminationReason::EndOfData => f.write_str("end of data"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    /// 1-based index of the tick within the run.
    pub tick_index: usize,
    /// One tree per start node.
    pub executions: Vec<NodeExecution>,
    pub signals: Vec<SignalRecord>,
    pub terminated: Option<TerminationReason>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub strategy: String,
    pub ticks: usize,
    pub signals: Vec<SignalRecord>,
    pub open_positions: Vec<Position>,
    pub closed_positions: Vec<ClosedPosition>,
    pub realized_pnl: f64,
    pub termination: TerminationReason,
}

pub struct StrategyRun {
    ctx: RunContext,
    config: RunConfig,
    aggregators: Vec<CandleAggregator>,
    ticks: usize,
    last_tick: Option<Tick>,
    terminated: Option<TerminationReason>,
}

impl StrategyRun {
    pub fn new(
        graph: Arc<StrategyGraph>,
        store: Arc<dyn PositionStore>,
        evaluator: Arc<dyn ExpressionEvaluator>,
        config: RunConfig,
    ) -> Result<Self, TradeflowError> {
        let aggregators = config
            .timeframes
            .iter()
            .map(|tf| {
                CandleAggregator::new(tf.clone(), config.history_limit).ok_or_else(|| TradeflowError::ConfigInvalid {
                    section: "run".into(),
                    key: "timeframes".into(),
                    reason: format!("unsupported timeframe '{}'", tf),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let dispatcher = match config.mode {
            ExecutionMode::Sync => None,
            ExecutionMode::Async => Some(AsyncDispatcher::new(config.async_workers)?),
        };

        info!(
            strategy = graph.name(),
            nodes = graph.len(),
            mode = ?config.mode,
            timezone = %config.timezone,
            "strategy run started"
        );
        let ctx = RunContext::new(graph, store, evaluator, config.timezone, dispatcher);
        Ok(Self {
            ctx,
            config,
            aggregators,
            ticks: 0,
            last_tick: None,
            terminated: None,
        })
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn terminated(&self) -> Option<TerminationReason> {
        self.terminated
    }

    /// Blocks until no background logic is running. Results stay parked
    /// until the owning node is next visited.
    pub fn wait_idle(&self) {
        if let Some(dispatcher) = self.ctx.dispatcher.as_ref() {
            dispatcher.wait_idle();
        }
    }

    /// Rolls the tick into the configured candle series, then runs one
    /// traversal over the resulting snapshot.
    pub fn on_tick(&mut self, tick: Tick, indicators: HashMap<String, f64>) -> TickReport {
        for agg in &mut self.aggregators {
            if agg.on_tick(&tick) {
                debug!(timeframe = %agg.timeframe(), timestamp = %tick.timestamp, "candle closed");
            }
        }
        let mut snapshot = MarketSnapshot::with_tick(tick);
        snapshot.indicators = indicators;
        snapshot.candles = self
            .aggregators
            .iter()
            .map(|agg| (agg.timeframe().clone(), agg.series().clone()))
            .collect();
        self.on_snapshot(Arc::new(snapshot))
    }

    /// Runs one traversal over a snapshot the caller assembled.
    pub fn on_snapshot(&mut self, snapshot: Arc<MarketSnapshot>) -> TickReport {
        if let Some(reason) = self.terminated {
            debug!(%reason, "run already terminated, tick ignored");
            return TickReport {
                tick_index: self.ticks,
                executions: Vec::new(),
                signals: Vec::new(),
                terminated: Some(reason),
            };
        }

        self.ticks += 1;
        if let Some(tick) = snapshot.tick.as_ref() {
            self.ctx.store.mark_to_market(&tick.symbol, tick.ltp);
            self.last_tick = Some(tick.clone());
        }
        self.ctx.set_market(snapshot);
        self.ctx.reset_visited();

        let signals_before = self.ctx.signals.len();
        let starts = self.ctx.graph().start_nodes().to_vec();
        let executions: Vec<NodeExecution> = starts.iter().map(|id| execute(&mut self.ctx, id)).collect();
        let signals = self.ctx.signals[signals_before..].to_vec();

        self.terminated = self.check_termination();
        TickReport {
            tick_index: self.ticks,
            executions,
            signals,
            terminated: self.terminated,
        }
    }

    fn check_termination(&mut self) -> Option<TerminationReason> {
        if self.ctx.take_terminate_request() {
            info!(tick = self.ticks, "square off executed, deactivating all nodes");
            self.ctx.deactivate_all();
            self.close_open_positions("square_off");
            return Some(TerminationReason::SquareOff);
        }
        if self.ctx.has_live_nodes() {
            return None;
        }
        if self.ctx.store.has_open_positions() {
            if !self.config.force_square_off {
                return None;
            }
            warn!(
                open = self.ctx.store.open_positions().len(),
                "all nodes inactive with open positions, forcing square off"
            );
            self.close_open_positions("force_square_off");
        }
        info!(tick = self.ticks, "all nodes inactive, run complete");
        Some(TerminationReason::AllNodesInactive)
    }

    fn close_open_positions(&self, reason: &str) {
        let Some(last) = self.last_tick.as_ref() else {
            return;
        };
        for position in self.ctx.store.open_positions() {
            self.ctx
                .store
                .close_position(&position.id, last.ltp, last.timestamp, reason);
        }
    }

    /// Waits for background logic, applies what finished and summarises the
    /// run. Leftover positions are closed at the last price when
    /// `force_square_off` is set.
    pub fn finish(mut self) -> RunReport {
        self.wait_idle();
        if self.terminated.is_none() {
            self.collect_parked_completions();
            self.terminated = self.check_termination();
        }
        if self.config.force_square_off && self.ctx.store.has_open_positions() {
            warn!("feed ended with open positions, forcing square off");
            self.close_open_positions("end_of_data");
        }

        let termination = self.terminated.unwrap_or(TerminationReason::EndOfData);
        let closed_positions = self.ctx.store.closed_positions();
        let realized_pnl = closed_positions.iter().map(|c| c.pnl).sum();
        info!(
            strategy = self.ctx.graph().name(),
            ticks = self.ticks,
            signals = self.ctx.signals.len(),
            closed = closed_positions.len(),
            realized_pnl,
            %termination,
            "strategy run finished"
        );
        RunReport {
            strategy: self.ctx.graph().name().to_string(),
            ticks: self.ticks,
            signals: std::mem::take(&mut self.ctx.signals),
            open_positions: self.ctx.store.open_positions(),
            closed_positions,
            realized_pnl,
            termination,
        }
    }

    fn collect_parked_completions(&mut self) {
        let graph = Arc::clone(self.ctx.graph());
        for node in graph.nodes() {
            if self.ctx.status(&node.id) != Some(NodeStatus::Pending) {
                continue;
            }
            let Some(result) = self.ctx.dispatcher.as_ref().and_then(|d| d.take(&node.id)) else {
                continue;
            };
            let outcome = apply_completion(&mut self.ctx, node, result);
            debug!(node_id = %node.id, ?outcome, "final completion applied");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory_position_store::MemoryPositionStore;
    use crate::domain::condition::{Comparator, Condition};
    use crate::domain::expression::Expression;
    use crate::domain::expression_eval::MarketExpressionEvaluator;
    use crate::domain::market::TickField;
    use crate::domain::node::action::{EntrySpec, ExitSpec, SquareOffSpec};
    use crate::domain::node::signal::SignalSpec;
    use crate::domain::node::{Node, NodeBehavior};
    use chrono::{DateTime, TimeZone};

    fn at(m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 9, m, s).unwrap()
    }

    fn tick(ltp: f64, m: u32, s: u32) -> Tick {
        Tick {
            symbol: "NIFTY".into(),
            ltp,
            quantity: 1,
            open_interest: 0,
            timestamp: at(m, s),
        }
    }

    fn ltp(op: Comparator, value: f64) -> Condition {
        Condition::compare(Expression::Live(TickField::Ltp), op, Expression::Constant(value))
    }

    fn round_trip_graph() -> Arc<StrategyGraph> {
        Arc::new(
            StrategyGraph::new(
                "round trip",
                vec![
                    Node::new("start", NodeBehavior::Start).with_children(["buy-signal"]),
                    Node::new("buy-signal", NodeBehavior::EntrySignal(SignalSpec::new(ltp(Comparator::Gt, 100.0))))
                        .with_children(["buy"]),
                    Node::new("buy", NodeBehavior::Entry(EntrySpec::new(10))).with_children(["sell-signal"]),
                    Node::new("sell-signal", NodeBehavior::ExitSignal(SignalSpec::new(ltp(Comparator::Ge, 110.0))))
                        .with_children(["sell"]),
                    Node::new("sell", NodeBehavior::Exit(ExitSpec::default())),
                ],
            )
            .unwrap(),
        )
    }

    fn run(graph: Arc<StrategyGraph>, config: RunConfig) -> (StrategyRun, Arc<MemoryPositionStore>) {
        let store = Arc::new(MemoryPositionStore::new());
        let run = StrategyRun::new(graph, store.clone(), Arc::new(MarketExpressionEvaluator), config).unwrap();
        (run, store)
    }

    #[test]
    fn round_trip_terminates_when_everything_is_inactive() {
        let (mut run, store) = run(round_trip_graph(), RunConfig::default());
        let prices = [99.0, 101.0, 105.0, 111.0, 120.0];
        let mut reports = Vec::new();
        for (i, price) in prices.iter().enumerate() {
            reports.push(run.on_tick(tick(*price, 15, i as u32), HashMap::new()));
        }

        assert_eq!(reports[0].terminated, None);
        assert_eq!(reports[1].signals.len(), 1);
        assert_eq!(store.open_positions().len(), 1);
        assert_eq!(reports[3].terminated, Some(TerminationReason::AllNodesInactive));
        assert!(reports[4].executions.is_empty());

        let report = run.finish();
        assert_eq!(report.ticks, 4);
        assert_eq!(report.signals.len(), 2);
        assert_eq!(report.closed_positions.len(), 1);
        assert_eq!(report.realized_pnl, 100.0);
        assert_eq!(report.termination, TerminationReason::AllNodesInactive);
    }

    #[test]
    fn on_tick_builds_candles_for_configured_timeframes() {
        let graph = Arc::new(
            StrategyGraph::new(
                "observe",
                vec![
                    Node::new("start", NodeBehavior::Start).with_children(["never"]),
                    Node::new("never", NodeBehavior::EntrySignal(SignalSpec::new(ltp(Comparator::Lt, 0.0)))),
                ],
            )
            .unwrap(),
        );
        let (mut run, _) = run(graph, RunConfig::default());
        run.on_tick(tick(100.0, 15, 0), HashMap::new());
        run.on_tick(tick(104.0, 15, 30), HashMap::new());
        run.on_tick(tick(101.0, 16, 0), HashMap::from([("ema".to_string(), 102.5)]));

        let market = run.context().market();
        let previous = market.previous_candle(&Timeframe::from("1m")).unwrap();
        assert_eq!(previous.high, 104.0);
        assert_eq!(previous.close, 104.0);
        assert_eq!(market.indicator("ema"), Some(102.5));
        assert_eq!(run.terminated(), None);
        assert_eq!(run.finish().termination, TerminationReason::EndOfData);
    }

    #[test]
    fn square_off_closes_positions_and_stops_the_run() {
        let graph = Arc::new(
            StrategyGraph::new(
                "square off",
                vec![
                    Node::new("start", NodeBehavior::Start).with_children(["buy", "flat"]),
                    Node::new("buy", NodeBehavior::Entry(EntrySpec::new(5))).with_children(["never"]),
                    Node::new("never", NodeBehavior::ExitSignal(SignalSpec::new(ltp(Comparator::Lt, 0.0)))),
                    Node::new("flat", NodeBehavior::SquareOff(SquareOffSpec::new(Some(ltp(Comparator::Ge, 103.0))))),
                ],
            )
            .unwrap(),
        );
        let (mut run, store) = run(graph, RunConfig::default());
        assert_eq!(run.on_tick(tick(100.0, 15, 0), HashMap::new()).terminated, None);
        let report = run.on_tick(tick(103.0, 15, 1), HashMap::new());
        assert_eq!(report.terminated, Some(TerminationReason::SquareOff));
        assert!(!store.has_open_positions());
        assert!(!run.context().has_live_nodes());

        let summary = run.finish();
        assert_eq!(summary.closed_positions[0].reason, "square_off");
        assert_eq!(summary.realized_pnl, 15.0);
    }

    #[test]
    fn leftover_positions_without_force_keep_the_run_alive() {
        let graph = Arc::new(
            StrategyGraph::new(
                "hold",
                vec![
                    Node::new("start", NodeBehavior::Start).with_children(["buy"]),
                    Node::new("buy", NodeBehavior::Entry(EntrySpec::new(1))),
                ],
            )
            .unwrap(),
        );
        let config = RunConfig {
            force_square_off: false,
            ..RunConfig::default()
        };
        let (mut run, store) = run(graph, config);
        assert_eq!(run.on_tick(tick(100.0, 15, 0), HashMap::new()).terminated, None);
        assert!(store.has_open_positions());
        let report = run.finish();
        assert_eq!(report.termination, TerminationReason::EndOfData);
        assert_eq!(report.open_positions.len(), 1);
    }

    #[test]
    fn forced_square_off_when_nodes_finish_with_open_positions() {
        let graph = Arc::new(
            StrategyGraph::new(
                "hold",
                vec![
                    Node::new("start", NodeBehavior::Start).with_children(["buy"]),
                    Node::new("buy", NodeBehavior::Entry(EntrySpec::new(2))),
                ],
            )
            .unwrap(),
        );
        let (mut run, store) = run(graph, RunConfig::default());
        let report = run.on_tick(tick(100.0, 15, 0), HashMap::new());
        assert_eq!(report.terminated, Some(TerminationReason::AllNodesInactive));
        assert!(!store.has_open_positions());
        assert_eq!(store.closed_positions()[0].reason, "force_square_off");
    }

    #[test]
    fn rejects_unknown_timeframe() {
        let config = RunConfig {
            timeframes: vec![Timeframe::from("weekly")],
            ..RunConfig::default()
        };
        let store = Arc::new(MemoryPositionStore::new());
        let err = StrategyRun::new(round_trip_graph(), store, Arc::new(MarketExpressionEvaluator), config).err();
        assert!(matches!(err, Some(TradeflowError::ConfigInvalid { .. })));
    }
}
