//! End-to-end runs of a loaded strategy against hand-built snapshots.

mod common;

use approx::assert_relative_eq;
use common::*;
use std::sync::Arc;
use tradeflow::domain::condition::{Comparator, Condition};
use tradeflow::domain::condition_eval::EvalStage;
use tradeflow::domain::context::ExecutionMode;
use tradeflow::domain::expression::Expression;
use tradeflow::domain::graph::StrategyGraph;
use tradeflow::domain::market::{CandleField, TickField};
use tradeflow::domain::node::action::EntrySpec;
use tradeflow::domain::node::signal::SignalSpec;
use tradeflow::domain::node::{Node, NodeBehavior};
use tradeflow::domain::node::state_machine::ExecutionOutcome;
use tradeflow::domain::node::{NodeId, NodeStatus};
use tradeflow::domain::run::{TerminationReason, TickReport};
use tradeflow::ports::position_port::PositionStore;

fn outcome(report: &TickReport, node: &str) -> Option<ExecutionOutcome> {
    report.executions[0].outcome_of(&NodeId::from(node)).cloned()
}

mod sync_mode {
    use super::*;

    #[test]
    fn minimal_breakout_entry_executes_on_signal_tick() {
        let breakout = Condition::compare(
            Expression::Live(TickField::Ltp),
            Comparator::Gt,
            Expression::candle("1m", CandleField::High, -1),
        );
        let graph = StrategyGraph::new(
            "minimal",
            vec![
                Node::new("start", NodeBehavior::Start).with_children(["signal"]),
                Node::new("signal", NodeBehavior::EntrySignal(SignalSpec::new(breakout))).with_children(["entry"]),
                Node::new("entry", NodeBehavior::Entry(EntrySpec::new(1))),
            ],
        )
        .unwrap();
        let (mut run, store) = new_run(Arc::new(graph), ExecutionMode::Sync);

        let mut first_entry_run = None;
        for (i, ltp) in [100.0, 101.0, 99.0, 105.0].iter().enumerate() {
            let report = run.on_snapshot(snapshot_with_previous_high(tick(*ltp, ist_time(11, 0, i as u32)), 104.0));
            let signal_status = run.context().status(&NodeId::from("signal"));
            if i < 3 {
                assert_eq!(signal_status, Some(NodeStatus::Active));
                assert!(report.signals.is_empty());
            } else {
                assert_eq!(signal_status, Some(NodeStatus::Inactive));
                assert_eq!(report.signals.len(), 1);
            }
            if first_entry_run.is_none() && outcome(&report, "entry").is_some_and(|o| o.ran_logic()) {
                first_entry_run = Some(report.tick_index);
            }
        }

        assert_eq!(first_entry_run, Some(4));
        assert_eq!(run.context().status(&NodeId::from("entry")), Some(NodeStatus::Inactive));
        // Nothing is left to run, so the open position is squared off.
        assert_eq!(run.terminated(), Some(TerminationReason::AllNodesInactive));
        let closed = store.closed_positions();
        assert_eq!(closed.len(), 1);
        assert_relative_eq!(closed[0].position.entry_price, 105.0);
        assert_eq!(closed[0].reason, "force_square_off");
    }

    #[test]
    fn breakout_fires_on_fourth_tick_and_entry_runs_same_tick() {
        let (mut run, store) = new_run(graph_from(BREAKOUT_STRATEGY), ExecutionMode::Sync);
        let ltps = [100.0, 101.0, 99.0, 105.0];

        let reports: Vec<TickReport> = ltps
            .iter()
            .enumerate()
            .map(|(i, ltp)| run.on_snapshot(snapshot_with_previous_high(tick(*ltp, ist_time(9, 21, i as u32)), 104.0)))
            .collect();

        for report in &reports[..3] {
            assert!(report.signals.is_empty());
            assert_eq!(outcome(report, "signal"), Some(ExecutionOutcome::Retrying));
            assert_eq!(outcome(report, "entry"), Some(ExecutionOutcome::Inactive));
        }

        let fired = &reports[3];
        assert_eq!(fired.tick_index, 4);
        assert_eq!(outcome(fired, "signal"), Some(ExecutionOutcome::Completed));
        assert_eq!(outcome(fired, "entry"), Some(ExecutionOutcome::Completed));
        assert_eq!(outcome(fired, "stop"), Some(ExecutionOutcome::Retrying));
        assert_eq!(fired.signals.len(), 1);

        let signal = &fired.signals[0];
        assert_eq!(signal.node_id, NodeId::from("signal"));
        assert_eq!(signal.timestamp, Some(ist_time(9, 21, 3)));
        assert_eq!(signal.variables, vec![("level".to_string(), 104.0)]);
        let price_leaf = signal
            .trace
            .iter()
            .find(|leaf| leaf.left == Some(105.0))
            .expect("ltp leaf traced");
        assert_eq!(price_leaf.right, Some(104.0));
        assert!(price_leaf.satisfied);
        assert!(signal.trace.iter().all(|leaf| leaf.stage == EvalStage::Full));

        let open = store.open_positions();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, "entry#1");
        assert_eq!(open[0].quantity, 50);
        assert_relative_eq!(open[0].entry_price, 105.0);
        assert_eq!(store.get_node_variable(&NodeId::from("entry"), "entry_price"), Some(105.0));
        assert_eq!(store.get_node_variable(&NodeId::from("signal"), "level"), Some(104.0));
    }

    #[test]
    fn time_gate_holds_signal_before_open() {
        let (mut run, store) = new_run(graph_from(BREAKOUT_STRATEGY), ExecutionMode::Sync);
        let early = run.on_snapshot(snapshot_with_previous_high(tick(105.0, ist_time(9, 15, 0)), 104.0));
        assert!(early.signals.is_empty());
        assert!(!store.has_open_positions());

        let later = run.on_snapshot(snapshot_with_previous_high(tick(105.0, ist_time(9, 20, 0)), 104.0));
        assert_eq!(later.signals.len(), 1);
    }

    #[test]
    fn target_exit_closes_and_run_terminates() {
        let (mut run, store) = new_run(graph_from(BREAKOUT_STRATEGY), ExecutionMode::Sync);
        for (i, ltp) in [100.0, 105.0, 108.0, 110.0].iter().enumerate() {
            run.on_snapshot(snapshot_with_previous_high(tick(*ltp, ist_time(9, 30, i as u32)), 104.0));
        }

        assert!(!store.has_open_positions());
        let closed = store.closed_positions();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].reason, "exit");
        assert_relative_eq!(closed[0].exit_price, 110.0);
        assert_eq!(run.terminated(), Some(TerminationReason::AllNodesInactive));

        let report = run.finish();
        assert_eq!(report.ticks, 4);
        assert_eq!(report.signals.len(), 2);
        assert_relative_eq!(report.realized_pnl, 250.0);
        assert_eq!(report.termination, TerminationReason::AllNodesInactive);
    }

    #[test]
    fn ticks_after_termination_are_ignored() {
        let (mut run, _store) = new_run(graph_from(BREAKOUT_STRATEGY), ExecutionMode::Sync);
        for (i, ltp) in [105.0, 101.0].iter().enumerate() {
            run.on_snapshot(snapshot_with_previous_high(tick(*ltp, ist_time(9, 30, i as u32)), 104.0));
        }
        assert!(run.terminated().is_some());
        let ignored = run.on_snapshot(snapshot_with_previous_high(tick(120.0, ist_time(9, 31, 0)), 104.0));
        assert!(ignored.executions.is_empty());
        assert_eq!(ignored.tick_index, 2);
    }
}

mod async_mode {
    use super::*;

    #[test]
    fn action_completes_on_next_visit() {
        let (mut run, store) = new_run(graph_from(BREAKOUT_STRATEGY), ExecutionMode::Async);
        let mut second = 0;
        let mut step = |run: &mut tradeflow::domain::run::StrategyRun, ltp: f64| {
            let report = run.on_snapshot(snapshot_with_previous_high(tick(ltp, ist_time(9, 21, second)), 104.0));
            second += 1;
            run.wait_idle();
            report
        };

        for ltp in [100.0, 101.0, 99.0] {
            step(&mut run, ltp);
        }

        let fired = step(&mut run, 105.0);
        assert_eq!(fired.signals.len(), 1);
        assert_eq!(outcome(&fired, "entry"), Some(ExecutionOutcome::Dispatched));
        assert_eq!(run.context().status(&NodeId::from("entry")), Some(NodeStatus::Pending));
        assert!(!store.has_open_positions());

        let collected = step(&mut run, 106.0);
        assert_eq!(outcome(&collected, "entry"), Some(ExecutionOutcome::Completed));
        assert_eq!(outcome(&collected, "stop"), Some(ExecutionOutcome::Retrying));
        let open = store.open_positions();
        assert_eq!(open.len(), 1);
        assert_relative_eq!(open[0].entry_price, 105.0);

        let exit_fired = step(&mut run, 111.0);
        assert_eq!(outcome(&exit_fired, "exit"), Some(ExecutionOutcome::Dispatched));
        assert!(exit_fired.terminated.is_none());

        let closed = step(&mut run, 90.0);
        assert_eq!(outcome(&closed, "exit"), Some(ExecutionOutcome::Completed));
        assert_eq!(closed.terminated, Some(TerminationReason::AllNodesInactive));

        let report = run.finish();
        assert_eq!(report.closed_positions.len(), 1);
        assert_relative_eq!(report.closed_positions[0].exit_price, 111.0);
        assert_relative_eq!(report.realized_pnl, 300.0);
    }

    #[test]
    fn finish_applies_parked_completion() {
        let (mut run, _store) = new_run(graph_from(BREAKOUT_STRATEGY), ExecutionMode::Async);
        run.on_snapshot(snapshot_with_previous_high(tick(105.0, ist_time(9, 21, 0)), 104.0));

        let report = run.finish();
        assert_eq!(report.termination, TerminationReason::EndOfData);
        assert_eq!(report.closed_positions.len(), 1);
        assert_eq!(report.closed_positions[0].reason, "end_of_data");
        assert!(report.open_positions.is_empty());
    }
}

mod square_off {
    use super::*;

    const TIMED_SQUARE_OFF: &str = r#"
[strategy]
name = Intraday

[node.start]
type = start
children = signal, close_all

[node.signal]
type = entry_signal
condition = ltp > 100
children = entry

[node.entry]
type = entry
quantity = 10

[node.close_all]
type = square_off
condition = time >= 15:15
"#;

    #[test]
    fn square_off_closes_everything_and_stops() {
        let (mut run, store) = new_run(graph_from(TIMED_SQUARE_OFF), ExecutionMode::Sync);

        let opened = run.on_snapshot(snapshot_with_previous_high(tick(101.0, ist_time(15, 0, 0)), 99.0));
        assert_eq!(outcome(&opened, "close_all"), Some(ExecutionOutcome::Retrying));
        assert!(opened.terminated.is_none());
        assert!(store.has_open_positions());

        let closing = run.on_snapshot(snapshot_with_previous_high(tick(97.0, ist_time(15, 15, 0)), 99.0));
        assert_eq!(outcome(&closing, "close_all"), Some(ExecutionOutcome::Completed));
        assert_eq!(closing.terminated, Some(TerminationReason::SquareOff));
        assert!(!run.context().has_live_nodes());

        let closed = store.closed_positions();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].reason, "square_off");
        assert_relative_eq!(closed[0].pnl, -40.0);
    }

    const DAILY_PNL_GUARD: &str = r#"
[strategy]
name = PnlGuard

[node.start]
type = start
children = signal, guard

[node.signal]
type = entry_signal
condition = ltp > 100
children = entry

[node.entry]
type = entry
quantity = 10
children = target

[node.target]
type = exit_signal
condition = ltp >= 115
children = take_profit

[node.take_profit]
type = exit
target = entry
reason = target
children = again

[node.again]
type = re_entry_signal
condition = ltp > 100
max_re_entries = 2
children = re_entry

[node.re_entry]
type = entry
quantity = 10

[node.guard]
type = square_off
condition = OR(position.total_pnl >= 150, position.total_pnl <= -150)
"#;

    #[test]
    fn pnl_guard_squares_off_after_a_closed_trade() {
        let (mut run, store) = new_run(graph_from(DAILY_PNL_GUARD), ExecutionMode::Sync);

        let opened = run.on_snapshot(snapshot_with_previous_high(tick(101.0, ist_time(10, 0, 0)), 99.0));
        assert_eq!(outcome(&opened, "entry"), Some(ExecutionOutcome::Completed));
        assert_eq!(outcome(&opened, "guard"), Some(ExecutionOutcome::Retrying));

        // Unrealised 70 stays inside the band.
        let holding = run.on_snapshot(snapshot_with_previous_high(tick(108.0, ist_time(10, 1, 0)), 99.0));
        assert_eq!(outcome(&holding, "guard"), Some(ExecutionOutcome::Retrying));
        assert!(holding.terminated.is_none());

        // Target closes for 190, the re-entry opens flat, the guard fires.
        let hit = run.on_snapshot(snapshot_with_previous_high(tick(120.0, ist_time(10, 2, 0)), 99.0));
        assert_eq!(outcome(&hit, "take_profit"), Some(ExecutionOutcome::Completed));
        assert_eq!(outcome(&hit, "re_entry"), Some(ExecutionOutcome::Completed));
        assert_eq!(outcome(&hit, "guard"), Some(ExecutionOutcome::Completed));
        assert_eq!(hit.terminated, Some(TerminationReason::SquareOff));

        let closed = store.closed_positions();
        let reasons: Vec<_> = closed.iter().map(|c| c.reason.as_str()).collect();
        assert_eq!(reasons, vec!["target", "square_off"]);
        assert_relative_eq!(closed[0].pnl, 190.0);
        assert_relative_eq!(closed[1].pnl, 0.0);
        assert!(!store.has_open_positions());
    }
}
