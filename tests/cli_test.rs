//! CLI orchestration against real files on disk.

mod common;

use approx::assert_relative_eq;
use clap::Parser;
use common::*;
use std::process::ExitCode;
use tradeflow::adapters::strategy_file_adapter::load_strategy_file;
use tradeflow::cli::{self, Cli, Command};
use tradeflow::domain::context::ExecutionMode;
use tradeflow::domain::error::TradeflowError;
use tradeflow::domain::run::TerminationReason;

const RUN_INI: &str = r#"
[run]
mode = sync
timezone = +05:30
timeframes = 1m
history_limit = 100
force_square_off = true

[data]
symbol = NIFTY
"#;

// Minute one builds the 104 high; minute two breaks it.
const TICKS_CSV: &str = "timestamp,symbol,ltp,qty,oi,vwap
2024-03-04T09:25:00+05:30,NIFTY,100,10,0,100
2024-03-04T09:25:20+05:30,NIFTY,104,10,0,101
2024-03-04T09:25:40+05:30,NIFTY,102,10,0,101.5
2024-03-04T09:25:50+05:30,BANKNIFTY,500,10,0,500
2024-03-04T09:26:00+05:30,NIFTY,101,10,0,101.4
2024-03-04T09:26:10+05:30,NIFTY,99,10,0,101.2
2024-03-04T09:26:20+05:30,NIFTY,105,10,0,101.5
2024-03-04T09:26:30+05:30,NIFTY,108,10,0,102
2024-03-04T09:26:40+05:30,NIFTY,110,10,0,103
";

mod backtest {
    use super::*;

    #[test]
    fn replays_feed_to_completion() {
        let config = write_temp(RUN_INI, ".ini");
        let strategy = write_temp(BREAKOUT_STRATEGY, ".ini");
        let ticks = write_temp(TICKS_CSV, ".csv");

        let report = cli::run_backtest(config.path(), strategy.path(), ticks.path()).unwrap();

        assert_eq!(report.strategy, "Breakout");
        assert_eq!(report.ticks, 8);
        assert_eq!(report.signals.len(), 2);
        assert_eq!(report.signals[0].variables, vec![("level".to_string(), 104.0)]);
        assert_eq!(report.closed_positions.len(), 1);
        assert_relative_eq!(report.closed_positions[0].position.entry_price, 105.0);
        assert_relative_eq!(report.closed_positions[0].exit_price, 110.0);
        assert_relative_eq!(report.realized_pnl, 250.0);
        assert_eq!(report.termination, TerminationReason::AllNodesInactive);

        let summary = cli::summarize(&report);
        assert!(summary.contains("Ticks processed:   8"));
        assert!(summary.contains("Realised PnL:      250.00"));
        assert!(summary.contains("all nodes inactive"));
    }

    #[test]
    fn async_mode_reaches_same_trade() {
        let config = write_temp(&RUN_INI.replace("mode = sync", "mode = async"), ".ini");
        let strategy = write_temp(BREAKOUT_STRATEGY, ".ini");
        let ticks = write_temp(TICKS_CSV, ".csv");

        let report = cli::run_backtest(config.path(), strategy.path(), ticks.path()).unwrap();
        assert_eq!(report.closed_positions.len(), 1);
        assert_relative_eq!(report.closed_positions[0].position.entry_price, 105.0);
    }

    #[test]
    fn missing_tick_file_is_a_data_error() {
        let config = write_temp(RUN_INI, ".ini");
        let strategy = write_temp(BREAKOUT_STRATEGY, ".ini");
        let err = cli::run_backtest(
            config.path(),
            strategy.path(),
            std::path::Path::new("/nonexistent/ticks.csv"),
        )
        .unwrap_err();
        assert!(matches!(err, TradeflowError::Data { .. }));
        assert_eq!(format!("{:?}", ExitCode::from(&err)), format!("{:?}", ExitCode::from(3)));
    }

    #[test]
    fn bad_run_config_is_a_config_error() {
        let config = write_temp("[run]\nmode = eventually\n", ".ini");
        let strategy = write_temp(BREAKOUT_STRATEGY, ".ini");
        let ticks = write_temp(TICKS_CSV, ".csv");
        let err = cli::run_backtest(config.path(), strategy.path(), ticks.path()).unwrap_err();
        assert_eq!(format!("{:?}", ExitCode::from(&err)), format!("{:?}", ExitCode::from(2)));
    }

    #[test]
    fn loaded_config_matches_file() {
        let config = write_temp(RUN_INI, ".ini");
        let run = cli::load_run_config_file(config.path()).unwrap();
        assert_eq!(run.mode, ExecutionMode::Sync);
        assert_eq!(run.timezone, ist());
        assert_eq!(run.history_limit, 100);
        assert_eq!(run.symbol.as_deref(), Some("NIFTY"));
    }
}

mod strategy_commands {
    use super::*;

    const DIAMOND: &str = r#"
[strategy]
name = Diamond

[node.start]
type = start
children = a, b

[node.a]
type = entry_signal
condition = ltp > 1
children = join

[node.b]
type = entry_signal
label = Second path
condition = ltp > 2
children = join

[node.join]
type = entry
quantity = 1
"#;

    #[test]
    fn validation_summary_counts_kinds() {
        let file = write_temp(DIAMOND, ".ini");
        let graph = load_strategy_file(file.path()).unwrap();
        let summary = cli::validation_summary(&graph);
        assert!(summary.starts_with("Strategy 'Diamond' is valid: 4 nodes"));
        assert!(summary.contains("entry_signal     2"));
        assert!(summary.contains("entry            1"));
    }

    #[test]
    fn hierarchy_marks_shared_children() {
        let file = write_temp(DIAMOND, ".ini");
        let graph = load_strategy_file(file.path()).unwrap();
        let text = cli::describe_hierarchy(&graph);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "Diamond",
                "  start [start]",
                "    a [entry_signal]",
                "      join [entry]",
                "    b [entry_signal] \"Second path\"",
                "      join [entry] (also reached above)",
            ]
        );
    }

    #[test]
    fn invalid_strategy_exits_with_strategy_code() {
        let file = write_temp("[strategy]\nname = x\n[node.start]\ntype = start\nchildren = start\n", ".ini");
        let err = load_strategy_file(file.path()).unwrap_err();
        assert_eq!(format!("{:?}", ExitCode::from(&err)), format!("{:?}", ExitCode::from(4)));
    }
}

mod arguments {
    use super::*;

    #[test]
    fn parses_backtest_with_json_logs() {
        let cli = Cli::try_parse_from([
            "tradeflow",
            "backtest",
            "--config",
            "run.ini",
            "--strategy",
            "s.ini",
            "--ticks",
            "t.csv",
            "--json-logs",
        ])
        .unwrap();
        assert!(cli.json_logs);
        assert!(matches!(cli.command, Command::Backtest { .. }));
    }

    #[test]
    fn inspect_requires_strategy() {
        assert!(Cli::try_parse_from(["tradeflow", "inspect"]).is_err());
    }
}
