//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;

use crate::adapters::csv_tick_adapter::CsvTickAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::memory_position_store::MemoryPositionStore;
use crate::adapters::strategy_file_adapter::load_strategy_file;
use crate::domain::config_validation::load_run_config;
use crate::domain::error::TradeflowError;
use crate::domain::expression_eval::MarketExpressionEvaluator;
use crate::domain::graph::StrategyGraph;
use crate::domain::node::NodeKind;
use crate::domain::run::{RunConfig, RunReport, StrategyRun};
use crate::ports::tick_port::TickSource;

#[derive(Parser, Debug)]
#[command(name = "tradeflow", about = "Tick-driven node graph strategy runner")]
pub struct Cli {
    /// Emit logs as JSON objects
    #[arg(long, global = true)]
    pub json_logs: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Replay a tick file through a strategy
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        strategy: PathBuf,
        #[arg(short, long)]
        ticks: PathBuf,
    },
    /// Parse and validate a strategy file
    Validate {
        #[arg(short, long)]
        strategy: PathBuf,
    },
    /// Print the node hierarchy of a strategy
    Inspect {
        #[arg(short, long)]
        strategy: PathBuf,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    let result = match cli.command {
        Command::Backtest {
            config,
            strategy,
            ticks,
        } => run_backtest(&config, &strategy, &ticks).map(|report| print!("{}", summarize(&report))),
        Command::Validate { strategy } => {
            load_strategy_file(&strategy).map(|graph| print!("{}", validation_summary(&graph)))
        }
        Command::Inspect { strategy } => {
            load_strategy_file(&strategy).map(|graph| print!("{}", describe_hierarchy(&graph)))
        }
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => report_error(&e),
    }
}

fn report_error(err: &TradeflowError) -> ExitCode {
    match err {
        TradeflowError::ConditionParse {
            section,
            key,
            text,
            source,
        } => {
            eprintln!(
                "error: failed to parse [{}] {}:\n{}",
                section,
                key,
                source.display_with_context(text)
            );
        }
        other => eprintln!("error: {other}"),
    }
    ExitCode::from(err)
}

pub fn load_run_config_file(path: &Path) -> Result<RunConfig, TradeflowError> {
    let adapter = FileConfigAdapter::from_file(path)?;
    load_run_config(&adapter)
}

/// Loads config, strategy and ticks, then replays the feed until it runs
/// out or the strategy terminates.
pub fn run_backtest(config_path: &Path, strategy_path: &Path, ticks_path: &Path) -> Result<RunReport, TradeflowError> {
    eprintln!("Loading config from {}", config_path.display());
    let config = load_run_config_file(config_path)?;

    eprintln!("Loading strategy from {}", strategy_path.display());
    let graph = load_strategy_file(strategy_path)?;

    eprintln!("Loading ticks from {}", ticks_path.display());
    let feed = CsvTickAdapter::new(ticks_path).load_ticks(config.symbol.as_deref())?;
    if feed.is_empty() {
        return Err(TradeflowError::Data {
            reason: format!("no ticks in {}", ticks_path.display()),
        });
    }

    let mut run = StrategyRun::new(
        Arc::new(graph),
        Arc::new(MemoryPositionStore::new()),
        Arc::new(MarketExpressionEvaluator::new()),
        config,
    )?;
    for record in feed {
        let report = run.on_tick(record.tick, record.indicators);
        if let Some(reason) = report.terminated {
            info!(tick = report.tick_index, %reason, "stopping replay");
            break;
        }
    }
    Ok(run.finish())
}

pub fn summarize(report: &RunReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Strategy:          {}", report.strategy);
    let _ = writeln!(out, "Ticks processed:   {}", report.ticks);
    let _ = writeln!(out, "Signals fired:     {}", report.signals.len());
    let _ = writeln!(
        out,
        "Positions opened:  {}",
        report.closed_positions.len() + report.open_positions.len()
    );
    let _ = writeln!(out, "Positions closed:  {}", report.closed_positions.len());
    let _ = writeln!(out, "Realised PnL:      {:.2}", report.realized_pnl);
    let _ = writeln!(out, "Termination:       {}", report.termination);
    if !report.signals.is_empty() {
        let _ = writeln!(out, "\nSignals:");
        for signal in &report.signals {
            let when = signal
                .timestamp
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "-".to_string());
            let _ = writeln!(out, "  {} {} {}", when, signal.node_id, signal.condition);
        }
    }
    out
}

pub fn validation_summary(graph: &StrategyGraph) -> String {
    let mut counts: HashMap<NodeKind, usize> = HashMap::new();
    for node in graph.nodes() {
        *counts.entry(node.kind()).or_default() += 1;
    }
    let mut out = String::new();
    let _ = writeln!(out, "Strategy '{}' is valid: {} nodes", graph.name(), graph.len());
    for kind in NodeKind::ALL {
        if let Some(n) = counts.get(&kind) {
            let _ = writeln!(out, "  {:<16} {}", kind.tag(), n);
        }
    }
    out
}

/// Depth-first listing from each start node. Nodes reached again through a
/// second parent are marked and not expanded.
pub fn describe_hierarchy(graph: &StrategyGraph) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", graph.name());
    for (depth, node, first_visit) in graph.walk() {
        let indent = "  ".repeat(depth + 1);
        let _ = write!(out, "{}{} [{}]", indent, node.id, node.kind());
        if node.label != node.id.as_str() {
            let _ = write!(out, " \"{}\"", node.label);
        }
        if !first_visit {
            let _ = write!(out, " (also reached above)");
        }
        let _ = writeln!(out);
    }
    out
}
