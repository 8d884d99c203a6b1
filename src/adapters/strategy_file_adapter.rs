//! INI strategy loader.
//!
//! `[strategy] name` names the run; every `[node.<id>]` section declares one
//! node. Keys a node kind does not understand are rejected so typos surface
//! at load time.

use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::domain::condition::Condition;
use crate::domain::condition_parser::{parse_condition, parse_expression};
use crate::domain::error::TradeflowError;
use crate::domain::graph::StrategyGraph;
use crate::domain::node::action::{EntrySpec, ExitSpec, SquareOffSpec};
use crate::domain::node::signal::SignalSpec;
use crate::domain::node::{Node, NodeBehavior, NodeId, NodeKind};
use crate::ports::config_port::ConfigPort;
use std::path::Path;
use tracing::{info, warn};

const NODE_PREFIX: &str = "node.";
const VAR_PREFIX: &str = "var.";

pub fn load_strategy_file<P: AsRef<Path>>(path: P) -> Result<StrategyGraph, TradeflowError> {
    let config = FileConfigAdapter::from_file(path)?;
    load_strategy(&config)
}

pub fn load_strategy(config: &dyn ConfigPort) -> Result<StrategyGraph, TradeflowError> {
    let name = config
        .get_string("strategy", "name")
        .ok_or_else(|| TradeflowError::ConfigMissing {
            section: "strategy".to_string(),
            key: "name".to_string(),
        })?;

    let mut nodes = Vec::new();
    for section in config.sections() {
        match section.strip_prefix(NODE_PREFIX) {
            Some(id) => nodes.push(load_node(config, &section, id)?),
            None if section == "strategy" => {}
            None => warn!(section = %section, "ignoring unknown strategy section"),
        }
    }
    if nodes.is_empty() {
        return Err(TradeflowError::StrategyInvalid {
            reason: "no [node.<id>] sections".to_string(),
        });
    }

    let graph = StrategyGraph::new(name, nodes)?;
    check_variable_refs(&graph)?;
    info!(
        strategy = graph.name(),
        nodes = graph.len(),
        starts = graph.start_nodes().len(),
        "strategy loaded"
    );
    Ok(graph)
}

fn invalid(section: &str, reason: impl std::fmt::Display) -> TradeflowError {
    TradeflowError::StrategyInvalid {
        reason: format!("[{}] {}", section, reason),
    }
}

fn load_node(config: &dyn ConfigPort, section: &str, id: &str) -> Result<Node, TradeflowError> {
    if id.trim().is_empty() {
        return Err(invalid(section, "empty node id"));
    }
    let tag = config
        .get_string(section, "type")
        .ok_or_else(|| TradeflowError::ConfigMissing {
            section: section.to_string(),
            key: "type".to_string(),
        })?;
    let kind = NodeKind::from_tag(&tag).ok_or_else(|| invalid(section, format!("unknown node type '{}'", tag)))?;
    check_keys(config, section, kind)?;

    let behavior = match kind {
        NodeKind::Start => NodeBehavior::Start,
        NodeKind::EntrySignal => NodeBehavior::EntrySignal(signal_spec(config, section)?),
        NodeKind::ExitSignal => NodeBehavior::ExitSignal(signal_spec(config, section)?),
        NodeKind::ReEntrySignal => {
            let max = config.get_int(section, "max_re_entries", 1);
            let max_re_entries =
                u32::try_from(max).map_err(|_| invalid(section, "max_re_entries must be non-negative"))?;
            NodeBehavior::ReEntrySignal {
                spec: signal_spec(config, section)?,
                max_re_entries,
            }
        }
        NodeKind::Entry => {
            let quantity = config.get_int(section, "quantity", 0);
            if quantity == 0 {
                return Err(invalid(section, "quantity must be a non-zero integer"));
            }
            NodeBehavior::Entry(EntrySpec::new(quantity))
        }
        NodeKind::Exit => {
            let mut spec = ExitSpec::new(config.get_string(section, "target").map(NodeId::from));
            if let Some(reason) = config.get_string(section, "reason") {
                spec = spec.with_reason(reason);
            }
            NodeBehavior::Exit(spec)
        }
        NodeKind::SquareOff => {
            let condition = config
                .get_string(section, "condition")
                .map(|text| condition_at(section, "condition", &text))
                .transpose()?;
            NodeBehavior::SquareOff(SquareOffSpec::new(condition))
        }
    };

    let children: Vec<String> = config
        .get_string(section, "children")
        .map(|list| {
            list.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    let mut node = Node::new(id, behavior).with_children(children);
    if let Some(label) = config.get_string(section, "label") {
        node = node.with_label(label);
    }
    Ok(node)
}

fn check_keys(config: &dyn ConfigPort, section: &str, kind: NodeKind) -> Result<(), TradeflowError> {
    let allowed: &[&str] = match kind {
        NodeKind::Start => &[],
        NodeKind::EntrySignal => &["condition"],
        NodeKind::ExitSignal => &["condition", "re_entry_condition"],
        NodeKind::ReEntrySignal => &["condition", "re_entry_condition", "max_re_entries"],
        NodeKind::Entry => &["quantity"],
        NodeKind::Exit => &["target", "reason"],
        NodeKind::SquareOff => &["condition"],
    };
    let signal = matches!(
        kind,
        NodeKind::EntrySignal | NodeKind::ExitSignal | NodeKind::ReEntrySignal
    );
    for key in config.keys(section) {
        let known = matches!(key.as_str(), "type" | "label" | "children")
            || allowed.contains(&key.as_str())
            || (signal && key.starts_with(VAR_PREFIX));
        if !known {
            return Err(invalid(section, format!("key '{}' is not valid for a {} node", key, kind)));
        }
    }
    Ok(())
}

/// Every `var(node, name)` in a condition must name a node of the graph.
fn check_variable_refs(graph: &StrategyGraph) -> Result<(), TradeflowError> {
    for node in graph.nodes() {
        let conditions: Vec<&Condition> = match &node.behavior {
            NodeBehavior::EntrySignal(spec)
            | NodeBehavior::ExitSignal(spec)
            | NodeBehavior::ReEntrySignal { spec, .. } => std::iter::once(spec.condition())
                .chain(spec.re_entry_condition())
                .map(|c| c.condition())
                .collect(),
            NodeBehavior::SquareOff(spec) => spec.condition().map(|c| c.condition()).into_iter().collect(),
            _ => Vec::new(),
        };
        for condition in conditions {
            if let Some((missing, _)) = condition
                .node_variable_refs()
                .into_iter()
                .find(|(id, _)| graph.node(id).is_none())
            {
                return Err(invalid(
                    &format!("{}{}", NODE_PREFIX, node.id),
                    format!("condition reads a variable of unknown node '{}'", missing),
                ));
            }
        }
    }
    Ok(())
}

fn condition_at(section: &str, key: &str, text: &str) -> Result<Condition, TradeflowError> {
    parse_condition(text).map_err(|source| TradeflowError::ConditionParse {
        section: section.to_string(),
        key: key.to_string(),
        text: text.to_string(),
        source,
    })
}

fn signal_spec(config: &dyn ConfigPort, section: &str) -> Result<SignalSpec, TradeflowError> {
    let text = config
        .get_string(section, "condition")
        .ok_or_else(|| TradeflowError::ConfigMissing {
            section: section.to_string(),
            key: "condition".to_string(),
        })?;
    let mut spec = SignalSpec::new(condition_at(section, "condition", &text)?);

    if let Some(text) = config.get_string(section, "re_entry_condition") {
        spec = spec.with_re_entry_condition(condition_at(section, "re_entry_condition", &text)?);
    }

    for key in config.keys(section) {
        let Some(name) = key.strip_prefix(VAR_PREFIX) else {
            continue;
        };
        if name.is_empty() {
            return Err(invalid(section, "variable name missing after 'var.'"));
        }
        let text = config.get_string(section, &key).unwrap_or_default();
        let expression = parse_expression(&text).map_err(|source| TradeflowError::ConditionParse {
            section: section.to_string(),
            key: key.clone(),
            text: text.clone(),
            source,
        })?;
        spec = spec.with_variable(name, expression);
    }
    Ok(spec)
}
