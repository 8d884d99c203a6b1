//! Immutable strategy graph: an arena of nodes plus an id index.

use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::domain::error::GraphError;
use crate::domain::node::{Node, NodeId, NodeKind};

#[derive(Debug, Clone)]
pub struct StrategyGraph {
    name: String,
    nodes: Vec<Node>,
    index: HashMap<NodeId, usize>,
    start: Vec<NodeId>,
}

impl StrategyGraph {
    /// Validates the edges, fills in parent lists and locates the start
    /// nodes. Nodes keep their declaration order.
    pub fn new(name: impl Into<String>, mut nodes: Vec<Node>) -> Result<Self, GraphError> {
        let mut index = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            if index.insert(node.id.clone(), i).is_some() {
                return Err(GraphError::DuplicateNode(node.id.clone()));
            }
        }

        let mut parents: Vec<Vec<NodeId>> = vec![Vec::new(); nodes.len()];
        for node in &nodes {
            for child in &node.children {
                if child == &node.id {
                    return Err(GraphError::SelfLoop(node.id.clone()));
                }
                let Some(&ci) = index.get(child) else {
                    return Err(GraphError::UnknownChild {
                        node: node.id.clone(),
                        child: child.clone(),
                    });
                };
                if !parents[ci].contains(&node.id) {
                    parents[ci].push(node.id.clone());
                }
            }
        }
        for (node, p) in nodes.iter_mut().zip(parents) {
            node.parents = p;
        }

        let start: Vec<NodeId> = nodes
            .iter()
            .filter(|n| n.kind() == NodeKind::Start)
            .map(|n| n.id.clone())
            .collect();
        if start.is_empty() {
            return Err(GraphError::MissingStart);
        }

        let graph = Self {
            name: name.into(),
            nodes,
            index,
            start,
        };
        graph.check_acyclic()?;
        debug!(strategy = %graph.name, nodes = graph.nodes.len(), "strategy graph built");
        Ok(graph)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn start_nodes(&self) -> &[NodeId] {
        &self.start
    }

    /// Depth-first walk from the start nodes in child order, yielding
    /// `(depth, node, first_visit)` for every edge followed.
    pub fn walk(&self) -> Vec<(usize, &Node, bool)> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for id in &self.start {
            self.walk_from(id, 0, &mut seen, &mut out);
        }
        out
    }

    fn walk_from<'a>(
        &'a self,
        id: &NodeId,
        depth: usize,
        seen: &mut HashSet<NodeId>,
        out: &mut Vec<(usize, &'a Node, bool)>,
    ) {
        let Some(node) = self.node(id) else {
            return;
        };
        let first = seen.insert(id.clone());
        out.push((depth, node, first));
        if first {
            for child in &node.children {
                self.walk_from(child, depth + 1, seen, out);
            }
        }
    }

    fn check_acyclic(&self) -> Result<(), GraphError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }

        let mut marks = vec![Mark::Unvisited; self.nodes.len()];
        for root in 0..self.nodes.len() {
            if marks[root] != Mark::Unvisited {
                continue;
            }
            // Iterative DFS: (node index, next child position).
            let mut stack = vec![(root, 0usize)];
            marks[root] = Mark::InProgress;
            while let Some((i, next)) = stack.pop() {
                let children = &self.nodes[i].children;
                if next == children.len() {
                    marks[i] = Mark::Done;
                    continue;
                }
                stack.push((i, next + 1));
                let ci = self.index[&children[next]];
                match marks[ci] {
                    Mark::InProgress => return Err(GraphError::Cycle(children[next].clone())),
                    Mark::Unvisited => {
                        marks[ci] = Mark::InProgress;
                        stack.push((ci, 0));
                    }
                    Mark::Done => {}
                }
            }
        }
        Ok(())
    }
}
