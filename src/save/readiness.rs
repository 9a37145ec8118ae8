//! Gate between the editable graph and the backend.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use log::debug;

use crate::graph_utils::graph::{ModelGraph, NodeId};
use crate::registry::LayerRegistry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotReady {
    EmptyName,
    NoNodes,
    MissingParam { node: NodeId, param: String },
    Disconnected { reached: usize, total: usize },
}

impl fmt::Display for NotReady {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotReady::EmptyName => write!(f, "model name is empty"),
            NotReady::NoNodes => write!(f, "graph has no layers"),
            NotReady::MissingParam { node, param } => {
                write!(f, "layer {} is missing required parameter '{}'", node, param)
            }
            NotReady::Disconnected { reached, total } => {
                write!(f, "graph is disconnected ({} of {} layers reachable)", reached, total)
            }
        }
    }
}

pub fn check_readiness(model_name: &str, graph: &ModelGraph, registry: &LayerRegistry) -> Result<(), NotReady> {
    if model_name.trim().is_empty() {
        return Err(NotReady::EmptyName);
    }
    if graph.nodes.is_empty() {
        return Err(NotReady::NoNodes);
    }
    for node in &graph.nodes {
        // Kinds missing from the registry have no schema to check against
        let Some(entry) = registry.get(&node.kind) else { continue };
        for param in entry.required_params() {
            if node.params.get(param).is_none_or(|v| v.is_blank()) {
                return Err(NotReady::MissingParam { node: node.id.clone(), param: param.to_string() });
            }
        }
    }
    let reached = reachable_undirected(graph);
    if reached != graph.nodes.len() {
        return Err(NotReady::Disconnected { reached, total: graph.nodes.len() });
    }
    Ok(())
}

pub fn can_save(model_name: &str, graph: &ModelGraph, registry: &LayerRegistry) -> bool {
    match check_readiness(model_name, graph, registry) {
        Ok(()) => true,
        Err(reason) => {
            debug!("can_save: {}", reason);
            false
        }
    }
}

pub fn is_connected(graph: &ModelGraph) -> bool {
    !graph.nodes.is_empty() && reachable_undirected(graph) == graph.nodes.len()
}

/// Names the backend accepts: ASCII letters, digits, `-` and `_`.
pub fn is_valid_model_name(name: &str) -> bool {
    let name = name.trim();
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

// BFS from the first node over edges in both directions; counts graph nodes reached
fn reachable_undirected(graph: &ModelGraph) -> usize {
    let Some(first) = graph.nodes.first() else { return 0 };
    let known: HashSet<&NodeId> = graph.nodes.iter().map(|n| &n.id).collect();
    let mut adjacency: HashMap<&NodeId, Vec<&NodeId>> = HashMap::new();
    for edge in &graph.edges {
        if known.contains(&edge.source) && known.contains(&edge.target) {
            adjacency.entry(&edge.source).or_default().push(&edge.target);
            adjacency.entry(&edge.target).or_default().push(&edge.source);
        }
    }

    let mut visited: HashSet<&NodeId> = HashSet::new();
    let mut queue: VecDeque<&NodeId> = VecDeque::new();
    visited.insert(&first.id);
    queue.push_back(&first.id);
    while let Some(current) = queue.pop_front() {
        for &next in adjacency.get(current).into_iter().flatten() {
            if visited.insert(next) {
                queue.push_back(next);
            }
        }
    }
    visited.len()
}
