use std::collections::HashSet;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::graph_utils::connection::Connection;
use crate::graph_utils::graph::{ModelGraph, Node, NodeId, Params, Position};
use crate::registry::{LayerRegistry, RegistryEntry};

/// Graph as the backend accepts it: presentation state stripped, each node
/// carrying the registry schema it was built against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    #[serde(default)]
    pub nodes: Vec<PayloadNode>,
    #[serde(default)]
    pub edges: Vec<PayloadEdge>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadNode {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub position: Position,
    pub data: PayloadNodeData,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PayloadNodeData {
    #[serde(default)]
    pub params: Params,
    #[serde(default)]
    pub registry: Option<RegistryEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadEdge {
    pub source: NodeId,
    pub target: NodeId,
}

pub fn serialize(graph: &ModelGraph, registry: &LayerRegistry) -> Payload {
    let nodes = graph
        .nodes
        .iter()
        .map(|node| PayloadNode {
            id: node.id.clone(),
            kind: node.kind.clone(),
            position: node.position,
            data: PayloadNodeData {
                params: node.params.clone(),
                registry: registry.get(&node.kind).cloned(),
            },
        })
        .collect();
    let edges = graph
        .edges
        .iter()
        .map(|edge| PayloadEdge { source: edge.source.clone(), target: edge.target.clone() })
        .collect();
    Payload { nodes, edges }
}

/// Rebuild an editable graph from a payload (a loaded model). Edge ids are
/// not part of the wire format and are regenerated. Every edge goes through
/// the connection rules in payload order; edges that break them and nodes
/// with a repeated id are dropped.
pub fn deserialize(payload: Payload) -> ModelGraph {
    let mut seen: HashSet<NodeId> = HashSet::new();
    let nodes = payload
        .nodes
        .into_iter()
        .filter(|n| {
            let fresh = seen.insert(n.id.clone());
            if !fresh {
                warn!("load: dropping layer with repeated id {}", n.id);
            }
            fresh
        })
        .map(|n| Node { id: n.id, kind: n.kind, position: n.position, params: n.data.params })
        .collect();
    let mut graph = ModelGraph { nodes, edges: Vec::new() };
    for edge in payload.edges {
        if let Err(e) = graph.connect(&Connection::new(edge.source.clone(), edge.target.clone())) {
            warn!("load: dropping connection {} -> {}: {}", edge.source, edge.target, e);
        }
    }
    graph
}
