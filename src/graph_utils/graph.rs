use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CanvasError, CanvasResult};
use crate::registry::{LayerRegistry, ParamValue};
use super::connection::{check_connection, Connection};

pub type Params = BTreeMap<String, ParamValue>;

macro_rules! opaque_id {
    ($name:ident) => {
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            // Time-ordered so ids created later sort later
            pub fn generate() -> Self { Self(Uuid::now_v7().to_string()) }
            pub fn as_str(&self) -> &str { &self.0 }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self { Self(s.to_string()) }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self { Self(s) }
        }
    };
}

opaque_id!(NodeId);
opaque_id!(EdgeId);

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self { Self { x, y } }
    pub fn offset(self, dx: f64, dy: f64) -> Self { Self { x: self.x + dx, y: self.y + dy } }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub kind: String,
    pub position: Position,
    #[serde(default)]
    pub params: Params,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub source: NodeId,
    pub target: NodeId,
}

/// Node/edge collection for one model in progress.
///
/// Structural invariants (unique ids, endpoints exist, in-degree at most one,
/// no cycles, no parallel edges) hold as long as edges only enter through
/// [`ModelGraph::connect`]. History and draft bookkeeping live a layer up in
/// the editing session.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelGraph {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl ModelGraph {
    pub fn new() -> Self { Self::default() }

    pub fn is_empty(&self) -> bool { self.nodes.is_empty() && self.edges.is_empty() }
    pub fn node_count(&self) -> usize { self.nodes.len() }
    pub fn edge_count(&self) -> usize { self.edges.len() }

    pub fn node(&self, id: &NodeId) -> Option<&Node> { self.nodes.iter().find(|n| &n.id == id) }
    pub fn edge(&self, id: &EdgeId) -> Option<&Edge> { self.edges.iter().find(|e| &e.id == id) }
    pub fn contains_node(&self, id: &NodeId) -> bool { self.node(id).is_some() }

    fn node_mut(&mut self, id: &NodeId) -> Option<&mut Node> { self.nodes.iter_mut().find(|n| &n.id == id) }

    pub fn incoming<'a>(&'a self, target: &'a NodeId) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| &e.target == target)
    }

    pub fn outgoing<'a>(&'a self, source: &'a NodeId) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| &e.source == source)
    }

    pub fn has_edge_between(&self, source: &NodeId, target: &NodeId) -> bool {
        self.edges.iter().any(|e| &e.source == source && &e.target == target)
    }

    // Place a node of a registered kind; params start from the registry defaults
    pub fn add_node(&mut self, registry: &LayerRegistry, kind: &str, position: Position) -> CanvasResult<NodeId> {
        let entry = registry
            .get(kind)
            .ok_or_else(|| CanvasError::UnknownKind(kind.to_string()))?;
        let id = NodeId::generate();
        self.nodes.push(Node {
            id: id.clone(),
            kind: kind.to_string(),
            position,
            params: entry.initial_params(),
        });
        Ok(id)
    }

    // Copy kind and params to a fresh node; edges are not copied
    pub fn duplicate_node(&mut self, id: &NodeId, offset: (f64, f64)) -> Option<NodeId> {
        let original = self.node(id)?;
        let copy = Node {
            id: NodeId::generate(),
            kind: original.kind.clone(),
            position: original.position.offset(offset.0, offset.1),
            params: original.params.clone(),
        };
        let new_id = copy.id.clone();
        self.nodes.push(copy);
        Some(new_id)
    }

    /// Validates the candidate and appends it; nothing changes on rejection.
    pub fn connect(&mut self, candidate: &Connection) -> CanvasResult<EdgeId> {
        check_connection(self, candidate)?;
        let id = EdgeId::generate();
        self.edges.push(Edge {
            id: id.clone(),
            source: candidate.source.clone(),
            target: candidate.target.clone(),
        });
        Ok(id)
    }

    // No type checking here; readiness checks run at save time
    pub fn set_node_params(&mut self, id: &NodeId, params: Params) -> bool {
        if let Some(node) = self.node_mut(id) {
            node.params = params;
            true
        } else {
            false
        }
    }

    pub fn set_node_position(&mut self, id: &NodeId, position: Position) -> bool {
        if let Some(node) = self.node_mut(id) {
            node.position = position;
            true
        } else {
            false
        }
    }

    pub fn remove_node(&mut self, id: &NodeId) -> bool {
        let before = self.nodes.len();
        self.nodes.retain(|n| &n.id != id);
        if self.nodes.len() == before {
            return false;
        }
        // Cascade delete edges touching this node
        self.edges.retain(|e| &e.source != id && &e.target != id);
        true
    }

    pub fn remove_edge(&mut self, id: &EdgeId) -> bool {
        let before = self.edges.len();
        self.edges.retain(|e| &e.id != id);
        self.edges.len() != before
    }

    /// Bulk removal; returns true when anything was removed.
    pub fn remove_selection(&mut self, node_ids: &[NodeId], edge_ids: &[EdgeId]) -> bool {
        let nodes: HashSet<&NodeId> = node_ids.iter().collect();
        let edges: HashSet<&EdgeId> = edge_ids.iter().collect();
        let (n_before, e_before) = (self.nodes.len(), self.edges.len());
        self.nodes.retain(|n| !nodes.contains(&n.id));
        self.edges.retain(|e| {
            !edges.contains(&e.id) && !nodes.contains(&e.source) && !nodes.contains(&e.target)
        });
        self.nodes.len() != n_before || self.edges.len() != e_before
    }

    /// True when `remove_selection` would change anything.
    pub fn selection_touches(&self, node_ids: &[NodeId], edge_ids: &[EdgeId]) -> bool {
        node_ids.iter().any(|id| self.contains_node(id))
            || edge_ids.iter().any(|id| self.edge(id).is_some())
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.edges.clear();
    }
}
