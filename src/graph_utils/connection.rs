//! Legality checks for a proposed edge.
//!
//! [`check_connection`] is pure so the canvas can probe a gesture before
//! committing it. Checks run in a fixed order and the first failure is the
//! one reported to the user.

use std::collections::{HashSet, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};

use super::graph::{ModelGraph, NodeId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandleSide {
    Input,
    Output,
}

/// A connect gesture as reported by the canvas: which node and which side
/// of it the drag started and ended on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Connection {
    pub source: NodeId,
    pub source_handle: HandleSide,
    pub target: NodeId,
    pub target_handle: HandleSide,
}

impl Connection {
    /// Output of `source` to input of `target`.
    pub fn new(source: NodeId, target: NodeId) -> Self {
        Self {
            source,
            source_handle: HandleSide::Output,
            target,
            target_handle: HandleSide::Input,
        }
    }

    pub fn with_handles(source: NodeId, source_handle: HandleSide, target: NodeId, target_handle: HandleSide) -> Self {
        Self { source, source_handle, target, target_handle }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionRejection {
    MissingNode,
    WrongHandleDirection,
    SelfLoop,
    TargetAlreadyConnected,
    DuplicateConnection,
    WouldCreateCycle,
}

impl fmt::Display for ConnectionRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            ConnectionRejection::MissingNode => "one of the layers no longer exists",
            ConnectionRejection::WrongHandleDirection => "connect an output to an input",
            ConnectionRejection::SelfLoop => "a layer cannot connect to itself",
            ConnectionRejection::TargetAlreadyConnected => "this layer already has an input",
            ConnectionRejection::DuplicateConnection => "these layers are already connected",
            ConnectionRejection::WouldCreateCycle => "this connection would create a cycle",
        };
        f.write_str(msg)
    }
}

pub fn check_connection(graph: &ModelGraph, candidate: &Connection) -> Result<(), ConnectionRejection> {
    let Connection { source, source_handle, target, target_handle } = candidate;

    // Endpoints must exist before any of the ordered checks mean anything
    if !graph.contains_node(source) || !graph.contains_node(target) {
        return Err(ConnectionRejection::MissingNode);
    }
    if *source_handle != HandleSide::Output || *target_handle != HandleSide::Input {
        return Err(ConnectionRejection::WrongHandleDirection);
    }
    if source == target {
        return Err(ConnectionRejection::SelfLoop);
    }
    if graph.incoming(target).next().is_some() {
        return Err(ConnectionRejection::TargetAlreadyConnected);
    }
    if graph.has_edge_between(source, target) {
        return Err(ConnectionRejection::DuplicateConnection);
    }
    if reaches(graph, target, source) {
        return Err(ConnectionRejection::WouldCreateCycle);
    }
    Ok(())
}

pub fn is_valid_connection(graph: &ModelGraph, candidate: &Connection) -> bool {
    check_connection(graph, candidate).is_ok()
}

// Forward BFS over existing edges
fn reaches(graph: &ModelGraph, from: &NodeId, to: &NodeId) -> bool {
    let mut visited: HashSet<&NodeId> = HashSet::new();
    let mut queue: VecDeque<&NodeId> = VecDeque::new();
    visited.insert(from);
    queue.push_back(from);
    while let Some(current) = queue.pop_front() {
        if current == to {
            return true;
        }
        for edge in graph.outgoing(current) {
            if visited.insert(&edge.target) {
                queue.push_back(&edge.target);
            }
        }
    }
    false
}
