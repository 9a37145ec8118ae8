pub mod connection;
pub mod graph;
pub mod history;

pub use connection::{check_connection, Connection, ConnectionRejection, HandleSide};
pub use graph::{Edge, EdgeId, ModelGraph, Node, NodeId, Params, Position};
pub use history::HistoryManager;
