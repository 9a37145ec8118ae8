//! Editing core for a no-code neural-network model builder.
//!
//! A model is a directed acyclic graph of layer nodes. [`session::EditingSession`]
//! owns the working graph and keeps undo history, debounced local drafts, and
//! the backend round trips consistent with it.

pub mod api;
pub mod clock;
pub mod error;
pub mod graph_utils;
pub mod persistence;
pub mod registry;
pub mod save;
pub mod session;

pub use error::{CanvasError, CanvasResult};
pub use session::EditingSession;
