use crate::graph_utils::connection::ConnectionRejection;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CanvasError {
    #[error("unknown layer kind '{0}'")]
    UnknownKind(String),

    #[error("illegal connection: {reason}")]
    IllegalConnection { reason: ConnectionRejection },

    // Swallowed by the draft store; editing continues without durability
    #[error("draft storage unavailable: {0}")]
    PersistenceUnavailable(String),

    #[error("save rejected: {message}")]
    SaveRejected { message: String },

    #[error("load failed: {0}")]
    LoadFailed(String),

    #[error("a save is already in flight")]
    SaveInFlight,

    #[error("model is not ready to save: {0}")]
    NotReady(String),
}

impl From<ConnectionRejection> for CanvasError {
    fn from(reason: ConnectionRejection) -> Self {
        CanvasError::IllegalConnection { reason }
    }
}

pub type CanvasResult<T> = Result<T, CanvasError>;
