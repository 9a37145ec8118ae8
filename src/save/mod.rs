//! Serialization to the backend wire format and the save-readiness gate.

pub mod readiness;
pub mod serializer;

pub use readiness::{can_save, check_readiness, is_connected, is_valid_model_name, NotReady};
pub use serializer::{deserialize, serialize, Payload, PayloadEdge, PayloadNode, PayloadNodeData};
