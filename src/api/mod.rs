//! Backend contract: layer registry, model load, model list and save.
//!
//! Every call is asynchronous. The editing session tags requests with a
//! token so a response arriving after the user switched projects is dropped
//! instead of applied.

use serde::{Deserialize, Serialize};

use crate::error::CanvasResult;
use crate::registry::LayerRegistry;
use crate::save::Payload;

#[cfg(feature = "http")]
pub mod client;

#[cfg(feature = "http")]
pub use client::HttpBackend;

pub const UNKNOWN_ERROR: &str = "Unknown error occurred";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveRequest {
    pub model: Payload,
    pub model_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: Option<SaveData>,
}

impl SaveResponse {
    pub fn failed(message: impl Into<String>) -> Self {
        Self { success: false, message: message.into(), data: None }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveData {
    #[serde(default)]
    pub summary: Option<ModelSummary>,
}

/// Architecture summary the backend computes for a saved model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelSummary {
    #[serde(default)]
    pub layers: Vec<LayerSummary>,
    #[serde(default)]
    pub total_params: u64,
    #[serde(default)]
    pub trainable_params: u64,
    #[serde(default)]
    pub non_trainable_params: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSummary {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub output_shape: String,
    #[serde(default)]
    pub param_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadResponse {
    pub success: bool,
    #[serde(default)]
    pub data: Option<LoadedModel>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadedModel {
    pub model_name: String,
    pub graph: Payload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelListing {
    pub model_name: String,
    #[serde(default)]
    pub created_on: Option<String>,
}

#[allow(async_fn_in_trait)]
pub trait ModelBackend {
    async fn fetch_registry(&self) -> CanvasResult<LayerRegistry>;

    async fn load_model(&self, model_name: &str, project_id: Option<&str>) -> CanvasResult<LoadResponse>;

    /// Saved models for the project, most recent first.
    async fn list_models(&self, project_id: Option<&str>) -> CanvasResult<Vec<ModelListing>>;

    // Never fails at the transport level; network errors come back as an unsuccessful response
    async fn save_model(&self, request: &SaveRequest) -> SaveResponse;
}
