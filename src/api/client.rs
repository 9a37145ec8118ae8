//! reqwest-backed implementation of [`ModelBackend`].

use std::time::Duration;

use log::{error, warn};
use reqwest::Client;
use serde::Deserialize;

use super::{LoadResponse, ModelBackend, ModelListing, SaveRequest, SaveResponse, UNKNOWN_ERROR};
use crate::error::{CanvasError, CanvasResult};
use crate::registry::LayerRegistry;

const LAYERS_PATH: &str = "/layers";
const MODEL_PATH: &str = "/model";
const MODEL_LIST_PATH: &str = "/model/model-list";
const SAVE_PATH: &str = "/model/save";

#[derive(Debug, Clone)]
pub struct HttpBackend {
    base_url: String,
    client: Client,
}

#[derive(Deserialize)]
struct ListEnvelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Vec<ModelListing>,
}

fn load_failed(e: impl std::fmt::Display) -> CanvasError {
    CanvasError::LoadFailed(e.to_string())
}

impl HttpBackend {
    pub fn new(base_url: &str) -> CanvasResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(load_failed)?;
        Ok(Self { base_url: base_url.trim_end_matches('/').to_string(), client })
    }

    fn url(&self, path: &str) -> String { format!("{}{}", self.base_url, path) }

    fn project_query(project_id: Option<&str>) -> Vec<(&'static str, String)> {
        project_id.map(|p| vec![("project_id", p.to_string())]).unwrap_or_default()
    }
}

impl ModelBackend for HttpBackend {
    async fn fetch_registry(&self) -> CanvasResult<LayerRegistry> {
        let body = self
            .client
            .get(self.url(LAYERS_PATH))
            .send()
            .await
            .map_err(load_failed)?
            .error_for_status()
            .map_err(load_failed)?
            .text()
            .await
            .map_err(load_failed)?;
        LayerRegistry::from_json(&body).map_err(load_failed)
    }

    async fn load_model(&self, model_name: &str, project_id: Option<&str>) -> CanvasResult<LoadResponse> {
        // Saved names are limited to [A-Za-z0-9_-], so the path needs no escaping
        let url = self.url(&format!("{}/{}/graph", MODEL_PATH, model_name));
        let resp = self
            .client
            .get(url)
            .query(&Self::project_query(project_id))
            .send()
            .await
            .map_err(load_failed)?;
        // Error statuses still carry the { success: false } envelope
        resp.json::<LoadResponse>().await.map_err(load_failed)
    }

    async fn list_models(&self, project_id: Option<&str>) -> CanvasResult<Vec<ModelListing>> {
        let envelope: ListEnvelope = self
            .client
            .get(self.url(MODEL_LIST_PATH))
            .query(&Self::project_query(project_id))
            .send()
            .await
            .map_err(load_failed)?
            .json()
            .await
            .map_err(load_failed)?;
        if !envelope.success {
            return Ok(Vec::new());
        }
        Ok(envelope.data)
    }

    async fn save_model(&self, request: &SaveRequest) -> SaveResponse {
        let resp = match self.client.post(self.url(SAVE_PATH)).json(request).send().await {
            Ok(resp) => resp,
            Err(e) => {
                error!("save: transport error: {}", e);
                return SaveResponse::failed(UNKNOWN_ERROR);
            }
        };
        let status = resp.status();
        match resp.json::<SaveResponse>().await {
            Ok(body) => body,
            Err(e) => {
                warn!("save: unreadable response (status {}): {}", status, e);
                SaveResponse::failed(UNKNOWN_ERROR)
            }
        }
    }
}
