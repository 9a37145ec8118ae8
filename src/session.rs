//! One model-builder editing session.
//!
//! The session owns the working graph outright. History and drafts only see
//! deep copies, and every mutation goes through the methods here so that the
//! pre-mutation snapshot, the draft schedule, and the selection stay in step.
//! Project scope, registry, and in-flight request bookkeeping live on the
//! session too, so several sessions in one process never share state.

use std::time::Instant;

use log::{debug, info, warn};

use crate::api::{LoadResponse, ModelBackend, ModelSummary, SaveRequest, SaveResponse, UNKNOWN_ERROR};
use crate::clock::{Clock, SystemClock};
use crate::error::{CanvasError, CanvasResult};
use crate::graph_utils::connection::{check_connection, Connection};
use crate::graph_utils::graph::{EdgeId, ModelGraph, NodeId, Params, Position};
use crate::graph_utils::history::HistoryManager;
use crate::persistence::draft::{DraftStore, FlushOutcome};
use crate::persistence::settings::EditorSettings;
use crate::persistence::storage::{DraftStorage, FileStorage};
use crate::registry::LayerRegistry;
use crate::save::{self, NotReady, Payload};

/// Identifies one outstanding backend request. A response is applied only
/// while its token is still the latest of its kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestToken(u64);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub nodes: Vec<NodeId>,
    pub edges: Vec<EdgeId>,
}

impl Selection {
    pub fn is_empty(&self) -> bool { self.nodes.is_empty() && self.edges.is_empty() }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Char(char),
    Delete,
    Backspace,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPress {
    pub key: Key,
    pub ctrl: bool,
    pub meta: bool,
    pub shift: bool,
    // Auto-repeat from a held key
    pub repeat: bool,
    // Focus is in a form field; the canvas must not react
    pub in_text_field: bool,
}

impl KeyPress {
    pub fn new(key: Key) -> Self {
        Self { key, ctrl: false, meta: false, shift: false, repeat: false, in_text_field: false }
    }

    pub fn ctrl(mut self) -> Self { self.ctrl = true; self }
    pub fn shift(mut self) -> Self { self.shift = true; self }
    pub fn repeated(mut self) -> Self { self.repeat = true; self }
    pub fn in_text_field(mut self) -> Self { self.in_text_field = true; self }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Undo,
    Redo,
    Duplicate,
    DeleteSelection,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionStart {
    // Unsaved work from a previous visit was put back
    Draft,
    Loaded(String),
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    Saved(Option<ModelSummary>),
    // The session moved on (project switch) before the response arrived
    Stale,
}

#[derive(Debug, Default)]
struct InFlight {
    registry: Option<RequestToken>,
    load: Option<RequestToken>,
    save: Option<RequestToken>,
}

pub struct EditingSession {
    project_id: Option<String>,
    model_name: String,
    registry: LayerRegistry,
    graph: ModelGraph,
    history: HistoryManager,
    drafts: DraftStore,
    clock: Box<dyn Clock>,
    selection: Selection,
    duplicate_offset: f64,
    next_token: u64,
    // Bumped on every change that reaches the draft store
    revision: u64,
    saved_revision: u64,
    in_flight: InFlight,
    draft_restored: bool,
    last_summary: Option<ModelSummary>,
    last_key_step: Option<Instant>,
}

impl EditingSession {
    pub fn new(settings: &EditorSettings, storage: Box<dyn DraftStorage>, project_id: Option<String>) -> Self {
        Self {
            drafts: DraftStore::new(storage, project_id.as_deref(), settings.draft_debounce()),
            project_id,
            model_name: String::new(),
            registry: LayerRegistry::empty(),
            graph: ModelGraph::new(),
            history: HistoryManager::new(settings.history_limit, settings.coalesce_window()),
            clock: Box::new(SystemClock),
            selection: Selection::default(),
            duplicate_offset: settings.duplicate_offset,
            next_token: 0,
            revision: 0,
            saved_revision: 0,
            in_flight: InFlight::default(),
            draft_restored: false,
            last_summary: None,
            last_key_step: None,
        }
    }

    /// Session whose drafts live in the configured draft directory.
    pub fn open(settings: &EditorSettings, project_id: Option<String>) -> Self {
        Self::new(settings, Box::new(FileStorage::from_settings(settings)), project_id)
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn graph(&self) -> &ModelGraph { &self.graph }
    pub fn registry(&self) -> &LayerRegistry { &self.registry }
    pub fn model_name(&self) -> &str { &self.model_name }
    pub fn project_id(&self) -> Option<&str> { self.project_id.as_deref() }
    pub fn selection(&self) -> &Selection { &self.selection }
    pub fn history(&self) -> &HistoryManager { &self.history }
    pub fn can_undo(&self) -> bool { self.history.can_undo() }
    pub fn can_redo(&self) -> bool { self.history.can_redo() }
    pub fn has_restored_draft(&self) -> bool { self.draft_restored }
    pub fn last_summary(&self) -> Option<&ModelSummary> { self.last_summary.as_ref() }
    pub fn is_saving(&self) -> bool { self.in_flight.save.is_some() }

    // Registry is installed directly when it comes from somewhere other than the backend
    pub fn set_registry(&mut self, registry: LayerRegistry) {
        self.in_flight.registry = None;
        self.registry = registry;
    }

    pub fn set_model_name(&mut self, name: &str) {
        self.model_name = name.to_string();
        self.changed();
    }

    pub fn set_selection(&mut self, nodes: Vec<NodeId>, edges: Vec<EdgeId>) {
        self.selection = Selection { nodes, edges };
    }

    fn now(&self) -> Instant { self.clock.now() }

    // Must run before the structural change it precedes
    fn record(&mut self) {
        let now = self.now();
        self.history.snapshot(&self.graph, now);
    }

    fn changed(&mut self) {
        self.revision += 1;
        let now = self.now();
        self.drafts.note_change(&self.graph, &self.model_name, now);
    }

    fn prune_selection(&mut self) {
        let graph = &self.graph;
        self.selection.nodes.retain(|id| graph.contains_node(id));
        self.selection.edges.retain(|id| graph.edge(id).is_some());
    }

    fn issue_token(&mut self) -> RequestToken {
        self.next_token += 1;
        RequestToken(self.next_token)
    }

    pub fn add_node(&mut self, kind: &str, position: Position) -> CanvasResult<NodeId> {
        if !self.registry.contains(kind) {
            info!("add_node: unknown kind '{}'", kind);
            return Err(CanvasError::UnknownKind(kind.to_string()));
        }
        self.record();
        let id = self.graph.add_node(&self.registry, kind, position)?;
        self.changed();
        Ok(id)
    }

    pub fn remove_node(&mut self, id: &NodeId) -> bool {
        if !self.graph.contains_node(id) {
            return false;
        }
        self.record();
        self.graph.remove_node(id);
        self.prune_selection();
        self.changed();
        true
    }

    /// Replace a node's params wholesale. Not an undo step.
    pub fn update_node_params(&mut self, id: &NodeId, params: Params) -> bool {
        if !self.graph.set_node_params(id, params) {
            return false;
        }
        self.changed();
        true
    }

    pub fn move_node(&mut self, id: &NodeId, position: Position) -> bool {
        if !self.graph.set_node_position(id, position) {
            return false;
        }
        self.changed();
        true
    }

    pub fn duplicate_node(&mut self, id: &NodeId) -> Option<NodeId> {
        if !self.graph.contains_node(id) {
            return None;
        }
        self.record();
        let offset = (self.duplicate_offset, self.duplicate_offset);
        let copy = self.graph.duplicate_node(id, offset);
        self.changed();
        copy
    }

    /// Duplicate several nodes as one undo step. Returns the new ids.
    pub fn duplicate_selection(&mut self, ids: &[NodeId]) -> Vec<NodeId> {
        let existing: Vec<NodeId> = ids.iter().filter(|id| self.graph.contains_node(id)).cloned().collect();
        if existing.is_empty() {
            return Vec::new();
        }
        self.record();
        let offset = (self.duplicate_offset, self.duplicate_offset);
        let copies: Vec<NodeId> = existing
            .iter()
            .filter_map(|id| self.graph.duplicate_node(id, offset))
            .collect();
        self.selection = Selection::default();
        self.changed();
        copies
    }

    pub fn connect(&mut self, candidate: &Connection) -> CanvasResult<EdgeId> {
        if let Err(reason) = check_connection(&self.graph, candidate) {
            info!("connect {} -> {} rejected: {}", candidate.source, candidate.target, reason);
            return Err(reason.into());
        }
        self.record();
        let id = self.graph.connect(candidate)?;
        self.changed();
        Ok(id)
    }

    pub fn connect_nodes(&mut self, source: &NodeId, target: &NodeId) -> CanvasResult<EdgeId> {
        self.connect(&Connection::new(source.clone(), target.clone()))
    }

    pub fn remove_edge(&mut self, id: &EdgeId) -> bool {
        if self.graph.edge(id).is_none() {
            return false;
        }
        self.record();
        self.graph.remove_edge(id);
        self.prune_selection();
        self.changed();
        true
    }

    pub fn remove_selection(&mut self, node_ids: &[NodeId], edge_ids: &[EdgeId]) -> bool {
        if !self.graph.selection_touches(node_ids, edge_ids) {
            return false;
        }
        self.record();
        self.graph.remove_selection(node_ids, edge_ids);
        self.prune_selection();
        self.changed();
        true
    }

    /// Empty the canvas as a single undoable step.
    pub fn clear(&mut self) -> bool {
        if self.graph.is_empty() {
            return false;
        }
        self.record();
        self.graph.clear();
        self.selection = Selection::default();
        self.changed();
        true
    }

    pub fn undo(&mut self) -> bool {
        if !self.history.undo(&mut self.graph) {
            return false;
        }
        self.prune_selection();
        self.changed();
        true
    }

    pub fn redo(&mut self) -> bool {
        if !self.history.redo(&mut self.graph) {
            return false;
        }
        self.prune_selection();
        self.changed();
        true
    }

    /// Canvas keyboard shortcuts. Returns the action that was carried out.
    pub fn handle_key(&mut self, press: KeyPress) -> Option<KeyAction> {
        if press.in_text_field {
            return None;
        }
        let modifier = press.ctrl || press.meta;
        let action = match press.key {
            Key::Char(c) if modifier && c.eq_ignore_ascii_case(&'z') => {
                if press.shift { KeyAction::Redo } else { KeyAction::Undo }
            }
            Key::Char(c) if modifier && c.eq_ignore_ascii_case(&'d') => KeyAction::Duplicate,
            Key::Delete | Key::Backspace => KeyAction::DeleteSelection,
            _ => return None,
        };
        let performed = match action {
            KeyAction::Undo | KeyAction::Redo => {
                // Held or hammered keys must not interleave history steps
                let now = self.now();
                let too_soon = self
                    .last_key_step
                    .is_some_and(|last| now.saturating_duration_since(last) < self.history.coalesce_window());
                if press.repeat || too_soon {
                    debug!("handle_key: ignoring {:?} (repeat={}, too_soon={})", action, press.repeat, too_soon);
                    return None;
                }
                self.last_key_step = Some(now);
                if action == KeyAction::Undo { self.undo() } else { self.redo() }
            }
            KeyAction::Duplicate => {
                let nodes = self.selection.nodes.clone();
                !self.duplicate_selection(&nodes).is_empty()
            }
            KeyAction::DeleteSelection => {
                let Selection { nodes, edges } = self.selection.clone();
                self.remove_selection(&nodes, &edges)
            }
        };
        performed.then_some(action)
    }

    /// Drive the debounced draft write; call from the event loop tick.
    pub fn poll_drafts(&mut self) -> Option<FlushOutcome> {
        let now = self.now();
        self.drafts.poll(now)
    }

    pub fn draft_deadline(&self) -> Option<Instant> { self.drafts.deadline() }

    pub fn flush_drafts(&mut self) -> Option<FlushOutcome> { self.drafts.flush_now() }

    /// Put back a persisted draft for this project if there is one worth resuming.
    pub fn restore_draft(&mut self) -> bool {
        let Some(record) = self.drafts.load() else { return false };
        let (graph, model_name) = record.into_graph();
        info!(
            "restored draft '{}' ({} nodes, {} edges)",
            model_name,
            graph.node_count(),
            graph.edge_count()
        );
        self.graph = graph;
        self.model_name = model_name;
        self.history.clear();
        self.selection = Selection::default();
        self.draft_restored = true;
        true
    }

    pub fn discard_draft(&mut self) {
        self.drafts.discard();
        self.graph.clear();
        self.model_name.clear();
        self.history.clear();
        self.selection = Selection::default();
        self.draft_restored = false;
    }

    /// Move the session to another project. Outstanding requests become stale.
    pub fn switch_project(&mut self, project_id: Option<String>) {
        self.in_flight = InFlight::default();
        self.drafts.rescope(project_id.as_deref());
        self.project_id = project_id;
        self.graph.clear();
        self.model_name.clear();
        self.history.clear();
        self.selection = Selection::default();
        self.draft_restored = false;
        self.last_summary = None;
    }

    pub fn begin_registry_fetch(&mut self) -> RequestToken {
        let token = self.issue_token();
        self.in_flight.registry = Some(token);
        token
    }

    /// Returns true when the result was applied. A failed fetch leaves the
    /// registry as it was (empty on startup) and the editor keeps working.
    pub fn finish_registry_fetch(&mut self, token: RequestToken, result: CanvasResult<LayerRegistry>) -> bool {
        if self.in_flight.registry != Some(token) {
            debug!("registry response {:?} is stale, dropping", token);
            return false;
        }
        self.in_flight.registry = None;
        match result {
            Ok(registry) => {
                info!("registry loaded with {} layer kinds", registry.len());
                self.registry = registry;
                true
            }
            Err(e) => {
                warn!("registry unavailable: {}", e);
                false
            }
        }
    }

    pub fn begin_load(&mut self) -> RequestToken {
        let token = self.issue_token();
        self.in_flight.load = Some(token);
        token
    }

    /// Apply a load response. `Ok(false)` means the response was stale. On
    /// failure the graph is left untouched.
    pub fn finish_load(&mut self, token: RequestToken, result: CanvasResult<LoadResponse>) -> CanvasResult<bool> {
        if self.in_flight.load != Some(token) {
            debug!("load response {:?} is stale, dropping", token);
            return Ok(false);
        }
        self.in_flight.load = None;
        let loaded = match result? {
            LoadResponse { success: true, data: Some(loaded) } => loaded,
            _ => return Err(CanvasError::LoadFailed("backend could not provide the model".to_string())),
        };
        self.graph = save::deserialize(loaded.graph);
        self.model_name = loaded.model_name;
        self.history.clear();
        self.selection = Selection::default();
        self.draft_restored = false;
        Ok(true)
    }

    pub fn cancel_load(&mut self, token: RequestToken) {
        if self.in_flight.load == Some(token) {
            self.in_flight.load = None;
        }
    }

    pub fn payload(&self) -> Payload { save::serialize(&self.graph, &self.registry) }

    pub fn readiness(&self) -> Result<(), NotReady> {
        save::check_readiness(&self.model_name, &self.graph, &self.registry)
    }

    pub fn can_save(&self) -> bool { save::can_save(&self.model_name, &self.graph, &self.registry) }

    /// Claim the save slot and build the request. Fails while another save is
    /// outstanding or when the graph is not save-ready.
    pub fn begin_save(&mut self) -> CanvasResult<(RequestToken, SaveRequest)> {
        if self.in_flight.save.is_some() {
            return Err(CanvasError::SaveInFlight);
        }
        if let Err(reason) = self.readiness() {
            debug!("begin_save: {}", reason);
            return Err(CanvasError::NotReady(reason.to_string()));
        }
        let model_name = self.model_name.trim().to_string();
        if !save::is_valid_model_name(&model_name) {
            warn!("model name '{}' will likely be rejected by the backend", model_name);
        }
        let request = SaveRequest {
            model: self.payload(),
            model_name,
            project_id: self.project_id.clone(),
        };
        let token = self.issue_token();
        self.in_flight.save = Some(token);
        self.saved_revision = self.revision;
        Ok((token, request))
    }

    pub fn finish_save(&mut self, token: RequestToken, response: SaveResponse) -> CanvasResult<SaveOutcome> {
        if self.in_flight.save != Some(token) {
            debug!("save response {:?} is stale, dropping", token);
            return Ok(SaveOutcome::Stale);
        }
        self.in_flight.save = None;
        if !response.success {
            let message = if response.message.is_empty() { UNKNOWN_ERROR.to_string() } else { response.message };
            warn!("save rejected: {}", message);
            return Err(CanvasError::SaveRejected { message });
        }
        info!("model '{}' saved", self.model_name);
        if self.revision == self.saved_revision {
            self.drafts.discard();
        } else {
            // Edited while the save was in flight; the draft is newer than the saved model
            debug!("keeping draft: {} edits since the save began", self.revision - self.saved_revision);
        }
        self.draft_restored = false;
        let summary = response.data.and_then(|d| d.summary);
        self.last_summary = summary.clone();
        Ok(SaveOutcome::Saved(summary))
    }

    pub async fn load_registry<B: ModelBackend>(&mut self, backend: &B) -> bool {
        let token = self.begin_registry_fetch();
        let result = backend.fetch_registry().await;
        self.finish_registry_fetch(token, result)
    }

    /// Load the project's most recently saved model. `Ok(false)` when the
    /// project has none.
    pub async fn load_latest<B: ModelBackend>(&mut self, backend: &B) -> CanvasResult<bool> {
        let token = self.begin_load();
        let latest = match backend.list_models(self.project_id.as_deref()).await {
            Ok(models) => models.into_iter().next(),
            Err(e) => return self.finish_load(token, Err(e)),
        };
        let Some(latest) = latest else {
            self.cancel_load(token);
            return Ok(false);
        };
        let result = backend.load_model(&latest.model_name, self.project_id.as_deref()).await;
        self.finish_load(token, result)
    }

    /// Startup sequence: registry, then the local draft, then the backend.
    pub async fn initialize<B: ModelBackend>(&mut self, backend: &B) -> CanvasResult<SessionStart> {
        self.load_registry(backend).await;
        if self.restore_draft() {
            return Ok(SessionStart::Draft);
        }
        match self.load_latest(backend).await? {
            true => Ok(SessionStart::Loaded(self.model_name.clone())),
            false => Ok(SessionStart::Empty),
        }
    }

    pub async fn save_with<B: ModelBackend>(&mut self, backend: &B) -> CanvasResult<SaveOutcome> {
        let (token, request) = self.begin_save()?;
        let response = backend.save_model(&request).await;
        self.finish_save(token, response)
    }
}
