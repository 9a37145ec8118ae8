//! Debounced, best-effort persistence of the working graph.
//!
//! The store never drives a timer itself. The event loop reports changes
//! with [`DraftStore::note_change`] and calls [`DraftStore::poll`] on its
//! tick (or at [`DraftStore::deadline`]); a write happens only once the
//! debounce delay has passed with no newer change.

use std::time::{Duration, Instant};

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::macros::format_description;

use crate::error::{CanvasError, CanvasResult};
use crate::graph_utils::graph::{Edge, ModelGraph, Node};
use super::storage::DraftStorage;

pub const DEFAULT_DRAFT_DEBOUNCE: Duration = Duration::from_millis(500);

const KEY_PREFIX: &str = "model_canvas_draft_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftRecord {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub model_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<String>,
}

impl DraftRecord {
    pub fn from_graph(graph: &ModelGraph, model_name: &str) -> Self {
        Self {
            nodes: graph.nodes.clone(),
            edges: graph.edges.clone(),
            model_name: model_name.to_string(),
            saved_at: None,
        }
    }

    /// Nothing worth offering to resume.
    pub fn is_trivial(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty() && self.model_name.trim().is_empty()
    }

    pub fn into_graph(self) -> (ModelGraph, String) {
        (ModelGraph { nodes: self.nodes, edges: self.edges }, self.model_name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FlushOutcome {
    Written,
    Cleared,
    // Durability lost for this write; editing is unaffected
    Failed(CanvasError),
}

#[derive(Debug)]
struct PendingDraft {
    record: DraftRecord,
    due: Instant,
}

pub struct DraftStore {
    storage: Box<dyn DraftStorage>,
    key: String,
    debounce: Duration,
    pending: Option<PendingDraft>,
}

pub fn draft_key(project_id: Option<&str>) -> String {
    match project_id {
        Some(p) if !p.trim().is_empty() => format!("{}{}", KEY_PREFIX, p.trim()),
        _ => format!("{}default", KEY_PREFIX),
    }
}

fn stamp_now() -> Option<String> {
    let fmt = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]Z");
    OffsetDateTime::now_utc().format(fmt).ok()
}

impl DraftStore {
    pub fn new(storage: Box<dyn DraftStorage>, project_id: Option<&str>, debounce: Duration) -> Self {
        Self {
            storage,
            key: draft_key(project_id),
            debounce,
            pending: None,
        }
    }

    pub fn key(&self) -> &str { &self.key }

    /// Point the store at another project. A write still pending for the old
    /// scope is dropped.
    pub fn rescope(&mut self, project_id: Option<&str>) {
        self.pending = None;
        self.key = draft_key(project_id);
    }

    /// Schedule a write of the given state. Each call restarts the delay.
    pub fn note_change(&mut self, graph: &ModelGraph, model_name: &str, now: Instant) {
        self.pending = Some(PendingDraft {
            record: DraftRecord::from_graph(graph, model_name),
            due: now + self.debounce,
        });
    }

    pub fn deadline(&self) -> Option<Instant> { self.pending.as_ref().map(|p| p.due) }

    pub fn has_pending(&self) -> bool { self.pending.is_some() }

    /// Run the pending write if its delay has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<FlushOutcome> {
        match &self.pending {
            Some(p) if p.due <= now => self.flush_now(),
            _ => None,
        }
    }

    /// Run the pending write immediately, regardless of the delay.
    pub fn flush_now(&mut self) -> Option<FlushOutcome> {
        let PendingDraft { mut record, .. } = self.pending.take()?;
        let result = if record.is_trivial() {
            self.remove_record().map(|_| FlushOutcome::Cleared)
        } else {
            record.saved_at = stamp_now();
            self.write_record(&record).map(|_| FlushOutcome::Written)
        };
        Some(match result {
            Ok(outcome) => {
                debug!("draft: {:?} under {}", outcome, self.key);
                outcome
            }
            Err(e) => {
                warn!("draft: {}", e);
                FlushOutcome::Failed(e)
            }
        })
    }

    /// Persisted record for this scope, if it is worth resuming.
    pub fn load(&self) -> Option<DraftRecord> {
        let raw = match self.storage.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("draft: {}", CanvasError::PersistenceUnavailable(e.to_string()));
                return None;
            }
        };
        match serde_json::from_str::<DraftRecord>(&raw) {
            Ok(record) if !record.is_trivial() => Some(record),
            Ok(_) => None,
            Err(e) => {
                warn!("draft: ignoring unreadable record under {}: {}", self.key, e);
                None
            }
        }
    }

    /// Drop any pending write and delete the persisted record.
    pub fn discard(&mut self) -> bool {
        self.pending = None;
        match self.remove_record() {
            Ok(()) => true,
            Err(e) => {
                warn!("draft: {}", e);
                false
            }
        }
    }

    fn write_record(&mut self, record: &DraftRecord) -> CanvasResult<()> {
        let json = serde_json::to_string(record)
            .map_err(|e| CanvasError::PersistenceUnavailable(e.to_string()))?;
        self.storage
            .set(&self.key, &json)
            .map_err(|e| CanvasError::PersistenceUnavailable(e.to_string()))
    }

    fn remove_record(&mut self) -> CanvasResult<()> {
        self.storage
            .remove(&self.key)
            .map_err(|e| CanvasError::PersistenceUnavailable(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_utils::graph::Position;
    use crate::persistence::storage::MemoryStorage;

    fn one_node() -> ModelGraph {
        ModelGraph {
            nodes: vec![Node {
                id: "n1".into(),
                kind: "dense".into(),
                position: Position::new(1.0, 2.0),
                params: Default::default(),
            }],
            edges: Vec::new(),
        }
    }

    fn store(mem: &MemoryStorage) -> DraftStore {
        DraftStore::new(Box::new(mem.clone()), Some("p1"), DEFAULT_DRAFT_DEBOUNCE)
    }

    #[test]
    fn keys_are_scoped_per_project() {
        assert_eq!(draft_key(Some("abc")), "model_canvas_draft_abc");
        assert_eq!(draft_key(None), "model_canvas_draft_default");
        assert_eq!(draft_key(Some("  ")), "model_canvas_draft_default");
    }

    #[test]
    fn write_waits_for_debounce() {
        let mem = MemoryStorage::new();
        let mut drafts = store(&mem);
        let t0 = Instant::now();
        drafts.note_change(&one_node(), "m1", t0);
        assert_eq!(drafts.poll(t0 + Duration::from_millis(499)), None);
        assert!(!mem.contains(drafts.key()));
        assert_eq!(drafts.poll(t0 + Duration::from_millis(500)), Some(FlushOutcome::Written));
        assert!(mem.contains(drafts.key()));
        assert!(!drafts.has_pending());
    }

    #[test]
    fn new_change_resets_the_timer() {
        let mem = MemoryStorage::new();
        let mut drafts = store(&mem);
        let t0 = Instant::now();
        drafts.note_change(&ModelGraph::new(), "first", t0);
        drafts.note_change(&one_node(), "second", t0 + Duration::from_millis(400));
        assert_eq!(drafts.poll(t0 + Duration::from_millis(600)), None);
        assert_eq!(drafts.poll(t0 + Duration::from_millis(900)), Some(FlushOutcome::Written));
        let record = drafts.load().unwrap();
        assert_eq!(record.model_name, "second");
        assert_eq!(record.nodes.len(), 1);
        assert!(record.saved_at.is_some());
    }

    #[test]
    fn empty_unnamed_state_clears_existing_record() {
        let mem = MemoryStorage::new();
        let mut drafts = store(&mem);
        let t0 = Instant::now();
        drafts.note_change(&one_node(), "m1", t0);
        drafts.flush_now();
        assert!(mem.contains(drafts.key()));

        drafts.note_change(&ModelGraph::new(), "  ", t0);
        assert_eq!(drafts.flush_now(), Some(FlushOutcome::Cleared));
        assert!(!mem.contains(drafts.key()));
        assert_eq!(drafts.load(), None);
    }

    #[test]
    fn storage_failures_are_swallowed() {
        let mem = MemoryStorage::new();
        mem.set_unavailable(true);
        let mut drafts = store(&mem);
        drafts.note_change(&one_node(), "m1", Instant::now());
        assert!(matches!(drafts.flush_now(), Some(FlushOutcome::Failed(CanvasError::PersistenceUnavailable(_)))));
        assert_eq!(drafts.load(), None);
        assert!(!drafts.discard());
    }

    #[test]
    fn unreadable_record_is_ignored() {
        let mut mem = MemoryStorage::new();
        mem.set(&draft_key(Some("p1")), "not json").unwrap();
        assert_eq!(store(&mem).load(), None);
    }

    #[test]
    fn rescope_drops_pending_write() {
        let mem = MemoryStorage::new();
        let mut drafts = store(&mem);
        drafts.note_change(&one_node(), "m1", Instant::now());
        drafts.rescope(Some("p2"));
        assert_eq!(drafts.key(), "model_canvas_draft_p2");
        assert_eq!(drafts.flush_now(), None);
    }
}
