use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use model_canvas::api::{
    LoadResponse, LoadedModel, ModelBackend, ModelListing, ModelSummary, SaveData, SaveRequest, SaveResponse,
};
use model_canvas::clock::ManualClock;
use model_canvas::graph_utils::{ConnectionRejection, ModelGraph, NodeId, Position};
use model_canvas::persistence::{EditorSettings, FlushOutcome, MemoryStorage};
use model_canvas::registry::{LayerRegistry, ParamValue};
use model_canvas::session::{EditingSession, SaveOutcome, SessionStart};
use model_canvas::{CanvasError, CanvasResult};

const LAYERS_JSON: &str = r#"{"success": true, "data": {"layers": {
    "input": {"display_name": "Input", "category": "core", "params": {
        "shape": {"type": "string", "default": "28,28"}
    }},
    "dense": {"display_name": "Dense", "category": "core", "params": {
        "units": {"type": "int", "required": true},
        "activation": {"type": "string", "options": ["relu", "softmax"], "default": "relu"}
    }},
    "dropout": {"category": "regularization", "params": {
        "rate": {"type": "float", "default": 0.5}
    }}
}}}"#;

fn registry() -> LayerRegistry {
    LayerRegistry::from_json(LAYERS_JSON).unwrap()
}

fn new_session(project: Option<&str>) -> (EditingSession, ManualClock, MemoryStorage) {
    let clock = ManualClock::new();
    let storage = MemoryStorage::new();
    let mut session =
        EditingSession::new(&EditorSettings::default(), Box::new(storage.clone()), project.map(str::to_string))
            .with_clock(clock.clone());
    session.set_registry(registry());
    (session, clock, storage)
}

// Past the 50ms coalescing window
fn pause(clock: &ManualClock) {
    clock.advance(Duration::from_millis(120));
}

fn set_units(session: &mut EditingSession, node: &NodeId, units: ParamValue) {
    let mut params = session.graph().node(node).unwrap().params.clone();
    params.insert("units".into(), units);
    assert!(session.update_node_params(node, params));
}

fn in_degrees_ok(graph: &ModelGraph) -> bool {
    let mut seen = HashSet::new();
    graph.edges.iter().all(|e| seen.insert(e.target.clone()))
}

fn is_acyclic(graph: &ModelGraph) -> bool {
    let mut indegree: HashMap<&NodeId, usize> = graph.nodes.iter().map(|n| (&n.id, 0)).collect();
    for e in &graph.edges {
        *indegree.entry(&e.target).or_default() += 1;
    }
    let mut ready: Vec<&NodeId> = indegree.iter().filter(|(_, d)| **d == 0).map(|(id, _)| *id).collect();
    let mut visited = 0;
    while let Some(id) = ready.pop() {
        visited += 1;
        for e in graph.edges.iter().filter(|e| &e.source == id) {
            let d = indegree.get_mut(&e.target).unwrap();
            *d -= 1;
            if *d == 0 {
                ready.push(&e.target);
            }
        }
    }
    visited == indegree.len()
}

#[derive(Default)]
struct FakeBackend {
    registry: Option<LayerRegistry>,
    listing: Vec<ModelListing>,
    models: HashMap<String, LoadedModel>,
    save_response: RefCell<Option<SaveResponse>>,
    saves: RefCell<Vec<SaveRequest>>,
    loads: Cell<usize>,
}

impl ModelBackend for FakeBackend {
    async fn fetch_registry(&self) -> CanvasResult<LayerRegistry> {
        self.registry.clone().ok_or_else(|| CanvasError::LoadFailed("connection refused".into()))
    }

    async fn load_model(&self, model_name: &str, _project_id: Option<&str>) -> CanvasResult<LoadResponse> {
        self.loads.set(self.loads.get() + 1);
        Ok(match self.models.get(model_name) {
            Some(model) => LoadResponse { success: true, data: Some(model.clone()) },
            None => LoadResponse { success: false, data: None },
        })
    }

    async fn list_models(&self, _project_id: Option<&str>) -> CanvasResult<Vec<ModelListing>> {
        Ok(self.listing.clone())
    }

    async fn save_model(&self, request: &SaveRequest) -> SaveResponse {
        self.saves.borrow_mut().push(request.clone());
        self.save_response
            .borrow()
            .clone()
            .unwrap_or_else(|| SaveResponse::failed("Model name already used. Use a different name"))
    }
}

#[test]
fn input_to_dense_scenario() {
    let (mut s, clock, _) = new_session(None);
    let input = s.add_node("input", Position::new(0.0, 0.0)).expect("input is registered");
    pause(&clock);
    let dense = s.add_node("dense", Position::new(100.0, 0.0)).expect("dense is registered");
    pause(&clock);
    let edge = s.connect_nodes(&input, &dense).expect("input -> dense is legal");
    set_units(&mut s, &dense, ParamValue::Int(64));
    s.set_model_name("m1");
    assert!(s.can_save());

    pause(&clock);
    assert!(s.remove_edge(&edge));
    assert!(!s.can_save(), "two isolated layers are disconnected");
}

#[test]
fn unknown_kind_leaves_graph_alone() {
    let (mut s, _, _) = new_session(None);
    assert_eq!(s.add_node("conv9d", Position::default()), Err(CanvasError::UnknownKind("conv9d".into())));
    assert!(s.graph().is_empty());
    assert!(!s.can_undo());
}

#[test]
fn cycle_rejection_keeps_edges() {
    let (mut s, clock, _) = new_session(None);
    let ids: Vec<NodeId> = (0..3)
        .map(|i| {
            pause(&clock);
            s.add_node("dropout", Position::new(i as f64 * 100.0, 0.0)).unwrap()
        })
        .collect();
    s.connect_nodes(&ids[0], &ids[1]).unwrap();
    pause(&clock);
    s.connect_nodes(&ids[1], &ids[2]).unwrap();
    pause(&clock);
    let before = s.history().past_len();

    let err = s.connect_nodes(&ids[2], &ids[0]).unwrap_err();
    assert_eq!(err, CanvasError::IllegalConnection { reason: ConnectionRejection::WouldCreateCycle });
    assert_eq!(s.graph().edge_count(), 2);
    assert_eq!(s.history().past_len(), before, "rejected connect is not an undo step");
}

#[test]
fn fan_in_is_limited_to_one() {
    let (mut s, clock, _) = new_session(None);
    let a = s.add_node("input", Position::default()).unwrap();
    pause(&clock);
    let b = s.add_node("input", Position::default()).unwrap();
    pause(&clock);
    let c = s.add_node("dense", Position::default()).unwrap();
    pause(&clock);
    s.connect_nodes(&a, &c).unwrap();
    let err = s.connect_nodes(&b, &c).unwrap_err();
    assert_eq!(err, CanvasError::IllegalConnection { reason: ConnectionRejection::TargetAlreadyConnected });
    // Fan-out is fine
    pause(&clock);
    let d = s.add_node("dropout", Position::default()).unwrap();
    assert!(s.connect_nodes(&a, &d).is_ok());
}

#[test]
fn connectivity_gate_two_and_three() {
    let (mut s, clock, _) = new_session(None);
    s.set_model_name("m1");
    let mut chain = |n: usize| -> Vec<NodeId> {
        let ids: Vec<NodeId> = (0..n)
            .map(|_| {
                pause(&clock);
                s.add_node("dropout", Position::default()).unwrap()
            })
            .collect();
        for pair in ids.windows(2) {
            pause(&clock);
            s.connect_nodes(&pair[0], &pair[1]).unwrap();
        }
        ids
    };
    let left = chain(2);
    let right = chain(3);
    assert!(!s.can_save());
    s.connect_nodes(&left[1], &right[0]).unwrap();
    assert!(s.can_save());
}

#[test]
fn required_units_gate() {
    let (mut s, _, _) = new_session(None);
    s.set_model_name("m1");
    let dense = s.add_node("dense", Position::default()).unwrap();
    assert!(!s.can_save(), "units starts unset");
    set_units(&mut s, &dense, ParamValue::from("   "));
    assert!(!s.can_save(), "whitespace is still unset");
    set_units(&mut s, &dense, ParamValue::Int(10));
    assert!(s.can_save());
}

#[test]
fn undo_redo_duality() {
    let (mut s, clock, _) = new_session(None);
    let start = s.graph().clone();
    let a = s.add_node("input", Position::default()).unwrap();
    pause(&clock);
    let b = s.add_node("dense", Position::new(50.0, 0.0)).unwrap();
    pause(&clock);
    s.connect_nodes(&a, &b).unwrap();
    pause(&clock);
    s.duplicate_node(&b).unwrap();
    pause(&clock);
    s.remove_node(&a);
    pause(&clock);
    let end = s.graph().clone();

    for _ in 0..5 {
        assert!(s.undo());
        pause(&clock);
    }
    assert!(!s.undo());
    assert_eq!(s.graph(), &start);
    for _ in 0..5 {
        assert!(s.redo());
        pause(&clock);
    }
    assert!(!s.redo());
    assert_eq!(s.graph(), &end);
}

#[test]
fn mutations_inside_window_undo_together() {
    let (mut s, clock, _) = new_session(None);
    let a = s.add_node("input", Position::default()).unwrap();
    pause(&clock);
    let before = s.graph().clone();

    let b = s.add_node("dense", Position::default()).unwrap();
    clock.advance(Duration::from_millis(10));
    s.connect_nodes(&a, &b).unwrap();
    assert_eq!(s.graph().edge_count(), 1);

    assert!(s.undo());
    assert_eq!(s.graph(), &before);
}

#[test]
fn random_edits_never_break_structure() {
    let (mut s, clock, _) = new_session(None);
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let ids: Vec<NodeId> = (0..8)
        .map(|_| s.add_node("dropout", Position::default()).unwrap())
        .collect();

    for _ in 0..500 {
        clock.advance(Duration::from_millis(rng.gen_range(0..100)));
        match rng.gen_range(0..10) {
            0..=5 => {
                let a = &ids[rng.gen_range(0..ids.len())];
                let b = &ids[rng.gen_range(0..ids.len())];
                let _ = s.connect_nodes(a, b);
            }
            6..=7 => {
                if !s.graph().edges.is_empty() {
                    let idx = rng.gen_range(0..s.graph().edges.len());
                    let edge = s.graph().edges[idx].id.clone();
                    assert!(s.remove_edge(&edge));
                }
            }
            8 => {
                s.undo();
            }
            _ => {
                s.redo();
            }
        }
        assert!(in_degrees_ok(s.graph()), "a node gained a second input");
        assert!(is_acyclic(s.graph()), "edge set has a cycle");
    }
}

#[test]
fn draft_is_debounced_and_restorable() {
    let (mut s, clock, storage) = new_session(Some("proj-7"));
    s.set_model_name("draft_model");
    s.add_node("input", Position::default()).unwrap();
    clock.advance(Duration::from_millis(300));
    s.add_node("dense", Position::default()).unwrap();
    clock.advance(Duration::from_millis(300));
    assert_eq!(s.poll_drafts(), None, "second edit restarted the delay");
    assert!(!storage.contains("model_canvas_draft_proj-7"));
    clock.advance(Duration::from_millis(200));
    assert_eq!(s.poll_drafts(), Some(FlushOutcome::Written));

    let mut resumed = EditingSession::new(&EditorSettings::default(), Box::new(storage.clone()), Some("proj-7".into()));
    assert!(resumed.restore_draft());
    assert_eq!(resumed.graph().node_count(), 2);
    assert_eq!(resumed.model_name(), "draft_model");
    assert!(!resumed.can_undo(), "restored draft starts a fresh history");

    let mut other = EditingSession::new(&EditorSettings::default(), Box::new(storage.clone()), Some("proj-8".into()));
    assert!(!other.restore_draft(), "drafts are scoped by project");
}

#[test]
fn unavailable_storage_does_not_stop_editing() {
    let (mut s, clock, storage) = new_session(None);
    storage.set_unavailable(true);
    s.add_node("input", Position::default()).unwrap();
    clock.advance(Duration::from_secs(1));
    assert!(matches!(s.poll_drafts(), Some(FlushOutcome::Failed(CanvasError::PersistenceUnavailable(_)))));
    pause(&clock);
    assert!(s.add_node("dense", Position::default()).is_ok());
    assert!(!s.restore_draft());
}

#[tokio::test]
async fn failed_save_keeps_graph_and_draft() {
    let (mut s, clock, storage) = new_session(Some("p1"));
    s.set_model_name("mnist");
    s.add_node("input", Position::default()).unwrap();
    clock.advance(Duration::from_secs(1));
    s.poll_drafts();
    let graph = s.graph().clone();

    let backend = FakeBackend::default();
    let err = s.save_with(&backend).await.unwrap_err();
    assert_eq!(err, CanvasError::SaveRejected { message: "Model name already used. Use a different name".into() });
    assert_eq!(s.graph(), &graph);
    assert!(storage.contains("model_canvas_draft_p1"));
    assert!(!s.is_saving(), "slot released for a retry");
}

#[tokio::test]
async fn successful_save_clears_draft_and_keeps_summary() {
    let (mut s, clock, storage) = new_session(Some("p1"));
    s.set_model_name("mnist");
    let a = s.add_node("input", Position::default()).unwrap();
    pause(&clock);
    let b = s.add_node("dense", Position::default()).unwrap();
    pause(&clock);
    s.connect_nodes(&a, &b).unwrap();
    set_units(&mut s, &b, ParamValue::Int(10));
    clock.advance(Duration::from_secs(1));
    s.poll_drafts();
    assert!(storage.contains("model_canvas_draft_p1"));

    let summary = ModelSummary { total_params: 7850, trainable_params: 7850, ..Default::default() };
    let backend = FakeBackend::default();
    *backend.save_response.borrow_mut() = Some(SaveResponse {
        success: true,
        message: "Model validated and saved successfully".into(),
        data: Some(SaveData { summary: Some(summary.clone()) }),
    });

    assert_eq!(s.save_with(&backend).await, Ok(SaveOutcome::Saved(Some(summary.clone()))));
    assert_eq!(s.last_summary(), Some(&summary));
    assert!(!storage.contains("model_canvas_draft_p1"));

    let sent = backend.saves.borrow();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].model_name, "mnist");
    assert_eq!(sent[0].project_id.as_deref(), Some("p1"));
    assert_eq!(sent[0].model.edges.len(), 1);
    let dense = sent[0].model.nodes.iter().find(|n| n.kind == "dense").unwrap();
    assert!(dense.data.registry.is_some(), "payload carries the schema");
}

#[test]
fn save_response_after_project_switch_is_stale() {
    let (mut s, _, _) = new_session(Some("p1"));
    s.set_model_name("m1");
    s.add_node("input", Position::default()).unwrap();
    let (token, _) = s.begin_save().unwrap();
    assert_eq!(s.begin_save().unwrap_err(), CanvasError::SaveInFlight);

    s.switch_project(Some("p2".into()));
    let ok = SaveResponse { success: true, message: String::new(), data: None };
    assert_eq!(s.finish_save(token, ok), Ok(SaveOutcome::Stale));
    assert!(s.last_summary().is_none());
}

#[tokio::test]
async fn initialize_prefers_draft_then_latest_model() {
    let payload = {
        let (mut seed, clock, _) = new_session(None);
        let a = seed.add_node("input", Position::default()).unwrap();
        pause(&clock);
        let b = seed.add_node("dropout", Position::default()).unwrap();
        pause(&clock);
        seed.connect_nodes(&a, &b).unwrap();
        seed.payload()
    };
    let mut backend = FakeBackend { registry: Some(registry()), ..Default::default() };
    backend.listing = vec![
        ModelListing { model_name: "newest".into(), created_on: Some("2025-05-02".into()) },
        ModelListing { model_name: "older".into(), created_on: Some("2025-04-01".into()) },
    ];
    backend.models.insert("newest".into(), LoadedModel { model_name: "newest".into(), graph: payload });

    let storage = MemoryStorage::new();
    let mut s = EditingSession::new(&EditorSettings::default(), Box::new(storage.clone()), Some("p1".into()));
    assert_eq!(s.initialize(&backend).await, Ok(SessionStart::Loaded("newest".into())));
    assert_eq!(s.graph().node_count(), 2);
    assert_eq!(s.graph().edge_count(), 1);
    assert!(!s.registry().is_empty());

    s.set_model_name("newest_edit");
    s.flush_drafts();
    let mut again = EditingSession::new(&EditorSettings::default(), Box::new(storage), Some("p1".into()));
    assert_eq!(again.initialize(&backend).await, Ok(SessionStart::Draft));
    assert_eq!(again.model_name(), "newest_edit");
    assert_eq!(backend.loads.get(), 1, "draft short-circuits the backend load");
}

#[tokio::test]
async fn unreachable_registry_leaves_editor_usable() {
    let backend = FakeBackend::default();
    let mut s = EditingSession::new(&EditorSettings::default(), Box::new(MemoryStorage::new()), None);
    assert_eq!(s.initialize(&backend).await, Ok(SessionStart::Empty));
    assert!(s.registry().is_empty());
    assert!(matches!(s.add_node("dense", Position::default()), Err(CanvasError::UnknownKind(_))));
}

#[tokio::test]
async fn failed_load_leaves_graph_untouched() {
    let mut backend = FakeBackend { registry: Some(registry()), ..Default::default() };
    backend.listing = vec![ModelListing { model_name: "gone".into(), created_on: None }];
    let (mut s, _, _) = new_session(Some("p1"));
    s.add_node("input", Position::default()).unwrap();
    let before = s.graph().clone();
    assert!(matches!(s.load_latest(&backend).await, Err(CanvasError::LoadFailed(_))));
    assert_eq!(s.graph(), &before);
}

#[test]
fn edits_during_save_stay_in_the_draft() {
    let (mut s, clock, storage) = new_session(Some("p1"));
    s.set_model_name("m1");
    s.add_node("input", Position::default()).unwrap();
    clock.advance(Duration::from_secs(1));
    s.poll_drafts();

    let (token, _) = s.begin_save().unwrap();
    pause(&clock);
    s.add_node("dropout", Position::default()).unwrap();
    let ok = SaveResponse { success: true, message: String::new(), data: None };
    assert!(matches!(s.finish_save(token, ok), Ok(SaveOutcome::Saved(_))));

    clock.advance(Duration::from_secs(1));
    assert_eq!(s.poll_drafts(), Some(FlushOutcome::Written));
    let mut resumed = EditingSession::new(&EditorSettings::default(), Box::new(storage), Some("p1".into()));
    assert!(resumed.restore_draft());
    assert_eq!(resumed.graph().node_count(), 2, "layer added mid-save survives");
}

#[test]
fn loaded_model_is_held_to_connection_rules() {
    let payload: model_canvas::save::Payload = serde_json::from_str(
        r#"{"nodes": [
            {"id": "a", "type": "dropout", "position": {"x": 0, "y": 0}, "data": {"params": {}}},
            {"id": "b", "type": "dropout", "position": {"x": 0, "y": 0}, "data": {"params": {}}},
            {"id": "c", "type": "dropout", "position": {"x": 0, "y": 0}, "data": {"params": {}}}
        ], "edges": [
            {"source": "a", "target": "c"}, {"source": "b", "target": "c"},
            {"source": "c", "target": "ghost"}, {"source": "a", "target": "b"},
            {"source": "b", "target": "a"}
        ]}"#,
    )
    .unwrap();
    let (mut s, _, _) = new_session(None);
    let token = s.begin_load();
    let response = LoadResponse { success: true, data: Some(LoadedModel { model_name: "bad".into(), graph: payload }) };
    assert_eq!(s.finish_load(token, Ok(response)), Ok(true));
    assert_eq!(s.graph().edge_count(), 2);
    assert!(in_degrees_ok(s.graph()));
    assert!(is_acyclic(s.graph()));
    assert!(s.graph().edges.iter().all(|e| s.graph().contains_node(&e.target)));
}

#[test]
fn opened_session_keeps_drafts_in_configured_dir() {
    let dir = tempfile::tempdir().unwrap();
    let settings = EditorSettings { draft_override: Some(dir.path().join("drafts")), ..Default::default() };

    let mut s = EditingSession::open(&settings, Some("p9".into()));
    s.set_registry(registry());
    s.set_model_name("on_disk");
    s.add_node("input", Position::default()).unwrap();
    assert_eq!(s.flush_drafts(), Some(FlushOutcome::Written));
    assert!(dir.path().join("drafts").join("model_canvas_draft_p9.json").exists());

    let mut reopened = EditingSession::open(&settings, Some("p9".into()));
    assert!(reopened.restore_draft());
    assert_eq!(reopened.model_name(), "on_disk");
}
