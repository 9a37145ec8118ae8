// canvas-check: report whether a saved graph would pass the save gate
// Build with: cargo build --features cli --bin canvas-check

use std::fs;
use std::process::exit;

use clap::{Arg, ArgAction, Command};
use log::info;

use model_canvas::api::{HttpBackend, ModelBackend};
use model_canvas::graph_utils::ModelGraph;
use model_canvas::persistence::{DraftRecord, EditorSettings, FileStorage};
use model_canvas::registry::LayerRegistry;
use model_canvas::save::{self, Payload};
use model_canvas::session::EditingSession;

// A draft record carries its own model name; a backend payload does not
fn parse_graph(raw: &str) -> Result<(ModelGraph, Option<String>), String> {
    if let Ok(payload) = serde_json::from_str::<Payload>(raw)
        && !payload.nodes.is_empty()
    {
        return Ok((save::deserialize(payload), None));
    }
    match serde_json::from_str::<DraftRecord>(raw) {
        Ok(record) => {
            let (graph, name) = record.into_graph();
            Ok((graph, Some(name).filter(|n| !n.trim().is_empty())))
        }
        Err(e) => Err(format!("not a draft record or model payload: {}", e)),
    }
}

fn read_graph_file(path: &str) -> Result<(ModelGraph, Option<String>), String> {
    let raw = fs::read_to_string(path).map_err(|e| format!("failed to read {}: {}", path, e))?;
    parse_graph(&raw).map_err(|e| format!("{}: {}", path, e))
}

// The draft the editor keeps for a project in the configured draft directory
fn read_project_draft(settings: &EditorSettings, project: Option<&str>) -> Result<(ModelGraph, Option<String>), String> {
    let mut session = EditingSession::open(settings, project.map(str::to_string));
    if !session.restore_draft() {
        let dir = FileStorage::from_settings(settings).dir().display().to_string();
        return Err(format!("no draft for project '{}' under {}", project.unwrap_or("default"), dir));
    }
    let name = Some(session.model_name().to_string()).filter(|n| !n.trim().is_empty());
    Ok((session.graph().clone(), name))
}

async fn fetch_registry(url: &str) -> Result<LayerRegistry, String> {
    let backend = HttpBackend::new(url).map_err(|e| e.to_string())?;
    backend.fetch_registry().await.map_err(|e| e.to_string())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::init();
    let matches = Command::new("canvas-check")
        .about("Check a model graph against the save gate (name, required params, connectivity)")
        .arg(Arg::new("graph").value_name("FILE").help("Draft record or model payload (JSON); defaults to the project's draft"))
        .arg(Arg::new("project").short('p').long("project").value_name("ID").help("Project whose local draft is checked"))
        .arg(Arg::new("registry").long("registry").value_name("FILE").help("Layer registry JSON; skips the backend"))
        .arg(Arg::new("backend").long("backend-url").value_name("URL").help("Model-builder API base URL"))
        .arg(Arg::new("name").short('n').long("name").value_name("NAME").help("Model name to check with"))
        .arg(Arg::new("payload").long("print-payload").action(ArgAction::SetTrue).help("Print the save payload when ready"))
        .get_matches();

    let settings = EditorSettings::load().unwrap_or_default();
    let loaded = match matches.get_one::<String>("graph") {
        Some(path) => read_graph_file(path),
        None => read_project_draft(&settings, matches.get_one::<String>("project").map(String::as_str)),
    };
    let (graph, stored_name) = match loaded {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("{}", e);
            exit(2);
        }
    };

    let registry = match matches.get_one::<String>("registry") {
        Some(path) => fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|s| LayerRegistry::from_json(&s).map_err(|e| e.to_string())),
        None => {
            let url = match matches.get_one::<String>("backend") {
                Some(url) => url.clone(),
                None => settings.backend_url.clone(),
            };
            info!("fetching layer registry from {}", url);
            fetch_registry(&url).await
        }
    };
    let registry = match registry {
        Ok(registry) => registry,
        Err(e) => {
            eprintln!("layer registry unavailable ({}); required parameters are not checked", e);
            LayerRegistry::empty()
        }
    };

    let name = matches.get_one::<String>("name").cloned().or(stored_name).unwrap_or_default();
    match save::check_readiness(&name, &graph, &registry) {
        Ok(()) => {
            if !save::is_valid_model_name(&name) {
                eprintln!("warning: '{}' contains characters the backend rejects", name.trim());
            }
            println!("ready: '{}' ({} layers, {} connections)", name.trim(), graph.node_count(), graph.edge_count());
            if matches.get_flag("payload") {
                match serde_json::to_string_pretty(&save::serialize(&graph, &registry)) {
                    Ok(json) => println!("{}", json),
                    Err(e) => {
                        eprintln!("failed to encode payload: {}", e);
                        exit(2);
                    }
                }
            }
        }
        Err(reason) => {
            println!("not ready: {}", reason);
            exit(1);
        }
    }
}
