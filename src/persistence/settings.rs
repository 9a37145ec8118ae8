use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::graph_utils::history::{DEFAULT_COALESCE_WINDOW, DEFAULT_HISTORY_LIMIT};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditorSettings {
    // If None, use OS default state directory for drafts
    #[serde(default)]
    pub draft_override: Option<PathBuf>,
    // Base URL of the model-builder API
    #[serde(default = "EditorSettings::default_backend_url")]
    pub backend_url: String,
    #[serde(default = "EditorSettings::default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "EditorSettings::default_coalesce_window_ms")]
    pub coalesce_window_ms: u64,
    #[serde(default = "EditorSettings::default_draft_debounce_ms")]
    pub draft_debounce_ms: u64,
    // Canvas offset applied to duplicated layers
    #[serde(default = "EditorSettings::default_duplicate_offset")]
    pub duplicate_offset: f64,
}

impl Default for EditorSettings {
    fn default() -> Self {
        Self {
            draft_override: None,
            backend_url: Self::default_backend_url(),
            history_limit: Self::default_history_limit(),
            coalesce_window_ms: Self::default_coalesce_window_ms(),
            draft_debounce_ms: Self::default_draft_debounce_ms(),
            duplicate_offset: Self::default_duplicate_offset(),
        }
    }
}

impl EditorSettings {
    fn config_dir() -> PathBuf {
        #[cfg(target_os = "macos")]
        {
            // ~/Library/Application Support/model-canvas
            let home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("~"));
            return home.join("Library").join("Application Support").join("model-canvas");
        }
        #[cfg(target_os = "windows")]
        {
            // %APPDATA%\model-canvas
            if let Ok(appdata) = std::env::var("APPDATA") {
                return PathBuf::from(appdata).join("model-canvas");
            }
            return PathBuf::from("model-canvas");
        }
        #[cfg(all(unix, not(target_os = "macos")))]
        {
            // $XDG_CONFIG_HOME/model-canvas or ~/.config/model-canvas
            if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
                return PathBuf::from(xdg).join("model-canvas");
            }
            let home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("~"));
            return home.join(".config").join("model-canvas");
        }
    }

    fn draft_default_dir() -> PathBuf {
        #[cfg(target_os = "macos")]
        {
            let tmp = std::env::var_os("TMPDIR").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("/tmp"));
            return tmp.join("model-canvas").join("drafts");
        }
        #[cfg(target_os = "windows")]
        {
            // %LOCALAPPDATA%\model-canvas\Drafts else TEMP
            if let Ok(local) = std::env::var("LOCALAPPDATA") {
                return PathBuf::from(local).join("model-canvas").join("Drafts");
            }
            if let Ok(temp) = std::env::var("TEMP") {
                return PathBuf::from(temp).join("model-canvas");
            }
            return PathBuf::from("model-canvas");
        }
        #[cfg(all(unix, not(target_os = "macos")))]
        {
            // $XDG_STATE_HOME/model-canvas/drafts or ~/.local/state/model-canvas/drafts
            if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
                return PathBuf::from(xdg).join("model-canvas").join("drafts");
            }
            if let Ok(home) = std::env::var("HOME") {
                return PathBuf::from(home).join(".local").join("state").join("model-canvas").join("drafts");
            }
            return PathBuf::from("/tmp").join("model-canvas").join("drafts");
        }
    }

    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_dir().join("settings.json");
        if !path.exists() {
            return Ok(Self::default());
        }
        let mut f = fs::File::open(path)?;
        let mut s = String::new();
        f.read_to_string(&mut s)?;
        Ok(serde_json::from_str(&s)?)
    }

    pub fn draft_dir(&self) -> PathBuf {
        if let Some(p) = &self.draft_override { return p.clone(); }
        Self::draft_default_dir()
    }

    pub fn coalesce_window(&self) -> Duration { Duration::from_millis(self.coalesce_window_ms) }
    pub fn draft_debounce(&self) -> Duration { Duration::from_millis(self.draft_debounce_ms) }

    pub(crate) fn default_backend_url() -> String { "http://127.0.0.1:4300/api/v1".to_string() }
    pub(crate) fn default_history_limit() -> usize { DEFAULT_HISTORY_LIMIT }
    pub(crate) fn default_coalesce_window_ms() -> u64 { DEFAULT_COALESCE_WINDOW.as_millis() as u64 }
    pub(crate) fn default_draft_debounce_ms() -> u64 { 500 }
    pub(crate) fn default_duplicate_offset() -> f64 { 40.0 }
}
