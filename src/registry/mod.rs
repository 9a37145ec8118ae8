//! Catalog of layer kinds the canvas can place, fetched once per session.

pub mod layers;

use std::collections::BTreeMap;

use serde::Deserialize;

pub use layers::{LayerCategory, ParamSchema, ParamType, ParamValue, RegistryEntry};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct LayerRegistry {
    entries: BTreeMap<String, RegistryEntry>,
}

// The backend answers `{ data: { layers } }`; a bare `{ layers }` is accepted too
#[derive(Deserialize)]
struct RegistryEnvelope {
    #[serde(default)]
    data: Option<LayersBody>,
    #[serde(default)]
    layers: Option<BTreeMap<String, RegistryEntry>>,
}

#[derive(Deserialize)]
struct LayersBody {
    #[serde(default)]
    layers: BTreeMap<String, RegistryEntry>,
}

impl LayerRegistry {
    pub fn empty() -> Self { Self::default() }

    pub fn from_layers(layers: BTreeMap<String, RegistryEntry>) -> Self {
        let entries = layers
            .into_iter()
            .map(|(kind, mut entry)| {
                if entry.key.is_empty() {
                    entry.key = kind.clone();
                }
                if entry.display_name.is_empty() {
                    entry.display_name = kind.clone();
                }
                (kind, entry)
            })
            .collect();
        Self { entries }
    }

    pub fn from_json(s: &str) -> anyhow::Result<Self> {
        let envelope: RegistryEnvelope = serde_json::from_str(s)?;
        let layers = envelope
            .data
            .map(|d| d.layers)
            .or(envelope.layers)
            .unwrap_or_default();
        Ok(Self::from_layers(layers))
    }

    pub fn get(&self, kind: &str) -> Option<&RegistryEntry> { self.entries.get(kind) }
    pub fn contains(&self, kind: &str) -> bool { self.entries.contains_key(kind) }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
    pub fn len(&self) -> usize { self.entries.len() }

    pub fn entries(&self) -> impl Iterator<Item = &RegistryEntry> { self.entries.values() }

    /// Entries grouped for the layer palette.
    pub fn by_category(&self) -> BTreeMap<LayerCategory, Vec<&RegistryEntry>> {
        let mut out: BTreeMap<LayerCategory, Vec<&RegistryEntry>> = BTreeMap::new();
        for entry in self.entries.values() {
            out.entry(entry.category).or_default().push(entry);
        }
        out
    }
}
