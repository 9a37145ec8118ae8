use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A parameter value as it travels between the canvas and the backend.
///
/// Untagged so that plain JSON scalars (`16`, `0.5`, `"relu"`, `null`) map
/// straight onto it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Text(String),
    Null,
}

impl ParamValue {
    /// True when the value counts as "unset" for required-parameter checks.
    pub fn is_blank(&self) -> bool {
        match self {
            ParamValue::Null => true,
            ParamValue::Text(s) => s.trim().is_empty(),
            ParamValue::Int(_) | ParamValue::Float(_) => false,
        }
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self { ParamValue::Text(s.to_string()) }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self { ParamValue::Text(s) }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self { ParamValue::Int(v) }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self { ParamValue::Float(v) }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    Int,
    Float,
    String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerCategory {
    Core,
    Convolutional,
    Regularization,
    #[default]
    #[serde(other)]
    Other,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParamSchema {
    #[serde(rename = "type")]
    pub kind: ParamType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<ParamValue>,
}

impl ParamSchema {
    /// Value a freshly placed node starts with.
    ///
    /// Required fields without a declared default start blank so the
    /// save-readiness gate keeps them flagged until the user fills them in.
    /// Optional numeric fields start at zero.
    pub fn initial_value(&self) -> ParamValue {
        if let Some(default) = &self.default {
            return default.clone();
        }
        match (self.kind, self.required) {
            (_, true) | (ParamType::String, false) => ParamValue::Text(String::new()),
            (ParamType::Int, false) => ParamValue::Int(0),
            (ParamType::Float, false) => ParamValue::Float(0.0),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    // The backend keys entries by kind and may omit it inside the entry
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub category: LayerCategory,
    #[serde(default)]
    pub params: BTreeMap<String, ParamSchema>,
}

impl RegistryEntry {
    pub fn initial_params(&self) -> BTreeMap<String, ParamValue> {
        self.params
            .iter()
            .map(|(name, schema)| (name.clone(), schema.initial_value()))
            .collect()
    }

    pub fn required_params(&self) -> impl Iterator<Item = &str> {
        self.params
            .iter()
            .filter(|(_, schema)| schema.required)
            .map(|(name, _)| name.as_str())
    }
}
