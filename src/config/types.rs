//! Raw model declarations as loaded from JSON (one object per model).

use crate::service::methods::MethodScope;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Field type as written in a model file: `"string"` or `["string"]` for an array of strings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldTypeConfig {
    Scalar(String),
    Array(Vec<String>),
}

impl FieldTypeConfig {
    /// Element type name and whether the field holds an array.
    pub fn parts(&self) -> Result<(&str, bool), String> {
        match self {
            FieldTypeConfig::Scalar(s) => Ok((s.as_str(), false)),
            FieldTypeConfig::Array(v) if v.len() == 1 => Ok((v[0].as_str(), true)),
            FieldTypeConfig::Array(v) => Err(format!(
                "array type must name exactly one element type, got {}",
                v.len()
            )),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FieldConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: FieldTypeConfig,
    /// Name of the model this field references (relation descriptor).
    #[serde(default)]
    pub link: Option<String>,
    /// Output name for the expanded relation; the id field is kept as-is.
    #[serde(default)]
    pub map_to: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub unique: bool,
    /// Part of the model's text index.
    #[serde(default)]
    pub text: bool,
    /// Never returned in API responses.
    #[serde(default)]
    pub sensitive: bool,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default, rename = "enum")]
    pub allowed: Option<Vec<Value>>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub min_length: Option<u32>,
    #[serde(default)]
    pub max_length: Option<u32>,
    #[serde(default, rename = "match")]
    pub pattern: Option<String>,
}

/// Capability strings per role, e.g. `{ "admin": "crud", "all": "r" }`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PermsConfig {
    #[serde(default)]
    pub admin: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub all: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MethodConfig {
    pub name: String,
    #[serde(default)]
    pub scope: MethodScope,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldConfig>,
    #[serde(default)]
    pub perms: PermsConfig,
    #[serde(default)]
    pub methods: Vec<MethodConfig>,
}
