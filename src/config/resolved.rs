//! Resolved model registry: declarations validated and flattened for runtime use.
//! Built once at startup and shared read-only behind an `Arc`.

use crate::service::methods::MethodTable;
use crate::service::permission::PermissionTable;
use crate::store::{CollectionSpec, Document, DELETED_FIELD};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Element type of a field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Number,
    Boolean,
    Date,
    ObjectId,
    Mixed,
}

impl std::str::FromStr for FieldKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "string" | "text" | "password" => Ok(FieldKind::String),
            "number" | "int" | "integer" | "float" => Ok(FieldKind::Number),
            "boolean" | "bool" => Ok(FieldKind::Boolean),
            "date" | "datetime" => Ok(FieldKind::Date),
            "objectid" | "id" | "ref" => Ok(FieldKind::ObjectId),
            "mixed" | "object" | "any" => Ok(FieldKind::Mixed),
            other => Err(format!("unknown field type: {}", other)),
        }
    }
}

/// Reference from a field to another model's identifier.
#[derive(Clone, Debug, Serialize)]
pub struct Relation {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub map_to: Option<String>,
    pub many: bool,
}

#[derive(Clone, Debug, Default)]
pub struct FieldRules {
    pub required: bool,
    pub unique: bool,
    pub allowed: Option<Vec<Value>>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub min_length: Option<u32>,
    pub max_length: Option<u32>,
    pub pattern: Option<Regex>,
}

#[derive(Clone, Debug)]
pub struct Field {
    pub name: String,
    pub kind: FieldKind,
    pub array: bool,
    pub relation: Option<Relation>,
    pub default: Option<Value>,
    pub text: bool,
    pub sensitive: bool,
    pub rules: FieldRules,
}

/// Ordered field declarations of one model.
#[derive(Clone, Debug, Default)]
pub struct Schema {
    fields: Vec<Field>,
    by_name: HashMap<String, usize>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        let by_name = fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.clone(), i))
            .collect();
        Schema { fields, by_name }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.by_name.get(name).map(|&i| &self.fields[i])
    }

    pub fn declares(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Models declaring `_deleted` are soft-deleted; all others are hard-deleted.
    pub fn soft_delete(&self) -> bool {
        self.declares(DELETED_FIELD)
    }

    pub fn relations(&self) -> impl Iterator<Item = (&Field, &Relation)> {
        self.fields
            .iter()
            .filter_map(|f| f.relation.as_ref().map(|r| (f, r)))
    }

    /// Relation field addressed either by its own name or by its `map_to` output name.
    pub fn relation_by_name(&self, name: &str) -> Option<(&Field, &Relation)> {
        self.relations()
            .find(|(f, r)| f.name == name || r.map_to.as_deref() == Some(name))
    }

    /// Fields full-text search may look at: the declared text index, or else every plain string
    /// field. Sensitive and underscore-prefixed system fields are never searchable.
    pub fn searchable(&self) -> impl Iterator<Item = &Field> {
        let indexed = self.fields.iter().any(|f| f.text && !f.sensitive);
        self.fields.iter().filter(move |f| {
            !f.sensitive
                && !f.name.starts_with('_')
                && if indexed {
                    f.text
                } else {
                    f.kind == FieldKind::String && f.relation.is_none()
                }
        })
    }

    /// Remove password-class fields from an outgoing record.
    pub fn strip_sensitive(&self, doc: &mut Document) {
        for f in self.fields.iter().filter(|f| f.sensitive) {
            doc.remove(&f.name);
        }
    }

    /// JSON listing used by model introspection.
    pub fn describe(&self) -> Value {
        let mut out = serde_json::Map::new();
        for f in &self.fields {
            let mut desc = serde_json::json!({
                "type": f.kind,
                "array": f.array,
                "required": f.rules.required,
                "unique": f.rules.unique,
            });
            if let Some(rel) = &f.relation {
                desc["link"] = Value::String(rel.model.clone());
                if let Some(map_to) = &rel.map_to {
                    desc["map_to"] = Value::String(map_to.clone());
                }
            }
            if let Some(d) = &f.default {
                desc["default"] = d.clone();
            }
            out.insert(f.name.clone(), desc);
        }
        Value::Object(out)
    }
}

#[derive(Clone, Debug)]
pub struct Model {
    pub name: String,
    pub schema: Schema,
    pub perms: PermissionTable,
    pub methods: MethodTable,
}

impl Model {
    /// Storage-level description: collection name, unique and text-indexed fields.
    pub fn collection_spec(&self) -> CollectionSpec {
        CollectionSpec {
            name: self.name.clone(),
            unique: self
                .schema
                .fields()
                .iter()
                .filter(|f| f.rules.unique)
                .map(|f| f.name.clone())
                .collect(),
            text: self.schema.searchable().map(|f| f.name.clone()).collect(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ModelRegistry {
    pub models: Vec<Arc<Model>>,
    pub model_by_name: HashMap<String, Arc<Model>>,
}

impl ModelRegistry {
    pub fn builder() -> crate::config::RegistryBuilder {
        crate::config::RegistryBuilder::default()
    }

    pub fn model(&self, name: &str) -> Option<&Arc<Model>> {
        self.model_by_name.get(name)
    }

    pub fn collection_specs(&self) -> Vec<CollectionSpec> {
        self.models.iter().map(|m| m.collection_spec()).collect()
    }
}
