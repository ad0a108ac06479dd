//! Build the model registry from declarations plus bound method implementations.

use crate::config::resolved::{Field, FieldKind, FieldRules, Model, ModelRegistry, Relation, Schema};
use crate::config::types::*;
use crate::config::validate;
use crate::error::ConfigError;
use crate::service::methods::{MethodTable, ModelMethod};
use crate::service::permission::PermissionTable;
use std::collections::HashMap;
use std::sync::Arc;

/// Parse model declarations from JSON: either one model object or an array of them.
pub fn parse_models(json: &str) -> Result<Vec<ModelConfig>, ConfigError> {
    let value: serde_json::Value =
        serde_json::from_str(json).map_err(|e| ConfigError::Load(e.to_string()))?;
    let models = match value {
        serde_json::Value::Array(_) => serde_json::from_value(value),
        other => serde_json::from_value(other).map(|m: ModelConfig| vec![m]),
    };
    models.map_err(|e| ConfigError::Load(e.to_string()))
}

/// Collects models and method implementations, then validates and freezes them.
#[derive(Default)]
pub struct RegistryBuilder {
    models: Vec<ModelConfig>,
    methods: Vec<(String, String, Arc<dyn ModelMethod>)>,
}

impl RegistryBuilder {
    pub fn model(mut self, config: ModelConfig) -> Self {
        self.models.push(config);
        self
    }

    pub fn models(mut self, configs: impl IntoIterator<Item = ModelConfig>) -> Self {
        self.models.extend(configs);
        self
    }

    /// Bind an implementation to a method declared on `model`.
    pub fn method(
        mut self,
        model: impl Into<String>,
        name: impl Into<String>,
        method: impl ModelMethod + 'static,
    ) -> Self {
        self.methods.push((model.into(), name.into(), Arc::new(method)));
        self
    }

    pub fn build(self) -> Result<ModelRegistry, ConfigError> {
        validate(&self.models)?;

        let mut bound: HashMap<(String, String), Arc<dyn ModelMethod>> = HashMap::new();
        for (model, name, method) in self.methods {
            let declared = self
                .models
                .iter()
                .find(|m| m.name == model)
                .map(|m| m.methods.iter().any(|d| d.name == name))
                .unwrap_or(false);
            if !declared {
                return Err(ConfigError::UndeclaredMethod { model, method: name });
            }
            bound.insert((model, name), method);
        }

        let mut models = Vec::with_capacity(self.models.len());
        let mut model_by_name = HashMap::new();
        for config in &self.models {
            let model = Arc::new(resolve_model(config, &mut bound)?);
            model_by_name.insert(model.name.clone(), model.clone());
            models.push(model);
        }
        tracing::debug!(count = models.len(), "model registry built");
        Ok(ModelRegistry {
            models,
            model_by_name,
        })
    }
}

fn resolve_model(
    config: &ModelConfig,
    bound: &mut HashMap<(String, String), Arc<dyn ModelMethod>>,
) -> Result<Model, ConfigError> {
    let mut fields = Vec::with_capacity(config.fields.len());
    for f in &config.fields {
        fields.push(resolve_field(&config.name, f)?);
    }

    let perms = PermissionTable::from_config(&config.perms).map_err(|(role, value)| {
        ConfigError::InvalidPermission {
            model: config.name.clone(),
            role,
            value,
        }
    })?;

    let mut methods = MethodTable::default();
    for declared in &config.methods {
        let key = (config.name.clone(), declared.name.clone());
        let handler = bound.remove(&key).ok_or_else(|| ConfigError::UnboundMethod {
            model: config.name.clone(),
            method: declared.name.clone(),
        })?;
        methods.insert(declared.name.clone(), declared.scope, handler);
    }

    Ok(Model {
        name: config.name.clone(),
        schema: Schema::new(fields),
        perms,
        methods,
    })
}

fn resolve_field(model: &str, f: &FieldConfig) -> Result<Field, ConfigError> {
    let (type_name, array) = f.type_.parts().map_err(ConfigError::Validation)?;
    let kind: FieldKind = type_name
        .parse()
        .map_err(|e: String| ConfigError::Validation(format!("{}.{}: {}", model, f.name, e)))?;
    let pattern = f
        .pattern
        .as_deref()
        .map(regex::Regex::new)
        .transpose()
        .map_err(|e| ConfigError::Validation(format!("{}.{}: {}", model, f.name, e)))?;
    let relation = f.link.as_ref().map(|target| Relation {
        model: target.clone(),
        map_to: f.map_to.clone(),
        many: array,
    });
    let sensitive = f.sensitive || f.name == "password" || type_name.eq_ignore_ascii_case("password");
    Ok(Field {
        name: f.name.clone(),
        kind,
        array,
        relation,
        default: f.default.clone(),
        text: f.text,
        sensitive,
        rules: FieldRules {
            required: f.required,
            unique: f.unique,
            allowed: f.allowed.clone(),
            min: f.min,
            max: f.max,
            min_length: f.min_length,
            max_length: f.max_length,
            pattern,
        },
    })
}
