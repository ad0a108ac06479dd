//! Model validation: identifiers, references, permission strings and field options.

use crate::config::ModelConfig;
use crate::error::ConfigError;
use crate::store::{DELETED_FIELD, ID_FIELD, OWNER_FIELD, VERSION_FIELD};
use std::collections::HashSet;

/// System fields maintained by the engine; models may not declare them.
const RESERVED_FIELDS: &[&str] = &[ID_FIELD, OWNER_FIELD, VERSION_FIELD];

/// Letters, digits and underscores, not starting with a digit.
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub fn validate(models: &[ModelConfig]) -> Result<(), ConfigError> {
    let mut names = HashSet::new();
    for m in models {
        if !is_identifier(&m.name) {
            return Err(ConfigError::Validation(format!("invalid model name: '{}'", m.name)));
        }
        if !names.insert(m.name.as_str()) {
            return Err(ConfigError::DuplicateModel(m.name.clone()));
        }
    }

    for m in models {
        let mut field_names = HashSet::new();
        for f in &m.fields {
            if !is_identifier(&f.name) {
                return Err(ConfigError::Validation(format!(
                    "invalid field name: '{}.{}'",
                    m.name, f.name
                )));
            }
            if RESERVED_FIELDS.contains(&f.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "{}.{} is a system field and cannot be declared",
                    m.name, f.name
                )));
            }
            if !field_names.insert(f.name.as_str()) {
                return Err(ConfigError::DuplicateField {
                    model: m.name.clone(),
                    field: f.name.clone(),
                });
            }
            let (type_name, _) = f.type_.parts().map_err(ConfigError::Validation)?;
            let kind: crate::config::FieldKind = type_name
                .parse()
                .map_err(|e: String| ConfigError::Validation(format!("{}.{}: {}", m.name, f.name, e)))?;
            if f.name == DELETED_FIELD && kind != crate::config::FieldKind::Boolean {
                return Err(ConfigError::Validation(format!(
                    "{}.{} must be a boolean",
                    m.name, DELETED_FIELD
                )));
            }
            if let Some(link) = &f.link {
                if !names.contains(link.as_str()) {
                    return Err(ConfigError::MissingReference {
                        kind: "model",
                        id: link.clone(),
                    });
                }
            }
            if f.map_to.is_some() && f.link.is_none() {
                return Err(ConfigError::Validation(format!(
                    "{}.{}: map_to requires link",
                    m.name, f.name
                )));
            }
            if let Some(pattern) = &f.pattern {
                regex::Regex::new(pattern).map_err(|e| {
                    ConfigError::Validation(format!("{}.{}: invalid match pattern: {}", m.name, f.name, e))
                })?;
            }
        }
        for f in &m.fields {
            if let Some(map_to) = &f.map_to {
                if field_names.contains(map_to.as_str()) {
                    return Err(ConfigError::Validation(format!(
                        "{}.{}: map_to '{}' collides with a declared field",
                        m.name, f.name, map_to
                    )));
                }
            }
        }

        for (role, value) in [
            ("admin", &m.perms.admin),
            ("owner", &m.perms.owner),
            ("user", &m.perms.user),
            ("all", &m.perms.all),
        ] {
            if let Some(v) = value {
                if !v.chars().all(|c| matches!(c.to_ascii_lowercase(), 'c' | 'r' | 'u' | 'd')) {
                    return Err(ConfigError::InvalidPermission {
                        model: m.name.clone(),
                        role,
                        value: v.clone(),
                    });
                }
            }
        }

        let mut method_names = HashSet::new();
        for method in &m.methods {
            if !method_names.insert(method.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate method: {}.{}",
                    m.name, method.name
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(value: serde_json::Value) -> ModelConfig {
        serde_json::from_value(value).expect("model config")
    }

    #[test]
    fn rejects_unknown_link_target() {
        let models = vec![model(serde_json::json!({
            "name": "test",
            "fields": [{ "name": "link_id", "type": "objectid", "link": "missing" }]
        }))];
        assert!(matches!(
            validate(&models),
            Err(ConfigError::MissingReference { kind: "model", .. })
        ));
    }

    #[test]
    fn rejects_bad_permission_letters() {
        let models = vec![model(serde_json::json!({
            "name": "test",
            "perms": { "user": "rx" }
        }))];
        assert!(matches!(validate(&models), Err(ConfigError::InvalidPermission { role: "user", .. })));
    }

    #[test]
    fn rejects_declared_system_fields() {
        let models = vec![model(serde_json::json!({
            "name": "test",
            "fields": [{ "name": "_version", "type": "number" }]
        }))];
        assert!(matches!(validate(&models), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn accepts_self_reference_and_soft_delete_flag() {
        let models = vec![model(serde_json::json!({
            "name": "node",
            "fields": [
                { "name": "parent_id", "type": "objectid", "link": "node", "map_to": "parent" },
                { "name": "_deleted", "type": "boolean" }
            ]
        }))];
        assert!(validate(&models).is_ok());
    }

    #[test]
    fn identifiers() {
        assert!(is_identifier("_deleted"));
        assert!(is_identifier("user_id2"));
        assert!(!is_identifier("2fast"));
        assert!(!is_identifier("a-b"));
        assert!(!is_identifier(""));
    }
}
