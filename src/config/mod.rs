//! Model declarations: raw JSON types, validation, and the frozen registry built from them.

pub mod loader;
pub mod resolved;
pub mod types;
pub mod validator;

pub use loader::{parse_models, RegistryBuilder};
pub use resolved::{Field, FieldKind, FieldRules, Model, ModelRegistry, Relation, Schema};
pub use types::{FieldConfig, FieldTypeConfig, MethodConfig, ModelConfig, PermsConfig};
pub use validator::{is_identifier, validate};
