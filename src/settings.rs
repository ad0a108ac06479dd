//! Runtime settings read from the environment.

use crate::error::ConfigError;
use crate::service::pipeline::{DEFAULT_BASE_URL, DEFAULT_CACHE_CAPACITY};
use std::str::FromStr;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3001";
pub const DEFAULT_DOCUMENT_SCHEMA: &str = "documents";
pub const DEFAULT_MODELS_PATH: &str = "models.json";
pub const DEFAULT_BODY_LIMIT_BYTES: usize = 2 * 1024 * 1024;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    /// Prefix for `next`/`prev` page links.
    pub base_url: String,
    pub bind_addr: String,
    /// Postgres connection string. Without it the in-memory store is used.
    pub database_url: Option<String>,
    /// Postgres schema holding one table per model.
    pub document_schema: String,
    pub models_path: String,
    pub body_limit_bytes: usize,
    pub cache_capacity: u64,
    /// Install the development-only header principal middleware.
    pub trust_principal_headers: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            base_url: DEFAULT_BASE_URL.to_string(),
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            database_url: None,
            document_schema: DEFAULT_DOCUMENT_SCHEMA.to_string(),
            models_path: DEFAULT_MODELS_PATH.to_string(),
            body_limit_bytes: DEFAULT_BODY_LIMIT_BYTES,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            trust_principal_headers: false,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset or blank keys fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Settings::default();
        Ok(Settings {
            base_url: get("BASE_URL").unwrap_or(defaults.base_url),
            bind_addr: get("BIND_ADDR").unwrap_or(defaults.bind_addr),
            database_url: get("DATABASE_URL"),
            document_schema: match get("DOCUMENT_SCHEMA") {
                Some(schema) if crate::config::is_identifier(&schema) => schema,
                Some(schema) => {
                    return Err(ConfigError::Validation(format!(
                        "DOCUMENT_SCHEMA must be an identifier, got '{}'",
                        schema
                    )))
                }
                None => defaults.document_schema,
            },
            models_path: get("MODELS_PATH").unwrap_or(defaults.models_path),
            body_limit_bytes: parse(get("BODY_LIMIT_BYTES"), "BODY_LIMIT_BYTES", defaults.body_limit_bytes)?,
            cache_capacity: parse(get("CACHE_CAPACITY"), "CACHE_CAPACITY", defaults.cache_capacity)?,
            trust_principal_headers: parse(
                get("TRUST_PRINCIPAL_HEADERS"),
                "TRUST_PRINCIPAL_HEADERS",
                defaults.trust_principal_headers,
            )?,
        })
    }
}

fn parse<T: FromStr>(raw: Option<String>, key: &str, default: T) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(v) => v
            .parse()
            .map_err(|_| ConfigError::Validation(format!("{}: invalid value '{}'", key, v))),
    }
}
