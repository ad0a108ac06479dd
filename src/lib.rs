//! modelrest: schema-driven REST engine.
//!
//! Models are declared as data, bound to method implementations and frozen into a
//! [`ModelRegistry`]. The [`Engine`] serves list/get/create/update/delete and model methods over
//! a [`DocumentStore`], gated by per-model permission tables and fronted by a response cache.

pub mod cache;
pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod migration;
pub mod query;
pub mod response;
pub mod routes;
pub mod service;
pub mod settings;
pub mod sql;
pub mod state;
pub mod store;

pub use cache::ResponseCache;
pub use config::{parse_models, ModelConfig, ModelRegistry, RegistryBuilder};
pub use error::{AppError, ConfigError};
pub use extractors::{trusted_header_principal, Principal};
pub use migration::apply_migrations;
pub use routes::{app_router, common_routes, entity_routes, model_routes};
pub use service::{
    Action, DeleteKind, Engine, HookFlow, HookRequest, Hooks, MethodCall, MutationCallbacks,
    PostHook, PreHook,
};
pub use settings::Settings;
pub use state::AppState;
pub use store::{DocumentStore, InMemoryStore, PgDocumentStore};
