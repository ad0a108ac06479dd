//! Engine services: permissions, record mutation, hooks, model methods and the request pipeline.

pub mod crud;
pub mod deserialize;
pub mod hooks;
pub mod methods;
pub mod permission;
pub mod pipeline;
pub mod validation;

pub use crud::{CrudService, Page};
pub use hooks::{
    Action, DeleteKind, HookFlow, HookRequest, Hooks, MutationCallbacks, NoopCallbacks, PostHook,
    PreHook,
};
pub use methods::{MethodCall, MethodScope, ModelMethod};
pub use permission::{can_perform, Access, Verb};
pub use pipeline::{Call, Engine, EngineBuilder};
pub use validation::RecordValidator;
