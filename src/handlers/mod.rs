//! HTTP handlers for model CRUD, model methods and introspection.

pub mod call;
pub mod entity;
pub mod meta;
