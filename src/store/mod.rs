//! Document storage behind the engine.
//!
//! Records are schemaless JSON objects grouped into named collections, one per model. The engine
//! only talks to storage through [`DocumentStore`]; queries arrive as a compiled [`FindQuery`].

use crate::query::FindQuery;
use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

pub mod memory;
pub mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgDocumentStore;

pub const ID_FIELD: &str = "_id";
pub const OWNER_FIELD: &str = "_owner_id";
pub const VERSION_FIELD: &str = "_version";
pub const DELETED_FIELD: &str = "_deleted";

/// One stored record.
pub type Document = Map<String, Value>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Constraint(String),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
    #[error("store backend: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// What a backend needs to know about a collection before serving it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CollectionSpec {
    pub name: String,
    /// Fields whose values must be unique across the collection.
    pub unique: Vec<String>,
    /// Fields covered by full-text search. Never holds sensitive or system fields.
    pub text: Vec<String>,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create collections and indexes. Idempotent.
    async fn prepare(&self, collections: &[CollectionSpec]) -> StoreResult<()>;

    async fn find(&self, collection: &str, query: &FindQuery) -> StoreResult<Vec<Document>>;
    /// Count of records matching the filter, ignoring skip, limit and projection.
    async fn count(&self, collection: &str, query: &FindQuery) -> StoreResult<u64>;
    async fn find_by_id(&self, collection: &str, id: &str) -> StoreResult<Option<Document>>;
    /// Records whose `_id` is in `ids`, in no particular order. Unknown ids are skipped.
    async fn find_by_ids(&self, collection: &str, ids: &[String]) -> StoreResult<Vec<Document>>;

    /// Persist a new record; assigns `_id` and returns the stored document.
    async fn insert(&self, collection: &str, doc: Document) -> StoreResult<Document>;
    /// Overwrite an existing record. `NotFound` if the id is unknown.
    async fn replace(&self, collection: &str, id: &str, doc: Document) -> StoreResult<Document>;
    /// Returns whether a record was removed.
    async fn remove(&self, collection: &str, id: &str) -> StoreResult<bool>;

    async fn health_check(&self) -> StoreResult<()>;
    fn backend_name(&self) -> &'static str;
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Keep only the projected fields; `_id` always survives.
pub(crate) fn project(doc: Document, fields: Option<&[String]>) -> Document {
    let Some(fields) = fields else { return doc };
    doc.into_iter()
        .filter(|(k, _)| k == ID_FIELD || fields.iter().any(|f| f == k))
        .collect()
}
