//! Postgres-backed document store.
//!
//! Each collection is a table in the configured document schema holding the record as JSONB.
//! Filters are translated to parameterized JSONB SQL by [`crate::sql`]; projection is applied
//! after fetch. Unique fields are backed by expression indexes, so a violation surfaces as
//! Postgres error 23505 and maps to [`StoreError::Constraint`].

use super::{
    new_id, project, CollectionSpec, Document, DocumentStore, StoreError, StoreResult, ID_FIELD,
};
use crate::migration::apply_migrations;
use crate::query::FindQuery;
use crate::sql::{self, bind_all, QueryBuf};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use tokio::sync::RwLock;

pub struct PgDocumentStore {
    pool: PgPool,
    schema: String,
    specs: RwLock<HashMap<String, CollectionSpec>>,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool, schema: impl Into<String>) -> Self {
        PgDocumentStore {
            pool,
            schema: schema.into(),
            specs: RwLock::new(HashMap::new()),
        }
    }

    pub async fn connect(database_url: &str, schema: impl Into<String>) -> StoreResult<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self::new(pool, schema))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn spec(&self, collection: &str) -> CollectionSpec {
        self.specs
            .read()
            .await
            .get(collection)
            .cloned()
            .unwrap_or_else(|| CollectionSpec {
                name: collection.to_string(),
                ..Default::default()
            })
    }

    async fn fetch_docs(&self, q: &QueryBuf) -> StoreResult<Vec<Document>> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let rows = bind_all(sqlx::query(&q.sql), &q.params)
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_error)?;
        rows.iter().map(row_to_doc).collect()
    }

    async fn fetch_doc(&self, q: &QueryBuf) -> StoreResult<Option<Document>> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let row = bind_all(sqlx::query(&q.sql), &q.params)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)?;
        row.as_ref().map(row_to_doc).transpose()
    }
}

fn row_to_doc(row: &PgRow) -> StoreResult<Document> {
    let doc: sqlx::types::Json<Value> = row.try_get("doc")?;
    match doc.0 {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::Backend(format!("stored document is not an object: {}", other))),
    }
}

fn map_db_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.code().as_deref() == Some("23505") {
            let what = db.constraint().unwrap_or("unique index").to_string();
            return StoreError::Constraint(format!("duplicate key: {}", what));
        }
    }
    StoreError::Db(err)
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn prepare(&self, collections: &[CollectionSpec]) -> StoreResult<()> {
        apply_migrations(&self.pool, &self.schema, collections).await?;
        let mut specs = self.specs.write().await;
        for spec in collections {
            specs.insert(spec.name.clone(), spec.clone());
        }
        Ok(())
    }

    async fn find(&self, collection: &str, query: &FindQuery) -> StoreResult<Vec<Document>> {
        let spec = self.spec(collection).await;
        let q = sql::select_find(&self.schema, &spec, query);
        let docs = self.fetch_docs(&q).await?;
        Ok(docs
            .into_iter()
            .map(|d| project(d, query.projection.as_deref()))
            .collect())
    }

    async fn count(&self, collection: &str, query: &FindQuery) -> StoreResult<u64> {
        let spec = self.spec(collection).await;
        let q = sql::select_count(&self.schema, &spec, query);
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let row = bind_all(sqlx::query(&q.sql), &q.params)
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_error)?;
        let n: i64 = row.try_get(0)?;
        Ok(n.max(0) as u64)
    }

    async fn find_by_id(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        self.fetch_doc(&sql::select_by_id(&self.schema, collection, id)).await
    }

    async fn find_by_ids(&self, collection: &str, ids: &[String]) -> StoreResult<Vec<Document>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.fetch_docs(&sql::select_by_ids(&self.schema, collection, ids)).await
    }

    async fn insert(&self, collection: &str, mut doc: Document) -> StoreResult<Document> {
        let id = match doc.get(ID_FIELD).and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => new_id(),
        };
        doc.insert(ID_FIELD.to_string(), Value::String(id.clone()));
        let q = sql::insert(&self.schema, collection, &id, &Value::Object(doc));
        self.fetch_doc(&q)
            .await?
            .ok_or_else(|| StoreError::Backend("insert returned no row".into()))
    }

    async fn replace(&self, collection: &str, id: &str, mut doc: Document) -> StoreResult<Document> {
        doc.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
        let q = sql::replace(&self.schema, collection, id, &Value::Object(doc));
        self.fetch_doc(&q)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("{} {} not found", collection, id)))
    }

    async fn remove(&self, collection: &str, id: &str) -> StoreResult<bool> {
        let q = sql::delete(&self.schema, collection, id);
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let result = bind_all(sqlx::query(&q.sql), &q.params)
            .execute(&self.pool)
            .await
            .map_err(map_db_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}
