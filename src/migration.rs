//! Apply the model registry to the database: document schema, one table per collection,
//! unique indexes. Idempotent; safe to run on every start.

use crate::sql::{collection_ddl, quoted};
use crate::store::{CollectionSpec, StoreError};
use sqlx::PgPool;

pub async fn apply_migrations(
    pool: &PgPool,
    schema: &str,
    collections: &[CollectionSpec],
) -> Result<(), StoreError> {
    sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", quoted(schema)))
        .execute(pool)
        .await?;
    for spec in collections {
        for sql in collection_ddl(schema, spec) {
            tracing::debug!(sql = %sql, "migration");
            sqlx::query(&sql).execute(pool).await?;
        }
    }
    tracing::info!(schema = %schema, collections = collections.len(), "document tables ready");
    Ok(())
}
