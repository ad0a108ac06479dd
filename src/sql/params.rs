//! Values bound to generated SQL.

use serde_json::Value;
use sqlx::postgres::{PgArguments, Postgres};
use sqlx::query::Query;

/// A value that can be bound to a PostgreSQL query. Placeholders in generated SQL carry an
/// explicit cast, so each variant binds as its natural Postgres type.
#[derive(Clone, Debug, PartialEq)]
pub enum PgBindValue {
    I64(i64),
    Text(String),
    TextArray(Vec<String>),
    Json(Value),
}

/// Bind every parameter in order.
pub fn bind_all<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &'q [PgBindValue],
) -> Query<'q, Postgres, PgArguments> {
    for p in params {
        query = match p {
            PgBindValue::I64(n) => query.bind(*n),
            PgBindValue::Text(s) => query.bind(s.as_str()),
            PgBindValue::TextArray(v) => query.bind(v.as_slice()),
            PgBindValue::Json(v) => query.bind(sqlx::types::Json(v)),
        };
    }
    query
}
