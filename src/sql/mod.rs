//! JSONB SQL for the Postgres document store.
//!
//! Table and column names only ever come from model declarations. Every
//! user-supplied value travels as a bind parameter.

mod builder;
mod params;

pub use builder::{
    collection_ddl, delete, insert, qualified_table, quoted, replace, select_by_id,
    select_by_ids, select_count, select_find, QueryBuf,
};
pub use params::{bind_all, PgBindValue};
