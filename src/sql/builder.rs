//! Builds parameterized SQL over JSONB document tables.
//!
//! Each collection is one table `(id TEXT, seq BIGSERIAL, doc JSONB, updated_at TIMESTAMPTZ)`.
//! Identifiers come from validated model names only; every value is a bound parameter.

use crate::query::filter::{CompareOp, Filter};
use crate::query::FindQuery;
use crate::sql::params::PgBindValue;
use crate::store::CollectionSpec;
use serde_json::Value;

/// Quote identifier for PostgreSQL.
pub fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

pub fn qualified_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quoted(schema), quoted(table))
}

fn literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

#[derive(Debug, Default)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<PgBindValue>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf::default()
    }

    fn push_param(&mut self, v: PgBindValue) -> usize {
        self.params.push(v);
        self.params.len()
    }

    /// `doc #> $n::text[]` for a field path.
    fn path(&mut self, path: &[String]) -> String {
        let n = self.push_param(PgBindValue::TextArray(path.to_vec()));
        format!("(doc #> ${}::text[])", n)
    }

    fn json(&mut self, v: &Value) -> String {
        let n = self.push_param(PgBindValue::Json(v.clone()));
        format!("${}::jsonb", n)
    }
}

/// Elements of the value at a path: the array's items, or the scalar itself (SQL NULL when missing
/// becomes JSON null).
fn elements(expr: &str) -> String {
    format!(
        "jsonb_array_elements(CASE WHEN jsonb_typeof({e}) = 'array' THEN {e} ELSE jsonb_build_array({e}) END)",
        e = expr
    )
}

fn filter_sql(q: &mut QueryBuf, f: &Filter) -> String {
    match f {
        Filter::All => "TRUE".into(),
        Filter::And(parts) if parts.is_empty() => "TRUE".into(),
        Filter::Or(parts) if parts.is_empty() => "FALSE".into(),
        Filter::And(parts) => format!(
            "({})",
            parts.iter().map(|p| filter_sql(q, p)).collect::<Vec<_>>().join(" AND ")
        ),
        Filter::Or(parts) => format!(
            "({})",
            parts.iter().map(|p| filter_sql(q, p)).collect::<Vec<_>>().join(" OR ")
        ),
        Filter::Regex { path, pattern } => {
            let expr = q.path(path);
            let n = q.push_param(PgBindValue::Text(pattern.source.clone()));
            let op = if pattern.case_insensitive { "~*" } else { "~" };
            format!(
                "EXISTS (SELECT 1 FROM {} e WHERE jsonb_typeof(e) = 'string' AND (e #>> '{{}}') {} ${})",
                elements(&expr),
                op,
                n
            )
        }
        Filter::Compare { path, op, value } => compare_sql(q, path, *op, value),
    }
}

fn eq_sql(q: &mut QueryBuf, path: &[String], value: &Value) -> String {
    let expr = q.path(path);
    if value.is_null() {
        return format!("({e} IS NULL OR {e} = 'null'::jsonb)", e = expr);
    }
    let v = q.json(value);
    format!("({e} = {v} OR {e} @> jsonb_build_array({v}))", e = expr, v = v)
}

fn in_sql(q: &mut QueryBuf, path: &[String], value: &Value) -> String {
    let list = match value {
        Value::Array(_) => value.clone(),
        single => Value::Array(vec![single.clone()]),
    };
    let expr = q.path(path);
    let v = q.json(&list);
    format!(
        "EXISTS (SELECT 1 FROM {} e, jsonb_array_elements({}) c WHERE e = c)",
        elements(&expr),
        v
    )
}

fn compare_sql(q: &mut QueryBuf, path: &[String], op: CompareOp, value: &Value) -> String {
    match op {
        CompareOp::Eq => eq_sql(q, path, value),
        CompareOp::Ne => format!("NOT COALESCE({}, FALSE)", eq_sql(q, path, value)),
        CompareOp::In => in_sql(q, path, value),
        CompareOp::Nin => format!("NOT COALESCE({}, FALSE)", in_sql(q, path, value)),
        CompareOp::Exists => {
            let expr = q.path(path);
            let want = !matches!(value, Value::Bool(false));
            format!("{} IS {}NULL", expr, if want { "NOT " } else { "" })
        }
        CompareOp::Gt | CompareOp::Gte | CompareOp::Lt | CompareOp::Lte => {
            let sym = match op {
                CompareOp::Gt => ">",
                CompareOp::Gte => ">=",
                CompareOp::Lt => "<",
                _ => "<=",
            };
            let expr = q.path(path);
            let v = q.json(value);
            format!(
                "EXISTS (SELECT 1 FROM {} e WHERE jsonb_typeof(e) = jsonb_typeof({v}) AND e {} {v})",
                elements(&expr),
                sym,
                v = v
            )
        }
    }
}

/// Search terms reduced to an OR tsquery over alphanumeric tokens.
fn ts_query(text: &str) -> Option<String> {
    let terms: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" | "))
    }
}

/// `None` when the collection has nothing searchable.
fn ts_vector(spec: &CollectionSpec) -> Option<String> {
    if spec.text.is_empty() {
        return None;
    }
    let cols: Vec<String> = spec
        .text
        .iter()
        .map(|f| format!("coalesce(doc ->> {}, '')", literal(f)))
        .collect();
    Some(format!("to_tsvector('simple', concat_ws(' ', {}))", cols.join(", ")))
}

/// WHERE body plus the relevance expression when a text search is present.
fn where_sql(q: &mut QueryBuf, spec: &CollectionSpec, find: &FindQuery) -> (String, Option<String>) {
    let mut clause = filter_sql(q, &find.filter);
    let mut rank = None;
    if let Some(text) = &find.text {
        match (ts_query(text), ts_vector(spec)) {
            (Some(tsq), Some(vector)) => {
                let n = q.push_param(PgBindValue::Text(tsq));
                let query = format!("to_tsquery('simple', ${})", n);
                clause = format!("{} AND {} @@ {}", clause, vector, query);
                rank = Some(format!("ts_rank({}, {})", vector, query));
            }
            // Keep the filter so its bind parameters stay referenced.
            _ => clause = format!("{} AND FALSE", clause),
        }
    }
    (clause, rank)
}

pub fn select_find(schema: &str, spec: &CollectionSpec, find: &FindQuery) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table = qualified_table(schema, &spec.name);
    let (clause, rank) = where_sql(&mut q, spec, find);

    let mut order = Vec::new();
    if find.by_relevance {
        if let Some(rank) = rank {
            order.push(format!("{} DESC", rank));
        }
    }
    for key in &find.sort {
        let expr = q.path(&key.path);
        order.push(if key.descending {
            format!("{} DESC NULLS LAST", expr)
        } else {
            format!("{} ASC NULLS FIRST", expr)
        });
    }
    order.push("seq ASC".into());

    let mut sql = format!(
        "SELECT doc FROM {} WHERE {} ORDER BY {}",
        table,
        clause,
        order.join(", ")
    );
    if let Some(limit) = find.limit {
        let n = q.push_param(PgBindValue::I64(i64::try_from(limit).unwrap_or(i64::MAX)));
        sql.push_str(&format!(" LIMIT ${}", n));
    }
    if find.skip > 0 {
        let n = q.push_param(PgBindValue::I64(i64::try_from(find.skip).unwrap_or(i64::MAX)));
        sql.push_str(&format!(" OFFSET ${}", n));
    }
    q.sql = sql;
    q
}

pub fn select_count(schema: &str, spec: &CollectionSpec, find: &FindQuery) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table = qualified_table(schema, &spec.name);
    let (clause, _) = where_sql(&mut q, spec, find);
    q.sql = format!("SELECT COUNT(*) FROM {} WHERE {}", table, clause);
    q
}

pub fn select_by_id(schema: &str, collection: &str, id: &str) -> QueryBuf {
    QueryBuf {
        sql: format!("SELECT doc FROM {} WHERE id = $1", qualified_table(schema, collection)),
        params: vec![PgBindValue::Text(id.to_string())],
    }
}

pub fn select_by_ids(schema: &str, collection: &str, ids: &[String]) -> QueryBuf {
    QueryBuf {
        sql: format!(
            "SELECT doc FROM {} WHERE id = ANY($1::text[]) ORDER BY seq",
            qualified_table(schema, collection)
        ),
        params: vec![PgBindValue::TextArray(ids.to_vec())],
    }
}

pub fn insert(schema: &str, collection: &str, id: &str, doc: &Value) -> QueryBuf {
    QueryBuf {
        sql: format!(
            "INSERT INTO {} (id, doc) VALUES ($1, $2::jsonb) RETURNING doc",
            qualified_table(schema, collection)
        ),
        params: vec![PgBindValue::Text(id.to_string()), PgBindValue::Json(doc.clone())],
    }
}

pub fn replace(schema: &str, collection: &str, id: &str, doc: &Value) -> QueryBuf {
    QueryBuf {
        sql: format!(
            "UPDATE {} SET doc = $2::jsonb, updated_at = NOW() WHERE id = $1 RETURNING doc",
            qualified_table(schema, collection)
        ),
        params: vec![PgBindValue::Text(id.to_string()), PgBindValue::Json(doc.clone())],
    }
}

pub fn delete(schema: &str, collection: &str, id: &str) -> QueryBuf {
    QueryBuf {
        sql: format!("DELETE FROM {} WHERE id = $1", qualified_table(schema, collection)),
        params: vec![PgBindValue::Text(id.to_string())],
    }
}

/// Idempotent DDL for one collection: table plus one unique expression index per unique field.
pub fn collection_ddl(schema: &str, spec: &CollectionSpec) -> Vec<String> {
    let table = qualified_table(schema, &spec.name);
    let mut out = vec![format!(
        "CREATE TABLE IF NOT EXISTS {} (\n  id TEXT PRIMARY KEY,\n  seq BIGSERIAL NOT NULL,\n  doc JSONB NOT NULL,\n  updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()\n)",
        table
    )];
    for field in &spec.unique {
        out.push(format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ((doc ->> {}))",
            quoted(&format!("{}_{}_uniq", spec.name, field)),
            table,
            literal(field)
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::filter::{split_path, Pattern};
    use crate::query::SortKey;
    use serde_json::json;

    fn spec() -> CollectionSpec {
        CollectionSpec {
            name: "test".into(),
            unique: vec!["bar".into()],
            text: vec!["fulltext".into()],
        }
    }

    #[test]
    fn find_with_filter_sort_and_paging() {
        let find = FindQuery {
            filter: Filter::and(vec![
                Filter::Compare {
                    path: split_path("age"),
                    op: CompareOp::Gt,
                    value: json!(3),
                },
                Filter::Or(vec![
                    Filter::eq("_deleted", json!(false)),
                    Filter::eq("_deleted", Value::Null),
                ]),
            ]),
            sort: vec![SortKey {
                path: split_path("name"),
                descending: true,
            }],
            skip: 10,
            limit: Some(5),
            ..Default::default()
        };
        let q = select_find("documents", &spec(), &find);
        assert!(q.sql.starts_with("SELECT doc FROM \"documents\".\"test\" WHERE ("));
        assert!(q.sql.contains("jsonb_typeof(e) = jsonb_typeof($2::jsonb) AND e > $2::jsonb"));
        assert!(q.sql.contains("((doc #> $5::text[]) IS NULL OR (doc #> $5::text[]) = 'null'::jsonb)"));
        assert!(q.sql.contains("ORDER BY (doc #> $6::text[]) DESC NULLS LAST, seq ASC LIMIT $7 OFFSET $8"));
        assert_eq!(q.params.len(), 8);
        assert_eq!(q.params[0], PgBindValue::TextArray(vec!["age".into()]));
        assert_eq!(q.params[1], PgBindValue::Json(json!(3)));
        assert_eq!(q.params[6], PgBindValue::I64(5));
        assert_eq!(q.params[7], PgBindValue::I64(10));
    }

    #[test]
    fn text_search_ranks_and_sanitizes_terms() {
        let find = FindQuery {
            text: Some("quick & fox!".into()),
            by_relevance: true,
            ..Default::default()
        };
        let q = select_find("documents", &spec(), &find);
        assert!(q.sql.contains("to_tsvector('simple', concat_ws(' ', coalesce(doc ->> 'fulltext', ''))) @@ to_tsquery('simple', $1)"));
        assert!(q.sql.contains("ORDER BY ts_rank("));
        assert_eq!(q.params[0], PgBindValue::Text("quick | fox".into()));

        let count = select_count("documents", &CollectionSpec { name: "x".into(), ..Default::default() }, &find);
        assert!(count.sql.ends_with("WHERE TRUE AND FALSE"));
        assert!(count.params.is_empty());

        let empty = FindQuery {
            text: Some("!!".into()),
            ..Default::default()
        };
        assert!(select_count("documents", &spec(), &empty).sql.ends_with("WHERE TRUE AND FALSE"));
    }

    #[test]
    fn regex_and_negations() {
        let find = FindQuery {
            filter: Filter::And(vec![
                Filter::Regex {
                    path: split_path("name"),
                    pattern: Pattern::contains("jo").unwrap(),
                },
                Filter::Compare {
                    path: split_path("tags"),
                    op: CompareOp::Nin,
                    value: json!(["a"]),
                },
            ]),
            ..Default::default()
        };
        let q = select_find("s", &spec(), &find);
        assert!(q.sql.contains("(e #>> '{}') ~* $2"));
        assert!(q.sql.contains("NOT COALESCE(EXISTS (SELECT 1 FROM jsonb_array_elements("));
        assert_eq!(q.params[1], PgBindValue::Text("jo".into()));
    }

    #[test]
    fn ddl_has_unique_expression_index() {
        let ddl = collection_ddl("documents", &spec());
        assert_eq!(ddl.len(), 2);
        assert!(ddl[0].starts_with("CREATE TABLE IF NOT EXISTS \"documents\".\"test\""));
        assert_eq!(
            ddl[1],
            "CREATE UNIQUE INDEX IF NOT EXISTS \"test_bar_uniq\" ON \"documents\".\"test\" ((doc ->> 'bar'))"
        );
    }

    #[test]
    fn quoting() {
        assert_eq!(quoted("a\"b"), "\"a\"\"b\"");
        assert_eq!(literal("o'k"), "'o''k'");
    }
}
