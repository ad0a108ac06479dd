//! In-memory document store.
//!
//! # Purpose
//! Implements [`DocumentStore`] with plain collections guarded by `tokio::sync::RwLock`. Used for
//! local development, the example binary when no `DATABASE_URL` is set, and every integration
//! test.
//!
//! # Semantics
//! - **Not durable**: state is lost on restart.
//! - Records keep insertion order; that order is the tiebreak for every sort.
//! - Unique fields are enforced on insert and replace, ignoring null values.
//! - Text search tokenizes the collection's searchable fields and scores a record by how many
//!   tokens match a search term. A collection without searchable fields matches nothing.
//!
//! # Performance
//! Every query scans the collection. Fine for tests and small dev datasets.

use super::{
    new_id, project, CollectionSpec, Document, DocumentStore, StoreError, StoreResult, ID_FIELD,
};
use crate::query::filter::{json_eq, lookup, sort_order};
use crate::query::FindQuery;
use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Collection {
    spec: CollectionSpec,
    docs: Vec<Document>,
}

impl Collection {
    fn position(&self, id: &str) -> Option<usize> {
        self.docs
            .iter()
            .position(|d| d.get(ID_FIELD).and_then(Value::as_str) == Some(id))
    }

    fn check_unique(&self, doc: &Document, skip: Option<usize>) -> StoreResult<()> {
        for field in &self.spec.unique {
            let Some(value) = doc.get(field).filter(|v| !v.is_null()) else { continue };
            let clash = self
                .docs
                .iter()
                .enumerate()
                .any(|(i, d)| Some(i) != skip && d.get(field).map(|v| json_eq(v, value)).unwrap_or(false));
            if clash {
                return Err(StoreError::Constraint(format!(
                    "duplicate key: {} = {}",
                    field, value
                )));
            }
        }
        Ok(())
    }

    fn text_score(&self, doc: &Document, terms: &[String]) -> usize {
        let mut text = String::new();
        let mut push = |v: &Value| match v {
            Value::String(s) => {
                text.push(' ');
                text.push_str(s);
            }
            Value::Array(items) => {
                for s in items.iter().filter_map(Value::as_str) {
                    text.push(' ');
                    text.push_str(s);
                }
            }
            _ => {}
        };
        self.spec.text.iter().filter_map(|f| doc.get(f)).for_each(push);
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase)
            .filter(|t| terms.contains(t))
            .count()
    }

    /// Matching records with their text score, in insertion order.
    fn matching(&self, query: &FindQuery) -> Vec<(&Document, usize)> {
        let terms: Option<Vec<String>> = query.text.as_ref().map(|t| {
            t.split_whitespace().map(str::to_lowercase).collect()
        });
        self.docs
            .iter()
            .filter(|d| query.matches(d))
            .filter_map(|d| match &terms {
                Some(terms) => {
                    let score = self.text_score(d, terms);
                    (score > 0).then_some((d, score))
                }
                None => Some((d, 0)),
            })
            .collect()
    }
}

/// Document store held entirely in process memory.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn prepare(&self, collections: &[CollectionSpec]) -> StoreResult<()> {
        let mut guard = self.collections.write().await;
        for spec in collections {
            let entry = guard.entry(spec.name.clone()).or_default();
            entry.spec = spec.clone();
        }
        Ok(())
    }

    async fn find(&self, collection: &str, query: &FindQuery) -> StoreResult<Vec<Document>> {
        let guard = self.collections.read().await;
        let Some(coll) = guard.get(collection) else {
            return Ok(Vec::new());
        };
        let mut hits = coll.matching(query);
        hits.sort_by(|(a, sa), (b, sb)| {
            if query.by_relevance {
                let ord = sb.cmp(sa);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            for key in &query.sort {
                let ord = sort_order(lookup(a, &key.path), lookup(b, &key.path));
                let ord = if key.descending { ord.reverse() } else { ord };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
        let skip = usize::try_from(query.skip).unwrap_or(usize::MAX);
        let limit = query
            .limit
            .map(|l| usize::try_from(l).unwrap_or(usize::MAX))
            .unwrap_or(usize::MAX);
        Ok(hits
            .into_iter()
            .skip(skip)
            .take(limit)
            .map(|(d, _)| project(d.clone(), query.projection.as_deref()))
            .collect())
    }

    async fn count(&self, collection: &str, query: &FindQuery) -> StoreResult<u64> {
        let guard = self.collections.read().await;
        Ok(guard
            .get(collection)
            .map(|c| c.matching(query).len() as u64)
            .unwrap_or(0))
    }

    async fn find_by_id(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        let guard = self.collections.read().await;
        Ok(guard
            .get(collection)
            .and_then(|c| c.position(id).map(|i| c.docs[i].clone())))
    }

    async fn find_by_ids(&self, collection: &str, ids: &[String]) -> StoreResult<Vec<Document>> {
        let guard = self.collections.read().await;
        let Some(coll) = guard.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(coll
            .docs
            .iter()
            .filter(|d| {
                d.get(ID_FIELD)
                    .and_then(Value::as_str)
                    .map(|id| ids.iter().any(|x| x == id))
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn insert(&self, collection: &str, mut doc: Document) -> StoreResult<Document> {
        let mut guard = self.collections.write().await;
        let coll = guard.entry(collection.to_string()).or_insert_with(|| Collection {
            spec: CollectionSpec {
                name: collection.to_string(),
                ..Default::default()
            },
            docs: Vec::new(),
        });
        let id = match doc.get(ID_FIELD).and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => new_id(),
        };
        if coll.position(&id).is_some() {
            return Err(StoreError::Constraint(format!("duplicate key: {} = {}", ID_FIELD, id)));
        }
        doc.insert(ID_FIELD.to_string(), Value::String(id));
        coll.check_unique(&doc, None)?;
        coll.docs.push(doc.clone());
        Ok(doc)
    }

    async fn replace(&self, collection: &str, id: &str, mut doc: Document) -> StoreResult<Document> {
        let mut guard = self.collections.write().await;
        let not_found = || StoreError::NotFound(format!("{} {} not found", collection, id));
        let coll = guard.get_mut(collection).ok_or_else(not_found)?;
        let idx = coll.position(id).ok_or_else(not_found)?;
        doc.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
        coll.check_unique(&doc, Some(idx))?;
        coll.docs[idx] = doc.clone();
        Ok(doc)
    }

    async fn remove(&self, collection: &str, id: &str) -> StoreResult<bool> {
        let mut guard = self.collections.write().await;
        let Some(coll) = guard.get_mut(collection) else {
            return Ok(false);
        };
        match coll.position(id) {
            Some(idx) => {
                coll.docs.remove(idx);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
