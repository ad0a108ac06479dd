//! Response cache for list and item reads.
//!
//! Entries are keyed by model, the model's current generation and a request signature.
//! `flush(model)` bumps the generation, so every older entry for that model becomes
//! unreachable immediately; the stale entries are then dropped by an invalidation predicate
//! or by capacity eviction, whichever comes first.
//!
//! A read that missed captures the generation it saw in a [`CacheSlot`]. If a flush lands
//! before the read stores its payload, the payload goes in under the old generation and is
//! never served.

use crate::query::RequestParams;
use moka::sync::Cache;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct CacheKey {
    pub model: String,
    pub generation: u64,
    pub signature: String,
}

/// Reserved position for a payload computed after a miss.
#[derive(Debug)]
pub struct CacheSlot {
    key: CacheKey,
}

#[derive(Debug)]
pub enum Lookup {
    Hit(Arc<Value>),
    Miss(CacheSlot),
}

pub struct ResponseCache {
    entries: Cache<CacheKey, Arc<Value>>,
    generations: Mutex<HashMap<String, u64>>,
}

/// `METHOD path?canonical-query`, plus `#owner=<id>` for owner-scoped reads.
pub fn signature(method: &str, path: &str, params: &RequestParams, owner: Option<&str>) -> String {
    let mut sig = format!("{} {}?{}", method, path, params.canonical());
    if let Some(owner) = owner {
        sig.push_str("#owner=");
        sig.push_str(owner);
    }
    sig
}

impl ResponseCache {
    pub fn new(max_capacity: u64) -> Self {
        Self {
            entries: Cache::builder()
                .max_capacity(max_capacity)
                .support_invalidation_closures()
                .build(),
            generations: Mutex::new(HashMap::new()),
        }
    }

    fn generation(&self, model: &str) -> u64 {
        let guard = self.generations.lock().unwrap_or_else(|e| e.into_inner());
        guard.get(model).copied().unwrap_or(0)
    }

    pub fn lookup(&self, model: &str, signature: &str) -> Lookup {
        let key = CacheKey {
            model: model.to_string(),
            generation: self.generation(model),
            signature: signature.to_string(),
        };
        match self.entries.get(&key) {
            Some(payload) => {
                tracing::debug!(model = %model, signature = %signature, "cache hit");
                Lookup::Hit(payload)
            }
            None => {
                tracing::debug!(model = %model, signature = %signature, "cache miss");
                Lookup::Miss(CacheSlot { key })
            }
        }
    }

    pub fn store(&self, slot: CacheSlot, payload: Value) -> Arc<Value> {
        let payload = Arc::new(payload);
        self.entries.insert(slot.key, payload.clone());
        payload
    }

    /// Invalidate every entry of `model`.
    pub fn flush(&self, model: &str) {
        let current = {
            let mut guard = self.generations.lock().unwrap_or_else(|e| e.into_inner());
            let gen = guard.entry(model.to_string()).or_insert(0);
            *gen += 1;
            *gen
        };
        let owned = model.to_string();
        if let Err(e) = self
            .entries
            .invalidate_entries_if(move |k, _| k.model == owned && k.generation < current)
        {
            tracing::warn!(model = %model, error = %e, "cache invalidation predicate rejected");
        }
        tracing::debug!(model = %model, generation = current, "cache flushed");
    }

    pub fn entry_count(&self) -> u64 {
        self.entries.run_pending_tasks();
        self.entries.entry_count()
    }
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("entries", &self.entries.entry_count())
            .finish()
    }
}
