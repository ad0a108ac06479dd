//! Query-string parameters: nested view for the compiler, canonical form for cache keys and links.

use crate::service::deserialize::deserialize;
use crate::store::Document;
use serde_json::Value;

#[derive(Clone, Debug, Default)]
pub struct RequestParams {
    raw: Vec<(String, String)>,
    nested: Document,
}

impl RequestParams {
    /// Build from decoded `key=value` pairs. Repeated keys collect into an array; bracket
    /// keys are nested the same way as form bodies.
    pub fn from_pairs(pairs: Vec<(String, String)>) -> Self {
        let flat = collect_pairs(&pairs);
        RequestParams {
            raw: pairs,
            nested: deserialize(flat),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.nested.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.nested.get(key).and_then(Value::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.nested.contains_key(key)
    }

    /// Present and not one of `false`, `0` or empty.
    pub fn flag(&self, key: &str) -> bool {
        match self.nested.get(key) {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => !matches!(s.as_str(), "" | "false" | "0"),
            Some(_) => true,
        }
    }

    pub fn nested(&self) -> &Document {
        &self.nested
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.raw
    }

    /// Encoded query with pairs sorted, so equivalent requests share one form.
    pub fn canonical(&self) -> String {
        let mut pairs: Vec<&(String, String)> = self.raw.iter().collect();
        pairs.sort();
        encode(pairs.into_iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }

    /// URL of the same request with `page` replaced.
    pub fn page_link(&self, base_url: &str, path: &str, page: u64) -> String {
        let page = page.to_string();
        let mut pairs: Vec<(&str, &str)> = self
            .raw
            .iter()
            .filter(|(k, _)| k != "page")
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        pairs.push(("page", page.as_str()));
        pairs.sort();
        format!("{}{}?{}", base_url.trim_end_matches('/'), path, encode(pairs.into_iter()))
    }
}

/// Flat map of decoded pairs; a repeated key collects its values into an array.
pub fn collect_pairs(pairs: &[(String, String)]) -> Document {
    let mut flat = Document::new();
    for (k, v) in pairs {
        match flat.get_mut(k) {
            Some(Value::Array(items)) => items.push(Value::String(v.clone())),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, Value::String(v.clone())]);
            }
            None => {
                flat.insert(k.clone(), Value::String(v.clone()));
            }
        }
    }
    flat
}

fn encode<'a>(pairs: impl Iterator<Item = (&'a str, &'a str)>) -> String {
    pairs
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}
