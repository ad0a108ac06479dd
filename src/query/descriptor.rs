//! Compiled query: what the store executes plus what the list envelope echoes back.

use crate::query::filter::Filter;
use crate::store::Document;
use serde_json::Value;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SortKey {
    pub path: Vec<String>,
    pub descending: bool,
}

/// Store-level query.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FindQuery {
    pub filter: Filter,
    /// Free-text terms searched over the collection's text fields.
    pub text: Option<String>,
    pub sort: Vec<SortKey>,
    /// Order by text relevance before `sort` keys.
    pub by_relevance: bool,
    pub skip: u64,
    pub limit: Option<u64>,
    pub projection: Option<Vec<String>>,
}

impl FindQuery {
    pub fn matches(&self, doc: &Document) -> bool {
        self.filter.matches(doc)
    }
}

/// One relation to expand after the main query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Populate {
    /// Field holding the reference id(s).
    pub field: String,
    /// Target model name.
    pub target: String,
    /// Key receiving the expanded record(s); equals `field` unless `map_to` is set.
    pub output: String,
    pub many: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pagination {
    pub limit: u64,
    pub page: u64,
}

impl Pagination {
    pub fn skip(&self) -> u64 {
        self.limit.saturating_mul(self.page.saturating_sub(1))
    }

    pub fn page_count(&self, count: u64) -> u64 {
        if self.limit == 0 {
            return 0;
        }
        count.div_ceil(self.limit)
    }

    pub fn has_next(&self, count: u64) -> bool {
        self.page < self.page_count(count)
    }

    pub fn has_prev(&self) -> bool {
        self.page > 1
    }
}

/// Request values reflected into the list response.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Echo {
    pub sort: Option<Value>,
    pub populate: Option<Value>,
    pub autopopulate: bool,
    pub search: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryDescriptor {
    pub find: FindQuery,
    pub populate: Vec<Populate>,
    pub pagination: Option<Pagination>,
    pub echo: Echo,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_arithmetic() {
        let p = Pagination { limit: 2, page: 1 };
        assert_eq!(p.skip(), 0);
        assert_eq!(p.page_count(5), 3);
        assert!(p.has_next(5));
        assert!(!p.has_prev());

        let last = Pagination { limit: 2, page: 3 };
        assert_eq!(last.skip(), 4);
        assert!(!last.has_next(5));
        assert!(last.has_prev());

        assert_eq!(Pagination { limit: 10, page: 1 }.page_count(0), 0);
    }
}
