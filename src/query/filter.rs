//! Predicate tree produced by the compiler and evaluated by document stores.

use crate::error::AppError;
use crate::store::Document;
use regex::Regex;
use serde_json::Value;
use std::cmp::Ordering;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Nin,
    Exists,
}

impl CompareOp {
    pub fn as_str(self) -> &'static str {
        match self {
            CompareOp::Eq => "eq",
            CompareOp::Ne => "ne",
            CompareOp::Gt => "gt",
            CompareOp::Gte => "gte",
            CompareOp::Lt => "lt",
            CompareOp::Lte => "lte",
            CompareOp::In => "in",
            CompareOp::Nin => "nin",
            CompareOp::Exists => "exists",
        }
    }
}

/// Operator token as it appears in a request, with or without a leading `$`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operator {
    Compare(CompareOp),
    Regex,
}

impl std::str::FromStr for Operator {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let op = match s.strip_prefix('$').unwrap_or(s) {
            "eq" => Operator::Compare(CompareOp::Eq),
            "ne" => Operator::Compare(CompareOp::Ne),
            "gt" => Operator::Compare(CompareOp::Gt),
            "gte" => Operator::Compare(CompareOp::Gte),
            "lt" => Operator::Compare(CompareOp::Lt),
            "lte" => Operator::Compare(CompareOp::Lte),
            "in" => Operator::Compare(CompareOp::In),
            "nin" => Operator::Compare(CompareOp::Nin),
            "exists" => Operator::Compare(CompareOp::Exists),
            "regex" => Operator::Regex,
            _ => return Err(AppError::BadRequest(format!("unknown filter operator: {}", s))),
        };
        Ok(op)
    }
}

#[derive(Clone, Debug)]
pub struct Pattern {
    pub source: String,
    pub case_insensitive: bool,
    regex: Regex,
}

impl Pattern {
    pub fn new(source: &str, case_insensitive: bool) -> Result<Self, AppError> {
        let regex = regex::RegexBuilder::new(source)
            .case_insensitive(case_insensitive)
            .build()
            .map_err(|e| AppError::BadRequest(format!("invalid regex '{}': {}", source, e)))?;
        Ok(Pattern {
            source: source.to_string(),
            case_insensitive,
            regex,
        })
    }

    /// Literal, case-insensitive match of `term` anywhere in the value.
    pub fn contains(term: &str) -> Result<Self, AppError> {
        Pattern::new(&regex::escape(term), true)
    }

    pub fn is_match(&self, s: &str) -> bool {
        self.regex.is_match(s)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source && self.case_insensitive == other.case_insensitive
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    All,
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Compare {
        path: Vec<String>,
        op: CompareOp,
        value: Value,
    },
    Regex {
        path: Vec<String>,
        pattern: Pattern,
    },
}

impl Default for Filter {
    fn default() -> Self {
        Filter::All
    }
}

impl Filter {
    pub fn eq(path: &str, value: Value) -> Self {
        Filter::Compare {
            path: split_path(path),
            op: CompareOp::Eq,
            value,
        }
    }

    /// Conjunction that flattens nested `And` and drops `All`.
    pub fn and(parts: Vec<Filter>) -> Self {
        let mut out = Vec::with_capacity(parts.len());
        for p in parts {
            match p {
                Filter::All => {}
                Filter::And(inner) => out.extend(inner),
                other => out.push(other),
            }
        }
        match out.len() {
            0 => Filter::All,
            1 => out.remove(0),
            _ => Filter::And(out),
        }
    }

    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::All => true,
            Filter::And(parts) => parts.iter().all(|f| f.matches(doc)),
            Filter::Or(parts) => parts.iter().any(|f| f.matches(doc)),
            Filter::Compare { path, op, value } => compare(lookup(doc, path), *op, value),
            Filter::Regex { path, pattern } => match lookup(doc, path) {
                Some(Value::String(s)) => pattern.is_match(s),
                Some(Value::Array(items)) => items
                    .iter()
                    .any(|v| v.as_str().map(|s| pattern.is_match(s)).unwrap_or(false)),
                _ => false,
            },
        }
    }
}

pub fn split_path(path: &str) -> Vec<String> {
    path.split('.').map(str::to_string).collect()
}

/// Value at a dotted path, descending through objects only.
pub fn lookup<'a>(doc: &'a Document, path: &[String]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    let mut cur = doc.get(first)?;
    for seg in rest {
        cur = cur.as_object()?.get(seg)?;
    }
    Some(cur)
}

fn compare(actual: Option<&Value>, op: CompareOp, expected: &Value) -> bool {
    match op {
        CompareOp::Eq => equals(actual, expected),
        CompareOp::Ne => !equals(actual, expected),
        CompareOp::Exists => {
            let want = match expected {
                Value::Bool(b) => *b,
                Value::String(s) => s != "false" && s != "0",
                _ => true,
            };
            actual.is_some() == want
        }
        CompareOp::In => in_list(actual, expected),
        CompareOp::Nin => !in_list(actual, expected),
        CompareOp::Gt | CompareOp::Gte | CompareOp::Lt | CompareOp::Lte => {
            let Some(actual) = actual else { return false };
            let check = |v: &Value| match compare_json(v, expected) {
                Some(ord) => match op {
                    CompareOp::Gt => ord == Ordering::Greater,
                    CompareOp::Gte => ord != Ordering::Less,
                    CompareOp::Lt => ord == Ordering::Less,
                    _ => ord != Ordering::Greater,
                },
                None => false,
            };
            match actual {
                Value::Array(items) => items.iter().any(check),
                v => check(v),
            }
        }
    }
}

/// Equality with array fields matching on any element, and null matching a missing field.
fn equals(actual: Option<&Value>, expected: &Value) -> bool {
    match actual {
        None | Some(Value::Null) => expected.is_null(),
        Some(Value::Array(items)) if !expected.is_array() => items.iter().any(|v| json_eq(v, expected)),
        Some(v) => json_eq(v, expected),
    }
}

fn in_list(actual: Option<&Value>, list: &Value) -> bool {
    match list {
        Value::Array(candidates) => candidates.iter().any(|c| equals(actual, c)),
        single => equals(actual, single),
    }
}

pub fn json_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Ordering between two scalars of the same JSON type; `None` when incomparable.
pub fn compare_json(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

/// Total order used for sorting: missing/null < bool < number < string < other.
pub fn sort_order(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(_) => 4,
        }
    }
    match (a, b) {
        (Some(x), Some(y)) => compare_json(x, y).unwrap_or_else(|| rank(a).cmp(&rank(b))),
        _ => rank(a).cmp(&rank(b)),
    }
}
