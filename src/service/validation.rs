//! Record casting and validation from schema field rules.

use crate::config::{Field, FieldKind, Schema};
use crate::error::AppError;
use crate::query::filter::json_eq;
use crate::store::Document;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde_json::{Number, Value};

pub struct RecordValidator;

impl RecordValidator {
    /// Fill declared defaults for fields the record does not carry yet.
    pub fn apply_defaults(record: &mut Document, schema: &Schema) -> Result<(), AppError> {
        for field in schema.fields() {
            let Some(default) = &field.default else { continue };
            if record.get(&field.name).map(Value::is_null).unwrap_or(true) {
                record.insert(field.name.clone(), cast_value(field, default.clone())?);
            }
        }
        Ok(())
    }

    /// Validate the whole record. Required fields must be present and non-null.
    pub fn validate(record: &Document, schema: &Schema) -> Result<(), AppError> {
        for field in schema.fields() {
            let val = record.get(&field.name);
            if field.rules.required && val.map(Value::is_null).unwrap_or(true) {
                return Err(AppError::Validation(format!("{} is required", field.name)));
            }
            match val {
                Some(Value::Array(items)) if field.array => {
                    for item in items {
                        validate_value(field, item)?;
                    }
                }
                Some(v) => validate_value(field, v)?,
                None => {}
            }
        }
        Ok(())
    }
}

fn validate_value(field: &Field, v: &Value) -> Result<(), AppError> {
    if v.is_null() {
        return Ok(());
    }
    let name = &field.name;
    let rules = &field.rules;
    if let Some(allowed) = &rules.allowed {
        if !allowed.iter().any(|a| json_eq(v, a)) {
            return Err(AppError::Validation(format!(
                "{} must be one of: {}",
                name,
                allowed
                    .iter()
                    .take(5)
                    .map(Value::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }
    }
    if let Some(n) = v.as_f64() {
        if let Some(min) = rules.min {
            if n < min {
                return Err(AppError::Validation(format!("{} must be at least {}", name, min)));
            }
        }
        if let Some(max) = rules.max {
            if n > max {
                return Err(AppError::Validation(format!("{} must be at most {}", name, max)));
            }
        }
    }
    if let Some(s) = v.as_str() {
        let len = s.chars().count();
        if let Some(min) = rules.min_length {
            if len < min as usize {
                return Err(AppError::Validation(format!(
                    "{} must be at least {} characters",
                    name, min
                )));
            }
        }
        if let Some(max) = rules.max_length {
            if len > max as usize {
                return Err(AppError::Validation(format!(
                    "{} must be at most {} characters",
                    name, max
                )));
            }
        }
        if let Some(re) = &rules.pattern {
            if !re.is_match(s) {
                return Err(AppError::Validation(format!(
                    "{} does not match required pattern",
                    name
                )));
            }
        }
    }
    Ok(())
}

fn cast_error(field: &Field, v: &Value) -> AppError {
    let kind = serde_json::to_value(field.kind)
        .ok()
        .and_then(|k| k.as_str().map(str::to_string))
        .unwrap_or_default();
    AppError::Validation(format!(
        "cast to {} failed for value {} at path \"{}\"",
        kind, v, field.name
    ))
}

/// Cast an incoming value to the field's declared type. Array fields accept a single value
/// as a one-element array.
pub fn cast_value(field: &Field, v: Value) -> Result<Value, AppError> {
    if v.is_null() {
        return Ok(v);
    }
    if field.array {
        let items = match v {
            Value::Array(items) => items,
            single => vec![single],
        };
        return items
            .into_iter()
            .map(|item| {
                if item.is_null() {
                    Ok(item)
                } else {
                    cast_scalar(field, item)
                }
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array);
    }
    if v.is_array() && field.kind != FieldKind::Mixed {
        return Err(cast_error(field, &v));
    }
    cast_scalar(field, v)
}

/// Cast one element, ignoring the field's array flag.
pub fn cast_scalar(field: &Field, v: Value) -> Result<Value, AppError> {
    let cast = match (field.kind, &v) {
        (FieldKind::Mixed, _) => Some(v.clone()),
        (FieldKind::String, Value::String(_)) => Some(v.clone()),
        (FieldKind::String, Value::Number(n)) => Some(Value::String(n.to_string())),
        (FieldKind::String, Value::Bool(b)) => Some(Value::String(b.to_string())),
        (FieldKind::Number, Value::Number(_)) => Some(v.clone()),
        (FieldKind::Number, Value::String(s)) => parse_number(s.trim()),
        (FieldKind::Boolean, Value::Bool(_)) => Some(v.clone()),
        (FieldKind::Boolean, Value::String(s)) => parse_bool(s.trim()).map(Value::Bool),
        (FieldKind::Boolean, Value::Number(n)) => match n.as_f64() {
            Some(x) if x == 1.0 => Some(Value::Bool(true)),
            Some(x) if x == 0.0 => Some(Value::Bool(false)),
            _ => None,
        },
        (FieldKind::Date, Value::String(s)) => parse_date(s.trim()).map(format_date),
        (FieldKind::Date, Value::Number(n)) => n
            .as_i64()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .map(format_date),
        (FieldKind::ObjectId, Value::String(s)) if !s.is_empty() => Some(v.clone()),
        (FieldKind::ObjectId, Value::Number(n)) => Some(Value::String(n.to_string())),
        // An expanded record sent back in place of its id.
        (FieldKind::ObjectId, Value::Object(m)) => m
            .get(crate::store::ID_FIELD)
            .and_then(Value::as_str)
            .map(|id| Value::String(id.to_string())),
        _ => None,
    };
    cast.ok_or_else(|| cast_error(field, &v))
}

fn parse_number(s: &str) -> Option<Value> {
    if let Ok(i) = s.parse::<i64>() {
        return Some(Value::Number(i.into()));
    }
    s.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

fn format_date(dt: DateTime<Utc>) -> Value {
    Value::String(dt.to_rfc3339_opts(SecondsFormat::Millis, true))
}
