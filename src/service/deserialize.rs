//! Flat bracket-notation parameters to nested values, and copying them onto records.
//!
//! Form bodies and query strings arrive flat: `addr[city]=x`, `tags[0]=a&tags[1]=b`.
//! [`deserialize`] rebuilds the nesting; [`populate`] copies the declared fields onto a record.

use crate::config::Schema;
use crate::error::AppError;
use crate::service::validation::cast_value;
use crate::store::{Document, DELETED_FIELD, ID_FIELD, OWNER_FIELD, VERSION_FIELD};
use serde_json::{Map, Value};

/// Split `name[a][b]` into `("name", ["a", "b"])`. `None` for keys without a well-formed bracket suffix.
fn split_key(key: &str) -> Option<(&str, Vec<&str>)> {
    let open = key.find('[')?;
    let (name, mut rest) = key.split_at(open);
    if name.is_empty() {
        return None;
    }
    let mut segments = Vec::new();
    while !rest.is_empty() {
        let inner = rest.strip_prefix('[')?;
        let close = inner.find(']')?;
        segments.push(&inner[..close]);
        rest = &inner[close + 1..];
    }
    Some((name, segments))
}

fn is_index(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}

fn assign(target: &mut Map<String, Value>, path: &[&str], value: Value) {
    let Some((last, parents)) = path.split_last() else { return };
    let mut cur = target;
    for seg in parents {
        let slot = cur
            .entry(seg.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        cur = match slot {
            Value::Object(m) => m,
            _ => return,
        };
    }
    cur.insert(last.to_string(), value);
}

/// Rebuild nesting from bracket-notation keys.
///
/// - `name[a][b]=v` becomes `{name: {a: {b: v}}}`, replacing any scalar already at an intermediate.
/// - `name[0]`, `name[1]`, … become an array, stopping at the first missing index; the array
///   replaces any plain `name` value. Keys past the gap are left as they are.
/// - A key whose first bracket segment is numeric is owned by the array rule and never nested.
pub fn deserialize(mut flat: Document) -> Document {
    let nested: Vec<(String, String, Vec<String>)> = flat
        .keys()
        .filter_map(|k| {
            let (name, segs) = split_key(k)?;
            if segs.is_empty() || is_index(segs[0]) || segs.iter().any(|s| s.is_empty()) {
                return None;
            }
            Some((
                k.clone(),
                name.to_string(),
                segs.into_iter().map(str::to_string).collect(),
            ))
        })
        .collect();
    for (key, name, segs) in nested {
        let Some(value) = flat.remove(&key) else { continue };
        let mut path: Vec<&str> = Vec::with_capacity(segs.len() + 1);
        path.push(&name);
        path.extend(segs.iter().map(String::as_str));
        assign(&mut flat, &path, value);
    }

    let bases: Vec<String> = flat
        .keys()
        .filter_map(|k| k.strip_suffix("[0]").map(str::to_string))
        .filter(|base| !base.is_empty() && !base.contains('['))
        .collect();
    for base in bases {
        let mut items = Vec::new();
        while let Some(v) = flat.remove(&format!("{}[{}]", base, items.len())) {
            items.push(v);
        }
        flat.insert(base, Value::Array(items));
    }
    flat
}

pub fn is_system_field(name: &str) -> bool {
    matches!(name, ID_FIELD | OWNER_FIELD | VERSION_FIELD | DELETED_FIELD)
}

/// Copy declared fields from `data` onto `record`. `""` clears a field to null; other values are
/// cast to the field type. Fields absent from `data` are left alone. Of the system fields only a
/// declared `_deleted` is writable, which is how a soft-deleted record is restored.
pub fn populate(record: &mut Document, data: &Document, schema: &Schema) -> Result<(), AppError> {
    for field in schema.fields() {
        if is_system_field(&field.name) && field.name != DELETED_FIELD {
            continue;
        }
        let Some(value) = data.get(&field.name) else { continue };
        let value = match value {
            Value::String(s) if s.is_empty() => Value::Null,
            other => cast_value(field, other.clone())?,
        };
        record.insert(field.name.clone(), value);
    }
    Ok(())
}
