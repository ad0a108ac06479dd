//! Request parameters to a [`QueryDescriptor`].
//!
//! Pure: the same model, parameters and owner scope always compile to the same descriptor.

use crate::config::{Field, FieldKind, Model};
use crate::error::AppError;
use crate::query::descriptor::{Echo, FindQuery, Pagination, Populate, QueryDescriptor, SortKey};
use crate::query::filter::{split_path, CompareOp, Filter, Operator, Pattern};
use crate::query::params::RequestParams;
use crate::service::deserialize::is_system_field;
use crate::service::validation::cast_scalar;
use crate::store::{DELETED_FIELD, OWNER_FIELD};
use serde_json::{Map, Value};

/// Parameter names with engine meaning; never treated as field filters.
pub const RESERVED_PARAMS: &[&str] = &[
    "filter",
    "search",
    "showDeleted",
    "limit",
    "page",
    "sort",
    "populate",
    "autopopulate",
    "fields",
    "_silence",
];

/// `_deleted == false OR _deleted == null`; null also matches records without the field.
pub fn visible_only() -> Filter {
    Filter::Or(vec![
        Filter::eq(DELETED_FIELD, Value::Bool(false)),
        Filter::eq(DELETED_FIELD, Value::Null),
    ])
}

pub fn owned_by(owner: &str) -> Filter {
    Filter::eq(OWNER_FIELD, Value::String(owner.to_string()))
}

pub fn compile(
    model: &Model,
    params: &RequestParams,
    owner: Option<&str>,
) -> Result<QueryDescriptor, AppError> {
    let mut mandatory = Vec::new();
    if !params.flag("showDeleted") {
        mandatory.push(visible_only());
    }
    if let Some(owner) = owner {
        mandatory.push(owned_by(owner));
    }

    let text = match params.get("search") {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Array(terms)) => {
            let joined = terms
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(" ");
            Some(joined).filter(|s| !s.trim().is_empty())
        }
        _ => None,
    };

    let filter = if text.is_some() {
        Filter::and(mandatory)
    } else {
        let mut parts = Vec::new();
        if let Some(filter) = params.get("filter") {
            match filter {
                Value::Object(map) => compile_map(model, &[], map, &mut parts)?,
                Value::String(s) if s.is_empty() => {}
                _ => return Err(AppError::BadRequest("filter must be a map".into())),
            }
        }
        for (key, value) in params.nested() {
            if RESERVED_PARAMS.contains(&key.as_str()) {
                continue;
            }
            if !model.schema.declares(key) && !is_system_field(key) {
                continue;
            }
            let path = vec![key.clone()];
            match value {
                Value::Object(map) => compile_map(model, &path, map, &mut parts)?,
                v => parts.push(compile_leaf(model, path, v)?),
            }
        }
        if let Some(Value::Object(search)) = params.get("search") {
            for (field, term) in search {
                let Some(term) = term.as_str() else { continue };
                if term.is_empty() {
                    continue;
                }
                parts.push(Filter::Regex {
                    path: split_path(field),
                    pattern: Pattern::contains(term)?,
                });
            }
        }
        parts.extend(mandatory);
        Filter::and(parts)
    };

    let sort = match params.get("sort") {
        Some(raw) => parse_sort(raw)?,
        None => Vec::new(),
    };
    let by_relevance = text.is_some() && sort.is_empty();

    let pagination = params
        .get_str("limit")
        .and_then(parse_int)
        .filter(|&n| n > 0)
        .map(|limit| Pagination {
            limit: limit as u64,
            page: params
                .get_str("page")
                .and_then(parse_int)
                .filter(|&n| n > 0)
                .unwrap_or(1) as u64,
        });

    let projection = params.get_str("fields").map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(str::to_string)
            .collect::<Vec<_>>()
    });

    let autopopulate = params.flag("autopopulate");
    let populate = resolve_populate(model, params.get("populate"), autopopulate);

    Ok(QueryDescriptor {
        find: FindQuery {
            filter,
            text: text.clone(),
            sort,
            by_relevance,
            skip: pagination.map(|p| p.skip()).unwrap_or(0),
            limit: pagination.map(|p| p.limit),
            projection: projection.filter(|p| !p.is_empty()),
        },
        populate,
        pagination,
        echo: Echo {
            sort: params.get("sort").cloned(),
            populate: params.get("populate").cloned(),
            autopopulate,
            search: text,
        },
    })
}

/// Leading integer like `parseInt`: `"10abc"` is 10, `"abc"` is `None`.
fn parse_int(s: &str) -> Option<i64> {
    let s = s.trim();
    let end = s
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && (c == '-' || c == '+'))))
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    s[..end].parse().ok()
}

fn top_field<'m>(model: &'m Model, path: &[String]) -> Option<&'m Field> {
    path.first().and_then(|name| model.schema.field(name))
}

fn compile_map(
    model: &Model,
    prefix: &[String],
    map: &Map<String, Value>,
    out: &mut Vec<Filter>,
) -> Result<(), AppError> {
    for (key, value) in map {
        let is_operator = key.starts_with('$') || (!prefix.is_empty() && key.parse::<Operator>().is_ok());
        if is_operator {
            if prefix.is_empty() {
                return Err(AppError::BadRequest(format!("operator {} needs a field", key)));
            }
            let op: Operator = key.parse()?;
            out.push(build(model, prefix.to_vec(), op, value.clone())?);
            continue;
        }
        let mut path = prefix.to_vec();
        path.extend(split_path(key));
        match value {
            Value::Object(inner) => compile_map(model, &path, inner, out)?,
            v => out.push(compile_leaf(model, path, v)?),
        }
    }
    Ok(())
}

/// `op:value` strings become comparisons; other values are equality (arrays are `in`).
fn compile_leaf(model: &Model, path: Vec<String>, value: &Value) -> Result<Filter, AppError> {
    match value {
        Value::String(s) => match s.split_once(':') {
            Some((op, rest)) => build(model, path, op.parse()?, Value::String(rest.to_string())),
            None => build(model, path, Operator::Compare(CompareOp::Eq), value.clone()),
        },
        Value::Array(_) => build(model, path, Operator::Compare(CompareOp::In), value.clone()),
        v => build(model, path, Operator::Compare(CompareOp::Eq), v.clone()),
    }
}

fn build(model: &Model, path: Vec<String>, op: Operator, value: Value) -> Result<Filter, AppError> {
    let field = top_field(model, &path).filter(|_| path.len() == 1);
    match op {
        Operator::Regex => {
            let source = value
                .as_str()
                .ok_or_else(|| AppError::BadRequest("regex needs a string".into()))?;
            Ok(Filter::Regex {
                path,
                pattern: Pattern::new(source, false)?,
            })
        }
        Operator::Compare(CompareOp::Exists) => Ok(Filter::Compare {
            path,
            op: CompareOp::Exists,
            value: coerce(None, value)?,
        }),
        Operator::Compare(op @ (CompareOp::In | CompareOp::Nin)) => {
            let items = match value {
                Value::Array(items) => items,
                Value::String(s) => s.split(',').map(|v| Value::String(v.to_string())).collect(),
                single => vec![single],
            };
            let items = items
                .into_iter()
                .map(|v| coerce(field, v))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Filter::Compare {
                path,
                op,
                value: Value::Array(items),
            })
        }
        Operator::Compare(op) => Ok(Filter::Compare {
            path,
            op,
            value: coerce(field, value)?,
        }),
    }
}

/// `"true"`/`"false"` become booleans; number and date fields cast their string values.
fn coerce(field: Option<&Field>, value: Value) -> Result<Value, AppError> {
    let Value::String(s) = &value else { return Ok(value) };
    match s.as_str() {
        "true" => return Ok(Value::Bool(true)),
        "false" => return Ok(Value::Bool(false)),
        "null" => return Ok(Value::Null),
        _ => {}
    }
    match field {
        Some(f) if matches!(f.kind, FieldKind::Number | FieldKind::Date) => {
            cast_scalar(f, value).map_err(|e| AppError::BadRequest(e.to_string()))
        }
        _ => Ok(value),
    }
}

fn parse_sort(raw: &Value) -> Result<Vec<SortKey>, AppError> {
    let mut keys = Vec::new();
    match raw {
        Value::String(s) => {
            for token in s.split(|c: char| c == ',' || c.is_whitespace()) {
                if token.is_empty() {
                    continue;
                }
                let (name, descending) = match token.strip_prefix('-') {
                    Some(rest) => (rest, true),
                    None => (token.strip_prefix('+').unwrap_or(token), false),
                };
                if !name.is_empty() {
                    keys.push(SortKey {
                        path: split_path(name),
                        descending,
                    });
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                keys.extend(parse_sort(item)?);
            }
        }
        Value::Object(map) => {
            for (name, dir) in map {
                let descending = match dir {
                    Value::String(s) => match s.to_ascii_lowercase().as_str() {
                        "-1" | "desc" | "descending" => true,
                        "1" | "asc" | "ascending" => false,
                        _ => return Err(AppError::BadRequest(format!("invalid sort direction: {}", s))),
                    },
                    Value::Number(n) => n.as_f64().map(|x| x < 0.0).unwrap_or(false),
                    other => return Err(AppError::BadRequest(format!("invalid sort direction: {}", other))),
                };
                keys.push(SortKey {
                    path: split_path(name),
                    descending,
                });
            }
        }
        other => return Err(AppError::BadRequest(format!("invalid sort: {}", other))),
    }
    Ok(keys)
}

fn resolve_populate(model: &Model, raw: Option<&Value>, autopopulate: bool) -> Vec<Populate> {
    let mut names: Vec<String> = Vec::new();
    if autopopulate {
        names.extend(model.schema.relations().map(|(f, _)| f.name.clone()));
    }
    let mut push_tokens = |s: &str| {
        names.extend(
            s.split(|c: char| c == ',' || c.is_whitespace())
                .filter(|t| !t.is_empty())
                .map(str::to_string),
        )
    };
    match raw {
        Some(Value::String(s)) => push_tokens(s),
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).for_each(push_tokens),
        _ => {}
    }

    let mut out: Vec<Populate> = Vec::new();
    for name in names {
        let Some((field, rel)) = model.schema.relation_by_name(&name) else { continue };
        if out.iter().any(|p| p.field == field.name) {
            continue;
        }
        out.push(Populate {
            field: field.name.clone(),
            target: rel.model.clone(),
            output: rel.map_to.clone().unwrap_or_else(|| field.name.clone()),
            many: rel.many,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{parse_models, ModelRegistry};
    use serde_json::json;
    use std::sync::Arc;

    fn registry() -> ModelRegistry {
        let models = parse_models(
            r#"[
            { "name": "link", "fields": [{ "name": "name", "type": "string" }] },
            {
                "name": "test",
                "fields": [
                    { "name": "name", "type": "string" },
                    { "name": "age", "type": "number" },
                    { "name": "born", "type": "date" },
                    { "name": "active", "type": "boolean" },
                    { "name": "link_id", "type": "objectid", "link": "link" },
                    { "name": "other_link_id", "type": "objectid", "link": "link", "map_to": "other_link" },
                    { "name": "array_link_id", "type": ["objectid"], "link": "link", "map_to": "array_link" },
                    { "name": "_deleted", "type": "boolean" }
                ]
            }
        ]"#,
        )
        .unwrap();
        ModelRegistry::builder().models(models).build().unwrap()
    }

    fn model() -> Arc<Model> {
        registry().model("test").cloned().unwrap()
    }

    fn params(pairs: &[(&str, &str)]) -> RequestParams {
        RequestParams::from_pairs(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    fn cmp(path: &str, op: CompareOp, value: Value) -> Filter {
        Filter::Compare {
            path: split_path(path),
            op,
            value,
        }
    }

    #[test]
    fn no_params_only_hides_deleted() {
        let q = compile(&model(), &params(&[]), None).unwrap();
        assert_eq!(q.find.filter, visible_only());
        assert_eq!(q.find.limit, None);
        assert!(q.pagination.is_none());
        assert!(q.populate.is_empty());
    }

    #[test]
    fn show_deleted_drops_visibility() {
        let q = compile(&model(), &params(&[("showDeleted", "true")]), None).unwrap();
        assert_eq!(q.find.filter, Filter::All);
        let q = compile(&model(), &params(&[("showDeleted", "false")]), None).unwrap();
        assert_eq!(q.find.filter, visible_only());
    }

    #[test]
    fn operator_strings_and_coercion() {
        let q = compile(
            &model(),
            &params(&[
                ("filter[age]", "gt:3"),
                ("filter[active]", "true"),
                ("filter[name]", "eq:10:30"),
                ("showDeleted", "1"),
            ]),
            None,
        )
        .unwrap();
        assert_eq!(
            q.find.filter,
            Filter::And(vec![
                cmp("age", CompareOp::Gt, json!(3)),
                cmp("active", CompareOp::Eq, json!(true)),
                cmp("name", CompareOp::Eq, json!("10:30")),
            ])
        );
    }

    #[test]
    fn nested_operator_maps_and_dotted_paths() {
        let q = compile(
            &model(),
            &params(&[
                ("filter[age][$lte]", "9"),
                ("filter[address][city]", "Cape Town"),
                ("showDeleted", "1"),
            ]),
            None,
        )
        .unwrap();
        assert_eq!(
            q.find.filter,
            Filter::And(vec![
                cmp("age", CompareOp::Lte, json!(9)),
                cmp("address.city", CompareOp::Eq, json!("Cape Town")),
            ])
        );
    }

    #[test]
    fn in_operator_splits_and_dates_cast() {
        let q = compile(
            &model(),
            &params(&[
                ("filter[age]", "in:1,2"),
                ("filter[born]", "gte:2024-01-01"),
                ("showDeleted", "1"),
            ]),
            None,
        )
        .unwrap();
        assert_eq!(
            q.find.filter,
            Filter::And(vec![
                cmp("age", CompareOp::In, json!([1, 2])),
                cmp("born", CompareOp::Gte, json!("2024-01-01T00:00:00.000Z")),
            ])
        );
    }

    #[test]
    fn unknown_operator_is_bad_request() {
        for pairs in [
            vec![("filter[age]", "between:1")],
            vec![("filter[age][$near]", "1")],
            vec![("filter[age]", "gt:old")],
            vec![("sort[age]", "sideways")],
        ] {
            let err = compile(&model(), &params(&pairs), None).unwrap_err();
            assert!(matches!(err, AppError::BadRequest(_)), "{:?}", pairs);
        }
    }

    #[test]
    fn top_level_declared_fields_filter_and_others_are_ignored() {
        let q = compile(
            &model(),
            &params(&[("name", "jo"), ("bogus", "1"), ("_owner_id", "u1"), ("showDeleted", "1")]),
            None,
        )
        .unwrap();
        assert_eq!(
            q.find.filter,
            Filter::And(vec![
                cmp("name", CompareOp::Eq, json!("jo")),
                cmp("_owner_id", CompareOp::Eq, json!("u1")),
            ])
        );
    }

    #[test]
    fn per_field_search_is_escaped_regex() {
        let q = compile(&model(), &params(&[("search[name]", "j.o"), ("showDeleted", "1")]), None).unwrap();
        match q.find.filter {
            Filter::Regex { path, pattern } => {
                assert_eq!(path, vec!["name".to_string()]);
                assert!(pattern.case_insensitive);
                assert!(pattern.is_match("MAJ.OR"));
                assert!(!pattern.is_match("major"));
            }
            other => panic!("unexpected filter {:?}", other),
        }
        assert!(q.find.text.is_none());
    }

    #[test]
    fn text_search_replaces_filters_but_keeps_scope() {
        let q = compile(
            &model(),
            &params(&[("search", "hello world"), ("filter[age]", "gt:3")]),
            Some("u1"),
        )
        .unwrap();
        assert_eq!(q.find.text.as_deref(), Some("hello world"));
        assert!(q.find.by_relevance);
        assert_eq!(q.find.filter, Filter::And(vec![visible_only(), owned_by("u1")]));
        assert_eq!(q.echo.search.as_deref(), Some("hello world"));

        let sorted = compile(&model(), &params(&[("search", "x"), ("sort", "name")]), None).unwrap();
        assert!(!sorted.find.by_relevance);
    }

    #[test]
    fn pagination_parses_leniently() {
        let q = compile(&model(), &params(&[("limit", "2"), ("page", "3")]), None).unwrap();
        assert_eq!(q.pagination, Some(Pagination { limit: 2, page: 3 }));
        assert_eq!(q.find.skip, 4);
        assert_eq!(q.find.limit, Some(2));

        let q = compile(&model(), &params(&[("limit", "5abc"), ("page", "zero")]), None).unwrap();
        assert_eq!(q.pagination, Some(Pagination { limit: 5, page: 1 }));

        let q = compile(&model(), &params(&[("limit", "0")]), None).unwrap();
        assert!(q.pagination.is_none());
    }

    #[test]
    fn sort_forms() {
        let expect = vec![
            SortKey { path: vec!["name".into()], descending: false },
            SortKey { path: vec!["age".into()], descending: true },
        ];
        for raw in ["name -age", "name,-age", "+name , -age"] {
            let q = compile(&model(), &params(&[("sort", raw)]), None).unwrap();
            assert_eq!(q.find.sort, expect, "{}", raw);
            assert_eq!(q.echo.sort, Some(json!(raw)));
        }
        let q = compile(&model(), &params(&[("sort[name]", "1"), ("sort[age]", "-1")]), None).unwrap();
        assert_eq!(q.find.sort, expect);
    }

    #[test]
    fn fields_projection() {
        let q = compile(&model(), &params(&[("fields", "name, age")]), None).unwrap();
        assert_eq!(q.find.projection, Some(vec!["name".into(), "age".into()]));
    }

    #[test]
    fn populate_by_field_or_map_to_and_ignores_unknown() {
        let q = compile(
            &model(),
            &params(&[("populate", "link_id,array_link,name,nope")]),
            None,
        )
        .unwrap();
        assert_eq!(
            q.populate,
            vec![
                Populate {
                    field: "link_id".into(),
                    target: "link".into(),
                    output: "link_id".into(),
                    many: false,
                },
                Populate {
                    field: "array_link_id".into(),
                    target: "link".into(),
                    output: "array_link".into(),
                    many: true,
                },
            ]
        );
    }

    #[test]
    fn autopopulate_expands_every_relation() {
        let q = compile(&model(), &params(&[("autopopulate", "true"), ("populate", "link_id")]), None).unwrap();
        assert_eq!(q.populate.len(), 3);
        assert!(q.echo.autopopulate);
    }

    #[test]
    fn owner_scope_is_mandatory() {
        let q = compile(&model(), &params(&[("showDeleted", "1"), ("_owner_id", "other")]), Some("u1")).unwrap();
        assert_eq!(
            q.find.filter,
            Filter::And(vec![cmp("_owner_id", CompareOp::Eq, json!("other")), owned_by("u1")])
        );
    }

    #[test]
    fn parse_int_is_lenient() {
        assert_eq!(parse_int("12"), Some(12));
        assert_eq!(parse_int("12px"), Some(12));
        assert_eq!(parse_int("-3"), Some(-3));
        assert_eq!(parse_int("px"), None);
    }
}
