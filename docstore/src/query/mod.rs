//! A lightweight Mongo-style predicate evaluator.
//!
//! Supports implicit equality, dotted paths (descending into arrays),
//! comparison operators, `$in`/`$nin`, `$exists`, `$regex` and the logical
//! combinators `$and`/`$or`/`$nor`. Anything else is rejected rather than
//! silently ignored.

use crate::document::Document;
use crate::error::{Result, StoreError};
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;

static NULL: Value = Value::Null;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub direction: SortDirection,
}

/// Cursor options applied after filtering.
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub projection: Option<Value>,
    pub sort: Vec<SortKey>,
    pub skip: Option<usize>,
    pub limit: Option<usize>,
}

/// A `{ "$set": {...} }` update document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Update {
    #[serde(rename = "$set", default)]
    pub set: Map<String, Value>,
}

impl Update {
    /// Build an update from the fields to set; `fields` must be an object.
    pub fn set(fields: Value) -> Result<Self> {
        match fields {
            Value::Object(set) => Ok(Update { set }),
            other => Err(StoreError::Query(format!("$set expects an object, got {other}"))),
        }
    }

    /// Parse a full update document (`{"$set": {...}}`).
    pub fn from_value(value: Value) -> Result<Self> {
        if let Value::Object(map) = &value {
            if let Some(op) = map.keys().find(|k| k.as_str() != "$set") {
                return Err(StoreError::Query(format!("unsupported update operator '{op}'")));
            }
        }
        Ok(serde_json::from_value(value)?)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Insert the `$set` document when nothing matches.
    pub upsert: bool,
}

/// Evaluate `query` against `doc`.
pub fn matches(doc: &Document, query: &Value) -> Result<bool> {
    match query {
        Value::Null => Ok(true),
        Value::Object(conditions) => match_object(doc, conditions),
        other => Err(StoreError::Query(format!(
            "query must be an object, got {other}"
        ))),
    }
}

fn match_object(doc: &Document, conditions: &Map<String, Value>) -> Result<bool> {
    for (key, cond) in conditions {
        let ok = match key.as_str() {
            "$and" => {
                let mut all = true;
                for q in as_query_list(key, cond)? {
                    if !matches(doc, q)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => {
                let mut any = false;
                for q in as_query_list(key, cond)? {
                    if matches(doc, q)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            "$nor" => {
                let mut none = true;
                for q in as_query_list(key, cond)? {
                    if matches(doc, q)? {
                        none = false;
                        break;
                    }
                }
                none
            }
            op if op.starts_with('$') => {
                return Err(StoreError::Query(format!("unknown top-level operator '{op}'")))
            }
            path => match_field(&lookup(doc, path), cond)?,
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn as_query_list<'a>(op: &str, cond: &'a Value) -> Result<&'a Vec<Value>> {
    cond.as_array()
        .ok_or_else(|| StoreError::Query(format!("{op} expects an array")))
}

/// Collect every value reachable through a dotted path, descending into arrays.
fn lookup<'a>(doc: &'a Document, path: &str) -> Vec<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next().unwrap_or_default();
    let mut current: Vec<&Value> = doc.get(first).into_iter().collect();
    for segment in segments {
        let mut next = Vec::new();
        for value in current {
            match value {
                Value::Object(map) => next.extend(map.get(segment)),
                Value::Array(items) => {
                    for item in items {
                        if let Value::Object(map) = item {
                            next.extend(map.get(segment));
                        }
                    }
                }
                _ => {}
            }
        }
        current = next;
    }
    current
}

fn is_operator_object(cond: &Value) -> bool {
    match cond {
        Value::Object(map) => !map.is_empty() && map.keys().all(|k| k.starts_with('$')),
        _ => false,
    }
}

fn match_field(candidates: &[&Value], cond: &Value) -> Result<bool> {
    if !is_operator_object(cond) {
        return Ok(equals_any(candidates, cond));
    }
    let Value::Object(ops) = cond else {
        return Ok(false);
    };
    let options = ops.get("$options").and_then(Value::as_str).unwrap_or("");
    for (op, arg) in ops {
        let ok = match op.as_str() {
            "$eq" => equals_any(candidates, arg),
            "$ne" => !equals_any(candidates, arg),
            "$gt" => compare_any(candidates, arg, |o| o == Ordering::Greater),
            "$gte" => compare_any(candidates, arg, |o| o != Ordering::Less),
            "$lt" => compare_any(candidates, arg, |o| o == Ordering::Less),
            "$lte" => compare_any(candidates, arg, |o| o != Ordering::Greater),
            "$in" => {
                let list = as_query_list(op, arg)?;
                list.iter().any(|v| equals_any(candidates, v))
            }
            "$nin" => {
                let list = as_query_list(op, arg)?;
                !list.iter().any(|v| equals_any(candidates, v))
            }
            "$exists" => {
                let wanted = arg.as_bool().unwrap_or(true);
                let exists = candidates.iter().any(|v| !v.is_null());
                exists == wanted
            }
            "$regex" => {
                let pattern = arg
                    .as_str()
                    .ok_or_else(|| StoreError::Query("$regex expects a string".into()))?;
                let re = RegexBuilder::new(pattern)
                    .case_insensitive(options.contains('i'))
                    .build()
                    .map_err(|e| StoreError::Query(format!("invalid $regex: {e}")))?;
                candidates
                    .iter()
                    .any(|v| v.as_str().map(|s| re.is_match(s)).unwrap_or(false))
            }
            "$options" => true,
            other => return Err(StoreError::Query(format!("unknown operator '{other}'"))),
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Equality with Mongo semantics: `null` matches a missing field, and an
/// array field matches when any element equals the value.
fn equals_any(candidates: &[&Value], expected: &Value) -> bool {
    if expected.is_null() && candidates.iter().all(|v| v.is_null()) {
        return true;
    }
    candidates.iter().any(|v| {
        *v == expected
            || matches!(v, Value::Array(items) if !expected.is_array() && items.contains(expected))
    })
}

fn compare_any(candidates: &[&Value], arg: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    candidates
        .iter()
        .any(|v| compare_values(v, arg).map(&accept).unwrap_or(false))
}

/// Ordering between two JSON scalars of the same kind.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

/// Apply an inclusion (`{field: 1}`) or exclusion (`{field: 0}`) projection.
pub fn project(doc: Document, projection: &Value) -> Result<Document> {
    let Value::Object(shape) = projection else {
        return Err(StoreError::Query("projection must be an object".into()));
    };
    if shape.is_empty() {
        return Ok(doc);
    }
    let flag = |v: &Value| match v {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        _ => true,
    };
    let inclusion = shape
        .iter()
        .any(|(k, v)| k != crate::document::ID_FIELD && flag(v));
    let mut map = doc.into_map();
    if inclusion {
        let exclude_id = shape
            .get(crate::document::ID_FIELD)
            .map(|v| !flag(v))
            .unwrap_or(false);
        map.retain(|k, _| {
            if k == crate::document::ID_FIELD {
                !exclude_id
            } else {
                shape.get(k).map(flag).unwrap_or(false)
            }
        });
    } else {
        map.retain(|k, _| shape.get(k).map(flag).unwrap_or(true));
    }
    Ok(Document::from(map))
}

/// Stable sort by the given keys; missing values sort first.
pub fn sort_documents(docs: &mut [Document], keys: &[SortKey]) {
    if keys.is_empty() {
        return;
    }
    docs.sort_by(|a, b| {
        for key in keys {
            let av = lookup(a, &key.field).first().copied().unwrap_or(&NULL);
            let bv = lookup(b, &key.field).first().copied().unwrap_or(&NULL);
            let ord = match (av.is_null(), bv.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Less,
                (false, true) => Ordering::Greater,
                _ => compare_values(av, bv).unwrap_or(Ordering::Equal),
            };
            let ord = match key.direction {
                SortDirection::Ascending => ord,
                SortDirection::Descending => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

/// Filter, sort, page and project a visible document set.
pub fn apply(docs: Vec<Document>, query: &Value, options: &FindOptions) -> Result<Vec<Document>> {
    let mut matched = Vec::new();
    for doc in docs {
        if matches(&doc, query)? {
            matched.push(doc);
        }
    }
    sort_documents(&mut matched, &options.sort);
    let iter = matched.into_iter().skip(options.skip.unwrap_or(0));
    let paged: Vec<Document> = match options.limit {
        Some(limit) => iter.take(limit).collect(),
        None => iter.collect(),
    };
    match &options.projection {
        Some(projection) => paged.into_iter().map(|d| project(d, projection)).collect(),
        None => Ok(paged),
    }
}
