//! Dotted-path access into structured state.
//!
//! A path such as `"user.addresses.0.city"` is split on `.`; segments that
//! land on an array are parsed as decimal indices. The empty path addresses
//! the value itself.

use crate::error::{Error, Result};
use serde_json::{Map, Value};

/// Split a dotted path into segments.
pub fn parse(path: &str) -> Vec<String> {
    if path.is_empty() {
        return Vec::new();
    }
    path.split('.').map(str::to_string).collect()
}

/// Join segments back into a dotted path.
pub fn join(segments: &[String]) -> String {
    segments.join(".")
}

fn index(segment: &str, len: usize, path: &[String]) -> Result<usize> {
    let index: usize = segment.parse().map_err(|_| {
        Error::InvalidPath(format!("'{}' is not an array index in '{}'", segment, join(path)))
    })?;
    if index > len {
        return Err(Error::InvalidPath(format!(
            "index {} out of bounds (len {}) in '{}'",
            index,
            len,
            join(path)
        )));
    }
    Ok(index)
}

/// Borrow the value at `segments`, if present.
pub fn get<'a>(value: &'a Value, segments: &[String]) -> Option<&'a Value> {
    let mut current = value;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Walk to the parent container of the last segment.
///
/// With `create`, missing or null intermediate values become empty objects.
fn parent_mut<'a>(
    value: &'a mut Value,
    segments: &[String],
    create: bool,
) -> Result<&'a mut Value> {
    let mut current = value;
    for (i, segment) in segments[..segments.len() - 1].iter().enumerate() {
        if create && current.is_null() {
            *current = Value::Object(Map::new());
        }
        current = match current {
            Value::Object(map) => {
                if create {
                    map.entry(segment.clone())
                        .or_insert_with(|| Value::Object(Map::new()))
                } else {
                    map.get_mut(segment).ok_or_else(|| {
                        Error::InvalidPath(format!(
                            "missing '{}' in '{}'",
                            segment,
                            join(&segments[..=i])
                        ))
                    })?
                }
            }
            Value::Array(items) => {
                let len = items.len();
                let idx = index(segment, len, segments)?;
                items.get_mut(idx).ok_or_else(|| {
                    Error::InvalidPath(format!("index {} out of bounds in '{}'", idx, join(segments)))
                })?
            }
            other => {
                return Err(Error::InvalidPath(format!(
                    "cannot descend into {} at '{}'",
                    kind(other),
                    join(&segments[..=i])
                )))
            }
        };
    }
    if create && current.is_null() {
        *current = Value::Object(Map::new());
    }
    Ok(current)
}

/// Write `new_value` at `segments`. Returns whether the stored value changed.
///
/// Without `create`, every parent must already exist. Writing one past the
/// end of an array appends.
pub fn set(value: &mut Value, segments: &[String], new_value: Value, create: bool) -> Result<bool> {
    let Some(last) = segments.last() else {
        if *value == new_value {
            return Ok(false);
        }
        *value = new_value;
        return Ok(true);
    };

    let parent = parent_mut(value, segments, create)?;
    match parent {
        Value::Object(map) => {
            if map.get(last) == Some(&new_value) {
                return Ok(false);
            }
            map.insert(last.clone(), new_value);
            Ok(true)
        }
        Value::Array(items) => {
            let idx = index(last, items.len(), segments)?;
            if idx == items.len() {
                items.push(new_value);
                return Ok(true);
            }
            if items[idx] == new_value {
                return Ok(false);
            }
            items[idx] = new_value;
            Ok(true)
        }
        other => Err(Error::InvalidPath(format!(
            "cannot assign into {} at '{}'",
            kind(other),
            join(segments)
        ))),
    }
}

/// Delete the value at `segments`, returning it if it existed.
pub fn remove(value: &mut Value, segments: &[String]) -> Result<Option<Value>> {
    let Some(last) = segments.last() else {
        return Err(Error::InvalidPath("cannot remove the root value".to_string()));
    };

    let parent = match parent_mut(value, segments, false) {
        Ok(parent) => parent,
        Err(_) => return Ok(None),
    };
    match parent {
        Value::Object(map) => Ok(map.remove(last)),
        Value::Array(items) => match last.parse::<usize>() {
            Ok(idx) if idx < items.len() => Ok(Some(items.remove(idx))),
            _ => Ok(None),
        },
        _ => Ok(None),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
