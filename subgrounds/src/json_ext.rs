//! Helpers over response data trees.
//!
//! [`merge`] is the response merge engine: it folds the pages returned for one
//! document into a single tree. Maps are unioned key by key, lists of entities are
//! unioned by `id`, and for scalars the first value seen wins.
use std::collections::HashMap;

use serde_json::Value;

use crate::error::MergeError;
use crate::error::TransformError;
use crate::query::Selection;

/// A JSON object.
pub type Object = serde_json::Map<String, Value>;

const ENTITY_KEY: &str = "id";

fn shape(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

fn is_container(value: &Value) -> bool {
    matches!(value, Value::Array(_) | Value::Object(_))
}

/// Merge two response trees.
///
/// # Errors
///
/// Returns [`MergeError::IncompatibleShapes`] when a map or list meets a value of
/// another shape at the same path. `null` is compatible with every shape.
pub fn merge(left: Value, right: Value) -> Result<Value, MergeError> {
    merge_at(left, right, &mut Vec::new())
}

/// Merge two response objects, see [`merge`].
pub fn merge_objects(left: Object, right: Object) -> Result<Object, MergeError> {
    merge_objects_at(left, right, &mut Vec::new())
}

fn merge_at(left: Value, right: Value, path: &mut Vec<String>) -> Result<Value, MergeError> {
    match (left, right) {
        (Value::Object(left), Value::Object(right)) => {
            Ok(Value::Object(merge_objects_at(left, right, path)?))
        }
        (Value::Array(left), Value::Array(right)) => {
            Ok(Value::Array(merge_lists_at(left, right, path)?))
        }
        (left, Value::Null) => Ok(left),
        (Value::Null, _) => Ok(Value::Null),
        (left, right) if is_container(&left) || is_container(&right) => {
            Err(MergeError::IncompatibleShapes {
                path: path.join("."),
                left: shape(&left).to_string(),
                right: shape(&right).to_string(),
            })
        }
        (left, _) => Ok(left),
    }
}

fn merge_objects_at(
    mut left: Object,
    right: Object,
    path: &mut Vec<String>,
) -> Result<Object, MergeError> {
    for (key, value) in right {
        match left.get_mut(&key) {
            Some(existing) => {
                let current = existing.take();
                path.push(key);
                *existing = merge_at(current, value, path)?;
                path.pop();
            }
            None => {
                left.insert(key, value);
            }
        }
    }
    Ok(left)
}

fn entity_id(value: &Value) -> Option<String> {
    value.as_object()?.get(ENTITY_KEY).map(|id| id.to_string())
}

fn merge_lists_at(
    mut left: Vec<Value>,
    right: Vec<Value>,
    path: &mut Vec<String>,
) -> Result<Vec<Value>, MergeError> {
    let keyed = left
        .iter()
        .chain(right.iter())
        .all(|item| entity_id(item).is_some());

    if !keyed {
        // No identity to join on: merge element-wise, extra elements are appended.
        let mut right = right.into_iter();
        for (index, item) in left.iter_mut().enumerate() {
            let Some(other) = right.next() else {
                break;
            };
            path.push(index.to_string());
            *item = merge_at(item.take(), other, path)?;
            path.pop();
        }
        left.extend(right);
        return Ok(left);
    }

    let mut positions: HashMap<String, usize> = left
        .iter()
        .enumerate()
        .filter_map(|(index, item)| Some((entity_id(item)?, index)))
        .collect();
    for item in right {
        let Some(id) = entity_id(&item) else {
            continue;
        };
        match positions.get(&id) {
            Some(&index) => {
                path.push(index.to_string());
                left[index] = merge_at(left[index].take(), item, path)?;
                path.pop();
            }
            None => {
                positions.insert(id, left.len());
                left.push(item);
            }
        }
    }
    Ok(left)
}

/// Follow `path` through nested maps. Lists are not traversed.
pub fn get_path<'a, S: AsRef<str>>(value: &'a Value, path: &[S]) -> Option<&'a Value> {
    path.iter()
        .try_fold(value, |current, key| current.as_object()?.get(key.as_ref()))
}

/// Every non-null value reached by following `path` through `data`, flattening
/// lists along the way, including a list found at the end of the path.
///
/// Missing keys and `null`s contribute nothing.
///
/// # Errors
///
/// Returns [`TransformError::UnexpectedShape`] when the path goes through a scalar.
pub fn extract<'a, S: AsRef<str>>(
    data: &'a Value,
    path: &[S],
) -> Result<Vec<&'a Value>, TransformError> {
    let mut current = vec![data];
    for (depth, key) in path.iter().enumerate() {
        let mut next = Vec::new();
        for value in flatten(current) {
            match value {
                Value::Object(object) => {
                    if let Some(found) = object.get(key.as_ref()) {
                        next.push(found);
                    }
                }
                Value::Null => {}
                other => {
                    return Err(TransformError::UnexpectedShape {
                        path: path[..depth]
                            .iter()
                            .map(|k| k.as_ref())
                            .collect::<Vec<_>>()
                            .join("."),
                        reason: format!("expected a map, found a {}", shape(other)),
                    });
                }
            }
        }
        current = next;
    }
    Ok(flatten(current)
        .into_iter()
        .filter(|value| !value.is_null())
        .collect())
}

fn flatten(values: Vec<&Value>) -> Vec<&Value> {
    let mut flat = Vec::with_capacity(values.len());
    let mut stack: Vec<&Value> = values.into_iter().rev().collect();
    while let Some(value) = stack.pop() {
        match value {
            Value::Array(items) => stack.extend(items.iter().rev()),
            other => flat.push(other),
        }
    }
    flat
}

/// Trim `data` to the shape of `selection`: keys that no selection asks for are
/// removed, recursively through nested maps and lists.
pub fn project(data: &mut Object, selection: &[Selection]) {
    data.retain(|key, _| selection.iter().any(|s| s.key() == key));
    for s in selection.iter().filter(|s| !s.is_leaf()) {
        if let Some(value) = data.get_mut(s.key()) {
            project_value(value, &s.selection);
        }
    }
}

fn project_value(value: &mut Value, selection: &[Selection]) {
    match value {
        Value::Object(object) => project(object, selection),
        Value::Array(items) => items
            .iter_mut()
            .for_each(|item| project_value(item, selection)),
        _ => {}
    }
}
