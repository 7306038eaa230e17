use std::fmt;
use std::sync::Arc;

use serde_json::Number;
use serde_json::Value;

use super::DocumentTransform;
use crate::error::BoxError;
use crate::error::TransformError;
use crate::json_ext::Object;
use crate::query::Document;
use crate::query::DocumentResponse;
use crate::query::Selection;

type CoerceFn = Arc<dyn Fn(&Value) -> Result<Value, BoxError> + Send + Sync>;

/// Converts every response value of one scalar type.
///
/// Applies to every leaf selection whose named type is `type_name`, at any depth and
/// inside lists. `null`s are kept as they are.
#[derive(Clone)]
pub struct TypeTransform {
    type_name: String,
    f: CoerceFn,
}

impl fmt::Debug for TypeTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeTransform")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

impl TypeTransform {
    pub fn new<F>(type_name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Value) -> Result<Value, BoxError> + Send + Sync + 'static,
    {
        Self {
            type_name: type_name.into(),
            f: Arc::new(f),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    fn apply(&self, selection: &Selection, data: &mut Object, path: &mut Vec<String>) -> Result<(), TransformError> {
        let key = selection.key();
        let Some(value) = data.get_mut(key) else {
            tracing::warn!(key, path = %path.join("."), "selection missing from response data");
            return Ok(());
        };
        path.push(key.to_string());
        let result = if selection.is_leaf() {
            if selection.fmeta.type_.name() == self.type_name {
                self.coerce(value, path)
            } else {
                Ok(())
            }
        } else {
            self.descend(&selection.selection, value, path)
        };
        path.pop();
        result
    }

    fn descend(
        &self,
        selection: &[Selection],
        value: &mut Value,
        path: &mut Vec<String>,
    ) -> Result<(), TransformError> {
        match value {
            Value::Object(object) => selection
                .iter()
                .try_for_each(|child| self.apply(child, object, path)),
            Value::Array(items) => items
                .iter_mut()
                .try_for_each(|item| self.descend(selection, item, path)),
            Value::Null => Ok(()),
            other => Err(TransformError::UnexpectedShape {
                path: path.join("."),
                reason: format!("expected a map or a list, found {other}"),
            }),
        }
    }

    fn coerce(&self, value: &mut Value, path: &[String]) -> Result<(), TransformError> {
        match value {
            Value::Null => Ok(()),
            Value::Array(items) => items.iter_mut().try_for_each(|item| self.coerce(item, path)),
            other => {
                *other = (self.f)(other).map_err(|err| TransformError::Coercion {
                    path: path.join("."),
                    type_name: self.type_name.clone(),
                    reason: err.to_string(),
                })?;
                Ok(())
            }
        }
    }
}

impl DocumentTransform for TypeTransform {
    fn transform_response(
        &self,
        document: &Document,
        mut response: DocumentResponse,
    ) -> Result<DocumentResponse, TransformError> {
        let mut path = Vec::new();
        for selection in &document.query.selection {
            self.apply(selection, &mut response.data, &mut path)?;
        }
        Ok(response)
    }
}

fn float(value: f64) -> Result<Value, BoxError> {
    Number::from_f64(value)
        .map(Value::Number)
        .ok_or_else(|| format!("{value} is not a finite number").into())
}

/// `BigDecimal` strings to floating point numbers.
pub fn big_decimal(value: &Value) -> Result<Value, BoxError> {
    match value {
        Value::Number(number) => Ok(Value::Number(number.clone())),
        Value::String(text) => float(text.trim().parse::<f64>()?),
        other => Err(format!("expected a decimal string, found {other}").into()),
    }
}

/// `BigInt` strings to integers.
///
/// Integers beyond 64 bits stay decimal strings so that no digit is lost; other
/// notations (`1e21`) become floating point numbers.
pub fn big_int(value: &Value) -> Result<Value, BoxError> {
    match value {
        Value::Number(number) => Ok(Value::Number(number.clone())),
        Value::String(text) => {
            let text = text.trim();
            if let Ok(int) = text.parse::<i64>() {
                Ok(int.into())
            } else if let Ok(int) = text.parse::<u64>() {
                Ok(int.into())
            } else if is_integer_literal(text) {
                tracing::trace!(value = text, "BigInt exceeds 64 bits, kept as a string");
                Ok(Value::String(text.to_string()))
            } else {
                float(text.parse::<f64>()?)
            }
        }
        other => Err(format!("expected an integer string, found {other}").into()),
    }
}

fn is_integer_literal(text: &str) -> bool {
    let digits = text.strip_prefix(['-', '+']).unwrap_or(text);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Transforms installed on every subgraph.
pub fn default_subgraph_transforms() -> Vec<Arc<dyn DocumentTransform>> {
    vec![
        Arc::new(TypeTransform::new("BigDecimal", big_decimal)),
        Arc::new(TypeTransform::new("BigInt", big_int)),
    ]
}
