use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use super::DocumentTransform;
use crate::error::BoxError;
use crate::error::TransformError;
use crate::json_ext;
use crate::json_ext::Object;
use crate::query::Document;
use crate::query::DocumentResponse;
use crate::query::Selection;
use crate::query::merge_selection_into;
use crate::schema::FieldMeta;

/// Computes a synthetic field from the values of its dependencies, in order.
pub type SyntheticFn = Arc<dyn Fn(&[Value]) -> Result<Value, BoxError> + Send + Sync>;

/// A field computed on the client from other fields of the same object.
///
/// Before sending, the synthetic leaf is replaced by the selections it depends on.
/// When the response comes back, the function is applied to the values of those
/// selections and the dependencies the caller did not ask for are removed again.
/// The default value stands in when a dependency is missing or the function fails.
#[derive(Clone)]
pub struct LocalSyntheticField {
    fmeta: FieldMeta,
    type_name: String,
    f: SyntheticFn,
    default: Value,
    args: Vec<Selection>,
}

impl fmt::Debug for LocalSyntheticField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalSyntheticField")
            .field("field", &self.fmeta.name)
            .field("type_name", &self.type_name)
            .field("default", &self.default)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

impl LocalSyntheticField {
    pub fn new<F>(
        fmeta: FieldMeta,
        type_name: impl Into<String>,
        f: F,
        default: Value,
        args: Vec<Selection>,
    ) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, BoxError> + Send + Sync + 'static,
    {
        Self {
            fmeta,
            type_name: type_name.into(),
            f: Arc::new(f),
            default,
            args,
        }
    }

    pub fn field(&self) -> &FieldMeta {
        &self.fmeta
    }

    fn is_synthetic(&self, selection: &Selection) -> bool {
        selection.is_leaf() && selection.name() == self.fmeta.name
    }

    fn on_type(&self, selection: &Selection) -> bool {
        !selection.is_leaf() && selection.fmeta.type_.name() == self.type_name
    }

    fn expand(&self, mut selection: Selection) -> Result<Selection, TransformError> {
        if !self.on_type(&selection) || !selection.selection.iter().any(|s| self.is_synthetic(s)) {
            return Ok(selection);
        }
        let children = std::mem::take(&mut selection.selection);
        for child in children {
            if self.is_synthetic(&child) {
                for arg in &self.args {
                    merge_selection_into(&mut selection.selection, arg.clone())?;
                }
            } else {
                merge_selection_into(&mut selection.selection, child)?;
            }
        }
        Ok(selection)
    }

    fn compute(&self, row: &Object) -> Value {
        let mut inputs = Vec::with_capacity(self.args.len());
        for arg in &self.args {
            if !select_data(arg, row, &mut inputs) {
                tracing::debug!(field = %self.fmeta.name, "synthetic field input missing, using default");
                return self.default.clone();
            }
        }
        (self.f)(&inputs).unwrap_or_else(|err| {
            tracing::debug!(field = %self.fmeta.name, %err, "synthetic field failed, using default");
            self.default.clone()
        })
    }

    fn collapse(&self, selection: &Selection, data: &mut Object) -> Result<(), TransformError> {
        let Some(value) = data.get_mut(selection.key()) else {
            tracing::warn!(key = selection.key(), "selection missing from response data");
            return Ok(());
        };
        if !self.on_type(selection) {
            return self.collapse_value(selection, value);
        }
        match value {
            Value::Null => {
                *value = Value::Object(Object::new());
                self.collapse_row(selection, value)
            }
            Value::Array(items) => items
                .iter_mut()
                .filter(|item| !item.is_null())
                .try_for_each(|item| self.collapse_row(selection, item)),
            _ => self.collapse_row(selection, value),
        }
    }

    fn collapse_value(&self, selection: &Selection, value: &mut Value) -> Result<(), TransformError> {
        match value {
            Value::Object(object) => selection
                .selection
                .iter()
                .filter(|child| !child.is_leaf())
                .try_for_each(|child| self.collapse(child, object)),
            Value::Array(items) => items
                .iter_mut()
                .try_for_each(|item| self.collapse_value(selection, item)),
            _ => Ok(()),
        }
    }

    fn collapse_row(&self, selection: &Selection, row: &mut Value) -> Result<(), TransformError> {
        let Value::Object(row) = row else {
            return Err(TransformError::UnexpectedShape {
                path: selection.key().to_string(),
                reason: format!("expected a {} object, found {row}", self.type_name),
            });
        };
        for child in &selection.selection {
            if self.is_synthetic(child) {
                if !row.contains_key(child.key()) {
                    let value = self.compute(row);
                    row.insert(child.key().to_string(), value);
                }
            } else if child.is_leaf() {
                row.entry(child.key()).or_insert(Value::Null);
            } else {
                self.collapse(child, row)?;
            }
        }
        json_ext::project(row, &selection.selection);
        Ok(())
    }
}

// Pushes the values selected by `selection` in `data`; false when one is missing.
fn select_data(selection: &Selection, data: &Object, out: &mut Vec<Value>) -> bool {
    let Some(value) = data.get(selection.key()) else {
        return false;
    };
    if selection.is_leaf() {
        out.push(value.clone());
        return true;
    }
    match value {
        Value::Object(inner) => selection
            .selection
            .iter()
            .all(|child| select_data(child, inner, out)),
        _ => false,
    }
}

impl DocumentTransform for LocalSyntheticField {
    fn transform_document(&self, document: Document) -> Result<Document, TransformError> {
        let mut document = document;
        document.query = std::mem::take(&mut document.query)
            .map_self_first(&mut |selection| self.expand(selection))?;
        Ok(document)
    }

    fn transform_response(
        &self,
        document: &Document,
        mut response: DocumentResponse,
    ) -> Result<DocumentResponse, TransformError> {
        for selection in &document.query.selection {
            self.collapse(selection, &mut response.data)?;
        }
        Ok(response)
    }
}
