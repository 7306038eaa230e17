//! GraphQL selection trees, documents, requests and responses.
//!
//! A [`Selection`] is an immutable tree mirroring one field of a query together with
//! its alias, arguments and sub-selections. A [`Query`] groups root selections and
//! variable definitions, and a [`Document`] binds a query to the endpoint it targets
//! and to concrete variable values.
//!
//! Selection sets are keyed by response key (alias if present, field name otherwise):
//! two selections with the same key are always merged, never duplicated. Equality is
//! structural and ignores the order of children, arguments and input object fields.
use std::fmt;

use indexmap::IndexMap;
use itertools::Itertools;
use serde::Deserialize;
use serde::Serialize;

use crate::json_ext::Object;
use crate::schema::FieldMeta;
use crate::schema::TypeRef;

mod contains;
mod merging;
mod traverse;

pub(crate) use merging::merge_selection_into;
pub use traverse::SelectionIter;

/// A value in argument position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "PascalCase")]
pub enum InputValue {
    Null,
    Int(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    Enum(String),
    Variable(String),
    List(Vec<InputValue>),
    Object(IndexMap<String, InputValue>),
}

impl InputValue {
    pub fn variable(name: impl Into<String>) -> Self {
        Self::Variable(name.into())
    }

    pub fn enum_value(name: impl Into<String>) -> Self {
        Self::Enum(name.into())
    }

    pub fn object<K: Into<String>>(entries: impl IntoIterator<Item = (K, InputValue)>) -> Self {
        Self::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Name of every variable referenced by this value, nested values included.
    pub fn variables(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_variables(&mut names);
        names
    }

    fn collect_variables<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            Self::Variable(name) => names.push(name),
            Self::List(values) => values.iter().for_each(|v| v.collect_variables(names)),
            Self::Object(fields) => fields.values().for_each(|v| v.collect_variables(names)),
            _ => {}
        }
    }

    /// Enum or string value, as used by `orderBy`/`orderDirection`.
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Self::Enum(name) | Self::String(name) => Some(name),
            _ => None,
        }
    }
}

impl From<i64> for InputValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for InputValue {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<f64> for InputValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for InputValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<&str> for InputValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for InputValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl fmt::Display for InputValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value:?}"),
            Self::String(value) => {
                let quoted = serde_json::to_string(value).map_err(|_| fmt::Error)?;
                f.write_str(&quoted)
            }
            Self::Boolean(value) => write!(f, "{value}"),
            Self::Enum(name) => f.write_str(name),
            Self::Variable(name) => write!(f, "${name}"),
            Self::List(values) => write!(f, "[{}]", values.iter().join(", ")),
            Self::Object(fields) => write!(
                f,
                "{{{}}}",
                fields
                    .iter()
                    .map(|(name, value)| format!("{name}: {value}"))
                    .join(", ")
            ),
        }
    }
}

/// A named argument of a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Argument {
    pub name: String,
    pub value: InputValue,
}

impl Argument {
    pub fn new(name: impl Into<String>, value: impl Into<InputValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.value)
    }
}

/// A variable declared by a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: TypeRef,
    #[serde(default)]
    pub default: Option<InputValue>,
}

impl VariableDefinition {
    pub fn new(name: impl Into<String>, type_: TypeRef) -> Self {
        Self {
            name: name.into(),
            type_,
            default: None,
        }
    }
}

impl fmt::Display for VariableDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}: {}", self.name, self.type_)?;
        if let Some(default) = &self.default {
            write!(f, " = {default}")?;
        }
        Ok(())
    }
}

/// One field of a selection tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Selection {
    pub fmeta: FieldMeta,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub arguments: Vec<Argument>,
    #[serde(default)]
    pub selection: Vec<Selection>,
}

impl Selection {
    pub fn new(fmeta: FieldMeta) -> Self {
        Self {
            fmeta,
            alias: None,
            arguments: Vec::new(),
            selection: Vec::new(),
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_arguments(mut self, arguments: Vec<Argument>) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn with_selection(mut self, selection: Vec<Selection>) -> Self {
        self.selection = selection;
        self
    }

    /// Field name.
    pub fn name(&self) -> &str {
        &self.fmeta.name
    }

    /// Response key: the alias if present, the field name otherwise.
    pub fn key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.fmeta.name)
    }

    pub fn is_leaf(&self) -> bool {
        self.selection.is_empty()
    }

    pub fn argument(&self, name: &str) -> Option<&Argument> {
        self.arguments.iter().find(|arg| arg.name == name)
    }

    /// Child selection with the given response key.
    pub fn child(&self, key: &str) -> Option<&Selection> {
        self.selection.iter().find(|s| s.key() == key)
    }

    fn write_graphql(&self, out: &mut String, level: usize) {
        let indent = "  ".repeat(level);
        out.push_str(&indent);
        if let Some(alias) = &self.alias {
            out.push_str(alias);
            out.push_str(": ");
        }
        out.push_str(&self.fmeta.name);
        if !self.arguments.is_empty() {
            out.push('(');
            out.push_str(&self.arguments.iter().join(", "));
            out.push(')');
        }
        if !self.selection.is_empty() {
            out.push_str(" {\n");
            for child in &self.selection {
                child.write_graphql(out, level + 1);
                out.push('\n');
            }
            out.push_str(&indent);
            out.push('}');
        }
    }

    /// Render at the given indentation level (two spaces per level).
    pub fn graphql(&self, level: usize) -> String {
        let mut out = String::new();
        self.write_graphql(&mut out, level);
        out
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.graphql(0))
    }
}

/// A query operation: root selections plus the variables they use.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Query {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub selection: Vec<Selection>,
    #[serde(default)]
    pub variables: Vec<VariableDefinition>,
}

impl Query {
    pub fn new(selection: Vec<Selection>) -> Self {
        Self {
            name: None,
            selection,
            variables: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_variables(mut self, variables: Vec<VariableDefinition>) -> Self {
        self.variables = variables;
        self
    }

    pub fn variable(&self, name: &str) -> Option<&VariableDefinition> {
        self.variables.iter().find(|v| v.name == name)
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("query")?;
        if let Some(name) = &self.name {
            write!(f, " {name}")?;
        }
        if !self.variables.is_empty() {
            write!(f, "({})", self.variables.iter().join(", "))?;
        }
        f.write_str(" {\n")?;
        for selection in &self.selection {
            writeln!(f, "{}", selection.graphql(1))?;
        }
        f.write_str("}")
    }
}

/// A query bound to one endpoint together with its variable values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub url: String,
    pub query: Query,
    #[serde(default)]
    pub variables: Object,
}

impl Document {
    pub fn new(url: impl Into<String>, query: Query) -> Self {
        Self {
            url: url.into(),
            query,
            variables: Object::new(),
        }
    }

    pub fn with_variables(mut self, variables: Object) -> Self {
        self.variables = variables;
        self
    }

    /// GraphQL text of the query.
    pub fn graphql(&self) -> String {
        self.query.to_string()
    }
}

/// A logical request: one document per endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataRequest {
    pub documents: Vec<Document>,
}

impl DataRequest {
    pub fn new(documents: Vec<Document>) -> Self {
        Self { documents }
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// The data returned for one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentResponse {
    pub url: String,
    pub data: Object,
}

impl DocumentResponse {
    pub fn new(url: impl Into<String>, data: Object) -> Self {
        Self {
            url: url.into(),
            data,
        }
    }

    /// Merge the data of another response for the same document into this one.
    pub fn combine(mut self, other: DocumentResponse) -> Result<Self, crate::error::MergeError> {
        self.data = crate::json_ext::merge_objects(self.data, other.data)?;
        Ok(self)
    }
}

/// One response per document of a [`DataRequest`], in request order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataResponse {
    pub responses: Vec<DocumentResponse>,
}

impl DataResponse {
    pub fn new(responses: Vec<DocumentResponse>) -> Self {
        Self { responses }
    }

    pub fn add_responses(mut self, other: DataResponse) -> Self {
        self.responses.extend(other.responses);
        self
    }

    pub fn len(&self) -> usize {
        self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }
}
