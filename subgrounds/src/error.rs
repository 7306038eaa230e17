//! Error types.
//!
//! Every stage of the engine has its own error enum so that callers can tell
//! protocol misuse ([`QueryError`]), schema lookups ([`SchemaError`]), response
//! shape problems ([`MergeError`], [`TransformError`]) and pagination failures
//! ([`PaginationError`]) apart. [`SubgroundsError`] wraps all of them.
use std::fmt;

use displaydoc::Display;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::pagination::PaginationStrategy;

/// Boxed error returned by transports and user supplied functions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Break out of the current function, returning an internal error.
#[macro_export]
macro_rules! bail {
    ( $( $arg:tt )+ ) => {
        return Err($crate::error::QueryError::Internal {
            message: format!( $( $arg )+ ),
        }
        .into())
    };
}

/// Errors raised while building or combining selection trees.
///
/// These are protocol errors: they signal that the caller asked for something
/// that cannot be expressed as a single well-formed document.
#[derive(Error, Display, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryError {
    /// cannot combine selection '{left}' with selection '{right}': keys differ
    KeyMismatch { left: String, right: String },

    /// cannot combine selections with key '{key}': they select different fields '{left}' and '{right}'
    FieldMismatch {
        key: String,
        left: String,
        right: String,
    },

    /// cannot combine selections of field '{field}': arguments differ
    IncompatibleArguments { field: String },

    /// cannot combine documents targeting different endpoints '{left}' and '{right}'
    UrlMismatch { left: String, right: String },

    /// variable '{0}' is used but has no type information
    UntypedVariable(String),

    /// invalid argument '{argument}' on field '{field}': {reason}
    InvalidArgument {
        field: String,
        argument: String,
        reason: String,
    },

    /// internal error: {message}
    Internal { message: String },
}

/// Errors raised by schema lookups.
#[derive(Error, Display, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchemaError {
    /// type '{0}' not found in schema
    UnknownType(String),

    /// type '{type_name}' has no field '{field}'
    UnknownField { type_name: String, field: String },

    /// field '{field}' has no argument '{argument}'
    UnknownArgument { field: String, argument: String },

    /// input object '{type_name}' has no field '{field}'
    UnknownInputField { type_name: String, field: String },

    /// type '{0}' is not an object or interface type
    NotAnObject(String),

    /// type '{0}' is not an input object type
    NotAnInputObject(String),

    /// invalid type reference: {0}
    InvalidTypeRef(String),

    /// cannot parse schema: {0}
    Parse(String),
}

/// Response trees that cannot be merged.
#[derive(Error, Display, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeError {
    /// cannot merge {left} with {right} at '{path}'
    IncompatibleShapes {
        path: String,
        left: String,
        right: String,
    },
}

/// Errors raised by the transform pipeline in either direction.
#[derive(Error, Display, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransformError {
    /// unexpected response shape at '{path}': {reason}
    UnexpectedShape { path: String, reason: String },

    /// cannot coerce value at '{path}' to {type_name}: {reason}
    Coercion {
        path: String,
        type_name: String,
        reason: String,
    },

    /// page index {index} is out of range for a request of {len} documents
    PageIndexOutOfRange { index: usize, len: usize },

    /// request transforms changed the number of documents from {before} to {after}
    DocumentCountChanged { before: usize, after: usize },

    /// expected {expected} responses, received {received}
    ResponseCountMismatch { expected: usize, received: usize },

    /// {0}
    Query(#[from] QueryError),

    /// transform failed: {0}
    Custom(String),
}

/// Errors raised while loading configuration.
#[derive(Error, Display, Debug)]
pub enum ConfigurationError {
    /// could not deserialize configuration: {0}
    Deserialization(#[from] serde_yaml::Error),

    /// invalid configuration value for '{field}': {reason}
    InvalidValue { field: &'static str, reason: String },
}

// Carries the strategy instance that failed so that callers can inspect how
// far pagination went. Pagination errors are never retried.
/// pagination failed: {source}
#[derive(Error, Display)]
pub struct PaginationError {
    #[source]
    source: Box<SubgroundsError>,
    strategy: Option<Box<dyn PaginationStrategy>>,
}

impl PaginationError {
    pub(crate) fn new(
        source: impl Into<SubgroundsError>,
        strategy: Option<Box<dyn PaginationStrategy>>,
    ) -> Self {
        Self {
            source: Box::new(source.into()),
            strategy,
        }
    }

    /// The strategy that was running when pagination failed, if one had been built.
    pub fn strategy(&self) -> Option<&dyn PaginationStrategy> {
        self.strategy.as_deref()
    }

    /// The underlying failure.
    pub fn cause(&self) -> &SubgroundsError {
        &self.source
    }
}

impl fmt::Debug for PaginationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaginationError")
            .field("source", &self.source)
            .field("strategy", &self.strategy)
            .finish()
    }
}

/// Top level error of the engine.
#[derive(Error, Display, Debug)]
pub enum SubgroundsError {
    /// {0}
    Query(#[from] QueryError),

    /// {0}
    Schema(#[from] SchemaError),

    /// {0}
    Merge(#[from] MergeError),

    /// {0}
    Transform(#[from] TransformError),

    /// {0}
    Pagination(#[from] PaginationError),

    /// {0}
    Configuration(#[from] ConfigurationError),

    /// no subgraph registered for endpoint '{0}'
    UnknownEndpoint(String),

    /// pagination step failed: {0}
    Step(String),

    /// transport error: {0}
    Transport(BoxError),

    /// execution already completed
    Completed,
}

impl SubgroundsError {
    pub(crate) fn step(message: impl Into<String>) -> Self {
        Self::Step(message.into())
    }
}
