//! Error types for definitions, schemas and validation.

use std::fmt;

use thiserror::Error;

/// A schema could not be compiled into a validator.
///
/// These are configuration errors: they surface when a handler or client is
/// constructed, never while serving a request.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SchemaError {
    /// `coerceTo` / `coerceFrom` names a coercion that is not registered.
    #[error("unknown coercion \"{name}\" at {pointer}")]
    UnknownCoercion { name: String, pointer: String },

    /// `$ref` points somewhere this validator cannot follow.
    #[error("unresolvable $ref \"{reference}\" at {pointer}")]
    UnresolvedRef { reference: String, pointer: String },

    /// A keyword holds a value of the wrong shape.
    #[error("invalid keyword \"{keyword}\" at {pointer}: {message}")]
    InvalidKeyword {
        keyword: String,
        pointer: String,
        message: String,
    },
}

/// A Definition violates one of its structural invariants.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DefinitionError {
    #[error("definition \"{title}\": parameter \"{name}\" appears more than once in the parameter order")]
    DuplicateParam { title: String, name: String },

    #[error("definition \"{title}\": parameter \"{name}\" is not declared in the parameter schema")]
    UndeclaredParam { title: String, name: String },

    #[error("definition \"{title}\": the context parameter must be the last parameter")]
    ContextNotLast { title: String },

    #[error("definition \"{title}\": raw HTTP parameters accept at most one parameter, found {count}")]
    RawParamsWithOrder { title: String, count: usize },

    #[error("invalid definition JSON: {0}")]
    Json(String),
}

/// A single failed check, addressed by its data path (`data.foo[0]`).
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.path, self.message)
    }
}

/// All checks that failed while decoding or encoding one payload.
///
/// Displays as a single comma-separated line, which is what ends up in the
/// body of a 400/502 response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationErrors {
    errors: Vec<ValidationError>,
}

impl ValidationErrors {
    pub fn new(errors: Vec<ValidationError>) -> Self {
        Self { errors }
    }

    pub fn single(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(vec![ValidationError {
            path: path.into(),
            message: message.into(),
        }])
    }

    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.is_empty() {
            return write!(f, "No errors");
        }
        for (i, error) in self.errors.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", error)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

/// Top-level error for the core crate.
#[derive(Debug, Error)]
pub enum Error {
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
