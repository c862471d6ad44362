//! Crate-wide error taxonomy. One variant family per §7 error kind, following
//! the `LLMError`/`ApiError` style used throughout the teacher codebase:
//! named variants, `#[error("...")]` messages, `#[from]` conversions.

use serde::Serialize;
use thiserror::Error;

/// Cube/dimension/measure/relationship invariant violations, accumulated
/// during schema compilation.
#[derive(Error, Debug, Clone)]
pub enum ModelError {
    #[error("cube '{0}' has neither a table nor a raw SQL source")]
    MissingTableSource(String),
    #[error("cube '{0}' declares no dimensions and no measures")]
    EmptyCube(String),
    #[error("dimension '{dimension}' on cube '{cube}' has no sql or expression")]
    DimensionMissingExpression { cube: String, dimension: String },
    #[error("measure '{measure}' on cube '{cube}' has no sql, expression, or formula")]
    MeasureMissingExpression { cube: String, measure: String },
    #[error("relationship '{relationship}' on cube '{cube}' references non-existent cube '{target}'")]
    UnknownRelationshipTarget {
        cube: String,
        relationship: String,
        target: String,
    },
    #[error("duplicate cube name '{0}'")]
    DuplicateCube(String),
    #[error("schema compilation failed with {} error(s):\n{}", .0.len(), join_bullets(.0))]
    Accumulated(Vec<ModelError>),
}

fn join_bullets(errs: &[ModelError]) -> String {
    errs.iter()
        .map(|e| format!("  - {e}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Request malformed at the AST level, detected before any backend work.
#[derive(Error, Debug, Clone)]
pub enum QueryError {
    #[error("request has no dimensions, measures, or time-dimension granularity")]
    EmptyRequest,
    #[error("logical filter must set exactly one of 'or'/'and', got {0}")]
    AmbiguousLogicalFilter(&'static str),
    #[error("reference to unknown cube '{0}'")]
    UnknownCube(String),
    #[error("reference to unknown field '{field}' on cube '{cube}'")]
    UnknownField { cube: String, field: String },
    #[error("malformed member reference '{0}', expected 'cube.field'")]
    MalformedMemberReference(String),
    #[error("in_date_range requires exactly two values, got {0}")]
    InDateRangeArity(usize),
    #[error("unsupported filter operator '{0}'")]
    UnsupportedOperator(String),
    #[error("no join path from '{from}' to '{to}'")]
    NoJoinPath { from: String, to: String },
    #[error("compareDateRange can only be set on one time dimension")]
    MultipleCompareDateRanges,
}

/// Backend failure, connection loss, cancellation, or an unexpected error
/// wrapped from elsewhere in the pipeline.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("driver execution failed: {0}")]
    Driver(String),
    #[error("query execution cancelled")]
    Cancelled,
    #[error("cache backend error: {0}")]
    Cache(String),
    #[error("query execution failed: {message}")]
    Wrapped {
        message: String,
        execution_time_ms: f64,
    },
}

/// Semantic checks between parse and execute that are neither model nor
/// query errors.
#[derive(Error, Debug, Clone)]
pub enum ValidationError {
    #[error("unparseable date expression '{0}'")]
    UnparseableDateExpression(String),
    #[error("{0}")]
    Other(String),
}

/// Missing or invalid global settings; unrecoverable at startup.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("missing required setting '{0}'")]
    Missing(String),
    #[error("invalid value for '{key}': {message}")]
    Invalid { key: String, message: String },
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// Top-level crate error, aggregating every subsystem's error kind. This is
/// what orchestrator/schema-compiler/CLI callers actually propagate with `?`.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Machine-readable discriminant for the typed error envelope sent to transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    Configuration,
    Model,
    Query,
    Execution,
    Validation,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Configuration(_) => ErrorKind::Configuration,
            Error::Model(_) => ErrorKind::Model,
            Error::Query(_) => ErrorKind::Query,
            Error::Execution(_) => ErrorKind::Execution,
            Error::Validation(_) => ErrorKind::Validation,
        }
    }

    /// Serializable form sent across the transport boundary (§7: "serialized
    /// to the transport as a typed envelope with a human-readable message
    /// and a machine-readable kind").
    pub fn to_envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub kind: ErrorKind,
    pub message: String,
}

pub type Result<T> = std::result::Result<T, Error>;
