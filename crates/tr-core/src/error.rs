//! # Error Taxonomy
//!
//! Three families, matching how each one is handled upstream:
//!
//! - [`FilterError`]: the caller asked for something malformed. Never retried,
//!   surfaced for user correction.
//! - [`ExecutionError`]: the query-execution collaborator failed. The engine
//!   does not retry; the orchestration layer may retry the whole batch.
//! - [`CursorDecodeError`]: a garbled cursor token. Recovered locally by
//!   falling back to "no cursor", never surfaced.

use thiserror::Error;

/// A filter that cannot be compiled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error("unknown filter field '{0}'")]
    UnknownField(String),

    #[error("'{0}' is a control parameter and cannot be used as a filter")]
    ReservedKey(String),

    #[error("field '{0}' is not produced by any registered log source")]
    UnmappedField(String),

    #[error("invalid value '{value}' for '{field}': {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("{kind} predicates are not supported on '{field}'")]
    UnsupportedPredicate { field: String, kind: &'static str },

    #[error("time range start {start} is after end {end}")]
    InvalidRange { start: String, end: String },
}

impl FilterError {
    pub(crate) fn invalid(field: &str, value: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// The query AST could not be rendered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("invalid SQL identifier '{0}'")]
    InvalidIdentifier(String),
}

/// Anything that stops a [`FilterState`](crate::FilterState) from becoming query text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error(transparent)]
    Render(#[from] RenderError),
}

/// A fault reported by (or while talking to) the query-execution collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("execution service unreachable: {0}")]
    Transport(String),

    #[error("execution service timed out after {0} ms")]
    Timeout(u64),

    #[error("execution service rejected the query ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("could not decode execution result: {0}")]
    Decode(String),
}

/// A cursor token that is not a microsecond timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed cursor '{raw}': {reason}")]
pub struct CursorDecodeError {
    pub raw: String,
    pub reason: &'static str,
}

/// Top-level engine error: compilation or execution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

impl From<FilterError> for EngineError {
    fn from(err: FilterError) -> Self {
        Self::Compile(CompileError::Filter(err))
    }
}
