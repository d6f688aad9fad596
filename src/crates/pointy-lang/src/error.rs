//! Unified error type for the Pointy-Lang compiler and runtime.

use serde_json::Value;
use thiserror::Error;

use crate::lexer::Position;

pub type Result<T> = std::result::Result<T, PointyError>;

/// Every failure mode the lexer, parser, graph builder, scheduler, and
/// executor pools can produce, collected behind one error currency so
/// callers have a single `match` to write.
#[derive(Debug, Error, Clone)]
pub enum PointyError {
    #[error("syntax error at {position}: expected {expected}, found {got}")]
    SyntaxError {
        position: Position,
        expected: String,
        got: String,
    },

    #[error("unknown task {name:?}")]
    UnknownTaskError { name: String },

    #[error("malformed graph: {detail}")]
    ShapeError { detail: String },

    #[error("task handler returned an error: {0}")]
    HandlerError(Value),

    #[error("task was cancelled")]
    CancelledError,

    #[error("task timed out")]
    TimeoutError,

    #[error("task failed with a non-retryable error: {0}")]
    NonRetryable(Value),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("io error: {0}")]
    Io(String),
}

impl PointyError {
    pub fn syntax(position: Position, expected: impl Into<String>, got: impl Into<String>) -> Self {
        PointyError::SyntaxError {
            position,
            expected: expected.into(),
            got: got.into(),
        }
    }

    pub fn unknown_task(name: impl Into<String>) -> Self {
        PointyError::UnknownTaskError { name: name.into() }
    }

    pub fn shape(detail: impl Into<String>) -> Self {
        PointyError::ShapeError {
            detail: detail.into(),
        }
    }

    /// Whether this error, encountered while running a node, should ever be
    /// retried regardless of the node's remaining retry budget. Only a
    /// handler-raised `HandlerError` is locally retryable; every other
    /// variant surfaces straight to the run outcome.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PointyError::HandlerError(_))
    }
}

impl From<std::io::Error> for PointyError {
    fn from(e: std::io::Error) -> Self {
        PointyError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for PointyError {
    fn from(e: serde_json::Error) -> Self {
        PointyError::Configuration(e.to_string())
    }
}
