//! Error types for the Lyre IR core.

use thiserror::Error;

/// Main error type for IR construction, dispatch, and passes.
///
/// Every variant is fatal at the boundary where it is detected: nothing in
/// this crate swallows or retries one of these. Variants carry the offending
/// operator name or variable plus a rendered snapshot of the expression in
/// which the problem occurred, so the caller can report a useful diagnostic.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or missing operator arguments.
    #[error("schema error in `{op}`: {message}")]
    Schema { op: String, message: String },

    /// Shape, rank, or dtype inconsistency during typing.
    #[error("type error in `{op}`: {message}")]
    Type { op: String, message: String },

    /// Unknown operator name or unbound variable reference.
    #[error("lookup error: {0}")]
    Lookup(String),

    /// An operator used in a backward pass has no registered gradient rule.
    #[error("no gradient rule registered for `{op}` (used in {context})")]
    UnsupportedGradient { op: String, context: String },

    /// Duplicate binding, dangling reference, or sharing-safety violation.
    #[error("malformed IR: {message}")]
    MalformedIr { message: String },

    /// The external kernel compiler rejected a specialization.
    #[error("backend compile error for `{op}`: {message}")]
    Backend { op: String, message: String },
}

impl Error {
    pub fn schema(op: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Schema {
            op: op.into(),
            message: message.into(),
        }
    }

    pub fn type_error(op: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Type {
            op: op.into(),
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Error::MalformedIr {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
