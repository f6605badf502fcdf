//! Error types for gate, transform and gate-tree operations.
//!
//! This module defines `GateError`, the single error type returned by every
//! fallible operation in this crate. It uses `thiserror` for convenient error
//! construction and implements standard error traits for integration with
//! error handling libraries.

use std::error::Error as StdError;
use thiserror::Error;

/// Error type for gate/transform/tree operations.
#[derive(Debug, Error)]
pub enum GateError {
    /// Null where non-null required; empty path; transform parameter out of
    /// range; setter index out of range; duplicate additional-clustering
    /// parameter; attempting to make a gate its own ancestor; appending an
    /// already-attached gate as a child; wrong observer type; non-2D polygon.
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    /// An index operation (child, dimension, vertex, position, quadrant,
    /// divider) was given an index past the list size.
    #[error("index {index} out of range (len {len})")]
    OutOfRange { index: usize, len: usize },

    /// Legacy TSV: wrong column count; integer parse failure; invalid gate
    /// number, parent number, parameter index, or gate type.
    #[error("malformed input: {message}")]
    Malformed { message: String },

    /// Legacy TSV: the input file was empty.
    #[error("truncated input: {message}")]
    Truncated { message: String },

    /// Legacy TSV gate type 2 (fan); Hyperlog without a conforming root finder.
    #[error("unsupported feature: {message}")]
    UnsupportedFeature { message: String },

    /// File open/read failure, with the underlying platform error text.
    #[error("I/O error: {message}")]
    SystemIo {
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// Generic error with context, for wrapping other errors.
    #[error("{message}")]
    Other {
        message: String,
        #[source]
        source: Option<Box<dyn StdError + Send + Sync>>,
    },
}

impl GateError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn out_of_range(index: usize, len: usize) -> Self {
        Self::OutOfRange { index, len }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }

    pub fn truncated(message: impl Into<String>) -> Self {
        Self::Truncated {
            message: message.into(),
        }
    }

    pub fn unsupported_feature(message: impl Into<String>) -> Self {
        Self::UnsupportedFeature {
            message: message.into(),
        }
    }

    pub fn system_io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::SystemIo {
            message: message.into(),
            source,
        }
    }

    /// Add context to an error, prefixing its message.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        let ctx = context.into();
        match self {
            Self::InvalidArgument { message } => Self::InvalidArgument {
                message: format!("{ctx}: {message}"),
            },
            Self::OutOfRange { index, len } => Self::Other {
                message: format!("{ctx}: index {index} out of range (len {len})"),
                source: None,
            },
            Self::Malformed { message } => Self::Malformed {
                message: format!("{ctx}: {message}"),
            },
            Self::Truncated { message } => Self::Truncated {
                message: format!("{ctx}: {message}"),
            },
            Self::UnsupportedFeature { message } => Self::UnsupportedFeature {
                message: format!("{ctx}: {message}"),
            },
            Self::SystemIo { message, source } => Self::SystemIo {
                message: format!("{ctx}: {message}"),
                source,
            },
            Self::Other { message, source } => Self::Other {
                message: format!("{ctx}: {message}"),
                source,
            },
        }
    }
}

impl From<anyhow::Error> for GateError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            message: err.to_string(),
            source: None,
        }
    }
}

pub type Result<T> = std::result::Result<T, GateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_argument_message() {
        let err = GateError::invalid_argument("T must be positive");
        assert!(matches!(err, GateError::InvalidArgument { .. }));
        assert!(err.to_string().contains("T must be positive"));
    }

    #[test]
    fn out_of_range_message() {
        let err = GateError::out_of_range(5, 3);
        assert!(err.to_string().contains('5'));
        assert!(err.to_string().contains('3'));
    }

    #[test]
    fn with_context_prefixes_message() {
        let err = GateError::malformed("bad column count").with_context("row 4");
        assert!(err.to_string().contains("row 4"));
        assert!(err.to_string().contains("bad column count"));
    }
}
