//! Classified errors returned by resource operations.
//!
//! Every failure crossing the resource contract carries an [`ErrorKind`].
//! Transports pick their wire status from the kind alone and pass the
//! message through untouched.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of a resource failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The addressed identity does not exist.
    NotFound,
    /// The identity already exists.
    Conflict,
    /// Validation failed, the body could not be decoded, or a query key is not allowed.
    InvalidInput,
    /// A conditional request carried a stale entity tag.
    PreconditionFailed,
    /// The request body is in an encoding nobody registered.
    UnsupportedMediaType,
    /// Storage or encoding failure with no better classification.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::InvalidInput => "invalid input",
            ErrorKind::PreconditionFailed => "precondition failed",
            ErrorKind::UnsupportedMediaType => "unsupported media type",
            ErrorKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// A failure paired with its classification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ResourceError {
    kind: ErrorKind,
    message: String,
}

impl ResourceError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn precondition_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PreconditionFailed, message)
    }

    pub fn unsupported_media_type(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnsupportedMediaType, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The cause, without the classification prefix.
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }
}

pub type Result<T> = std::result::Result<T, ResourceError>;

/// Error body sent back to REST clients.
///
/// Carries both serde and prost derives so the same value can be rendered
/// as JSON, YAML or protobuf.
#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorResponse {
    #[prost(string, tag = "1")]
    #[serde(rename = "error_message")]
    pub message: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<&ResourceError> for ErrorResponse {
    fn from(err: &ResourceError) -> Self {
        Self::new(err.message())
    }
}
