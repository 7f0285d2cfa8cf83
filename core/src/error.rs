//! Error types for the resource client.
//!
//! # Design
//! Every failure surfaces as one `ApiError` carrying an HTTP status and a
//! human-readable message, regardless of whether it came from the backend,
//! the transport, or local validation. `ErrorKind` keeps the origin visible so
//! callers can tell a bad payload on a 2xx response apart from a backend
//! rejection.

use std::fmt;

use thiserror::Error;

/// Where a failure originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected locally before any request was issued.
    Validation,
    /// The request body or query could not be serialized.
    Encode,
    /// The backend answered with a non-2xx status.
    Backend,
    /// The exchange did not complete.
    Transport,
    /// A 2xx response carried a body that is not the expected JSON.
    Decode,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Encode => "encode",
            ErrorKind::Backend => "backend",
            ErrorKind::Transport => "transport",
            ErrorKind::Decode => "decode",
        };
        f.write_str(name)
    }
}

/// The single error shape returned by every client operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} error (status {status}): {message}")]
pub struct ApiError {
    pub kind: ErrorKind,
    pub status: u16,
    pub message: String,
}

impl ApiError {
    pub fn new(kind: ErrorKind, status: u16, message: impl Into<String>) -> Self {
        Self {
            kind,
            status,
            message: message.into(),
        }
    }

    /// Local pre-flight rejection, always status 400.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, 400, message)
    }

    pub(crate) fn encode(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Encode, 400, message)
    }

    pub(crate) fn decode(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Decode, 500, message)
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }
}

/// The exchange did not complete: connect failure, body read failure, or a
/// stream that broke before its end.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[cfg(feature = "reqwest")]
impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        Self::new(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_status_and_message() {
        let err = ApiError::new(ErrorKind::Backend, 404, "item not found");
        assert_eq!(err.to_string(), "backend error (status 404): item not found");
    }

    #[test]
    fn validation_is_always_400() {
        let err = ApiError::validation("query is required");
        assert_eq!(err.status, 400);
        assert_eq!(err.kind, ErrorKind::Validation);
    }

    #[test]
    fn not_found_is_keyed_on_status() {
        assert!(ApiError::new(ErrorKind::Backend, 404, "gone").is_not_found());
        assert!(!ApiError::new(ErrorKind::Backend, 400, "bad").is_not_found());
    }
}
