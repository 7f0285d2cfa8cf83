//! Maps failed exchanges onto `ApiError`.
//!
//! The message is resolved by an ordered chain, each link its own function:
//! 1. [`message_from_body`]: a string `message` field in a JSON body.
//! 2. The failure's own descriptive text.
//! 3. [`FALLBACK_MESSAGE`].

use serde_json::Value;

use crate::error::{ApiError, ErrorKind, TransportError};
use crate::http::HttpResponse;

pub const FALLBACK_MESSAGE: &str = "Something went wrong";

/// Status used when no HTTP response was received.
pub const NO_RESPONSE_STATUS: u16 = 500;

/// A failed exchange, as seen by the classifier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Failure {
    /// Status of the failed response, if one arrived.
    pub status: Option<u16>,
    /// Raw body of the failed response, if one arrived.
    pub body: Option<String>,
    /// The failure's own description (transport error text).
    pub description: Option<String>,
}

impl Failure {
    pub fn from_response(response: &HttpResponse) -> Self {
        Self {
            status: Some(response.status),
            body: Some(response.body.clone()),
            description: None,
        }
    }

    pub fn from_transport(err: &TransportError) -> Self {
        Self {
            status: None,
            body: None,
            description: Some(err.message.clone()),
        }
    }

    fn kind(&self) -> ErrorKind {
        if self.status.is_some() {
            ErrorKind::Backend
        } else {
            ErrorKind::Transport
        }
    }
}

/// The `message` string of a JSON object body, if there is one.
pub fn message_from_body(body: &str) -> Option<String> {
    match serde_json::from_str::<Value>(body).ok()? {
        Value::Object(map) => map.get("message")?.as_str().map(str::to_string),
        _ => None,
    }
}

/// The failure's own text, ignoring blank descriptions.
pub fn message_from_description(failure: &Failure) -> Option<String> {
    failure
        .description
        .as_deref()
        .filter(|text| !text.trim().is_empty())
        .map(str::to_string)
}

pub fn classify(failure: &Failure) -> ApiError {
    let message = failure
        .body
        .as_deref()
        .and_then(message_from_body)
        .or_else(|| message_from_description(failure))
        .unwrap_or_else(|| FALLBACK_MESSAGE.to_string());

    ApiError::new(
        failure.kind(),
        failure.status.unwrap_or(NO_RESPONSE_STATUS),
        message,
    )
}

pub fn classify_response(response: &HttpResponse) -> ApiError {
    classify(&Failure::from_response(response))
}

pub fn classify_transport(err: &TransportError) -> ApiError {
    classify(&Failure::from_transport(err))
}
