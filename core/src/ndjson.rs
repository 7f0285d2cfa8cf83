//! Newline-delimited JSON decoding for the export endpoint.
//!
//! # Design
//! Decoding runs in two phases. `NdjsonBuffer` only accumulates raw chunks as
//! they arrive; `parse_ndjson` runs once over the completed text. Chunks may
//! split a record or a UTF-8 sequence anywhere, so nothing is interpreted
//! until the stream has ended.
//!
//! A decode either yields every record in line order or fails as a whole.
//! A trailing line without a newline is still parsed as a record.

use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use serde_json::Value;

use crate::classify::classify_transport;
use crate::error::{ApiError, TransportError};

pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// Accumulates the raw bytes of one export body.
#[derive(Debug, Default)]
pub struct NdjsonBuffer {
    bytes: Vec<u8>,
}

impl NdjsonBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Raw bytes received so far, for bodies that are not NDJSON after all.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Ends accumulation and parses everything received.
    pub fn finish(self) -> Result<Vec<Value>, ApiError> {
        let text = String::from_utf8(self.bytes)
            .map_err(|e| ApiError::decode(format!("export body is not valid UTF-8: {e}")))?;
        parse_ndjson(&text)
    }
}

/// Parse a complete NDJSON document.
///
/// Blank and whitespace-only lines are skipped. The first line that is not
/// valid JSON fails the whole document.
pub fn parse_ndjson(text: &str) -> Result<Vec<Value>, ApiError> {
    text.split('\n')
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|e| {
                ApiError::decode(format!("invalid NDJSON record on line {}: {e}", index + 1))
            })
        })
        .collect()
}

/// Drain a byte stream into a buffer.
///
/// A stream error aborts accumulation and is returned as-is.
pub async fn accumulate<S>(stream: S) -> Result<NdjsonBuffer, TransportError>
where
    S: Stream<Item = Result<Bytes, TransportError>>,
{
    stream
        .try_fold(NdjsonBuffer::new(), |mut buffer, chunk| async move {
            buffer.push(&chunk);
            Ok(buffer)
        })
        .await
}

/// Accumulate a streamed export body, then parse it.
///
/// Stream failures surface as transport errors, malformed records as decode
/// errors. Neither returns the records that were read before the failure.
pub async fn decode_stream<S>(stream: S) -> Result<Vec<Value>, ApiError>
where
    S: Stream<Item = Result<Bytes, TransportError>>,
{
    let buffer = accumulate(stream)
        .await
        .map_err(|e| classify_transport(&e))?;
    buffer.finish()
}
