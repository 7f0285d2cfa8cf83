//! Typed client core for a generic CRUD REST backend.
//!
//! # Overview
//! Translates list, export, count, get, create, bulk-insert, upsert, update,
//! update-many, update-bulk, trash, delete and delete-many into HTTP requests
//! against a fixed per-resource API surface, and turns responses back into
//! typed values or a single `ApiError` shape.
//!
//! # Design
//! - `ResourceClient` is stateless and sans-IO: `build_*` produces an
//!   `HttpRequest`, `parse_*` consumes an `HttpResponse`. Hosts with their own
//!   HTTP stack can stop there.
//! - `Resource` drives the same build/parse pairs through a `Transport`, one
//!   exchange per call, and logs failures with `tracing`.
//! - `filter` owns the query wire format, `ndjson` the export body format, and
//!   `classify` the mapping from failed exchanges to `ApiError`.
//! - Items are caller-defined serde types; match expressions and patches are
//!   open JSON maps whose semantics belong to the backend.

pub mod classify;
pub mod client;
pub mod error;
pub mod filter;
pub mod http;
pub mod ndjson;
pub mod resource;
#[cfg(feature = "reqwest")]
pub mod reqwest_transport;
pub mod transport;
pub mod types;

pub use classify::{classify, Failure, FALLBACK_MESSAGE};
pub use client::ResourceClient;
pub use error::{ApiError, ErrorKind, TransportError};
pub use filter::{
    encode_query, CountFilter, Filter, MatchExpression, ProjectionFilter, ProjectionFlag, RawProjection,
};
pub use http::{Headers, HttpMethod, HttpRequest, HttpResponse};
pub use ndjson::{decode_stream, parse_ndjson, NdjsonBuffer};
pub use resource::Resource;
#[cfg(feature = "reqwest")]
pub use reqwest_transport::ReqwestTransport;
pub use transport::{ByteStream, StreamingResponse, Transport};
pub use types::{BulkUpdate, InsertedId, ItemState, Patch, StateTransition};
