//! The I/O seam between `Resource` and an HTTP stack.
//!
//! `ResourceClient` never touches the network. `Transport` is the one place
//! an exchange actually happens, so tests can script responses and hosts can
//! bring their own client.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};

use crate::error::TransportError;
use crate::http::{Headers, HttpRequest, HttpResponse};

/// Response body delivered chunk by chunk.
pub type ByteStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// A response whose body has not been read yet.
pub struct StreamingResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: ByteStream,
}

impl StreamingResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl From<HttpResponse> for StreamingResponse {
    fn from(response: HttpResponse) -> Self {
        let chunk: Result<Bytes, TransportError> = Ok(Bytes::from(response.body));
        Self {
            status: response.status,
            headers: response.headers,
            body: stream::iter([chunk]).boxed(),
        }
    }
}

/// Executes one HTTP exchange per call.
///
/// Implementations return `Ok` for every response that arrived, whatever its
/// status; `Err` means no complete response was received. They must not retry.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;

    /// Like `send`, but hands back the body as a stream.
    ///
    /// The default buffers the whole body through `send`.
    async fn send_streaming(
        &self,
        request: HttpRequest,
    ) -> Result<StreamingResponse, TransportError> {
        self.send(request).await.map(StreamingResponse::from)
    }
}
