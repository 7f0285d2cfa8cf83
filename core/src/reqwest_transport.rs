//! `Transport` backed by `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::{Client as HttpClient, Method, RequestBuilder};

use crate::error::TransportError;
use crate::http::{Headers, HttpMethod, HttpRequest, HttpResponse};
use crate::transport::{StreamingResponse, Transport};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP transport over a shared `reqwest::Client`.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use crud_core::{Filter, ReqwestTransport, Resource, ResourceClient};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let transport = ReqwestTransport::new()?.with_timeout(Duration::from_secs(5))?;
/// let items = Resource::new(
///     ResourceClient::new("http://localhost:3000", "items"),
///     Arc::new(transport),
/// );
/// let page: Vec<serde_json::Value> = items.list(Some(&Filter::new().limit(10))).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http: HttpClient,
}

impl ReqwestTransport {
    /// Create a transport with a 10 second connect timeout and a 30 second
    /// read timeout.
    ///
    /// Neither bounds the whole exchange: an export keeps streaming for as
    /// long as data keeps arriving.
    pub fn new() -> Result<Self, TransportError> {
        Self::with_timeouts(DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT)
    }

    /// `read` limits each wait for data and resets after every successful read.
    pub fn with_timeouts(connect: Duration, read: Duration) -> Result<Self, TransportError> {
        let http = HttpClient::builder()
            .connect_timeout(connect)
            .read_timeout(read)
            .build()?;
        Ok(Self { http })
    }

    /// Rebuild the underlying client with an overall deadline per exchange.
    ///
    /// The deadline covers reading the body too, so a streamed export that
    /// outlives it fails as a transport error.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, TransportError> {
        self.http = HttpClient::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .read_timeout(DEFAULT_READ_TIMEOUT)
            .timeout(timeout)
            .build()?;
        Ok(self)
    }

    pub fn from_client(http: HttpClient) -> Self {
        Self { http }
    }

    fn prepare(&self, request: HttpRequest) -> RequestBuilder {
        let method = match request.method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
            HttpMethod::Patch => Method::PATCH,
            HttpMethod::Delete => Method::DELETE,
        };
        let mut builder = self.http.request(method, request.url());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        builder
    }
}

fn collect_headers(response: &reqwest::Response) -> Headers {
    response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect()
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let response = self.prepare(request).send().await?;
        let status = response.status().as_u16();
        let headers = collect_headers(&response);
        let body = response.text().await?;
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }

    async fn send_streaming(
        &self,
        request: HttpRequest,
    ) -> Result<StreamingResponse, TransportError> {
        let response = self.prepare(request).send().await?;
        let status = response.status().as_u16();
        let headers = collect_headers(&response);
        let body = response.bytes_stream().map_err(TransportError::from).boxed();
        Ok(StreamingResponse {
            status,
            headers,
            body,
        })
    }
}
