//! Async operations over a `Transport`.
//!
//! # Design
//! `Resource` pairs a `ResourceClient` with a shared transport. Every
//! operation is one exchange: build the request, send it once, parse the
//! response. Nothing is retried and no state is kept between calls, so
//! concurrent operations on clones of the same `Resource` are independent.
//!
//! Each failure emits one `warn!` event naming the operation, the resource and
//! the id or filter involved.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::classify::{classify_response, classify_transport};
use crate::client::{records_into, ResourceClient};
use crate::error::ApiError;
use crate::filter::{CountFilter, Filter, ProjectionFilter};
use crate::http::{Headers, HttpRequest, HttpResponse};
use crate::ndjson::{accumulate, decode_stream};
use crate::transport::Transport;
use crate::types::{BulkUpdate, InsertedId, Patch};

/// What an operation was aimed at, for failure logs.
#[derive(Debug, Clone, Copy)]
enum Target<'a> {
    Collection,
    Id(&'a str),
    Filter(Option<&'a Filter>),
    Count(Option<&'a CountFilter>),
}

/// One backend resource, driven through a transport.
pub struct Resource<T: ?Sized> {
    client: ResourceClient,
    transport: Arc<T>,
}

impl<T: ?Sized> Clone for Resource<T> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            transport: Arc::clone(&self.transport),
        }
    }
}

impl<T: Transport + ?Sized> Resource<T> {
    pub fn new(client: ResourceClient, transport: Arc<T>) -> Self {
        Self { client, transport }
    }

    /// A view of this resource that also sends `headers` with every request.
    pub fn with_headers(&self, headers: Headers) -> Self {
        Self {
            client: self.client.clone().with_headers(headers),
            transport: Arc::clone(&self.transport),
        }
    }

    pub fn client(&self) -> &ResourceClient {
        &self.client
    }

    pub async fn list<I: DeserializeOwned>(&self, filter: Option<&Filter>) -> Result<Vec<I>, ApiError> {
        let outcome = async {
            let request = self.client.build_list(filter)?;
            let response = self.exchange("list", request).await?;
            self.client.parse_list(response)
        }
        .await;
        self.report("list", Target::Filter(filter), outcome)
    }

    /// Stream the export endpoint and decode it as NDJSON.
    ///
    /// The whole body is accumulated before parsing; a broken stream or one
    /// malformed line fails the call with no partial result.
    pub async fn export<I: DeserializeOwned>(
        &self,
        filter: Option<&Filter>,
    ) -> Result<Vec<I>, ApiError> {
        let outcome = async {
            let request = self.client.build_export(filter)?;
            self.log_request("export", &request);
            let response = self
                .transport
                .send_streaming(request)
                .await
                .map_err(|e| classify_transport(&e))?;
            if !response.is_success() {
                let bytes = accumulate(response.body)
                    .await
                    .map_err(|e| classify_transport(&e))?
                    .into_bytes();
                return Err(classify_response(&HttpResponse {
                    status: response.status,
                    headers: response.headers,
                    body: String::from_utf8_lossy(&bytes).into_owned(),
                }));
            }
            records_into(decode_stream(response.body).await?)
        }
        .await;
        self.report("export", Target::Filter(filter), outcome)
    }

    pub async fn count(&self, filter: Option<&CountFilter>) -> Result<u64, ApiError> {
        let outcome = async {
            let request = self.client.build_count(filter)?;
            let response = self.exchange("count", request).await?;
            self.client.parse_count(response)
        }
        .await;
        self.report("count", Target::Count(filter), outcome)
    }

    pub async fn get<I: DeserializeOwned>(
        &self,
        id: &str,
        filter: Option<&ProjectionFilter>,
    ) -> Result<I, ApiError> {
        let outcome = async {
            let request = self.client.build_get(id, filter)?;
            let response = self.exchange("get", request).await?;
            self.client.parse_get(response)
        }
        .await;
        self.report("get", Target::Id(id), outcome)
    }

    pub async fn create<I: Serialize + Sync>(&self, item: &I) -> Result<InsertedId, ApiError> {
        let outcome = async {
            let request = self.client.build_create(item)?;
            let response = self.exchange("create", request).await?;
            self.client.parse_create(response)
        }
        .await;
        self.report("create", Target::Collection, outcome)
    }

    pub async fn bulk_insert<I: Serialize + Sync>(
        &self,
        items: &[I],
    ) -> Result<Vec<InsertedId>, ApiError> {
        let outcome = async {
            let request = self.client.build_bulk_insert(items)?;
            let response = self.exchange("bulk_insert", request).await?;
            self.client.parse_bulk_insert(response)
        }
        .await;
        self.report("bulk_insert", Target::Collection, outcome)
    }

    pub async fn upsert<I: DeserializeOwned>(
        &self,
        patch: &Patch,
        filter: Option<&Filter>,
    ) -> Result<I, ApiError> {
        let outcome = async {
            let request = self.client.build_upsert(patch, filter)?;
            let response = self.exchange("upsert", request).await?;
            self.client.parse_upsert(response)
        }
        .await;
        self.report("upsert", Target::Filter(filter), outcome)
    }

    pub async fn update<I: DeserializeOwned>(
        &self,
        id: &str,
        patch: &Patch,
        filter: Option<&Filter>,
    ) -> Result<I, ApiError> {
        let outcome = async {
            let request = self.client.build_update(id, patch, filter)?;
            let response = self.exchange("update", request).await?;
            self.client.parse_update(response)
        }
        .await;
        self.report("update", Target::Id(id), outcome)
    }

    pub async fn update_many(&self, patch: &Patch, filter: Option<&Filter>) -> Result<u64, ApiError> {
        let outcome = async {
            let request = self.client.build_update_many(patch, filter)?;
            let response = self.exchange("update_many", request).await?;
            self.client.parse_update_many(response)
        }
        .await;
        self.report("update_many", Target::Filter(filter), outcome)
    }

    pub async fn update_bulk(&self, updates: &[BulkUpdate]) -> Result<u64, ApiError> {
        let outcome = async {
            let request = self.client.build_update_bulk(updates)?;
            let response = self.exchange("update_bulk", request).await?;
            self.client.parse_update_bulk(response)
        }
        .await;
        self.report("update_bulk", Target::Collection, outcome)
    }

    /// Move an item to the trash state (soft delete).
    pub async fn trash(&self, id: &str) -> Result<(), ApiError> {
        let outcome = async {
            let request = self.client.build_trash(id)?;
            let response = self.exchange("trash", request).await?;
            self.client.parse_trash(response)
        }
        .await;
        self.report("trash", Target::Id(id), outcome)
    }

    pub async fn delete(&self, id: &str) -> Result<(), ApiError> {
        let outcome = async {
            let request = self.client.build_delete(id)?;
            let response = self.exchange("delete", request).await?;
            self.client.parse_delete(response)
        }
        .await;
        self.report("delete", Target::Id(id), outcome)
    }

    /// Delete every item matching `filter`.
    ///
    /// A filter without a match expression is rejected locally with status
    /// 400 and no request is sent.
    pub async fn delete_many(&self, filter: &Filter) -> Result<u64, ApiError> {
        let outcome = async {
            let request = self.client.build_delete_many(filter)?;
            let response = self.exchange("delete_many", request).await?;
            self.client.parse_delete_many(response)
        }
        .await;
        self.report("delete_many", Target::Filter(Some(filter)), outcome)
    }

    async fn exchange(
        &self,
        operation: &'static str,
        request: HttpRequest,
    ) -> Result<HttpResponse, ApiError> {
        self.log_request(operation, &request);
        self.transport
            .send(request)
            .await
            .map_err(|e| classify_transport(&e))
    }

    fn log_request(&self, operation: &'static str, request: &HttpRequest) {
        debug!(
            operation,
            resource = self.client.resource(),
            method = request.method.as_str(),
            path = %request.url(),
            "sending request"
        );
    }

    fn report<R>(
        &self,
        operation: &'static str,
        target: Target<'_>,
        outcome: Result<R, ApiError>,
    ) -> Result<R, ApiError> {
        if let Err(err) = &outcome {
            let resource = self.client.resource();
            match target {
                Target::Collection => warn!(
                    operation,
                    resource,
                    status = err.status,
                    kind = %err.kind,
                    error = %err.message,
                    "resource operation failed"
                ),
                Target::Id(id) => warn!(
                    operation,
                    resource,
                    id,
                    status = err.status,
                    kind = %err.kind,
                    error = %err.message,
                    "resource operation failed"
                ),
                Target::Filter(filter) => warn!(
                    operation,
                    resource,
                    filter = ?filter,
                    status = err.status,
                    kind = %err.kind,
                    error = %err.message,
                    "resource operation failed"
                ),
                Target::Count(filter) => warn!(
                    operation,
                    resource,
                    filter = ?filter,
                    status = err.status,
                    kind = %err.kind,
                    error = %err.message,
                    "resource operation failed"
                ),
            }
        }
        outcome
    }
}
