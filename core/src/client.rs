//! Stateless HTTP request builder and response parser for one resource.
//!
//! # Design
//! `ResourceClient` holds a base URL, a resource name and client-wide headers,
//! and carries no mutable state between calls. Each verb is split into a
//! `build_*` method that produces an `HttpRequest` and a `parse_*` method that
//! consumes an `HttpResponse`. The caller executes the round-trip, keeping the
//! core deterministic and free of I/O dependencies.
//!
//! Non-2xx responses go through the error classifier; 2xx responses whose body
//! is not the expected JSON become `ErrorKind::Decode` errors.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::classify::classify_response;
use crate::error::ApiError;
use crate::filter::{encode_query, CountFilter, Filter, ProjectionFilter};
use crate::http::{Headers, HttpMethod, HttpRequest, HttpResponse};
use crate::ndjson::{parse_ndjson, NDJSON_CONTENT_TYPE};
use crate::types::{BulkUpdate, InsertedId, ItemState, Patch, StateTransition};

pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Message of the local error raised by an unrestricted `delete_many`.
pub const QUERY_REQUIRED: &str = "query is required";

/// Message of the local error raised by a by-id verb given an empty id.
pub const ID_REQUIRED: &str = "id is required";

/// Ids are sent as one path segment; everything but unreserved characters is escaped.
const ID_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Synchronous, stateless client for one backend resource.
#[derive(Debug, Clone)]
pub struct ResourceClient {
    base_url: String,
    resource: String,
    headers: Headers,
}

impl ResourceClient {
    pub fn new(base_url: &str, resource: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            resource: resource.trim_matches('/').to_string(),
            headers: Vec::new(),
        }
    }

    /// Add a header sent verbatim with every request.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_headers(mut self, headers: impl IntoIterator<Item = (String, String)>) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    // -----------------------------------------------------------------------
    // Build
    // -----------------------------------------------------------------------

    pub fn build_list(&self, filter: Option<&Filter>) -> Result<HttpRequest, ApiError> {
        Ok(self.request(HttpMethod::Get, "", encode_query(filter)?, None, None))
    }

    pub fn build_export(&self, filter: Option<&Filter>) -> Result<HttpRequest, ApiError> {
        Ok(self.request(
            HttpMethod::Get,
            "export",
            encode_query(filter)?,
            None,
            Some(NDJSON_CONTENT_TYPE),
        ))
    }

    pub fn build_count(&self, filter: Option<&CountFilter>) -> Result<HttpRequest, ApiError> {
        let filter = filter.cloned().map(Filter::from);
        Ok(self.request(HttpMethod::Get, "count", encode_query(filter.as_ref())?, None, None))
    }

    pub fn build_get(
        &self,
        id: &str,
        filter: Option<&ProjectionFilter>,
    ) -> Result<HttpRequest, ApiError> {
        let segment = id_segment(id)?;
        let filter = filter.cloned().map(Filter::from);
        Ok(self.request(HttpMethod::Get, &segment, encode_query(filter.as_ref())?, None, None))
    }

    pub fn build_create<T: Serialize>(&self, item: &T) -> Result<HttpRequest, ApiError> {
        self.json_request(HttpMethod::Post, "", None, item)
    }

    pub fn build_bulk_insert<T: Serialize>(&self, items: &[T]) -> Result<HttpRequest, ApiError> {
        self.json_request(HttpMethod::Post, "bulk", None, &items)
    }

    pub fn build_upsert(
        &self,
        patch: &Patch,
        filter: Option<&Filter>,
    ) -> Result<HttpRequest, ApiError> {
        self.json_request(HttpMethod::Post, "upsert-one", encode_query(filter)?, patch)
    }

    pub fn build_update(
        &self,
        id: &str,
        patch: &Patch,
        filter: Option<&Filter>,
    ) -> Result<HttpRequest, ApiError> {
        let segment = id_segment(id)?;
        self.json_request(HttpMethod::Patch, &segment, encode_query(filter)?, patch)
    }

    pub fn build_update_many(
        &self,
        patch: &Patch,
        filter: Option<&Filter>,
    ) -> Result<HttpRequest, ApiError> {
        self.json_request(HttpMethod::Patch, "", encode_query(filter)?, patch)
    }

    pub fn build_update_bulk(&self, updates: &[BulkUpdate]) -> Result<HttpRequest, ApiError> {
        self.json_request(HttpMethod::Patch, "bulk", None, &updates)
    }

    pub fn build_trash(&self, id: &str) -> Result<HttpRequest, ApiError> {
        let segment = id_segment(id)?;
        let body = StateTransition {
            state_to: ItemState::Trash,
        };
        self.json_request(HttpMethod::Post, &format!("{segment}/state"), None, &body)
    }

    pub fn build_delete(&self, id: &str) -> Result<HttpRequest, ApiError> {
        let segment = id_segment(id)?;
        Ok(self.request(HttpMethod::Delete, &segment, None, None, None))
    }

    /// Build a delete-many request.
    ///
    /// Fails with a 400 validation error, without building anything, when the
    /// filter has no match expression or an empty one.
    pub fn build_delete_many(&self, filter: &Filter) -> Result<HttpRequest, ApiError> {
        if filter.has_empty_query() {
            return Err(ApiError::validation(QUERY_REQUIRED));
        }
        Ok(self.request(HttpMethod::Delete, "", encode_query(Some(filter))?, None, None))
    }

    // -----------------------------------------------------------------------
    // Parse
    // -----------------------------------------------------------------------

    pub fn parse_list<T: DeserializeOwned>(&self, response: HttpResponse) -> Result<Vec<T>, ApiError> {
        parse_json(&response)
    }

    /// Parse a fully buffered export response.
    pub fn parse_export<T: DeserializeOwned>(
        &self,
        response: HttpResponse,
    ) -> Result<Vec<T>, ApiError> {
        check_status(&response)?;
        records_into(parse_ndjson(&response.body)?)
    }

    pub fn parse_count(&self, response: HttpResponse) -> Result<u64, ApiError> {
        parse_json(&response)
    }

    pub fn parse_get<T: DeserializeOwned>(&self, response: HttpResponse) -> Result<T, ApiError> {
        parse_json(&response)
    }

    pub fn parse_create(&self, response: HttpResponse) -> Result<InsertedId, ApiError> {
        parse_json(&response)
    }

    pub fn parse_bulk_insert(&self, response: HttpResponse) -> Result<Vec<InsertedId>, ApiError> {
        parse_json(&response)
    }

    pub fn parse_upsert<T: DeserializeOwned>(&self, response: HttpResponse) -> Result<T, ApiError> {
        parse_json(&response)
    }

    pub fn parse_update<T: DeserializeOwned>(&self, response: HttpResponse) -> Result<T, ApiError> {
        parse_json(&response)
    }

    pub fn parse_update_many(&self, response: HttpResponse) -> Result<u64, ApiError> {
        parse_json(&response)
    }

    pub fn parse_update_bulk(&self, response: HttpResponse) -> Result<u64, ApiError> {
        parse_json(&response)
    }

    pub fn parse_trash(&self, response: HttpResponse) -> Result<(), ApiError> {
        check_status(&response)
    }

    pub fn parse_delete(&self, response: HttpResponse) -> Result<(), ApiError> {
        check_status(&response)
    }

    pub fn parse_delete_many(&self, response: HttpResponse) -> Result<u64, ApiError> {
        parse_json(&response)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn url(&self, suffix: &str) -> String {
        format!("{}/{}/{suffix}", self.base_url, self.resource)
    }

    fn json_request<B: Serialize + ?Sized>(
        &self,
        method: HttpMethod,
        suffix: &str,
        query: Option<String>,
        body: &B,
    ) -> Result<HttpRequest, ApiError> {
        let body = serde_json::to_string(body)
            .map_err(|e| ApiError::encode(format!("request body encoding failed: {e}")))?;
        Ok(self.request(method, suffix, query, Some(body), Some(JSON_CONTENT_TYPE)))
    }

    /// `content_type` is only applied when the caller has not set one.
    fn request(
        &self,
        method: HttpMethod,
        suffix: &str,
        query: Option<String>,
        body: Option<String>,
        content_type: Option<&str>,
    ) -> HttpRequest {
        let mut headers = Vec::with_capacity(self.headers.len() + 1);
        let caller_has_content_type = self
            .headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case("content-type"));
        if let Some(content_type) = content_type.filter(|_| !caller_has_content_type) {
            headers.push(("content-type".to_string(), content_type.to_string()));
        }
        headers.extend(self.headers.iter().cloned());

        HttpRequest {
            method,
            path: self.url(suffix),
            query,
            headers,
            body,
        }
    }
}

/// `id` as a single escaped path segment.
///
/// Empty and dot-segment ids are rejected: they would address the collection
/// (or its parent) instead of one item.
fn id_segment(id: &str) -> Result<String, ApiError> {
    match id {
        "" => Err(ApiError::validation(ID_REQUIRED)),
        "." | ".." => Err(ApiError::validation(format!("invalid id: {id}"))),
        _ => Ok(utf8_percent_encode(id, ID_ENCODE_SET).to_string()),
    }
}

/// Classify any non-2xx response.
fn check_status(response: &HttpResponse) -> Result<(), ApiError> {
    if response.is_success() {
        Ok(())
    } else {
        Err(classify_response(response))
    }
}

fn parse_json<T: DeserializeOwned>(response: &HttpResponse) -> Result<T, ApiError> {
    check_status(response)?;
    serde_json::from_str(&response.body)
        .map_err(|e| ApiError::decode(format!("response body is not the expected JSON: {e}")))
}

/// Convert decoded export records into caller items.
pub(crate) fn records_into<T: DeserializeOwned>(records: Vec<Value>) -> Result<Vec<T>, ApiError> {
    records
        .into_iter()
        .enumerate()
        .map(|(index, record)| {
            serde_json::from_value(record).map_err(|e| {
                ApiError::decode(format!("export record {} has an unexpected shape: {e}", index + 1))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map};

    use super::*;
    use crate::classify::FALLBACK_MESSAGE;
    use crate::error::ErrorKind;

    fn client() -> ResourceClient {
        ResourceClient::new("http://localhost:3000", "items")
    }

    fn response(status: u16, body: &str) -> HttpResponse {
        HttpResponse {
            status,
            headers: Vec::new(),
            body: body.to_string(),
        }
    }

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    fn content_type() -> (String, String) {
        ("content-type".to_string(), JSON_CONTENT_TYPE.to_string())
    }

    #[test]
    fn build_list_without_filter_has_no_query() {
        let req = client().build_list(None).unwrap();
        assert_eq!(req.method, HttpMethod::Get);
        assert_eq!(req.path, "http://localhost:3000/items/");
        assert!(req.query.is_none());
        assert!(req.headers.is_empty());
        assert!(req.body.is_none());
    }

    #[test]
    fn build_list_with_projection() {
        let filter = Filter::new().project(["a", "b"]);
        let req = client().build_list(Some(&filter)).unwrap();
        assert_eq!(req.url(), "http://localhost:3000/items/?_p=a%2Cb");
    }

    #[test]
    fn build_export_sets_ndjson_content_type() {
        let req = client().build_export(None).unwrap();
        assert_eq!(req.path, "http://localhost:3000/items/export");
        assert_eq!(req.header("content-type"), Some(NDJSON_CONTENT_TYPE));
    }

    #[test]
    fn build_count_uses_count_path() {
        let filter = CountFilter {
            match_expression: Some(object(json!({"done": true}))),
            ..CountFilter::default()
        };
        let req = client().build_count(Some(&filter)).unwrap();
        assert_eq!(req.path, "http://localhost:3000/items/count");
        assert!(req.query.unwrap().starts_with("_q="));
    }

    #[test]
    fn build_get_with_projection() {
        let filter = ProjectionFilter {
            projection: Some(vec!["title".to_string()]),
        };
        let req = client().build_get("abc", Some(&filter)).unwrap();
        assert_eq!(req.url(), "http://localhost:3000/items/abc?_p=title");
    }

    #[test]
    fn build_create_sends_json_body() {
        let req = client().build_create(&json!({"title": "Buy milk"})).unwrap();
        assert_eq!(req.method, HttpMethod::Post);
        assert_eq!(req.path, "http://localhost:3000/items/");
        assert_eq!(req.headers, vec![content_type()]);
        let body: Value = serde_json::from_str(req.body.as_deref().unwrap()).unwrap();
        assert_eq!(body, json!({"title": "Buy milk"}));
    }

    #[test]
    fn build_bulk_insert_sends_array() {
        let req = client()
            .build_bulk_insert(&[json!({"n": 1}), json!({"n": 2})])
            .unwrap();
        assert_eq!(req.path, "http://localhost:3000/items/bulk");
        let body: Value = serde_json::from_str(req.body.as_deref().unwrap()).unwrap();
        assert_eq!(body, json!([{"n": 1}, {"n": 2}]));
    }

    #[test]
    fn build_upsert_carries_filter_query() {
        let patch = object(json!({"$set": {"n": 1}}));
        let filter = Filter::new().matching(object(json!({"key": "k"})));
        let req = client().build_upsert(&patch, Some(&filter)).unwrap();
        assert_eq!(req.method, HttpMethod::Post);
        assert_eq!(req.path, "http://localhost:3000/items/upsert-one");
        assert!(req.query.is_some());
    }

    #[test]
    fn build_update_targets_id() {
        let patch = object(json!({"$set": {"x": 1}}));
        let req = client().build_update("my-id", &patch, None).unwrap();
        assert_eq!(req.method, HttpMethod::Patch);
        assert_eq!(req.path, "http://localhost:3000/items/my-id");
        assert!(req.query.is_none());
        let body: Value = serde_json::from_str(req.body.as_deref().unwrap()).unwrap();
        assert_eq!(body, json!({"$set": {"x": 1}}));
    }

    #[test]
    fn build_update_many_targets_collection() {
        let patch = object(json!({"$set": {"x": 1}}));
        let req = client().build_update_many(&patch, None).unwrap();
        assert_eq!(req.method, HttpMethod::Patch);
        assert_eq!(req.path, "http://localhost:3000/items/");
    }

    #[test]
    fn build_update_bulk_sends_entries() {
        let updates = vec![BulkUpdate {
            filter: object(json!({"a": 1})),
            update: object(json!({"$set": {"b": 2}})),
        }];
        let req = client().build_update_bulk(&updates).unwrap();
        assert_eq!(req.method, HttpMethod::Patch);
        assert_eq!(req.path, "http://localhost:3000/items/bulk");
        let body: Value = serde_json::from_str(req.body.as_deref().unwrap()).unwrap();
        assert_eq!(body, json!([{"filter": {"a": 1}, "update": {"$set": {"b": 2}}}]));
    }

    #[test]
    fn build_trash_posts_state() {
        let req = client().build_trash("abc").unwrap();
        assert_eq!(req.method, HttpMethod::Post);
        assert_eq!(req.path, "http://localhost:3000/items/abc/state");
        assert_eq!(req.body.as_deref(), Some(r#"{"stateTo":"TRASH"}"#));
    }

    #[test]
    fn build_delete_targets_id() {
        let req = client().build_delete("abc").unwrap();
        assert_eq!(req.method, HttpMethod::Delete);
        assert_eq!(req.path, "http://localhost:3000/items/abc");
        assert!(req.body.is_none());
    }

    #[test]
    fn empty_id_is_rejected_by_every_by_id_verb() {
        let c = client();
        let patch = object(json!({"$set": {"x": 1}}));
        let results = [
            c.build_get("", None),
            c.build_update("", &patch, None),
            c.build_trash(""),
            c.build_delete(""),
        ];
        for result in results {
            let err = result.unwrap_err();
            assert_eq!(err.status, 400);
            assert_eq!(err.kind, ErrorKind::Validation);
            assert_eq!(err.message, ID_REQUIRED);
        }
    }

    #[test]
    fn dot_segment_ids_are_rejected() {
        for id in [".", ".."] {
            let err = client().build_delete(id).unwrap_err();
            assert_eq!(err.kind, ErrorKind::Validation);
        }
    }

    #[test]
    fn id_is_escaped_as_one_path_segment() {
        let req = client().build_delete("a/b?c#d e").unwrap();
        assert_eq!(req.path, "http://localhost:3000/items/a%2Fb%3Fc%23d%20e");
        assert!(req.query.is_none());

        let req = client().build_trash("x/y").unwrap();
        assert_eq!(req.path, "http://localhost:3000/items/x%2Fy/state");

        let req = client().build_get("f81d4fae-7dec.v1_~", None).unwrap();
        assert_eq!(req.path, "http://localhost:3000/items/f81d4fae-7dec.v1_~");
    }

    #[test]
    fn patch_body_keeps_caller_key_order() {
        let patch: Patch = serde_json::from_str(r#"{"$set":{"z":1,"a":{"y":2,"b":3}}}"#).unwrap();
        let req = client().build_update("id", &patch, None).unwrap();
        assert_eq!(req.body.as_deref(), Some(r#"{"$set":{"z":1,"a":{"y":2,"b":3}}}"#));
    }

    #[test]
    fn build_delete_many_requires_query() {
        for filter in [Filter::new(), Filter::new().matching(Map::new()).limit(1)] {
            let err = client().build_delete_many(&filter).unwrap_err();
            assert_eq!(err.status, 400);
            assert_eq!(err.kind, ErrorKind::Validation);
            assert_eq!(err.message, QUERY_REQUIRED);
        }
    }

    #[test]
    fn build_delete_many_with_query() {
        let filter = Filter::new().matching(object(json!({"done": true})));
        let req = client().build_delete_many(&filter).unwrap();
        assert_eq!(req.method, HttpMethod::Delete);
        assert_eq!(req.path, "http://localhost:3000/items/");
        assert!(req.query.is_some());
    }

    #[test]
    fn caller_headers_are_forwarded() {
        let client = client().with_header("x-request-id", "r-1");
        let req = client.build_delete("abc").unwrap();
        assert_eq!(req.header("x-request-id"), Some("r-1"));
        let req = client.build_create(&json!({})).unwrap();
        assert_eq!(req.headers, vec![content_type(), ("x-request-id".to_string(), "r-1".to_string())]);
    }

    #[test]
    fn caller_content_type_overrides_default() {
        let client = client().with_header("Content-Type", "application/merge-patch+json");
        let req = client.build_update("a", &Map::new(), None).unwrap();
        assert_eq!(req.headers.len(), 1);
        assert_eq!(req.header("content-type"), Some("application/merge-patch+json"));
    }

    #[test]
    fn trailing_slashes_are_stripped() {
        let client = ResourceClient::new("http://localhost:3000/", "/items/");
        assert_eq!(client.build_list(None).unwrap().path, "http://localhost:3000/items/");
    }

    #[test]
    fn parse_list_returns_body_verbatim() {
        let items: Vec<Value> = client()
            .parse_list(response(200, r#"[{"a":1,"b":2}]"#))
            .unwrap();
        assert_eq!(items, vec![json!({"a": 1, "b": 2})]);
    }

    #[test]
    fn parse_export_decodes_ndjson() {
        let items: Vec<Value> = client()
            .parse_export(response(200, "{\"id\":\"x\"}\n{\"id\":\"y\"}\n"))
            .unwrap();
        assert_eq!(items, vec![json!({"id": "x"}), json!({"id": "y"})]);
    }

    #[test]
    fn parse_export_rejects_truncated_body() {
        let err = client()
            .parse_export::<Value>(response(200, "{\"id\":\"x\"}\n{\"id\":\"y\""))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Decode);
    }

    #[test]
    fn parse_count_reads_integer() {
        assert_eq!(client().parse_count(response(200, "42")).unwrap(), 42);
    }

    #[test]
    fn parse_get_not_found() {
        let err = client()
            .parse_get::<Value>(response(404, r#"{"message":"item not found"}"#))
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.message, "item not found");
    }

    #[test]
    fn parse_create_reads_id() {
        let id = client().parse_create(response(201, r#"{"_id":"abc"}"#)).unwrap();
        assert_eq!(id.id, "abc");
    }

    #[test]
    fn parse_bulk_insert_reads_ids() {
        let ids = client()
            .parse_bulk_insert(response(200, r#"[{"_id":"a"},{"_id":"b"}]"#))
            .unwrap();
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn parse_error_with_message() {
        let err = client()
            .parse_update::<Value>(response(400, r#"{"message":"A message of error"}"#))
            .unwrap_err();
        assert_eq!(err.status, 400);
        assert_eq!(err.message, "A message of error");
        assert_eq!(err.kind, ErrorKind::Backend);
    }

    #[test]
    fn parse_error_without_json_body() {
        let err = client().parse_update_many(response(500, "internal error")).unwrap_err();
        assert_eq!(err.status, 500);
        assert_eq!(err.message, FALLBACK_MESSAGE);
    }

    #[test]
    fn parse_bad_json_is_decode_error() {
        let err = client().parse_list::<Value>(response(200, "not json")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Decode);
    }

    #[test]
    fn parse_trash_and_delete_accept_no_content() {
        assert!(client().parse_trash(response(204, "")).is_ok());
        assert!(client().parse_delete(response(204, "")).is_ok());
        assert!(client().parse_delete(response(404, "")).unwrap_err().is_not_found());
    }

    #[test]
    fn parse_delete_many_reads_count() {
        assert_eq!(client().parse_delete_many(response(200, "3")).unwrap(), 3);
    }
}
