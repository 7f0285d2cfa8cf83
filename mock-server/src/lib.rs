//! In-memory backend for the `items` resource.
//!
//! Implements the full wire contract the client speaks: short query keys
//! (`_q`, `_l`, `_sk`, `_s`, `_p`, `_rawp`), `$set`/`$unset` patches, NDJSON
//! export, bulk endpoints and the trash state transition. Errors are returned
//! as `{"message": ...}` bodies.

use std::{cmp::Ordering, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::info;
use uuid::Uuid;

pub type Document = Map<String, Value>;

/// Documents in insertion order.
pub type Db = Arc<RwLock<Vec<Document>>>;

pub const ID_FIELD: &str = "_id";
pub const STATE_FIELD: &str = "__STATE__";
pub const TRASH_STATE: &str = "TRASH";
pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// Raw query string parameters, as sent by the client.
#[derive(Debug, Default, Deserialize)]
pub struct QueryParams {
    #[serde(rename = "_q")]
    pub query: Option<String>,
    #[serde(rename = "_l")]
    pub limit: Option<usize>,
    #[serde(rename = "_sk")]
    pub skip: Option<usize>,
    #[serde(rename = "_s")]
    pub sort: Option<String>,
    #[serde(rename = "_p")]
    pub projection: Option<String>,
    #[serde(rename = "_rawp")]
    pub raw_projection: Option<String>,
}

/// Parsed query parameters.
#[derive(Debug, Default)]
pub struct Selection {
    pub matcher: Document,
    pub limit: Option<usize>,
    pub skip: Option<usize>,
    pub sort: Vec<(String, bool)>,
    pub projection: Option<Vec<String>>,
    pub raw_projection: Option<Map<String, Value>>,
}

impl TryFrom<QueryParams> for Selection {
    type Error = ServerError;

    fn try_from(params: QueryParams) -> Result<Self, Self::Error> {
        let matcher = match params.query {
            Some(text) => parse_object(&text, "_q")?,
            None => Document::new(),
        };
        let raw_projection = params
            .raw_projection
            .map(|text| parse_object(&text, "_rawp"))
            .transpose()?;
        let sort = params
            .sort
            .iter()
            .flat_map(|s| s.split(','))
            .filter(|key| !key.is_empty())
            .map(|key| match key.strip_prefix('-') {
                Some(field) => (field.to_string(), false),
                None => (key.to_string(), true),
            })
            .collect();
        Ok(Self {
            matcher,
            limit: params.limit,
            skip: params.skip,
            sort,
            projection: params
                .projection
                .map(|p| p.split(',').map(str::to_string).collect()),
            raw_projection,
        })
    }
}

impl Selection {
    pub fn matches(&self, doc: &Document) -> bool {
        is_live(doc) && self.matcher.iter().all(|(k, v)| doc.get(k) == Some(v))
    }

    /// Matching documents, sorted and paginated, before projection.
    pub fn select<'a>(&self, docs: &'a [Document]) -> Vec<&'a Document> {
        let mut selected: Vec<&Document> = docs.iter().filter(|d| self.matches(d)).collect();
        if !self.sort.is_empty() {
            selected.sort_by(|a, b| {
                self.sort
                    .iter()
                    .map(|(field, ascending)| {
                        let ordering = compare(a.get(field), b.get(field));
                        if *ascending {
                            ordering
                        } else {
                            ordering.reverse()
                        }
                    })
                    .find(|o| *o != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            });
        }
        selected
            .into_iter()
            .skip(self.skip.unwrap_or(0))
            .take(self.limit.unwrap_or(usize::MAX))
            .collect()
    }

    pub fn project(&self, doc: &Document) -> Document {
        let mut out = doc.clone();
        if let Some(fields) = &self.projection {
            out.retain(|k, _| k == ID_FIELD || fields.iter().any(|f| f == k));
        }
        if let Some(raw) = &self.raw_projection {
            let includes: Vec<&String> = raw
                .iter()
                .filter(|(_, flag)| flag.as_u64() == Some(1))
                .map(|(k, _)| k)
                .collect();
            if includes.is_empty() {
                out.retain(|k, _| raw.get(k).and_then(Value::as_u64) != Some(0));
            } else {
                out.retain(|k, _| k == ID_FIELD || includes.contains(&k));
            }
        }
        out
    }
}

/// Error response carrying a `{"message": ...}` body.
#[derive(Debug)]
pub struct ServerError {
    pub status: StatusCode,
    pub message: String,
}

impl ServerError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found() -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: "item not found".to_string(),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "message": self.message }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct BulkEntry {
    pub filter: Document,
    pub update: Document,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChange {
    pub state_to: String,
}

pub fn app() -> Router {
    let db: Db = Arc::new(RwLock::new(Vec::new()));
    Router::new()
        .route(
            "/items/",
            get(list_items)
                .post(create_item)
                .patch(update_many)
                .delete(delete_many),
        )
        .route("/items/export", get(export_items))
        .route("/items/count", get(count_items))
        .route("/items/bulk", post(bulk_insert).patch(update_bulk))
        .route("/items/upsert-one", post(upsert_one))
        .route(
            "/items/{id}",
            get(get_item).patch(update_item).delete(delete_item),
        )
        .route("/items/{id}/state", post(change_state))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

async fn list_items(
    State(db): State<Db>,
    Query(params): Query<QueryParams>,
) -> Result<Json<Vec<Document>>, ServerError> {
    let selection = Selection::try_from(params)?;
    let docs = db.read().await;
    let items = selection
        .select(&docs)
        .into_iter()
        .map(|d| selection.project(d))
        .collect();
    Ok(Json(items))
}

async fn export_items(
    State(db): State<Db>,
    Query(params): Query<QueryParams>,
) -> Result<Response, ServerError> {
    let selection = Selection::try_from(params)?;
    let docs = db.read().await;
    let mut body = String::new();
    for doc in selection.select(&docs) {
        body.push_str(&Value::Object(selection.project(doc)).to_string());
        body.push('\n');
    }
    Ok(([(header::CONTENT_TYPE, NDJSON_CONTENT_TYPE)], body).into_response())
}

async fn count_items(
    State(db): State<Db>,
    Query(params): Query<QueryParams>,
) -> Result<Json<usize>, ServerError> {
    let selection = Selection::try_from(params)?;
    let docs = db.read().await;
    Ok(Json(selection.select(&docs).len()))
}

async fn get_item(
    State(db): State<Db>,
    Path(id): Path<String>,
    Query(params): Query<QueryParams>,
) -> Result<Json<Document>, ServerError> {
    let selection = Selection::try_from(params)?;
    let docs = db.read().await;
    docs.iter()
        .find(|d| has_id(d, &id) && is_live(d))
        .map(|d| Json(selection.project(d)))
        .ok_or_else(ServerError::not_found)
}

async fn create_item(
    State(db): State<Db>,
    Json(doc): Json<Document>,
) -> (StatusCode, Json<Value>) {
    let id = insert(&mut *db.write().await, doc);
    info!(%id, "item created");
    (StatusCode::CREATED, Json(json!({ ID_FIELD: id })))
}

async fn bulk_insert(
    State(db): State<Db>,
    Json(items): Json<Vec<Document>>,
) -> (StatusCode, Json<Vec<Value>>) {
    let mut docs = db.write().await;
    let ids: Vec<Value> = items
        .into_iter()
        .map(|doc| json!({ ID_FIELD: insert(&mut docs, doc) }))
        .collect();
    info!(count = ids.len(), "items bulk inserted");
    (StatusCode::CREATED, Json(ids))
}

async fn upsert_one(
    State(db): State<Db>,
    Query(params): Query<QueryParams>,
    Json(patch): Json<Document>,
) -> Result<Json<Document>, ServerError> {
    let selection = Selection::try_from(params)?;
    validate_patch(&patch)?;
    let mut docs = db.write().await;
    if let Some(doc) = docs.iter_mut().find(|d| selection.matches(d)) {
        apply_patch(doc, &patch);
        return Ok(Json(doc.clone()));
    }
    let mut doc = selection.matcher.clone();
    apply_patch(&mut doc, &patch);
    let id = insert(&mut docs, doc);
    info!(%id, "item upserted");
    docs.iter()
        .find(|d| has_id(d, &id))
        .map(|d| Json(d.clone()))
        .ok_or_else(ServerError::not_found)
}

async fn update_item(
    State(db): State<Db>,
    Path(id): Path<String>,
    Query(params): Query<QueryParams>,
    Json(patch): Json<Document>,
) -> Result<Json<Document>, ServerError> {
    let selection = Selection::try_from(params)?;
    validate_patch(&patch)?;
    let mut docs = db.write().await;
    let doc = docs
        .iter_mut()
        .find(|d| has_id(d, &id) && selection.matches(d))
        .ok_or_else(ServerError::not_found)?;
    apply_patch(doc, &patch);
    Ok(Json(selection.project(doc)))
}

async fn update_many(
    State(db): State<Db>,
    Query(params): Query<QueryParams>,
    Json(patch): Json<Document>,
) -> Result<Json<usize>, ServerError> {
    let selection = Selection::try_from(params)?;
    validate_patch(&patch)?;
    let mut docs = db.write().await;
    let mut updated = 0;
    for doc in docs.iter_mut().filter(|d| selection.matches(d)) {
        apply_patch(doc, &patch);
        updated += 1;
    }
    Ok(Json(updated))
}

async fn update_bulk(
    State(db): State<Db>,
    Json(entries): Json<Vec<BulkEntry>>,
) -> Result<Json<usize>, ServerError> {
    for entry in &entries {
        validate_patch(&entry.update)?;
    }
    let mut docs = db.write().await;
    let mut updated = 0;
    for entry in entries {
        let selection = Selection {
            matcher: entry.filter,
            ..Selection::default()
        };
        for doc in docs.iter_mut().filter(|d| selection.matches(d)) {
            apply_patch(doc, &entry.update);
            updated += 1;
        }
    }
    Ok(Json(updated))
}

async fn change_state(
    State(db): State<Db>,
    Path(id): Path<String>,
    Json(change): Json<StateChange>,
) -> Result<StatusCode, ServerError> {
    if change.state_to != TRASH_STATE {
        return Err(ServerError::bad_request(format!(
            "unsupported state: {}",
            change.state_to
        )));
    }
    let mut docs = db.write().await;
    let doc = docs
        .iter_mut()
        .find(|d| has_id(d, &id) && is_live(d))
        .ok_or_else(ServerError::not_found)?;
    doc.insert(STATE_FIELD.to_string(), Value::String(change.state_to));
    info!(%id, "item trashed");
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_item(
    State(db): State<Db>,
    Path(id): Path<String>,
) -> Result<StatusCode, ServerError> {
    let mut docs = db.write().await;
    let index = docs
        .iter()
        .position(|d| has_id(d, &id))
        .ok_or_else(ServerError::not_found)?;
    docs.remove(index);
    info!(%id, "item deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_many(
    State(db): State<Db>,
    Query(params): Query<QueryParams>,
) -> Result<Json<usize>, ServerError> {
    let selection = Selection::try_from(params)?;
    if selection.matcher.is_empty() {
        return Err(ServerError::bad_request("query is required"));
    }
    let mut docs = db.write().await;
    let before = docs.len();
    docs.retain(|d| !selection.matches(d));
    let deleted = before - docs.len();
    info!(deleted, "items deleted");
    Ok(Json(deleted))
}

fn parse_object(text: &str, key: &str) -> Result<Document, ServerError> {
    match serde_json::from_str(text) {
        Ok(Value::Object(map)) => Ok(map),
        _ => Err(ServerError::bad_request(format!("{key} must be a JSON object"))),
    }
}

fn has_id(doc: &Document, id: &str) -> bool {
    doc.get(ID_FIELD).and_then(Value::as_str) == Some(id)
}

fn is_live(doc: &Document) -> bool {
    doc.get(STATE_FIELD).and_then(Value::as_str) != Some(TRASH_STATE)
}

/// Store `doc` under a fresh id and return the id.
fn insert(docs: &mut Vec<Document>, mut doc: Document) -> String {
    let id = Uuid::new_v4().to_string();
    doc.insert(ID_FIELD.to_string(), Value::String(id.clone()));
    docs.push(doc);
    id
}

/// Reject a patch with an unknown operator or a non-object operand.
///
/// Runs before any document is touched, so a bad patch never applies halfway.
pub fn validate_patch(patch: &Document) -> Result<(), ServerError> {
    for (key, value) in patch {
        match key.as_str() {
            "$set" | "$unset" if !value.is_object() => {
                return Err(ServerError::bad_request(format!("{key} must be an object")));
            }
            "$set" | "$unset" => {}
            op if op.starts_with('$') => {
                return Err(ServerError::bad_request(format!("unsupported operator: {op}")));
            }
            _ => {}
        }
    }
    Ok(())
}

/// Apply a validated patch: `$set` / `$unset`, bare top-level keys as `$set`.
pub fn apply_patch(doc: &mut Document, patch: &Document) {
    for (key, value) in patch {
        match (key.as_str(), value) {
            ("$set", Value::Object(fields)) => {
                for (field, v) in fields.iter().filter(|(f, _)| *f != ID_FIELD) {
                    doc.insert(field.clone(), v.clone());
                }
            }
            ("$unset", Value::Object(fields)) => {
                for field in fields.keys().filter(|f| *f != ID_FIELD) {
                    doc.remove(field);
                }
            }
            (op, _) if op.starts_with('$') => {}
            (ID_FIELD, _) => {}
            (field, _) => {
                doc.insert(field.to_string(), value.clone());
            }
        }
    }
}

fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}
