#![allow(dead_code)]

use anyhow::Result;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use couchpurge::{DocumentGroup, PurgeConfig, PurgeEvent, PurgeManager, StoreClient};

pub const USERNAME: &str = "admin";
pub const PASSWORD: &str = "pass";

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
    pub body: Value,
    pub authorization: Option<String>,
}

impl RecordedRequest {
    pub fn line(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}

#[derive(Default)]
struct StoreState {
    /// database -> doc id -> leaves (rev, body)
    docs: HashMap<String, BTreeMap<String, Vec<(String, Value)>>>,
    /// (doc id, rev) pairs answering 404 on a per-revision fetch
    missing_revs: HashSet<(String, String)>,
    /// cold storage records by `_id`
    archived: BTreeMap<String, Value>,
    purge_failures: usize,
    fail_archive: bool,
    fail_views: bool,
    /// leave `doc` out of changes feed rows
    omit_feed_docs: bool,
    /// doc ids reported as deleted by the changes feed
    deleted: HashSet<String>,
    requests: Vec<RecordedRequest>,
}

/// Tracks concurrent per-revision fetches
#[derive(Default)]
struct FetchTracker {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    hold_ms: AtomicU64,
}

#[derive(Default)]
struct Shared {
    store: Mutex<StoreState>,
    fetches: FetchTracker,
}

type SharedState = Arc<Shared>;

/// In-process CouchDB stand-in recording every request it receives
pub struct MockStore {
    state: SharedState,
    addr: std::net::SocketAddr,
    server: tokio::task::JoinHandle<()>,
}

impl MockStore {
    pub async fn start() -> Result<Self> {
        let state: SharedState = Arc::new(Shared::default());
        let app = Router::new().fallback(handle).with_state(Arc::clone(&state));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Ok(Self { state, addr, server })
    }

    /// Server URL with embedded credentials
    pub fn url(&self) -> String {
        format!("http://{}:{}@{}", USERNAME, PASSWORD, self.addr)
    }

    pub fn client(&self) -> Result<StoreClient> {
        StoreClient::new(&self.url())
    }

    pub fn add_doc(&self, database: &str, id: &str, rev: &str) {
        self.add_conflicted_doc(database, id, &[rev]);
    }

    pub fn add_conflicted_doc(&self, database: &str, id: &str, revs: &[&str]) {
        let leaves = revs
            .iter()
            .map(|rev| {
                let body = json!({
                    "_id": id,
                    "_rev": rev,
                    "type": "person",
                    "name": format!("{} at {}", id, rev),
                });
                (rev.to_string(), body)
            })
            .collect();
        let mut state = self.state.store.lock().unwrap();
        state.docs.entry(database.to_string()).or_default().insert(id.to_string(), leaves);
    }

    pub fn add_user(&self, name: &str, body: Value) {
        let id = format!("org.couchdb.user:{}", name);
        let mut state = self.state.store.lock().unwrap();
        state
            .docs
            .entry("_users".to_string())
            .or_default()
            .insert(id, vec![("1-user".to_string(), body)]);
    }

    pub fn mark_missing(&self, id: &str, rev: &str) {
        let mut state = self.state.store.lock().unwrap();
        state.missing_revs.insert((id.to_string(), rev.to_string()));
    }

    pub fn fail_purges(&self, times: usize) {
        self.state.store.lock().unwrap().purge_failures = times;
    }

    pub fn fail_archive(&self) {
        self.state.store.lock().unwrap().fail_archive = true;
    }

    pub fn fail_views(&self) {
        self.state.store.lock().unwrap().fail_views = true;
    }

    /// Changes feed rows carry no `doc`
    pub fn omit_feed_docs(&self) {
        self.state.store.lock().unwrap().omit_feed_docs = true;
    }

    /// Single-leaf tombstone as the changes feed reports it for a deleted doc
    pub fn add_deleted_doc(&self, database: &str, id: &str, rev: &str) {
        let body = json!({"_id": id, "_rev": rev, "_deleted": true});
        let mut state = self.state.store.lock().unwrap();
        state.docs.entry(database.to_string()).or_default().insert(id.to_string(), vec![(rev.to_string(), body)]);
        state.deleted.insert(id.to_string());
    }

    /// Keep every per-revision fetch open for `millis` before answering
    pub fn hold_revision_fetches(&self, millis: u64) {
        self.state.fetches.hold_ms.store(millis, Ordering::SeqCst);
    }

    /// Highest number of per-revision fetches seen open at once
    pub fn max_revision_fetches_in_flight(&self) -> usize {
        self.state.fetches.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn has_doc(&self, database: &str, id: &str) -> bool {
        let state = self.state.store.lock().unwrap();
        state.docs.get(database).is_some_and(|docs| docs.contains_key(id))
    }

    pub fn archived(&self) -> BTreeMap<String, Value> {
        self.state.store.lock().unwrap().archived.clone()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.store.lock().unwrap().requests.clone()
    }

    /// Requests whose path ends with `suffix`
    pub fn requests_to(&self, suffix: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.path.ends_with(suffix))
            .collect()
    }

    pub fn clear_requests(&self) {
        self.state.store.lock().unwrap().requests.clear();
    }
}

impl Drop for MockStore {
    fn drop(&mut self) {
        self.server.abort();
    }
}

fn json_response(status: StatusCode, body: Value) -> Response {
    (status, Json(body)).into_response()
}

fn not_found() -> Response {
    json_response(StatusCode::NOT_FOUND, json!({"error": "not_found", "reason": "missing"}))
}

async fn handle(
    State(state): State<SharedState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    let body: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let path = uri.path().to_string();

    state.store.lock().unwrap().requests.push(RecordedRequest {
        method: method.as_str().to_string(),
        path: path.clone(),
        query: query.clone(),
        body: body.clone(),
        authorization: headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    });

    let revision_fetch = method == Method::GET && query.contains_key("rev");
    if revision_fetch {
        let fetches = &state.fetches;
        let now = fetches.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        fetches.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let hold = fetches.hold_ms.load(Ordering::SeqCst);
        if hold > 0 {
            tokio::time::sleep(Duration::from_millis(hold)).await;
        }
        fetches.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    let mut store = state.store.lock().unwrap();
    respond(&mut store, &method, &path, &query, body)
}

fn respond(
    state: &mut StoreState,
    method: &Method,
    path: &str,
    query: &HashMap<String, String>,
    body: Value,
) -> Response {
    let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
    match (method.as_str(), segments.as_slice()) {
        ("POST", [db, "_changes"]) => {
            let docs = state.docs.get(*db).cloned().unwrap_or_default();
            let mut seen = HashSet::new();
            let results: Vec<Value> = body["doc_ids"]
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(Value::as_str)
                .filter(|id| seen.insert(id.to_string()))
                .filter_map(|id| {
                    let leaves = docs.get(id)?;
                    let changes: Vec<Value> = leaves.iter().map(|(rev, _)| json!({"rev": rev})).collect();
                    let mut row = json!({"seq": "1-seq", "id": id, "changes": changes});
                    if !state.omit_feed_docs {
                        row["doc"] = leaves[0].1.clone();
                    }
                    if state.deleted.contains(id) {
                        row["deleted"] = Value::Bool(true);
                    }
                    Some(row)
                })
                .collect();
            json_response(StatusCode::OK, json!({"results": results, "last_seq": "1-seq"}))
        }
        ("POST", [_db, "_bulk_docs"]) => {
            if state.fail_archive {
                return json_response(StatusCode::INTERNAL_SERVER_ERROR, json!({"error": "unknown_error"}));
            }
            let mut rows = Vec::new();
            for doc in body["docs"].as_array().cloned().unwrap_or_default() {
                let id = doc["_id"].as_str().unwrap_or_default().to_string();
                if state.archived.contains_key(&id) {
                    rows.push(json!({"id": id, "error": "conflict", "reason": "Document update conflict."}));
                } else {
                    state.archived.insert(id.clone(), doc);
                    rows.push(json!({"id": id, "rev": "1-archived"}));
                }
            }
            json_response(StatusCode::CREATED, Value::Array(rows))
        }
        ("POST", [db, "_purge"]) => {
            if state.purge_failures > 0 {
                state.purge_failures -= 1;
                return json_response(StatusCode::INTERNAL_SERVER_ERROR, json!({"error": "purge_failed"}));
            }
            if let (Some(docs), Some(request)) = (state.docs.get_mut(*db), body.as_object()) {
                for (id, revs) in request {
                    let revs: Vec<&str> = revs.as_array().into_iter().flatten().filter_map(Value::as_str).collect();
                    if let Some(leaves) = docs.get_mut(id) {
                        leaves.retain(|(rev, _)| !revs.contains(&rev.as_str()));
                        if leaves.is_empty() {
                            docs.remove(id);
                        }
                    }
                }
            }
            json_response(StatusCode::CREATED, json!({"purge_seq": null, "purged": body}))
        }
        ("GET", [_db, "_design", _ddoc, "_view", _view]) => {
            if state.fail_views {
                return json_response(StatusCode::INTERNAL_SERVER_ERROR, json!({"error": "timeout"}));
            }
            json_response(StatusCode::OK, json!({"total_rows": 0, "offset": 0, "rows": []}))
        }
        ("GET", ["api", "v1", "users-info"]) => json_response(
            StatusCode::OK,
            json!({
                "contact_id": query.get("contact_id"),
                "facility_id": query.get("facility_id"),
                "role": query.get("role"),
                "total_docs": 42,
            }),
        ),
        ("GET", ["broken"]) => (StatusCode::SERVICE_UNAVAILABLE, "upstream down").into_response(),
        ("GET", [db, id]) => {
            let Some(leaves) = state.docs.get(*db).and_then(|docs| docs.get(*id)) else {
                return not_found();
            };
            let leaf = match query.get("rev") {
                Some(rev) => {
                    if state.missing_revs.contains(&(id.to_string(), rev.clone())) {
                        return not_found();
                    }
                    leaves.iter().find(|(r, _)| r == rev)
                }
                None => leaves.first(),
            };
            match leaf {
                Some((_, body)) => json_response(StatusCode::OK, body.clone()),
                None => not_found(),
            }
        }
        _ => not_found(),
    }
}

pub fn group(database: &str, ids: &[&str]) -> DocumentGroup {
    DocumentGroup {
        database: database.to_string(),
        document_ids: ids.iter().map(|id| id.to_string()).collect(),
    }
}

pub fn manager(store: &MockStore, config: PurgeConfig) -> Result<PurgeManager> {
    PurgeManager::new(store.client()?, config)
}

/// Manager whose events are collected into the returned vector
pub fn recording_manager(store: &MockStore, config: PurgeConfig) -> Result<(PurgeManager, Arc<Mutex<Vec<PurgeEvent>>>)> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let manager = manager(store, config)?.with_callback(move |event| sink.lock().unwrap().push(event.clone()));
    Ok((manager, events))
}

pub fn write_input(dir: &Path, name: &str, lines: &[&str]) -> Result<()> {
    let mut content = String::from("uuid,database\n");
    for line in lines {
        content.push_str(line);
        content.push('\n');
    }
    std::fs::write(dir.join(name), content)?;
    Ok(())
}
