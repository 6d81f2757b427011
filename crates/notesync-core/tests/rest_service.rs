//! HTTP client tests against an in-process PostgREST-style server.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use notesync_core::models::NotePayload;
use notesync_core::remote::RestServiceConfig;
use notesync_core::{
    ConnectivityMonitor, EngineOptions, LocalStore, NoteInput, NoteRepository, RemoteError,
    RemoteNoteService, RestNoteService, SyncEngine,
};
use pretty_assertions::assert_eq;
use serde::{Deserialize, Serialize};

const API_KEY: &str = "anon-test-key";
const USER_ID: &str = "user@example.com";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Row {
    #[serde(default)]
    id: String,
    user_id: String,
    title: String,
    content: String,
    version: i64,
    updated_at: i64,
}

#[derive(Default)]
struct FakeState {
    rows: Vec<Row>,
    next_id: u64,
    revision: u64,
    forced_status: Option<StatusCode>,
    auth_headers: Vec<(String, String)>,
}

type Shared = Arc<Mutex<FakeState>>;
type Params = Query<HashMap<String, String>>;

fn filter<'a>(params: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    params.get(key).and_then(|value| value.strip_prefix("eq."))
}

fn matches(row: &Row, params: &HashMap<String, String>) -> bool {
    filter(params, "user_id").map_or(true, |user| row.user_id == user)
        && filter(params, "id").map_or(true, |id| row.id == id)
        && filter(params, "version").map_or(true, |version| row.version.to_string() == version)
}

fn record(state: &mut FakeState, headers: &HeaderMap) -> Option<Response> {
    let text = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string()
    };
    state
        .auth_headers
        .push((text("apikey"), text(header::AUTHORIZATION.as_str())));

    state.forced_status.map(|status| {
        (
            status,
            Json(serde_json::json!({ "message": "forced failure" })),
        )
            .into_response()
    })
}

async fn list(State(state): State<Shared>, headers: HeaderMap, Query(params): Params) -> Response {
    let mut state = state.lock().unwrap();
    if let Some(response) = record(&mut state, &headers) {
        return response;
    }

    let etag = format!("\"rev-{}\"", state.revision);
    let if_none_match = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|value| value.to_str().ok());
    if params.get("id").is_none() && if_none_match == Some(etag.as_str()) {
        return StatusCode::NOT_MODIFIED.into_response();
    }

    let rows = state
        .rows
        .iter()
        .filter(|row| matches(row, &params))
        .cloned()
        .collect::<Vec<_>>();
    ([(header::ETAG, etag)], Json(rows)).into_response()
}

async fn create(State(state): State<Shared>, headers: HeaderMap, Json(mut row): Json<Row>) -> Response {
    let mut state = state.lock().unwrap();
    if let Some(response) = record(&mut state, &headers) {
        return response;
    }

    state.next_id += 1;
    state.revision += 1;
    row.id = format!("00000000-0000-0000-0000-{:012}", state.next_id);
    state.rows.push(row.clone());
    (StatusCode::CREATED, Json(vec![row])).into_response()
}

async fn patch(
    State(state): State<Shared>,
    headers: HeaderMap,
    Query(params): Params,
    Json(update): Json<Row>,
) -> Response {
    let mut state = state.lock().unwrap();
    if let Some(response) = record(&mut state, &headers) {
        return response;
    }

    let mut updated = Vec::new();
    for row in state.rows.iter_mut().filter(|row| matches(row, &params)) {
        row.title = update.title.clone();
        row.content = update.content.clone();
        row.version = update.version;
        row.updated_at = update.updated_at;
        updated.push(row.clone());
    }
    if !updated.is_empty() {
        state.revision += 1;
    }
    Json(updated).into_response()
}

async fn remove(State(state): State<Shared>, headers: HeaderMap, Query(params): Params) -> Response {
    let mut state = state.lock().unwrap();
    if let Some(response) = record(&mut state, &headers) {
        return response;
    }

    let (removed, kept): (Vec<Row>, Vec<Row>) = state
        .rows
        .drain(..)
        .partition(|row| matches(row, &params));
    state.rows = kept;
    if !removed.is_empty() {
        state.revision += 1;
    }
    Json(removed).into_response()
}

async fn serve() -> (String, Shared) {
    let state = Shared::default();
    let app = Router::new()
        .route(
            "/rest/v1/notes",
            get(list).post(create).patch(patch).delete(remove),
        )
        .with_state(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}/rest/v1"), state)
}

fn client(base_url: &str) -> RestNoteService {
    RestNoteService::new(RestServiceConfig {
        base_url: base_url.to_string(),
        api_key: API_KEY.to_string(),
        user_id: USER_ID.to_string(),
        request_timeout: Duration::from_secs(5),
    })
    .unwrap()
}

fn payload(title: &str, version: i64) -> NotePayload {
    NotePayload {
        title: title.to_string(),
        body: format!("{title} body"),
        version,
        updated_at: 1_700_000_000_000 + version,
    }
}

#[tokio::test]
async fn create_list_update_delete() {
    let (base_url, state) = serve().await;
    let service = client(&base_url);

    let created = service.create(&payload("first", 1)).await.unwrap();
    assert_eq!(created.title, "first");
    assert_eq!(created.body, "first body");
    assert_eq!(created.version, 1);
    assert_eq!(state.lock().unwrap().rows[0].user_id, USER_ID);

    let snapshot = service.fetch_all(None).await.unwrap().unwrap();
    assert_eq!(snapshot.notes, vec![created.clone()]);
    let cursor = snapshot.cursor.unwrap();
    assert!(service.fetch_all(Some(&cursor)).await.unwrap().is_none());

    let updated = service
        .update(&created.id, &payload("second", 2), 1)
        .await
        .unwrap();
    assert_eq!(updated.version, 2);
    assert!(service.fetch_all(Some(&cursor)).await.unwrap().is_some());

    let stale = service
        .update(&created.id, &payload("stale", 2), 1)
        .await
        .unwrap_err();
    assert_eq!(stale, RemoteError::Conflict { remote_version: 2 });

    service.delete(&created.id).await.unwrap();
    assert_eq!(
        service.delete(&created.id).await.unwrap_err(),
        RemoteError::NotFound
    );
    assert_eq!(
        service
            .update(&created.id, &payload("gone", 3), 2)
            .await
            .unwrap_err(),
        RemoteError::NotFound
    );
}

#[tokio::test]
async fn requests_carry_auth_headers() {
    let (base_url, state) = serve().await;
    client(&base_url).fetch_all(None).await.unwrap();

    let headers = state.lock().unwrap().auth_headers.clone();
    assert_eq!(
        headers,
        vec![(API_KEY.to_string(), format!("Bearer {API_KEY}"))]
    );
}

#[tokio::test]
async fn only_the_configured_user_is_listed() {
    let (base_url, state) = serve().await;
    state.lock().unwrap().rows.push(Row {
        id: "someone-else".to_string(),
        user_id: "other@example.com".to_string(),
        title: "not mine".to_string(),
        content: String::new(),
        version: 1,
        updated_at: 0,
    });

    let snapshot = client(&base_url).fetch_all(None).await.unwrap().unwrap();
    assert!(snapshot.notes.is_empty());
}

#[tokio::test]
async fn http_failures_are_classified() {
    let (base_url, state) = serve().await;
    let service = client(&base_url);

    state.lock().unwrap().forced_status = Some(StatusCode::SERVICE_UNAVAILABLE);
    let error = service.fetch_all(None).await.unwrap_err();
    assert!(error.is_transient(), "{error:?}");

    state.lock().unwrap().forced_status = Some(StatusCode::UNAUTHORIZED);
    let error = service.create(&payload("x", 1)).await.unwrap_err();
    assert_eq!(
        error,
        RemoteError::Rejected {
            status: 401,
            message: "forced failure".to_string()
        }
    );

    state.lock().unwrap().forced_status = Some(StatusCode::CONFLICT);
    let error = service.create(&payload("x", 1)).await.unwrap_err();
    assert!(matches!(error, RemoteError::Rejected { status: 409, .. }));
}

#[tokio::test]
async fn unreachable_server_is_a_network_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let error = client(&format!("http://{addr}/rest/v1"))
        .fetch_all(None)
        .await
        .unwrap_err();
    assert!(matches!(error, RemoteError::Network(_)), "{error:?}");
}

#[tokio::test]
async fn engine_syncs_through_http() {
    let (base_url, state) = serve().await;
    let store = LocalStore::open_in_memory().unwrap();
    let repo = NoteRepository::new(store.clone());
    let engine = SyncEngine::new(
        store,
        client(&base_url),
        ConnectivityMonitor::new(true),
        EngineOptions::default(),
    );

    let note = repo.create_note(&NoteInput::new("over http", "")).await.unwrap();
    repo.update_note(&note.local_id, &NoteInput::new("over http v2", ""))
        .await
        .unwrap();

    let result = engine.sync_notes().await.unwrap();
    assert!(result.success, "{result:?}");
    assert_eq!(result.synced, 2);

    let rows = state.lock().unwrap().rows.clone();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].title, "over http v2");
    assert_eq!(rows[0].version, 2);

    repo.delete_note(&note.local_id).await.unwrap();
    assert!(engine.sync_notes().await.unwrap().success);
    assert!(state.lock().unwrap().rows.is_empty());
}
