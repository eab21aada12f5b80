//! Minimal fake of the coordinator agent HTTP API for client tests.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::put;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpListener;

/// How long a blocking key query holds before answering unchanged.
const BLOCKING_WAIT: Duration = Duration::from_millis(200);

struct KvRecord {
    session: Option<String>,
    modify_index: u64,
}

#[derive(Default)]
struct AgentState {
    next_session: u64,
    index: u64,
    sessions: HashSet<String>,
    session_requests: Vec<Value>,
    kv: HashMap<String, KvRecord>,
    services: HashMap<String, Value>,
    checks: HashMap<String, String>,
}

/// Shared handle onto the fake agent's state.
#[derive(Clone, Default)]
pub struct FakeAgent {
    state: Arc<Mutex<AgentState>>,
}

#[allow(dead_code)]
impl FakeAgent {
    pub fn key_session(&self, key: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        state.kv.get(key).and_then(|r| r.session.clone())
    }

    pub fn delete_key(&self, key: &str) {
        let mut state = self.state.lock().unwrap();
        state.index += 1;
        state.kv.remove(key);
    }

    pub fn session_count(&self) -> usize {
        self.state.lock().unwrap().sessions.len()
    }

    pub fn last_session_request(&self) -> Option<Value> {
        self.state.lock().unwrap().session_requests.last().cloned()
    }

    pub fn service(&self, id: &str) -> Option<Value> {
        self.state.lock().unwrap().services.get(id).cloned()
    }

    pub fn check_status(&self, check: &str) -> Option<String> {
        self.state.lock().unwrap().checks.get(check).cloned()
    }
}

#[derive(Deserialize)]
struct KvParams {
    acquire: Option<String>,
    index: Option<u64>,
}

async fn create_session(State(agent): State<FakeAgent>, Json(body): Json<Value>) -> Json<Value> {
    let mut state = agent.state.lock().unwrap();
    state.next_session += 1;
    let id = format!("sess-{}", state.next_session);
    state.sessions.insert(id.clone());
    state.session_requests.push(body);
    Json(json!({ "ID": id }))
}

async fn destroy_session(State(agent): State<FakeAgent>, Path(id): Path<String>) -> Json<bool> {
    let mut state = agent.state.lock().unwrap();
    state.sessions.remove(&id);
    state.index += 1;
    state.kv.retain(|_, r| r.session.as_deref() != Some(id.as_str()));
    Json(true)
}

async fn renew_session(State(agent): State<FakeAgent>, Path(id): Path<String>) -> Response {
    let state = agent.state.lock().unwrap();
    if state.sessions.contains(&id) {
        Json(json!([{ "ID": id }])).into_response()
    } else {
        (StatusCode::NOT_FOUND, format!("Session id '{id}' not found")).into_response()
    }
}

async fn put_key(
    State(agent): State<FakeAgent>,
    Path(key): Path<String>,
    Query(params): Query<KvParams>,
    _body: Bytes,
) -> Response {
    let mut state = agent.state.lock().unwrap();
    let Some(session) = params.acquire else {
        return (StatusCode::BAD_REQUEST, "only acquire is supported").into_response();
    };

    if !state.sessions.contains(&session) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("invalid session \"{session}\""),
        )
            .into_response();
    }

    let held_by_other = state
        .kv
        .get(&key)
        .and_then(|r| r.session.as_deref())
        .is_some_and(|holder| holder != session);
    if held_by_other {
        return Json(false).into_response();
    }

    state.index += 1;
    let modify_index = state.index;
    state.kv.insert(
        key,
        KvRecord {
            session: Some(session),
            modify_index,
        },
    );
    Json(true).into_response()
}

async fn get_key(
    State(agent): State<FakeAgent>,
    Path(key): Path<String>,
    Query(params): Query<KvParams>,
) -> Response {
    let deadline = Instant::now() + BLOCKING_WAIT;

    loop {
        {
            let state = agent.state.lock().unwrap();
            let Some(record) = state.kv.get(&key) else {
                return (
                    StatusCode::NOT_FOUND,
                    [("X-Consul-Index", state.index.to_string())],
                )
                    .into_response();
            };

            let changed = params.index.is_none_or(|index| record.modify_index > index);
            if changed || Instant::now() >= deadline {
                let body = json!([{
                    "Key": key,
                    "Session": record.session,
                    "ModifyIndex": record.modify_index,
                }]);
                return (
                    [("X-Consul-Index", record.modify_index.to_string())],
                    Json(body),
                )
                    .into_response();
            }
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn register(State(agent): State<FakeAgent>, Json(body): Json<Value>) -> StatusCode {
    let mut state = agent.state.lock().unwrap();
    let id = body["ID"].as_str().unwrap_or_default().to_string();
    if let Some(check) = body["Check"]["CheckID"].as_str() {
        state.checks.insert(check.to_string(), "critical".to_string());
    }
    state.services.insert(id, body);
    StatusCode::OK
}

async fn deregister(State(agent): State<FakeAgent>, Path(id): Path<String>) -> Response {
    let mut state = agent.state.lock().unwrap();
    match state.services.remove(&id) {
        Some(_) => {
            state.checks.remove(&format!("service:{id}"));
            StatusCode::OK.into_response()
        }
        None => (StatusCode::NOT_FOUND, format!("Unknown service ID \"{id}\"")).into_response(),
    }
}

fn update_check(agent: &FakeAgent, check: &str, status: &str) -> Response {
    let mut state = agent.state.lock().unwrap();
    match state.checks.get_mut(check) {
        Some(current) => {
            *current = status.to_string();
            StatusCode::OK.into_response()
        }
        None => (StatusCode::NOT_FOUND, format!("Unknown check ID \"{check}\"")).into_response(),
    }
}

async fn pass(State(agent): State<FakeAgent>, Path(check): Path<String>) -> Response {
    update_check(&agent, &check, "passing")
}

async fn fail(State(agent): State<FakeAgent>, Path(check): Path<String>) -> Response {
    update_check(&agent, &check, "critical")
}

/// Spawn a fake agent on an ephemeral port, returning its handle and address.
pub async fn spawn_agent() -> (FakeAgent, SocketAddr) {
    let agent = FakeAgent::default();

    let app = Router::new()
        .route("/v1/session/create", put(create_session))
        .route("/v1/session/destroy/:id", put(destroy_session))
        .route("/v1/session/renew/:id", put(renew_session))
        .route("/v1/kv/*key", put(put_key).get(get_key))
        .route("/v1/agent/service/register", put(register))
        .route("/v1/agent/service/deregister/:id", put(deregister))
        .route("/v1/agent/check/pass/:check", put(pass))
        .route("/v1/agent/check/fail/:check", put(fail))
        .with_state(agent.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    (agent, addr)
}
