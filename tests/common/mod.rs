//! Minimal in-process Loki stand-in for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::Router;
use tokio::net::TcpListener;

#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub path: String,
    pub query: HashMap<String, String>,
    pub authorization: Option<String>,
    pub org_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StubReply {
    pub status: u16,
    pub body: String,
    pub delay: Duration,
}

impl StubReply {
    pub fn ok(body: serde_json::Value) -> Self {
        Self {
            status: 200,
            body: body.to_string(),
            delay: Duration::ZERO,
        }
    }

    pub fn raw(status: u16, body: &str) -> Self {
        Self {
            status,
            body: body.to_string(),
            delay: Duration::ZERO,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Clone)]
struct StubState {
    reply: StubReply,
    seen: Arc<Mutex<Vec<SeenRequest>>>,
}

pub struct StubLoki {
    pub base_url: String,
    seen: Arc<Mutex<Vec<SeenRequest>>>,
}

impl StubLoki {
    pub fn requests(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }

    pub fn only_request(&self) -> SeenRequest {
        let seen = self.requests();
        assert_eq!(seen.len(), 1, "expected exactly one backend request");
        seen[0].clone()
    }
}

async fn record(State(state): State<StubState>, uri: Uri, headers: HeaderMap) -> impl IntoResponse {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    };
    let query = uri
        .query()
        .map(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .into_owned()
                .collect::<HashMap<_, _>>()
        })
        .unwrap_or_default();
    state.seen.lock().unwrap().push(SeenRequest {
        path: uri.path().to_string(),
        query,
        authorization: header("authorization"),
        org_id: header("x-scope-orgid"),
    });

    if !state.reply.delay.is_zero() {
        tokio::time::sleep(state.reply.delay).await;
    }
    (
        StatusCode::from_u16(state.reply.status).unwrap(),
        [("content-type", "application/json")],
        state.reply.body.clone(),
    )
}

pub async fn spawn_stub(reply: StubReply) -> StubLoki {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new().fallback(record).with_state(StubState {
        reply,
        seen: seen.clone(),
    });
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    StubLoki {
        base_url: format!("http://{addr}"),
        seen,
    }
}
