use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::ServerConfig;
use crate::error::{LokiError, Result};
use crate::mcp::{McpServer, RpcRequest};

type Sessions = Arc<RwLock<HashMap<String, mpsc::UnboundedSender<Event>>>>;

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

/// Owned by an SSE stream; unregisters the session when the client goes away.
struct SessionGuard {
    id: String,
    sessions: Sessions,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        debug!(session_id = %self.id, "sse session closed");
        sessions_write(&self.sessions).remove(&self.id);
    }
}

#[derive(Clone)]
pub struct AppState {
    pub server: McpServer,
    pub sessions: Sessions,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> axum::response::Response {
        (StatusCode::BAD_REQUEST, Json(self)).into_response()
    }
}

/// 同步 JSON-RPC 入口：请求体即 RPC 请求，响应体即 RPC 响应。
async fn rpc_handler(
    State(state): State<AppState>,
    payload: std::result::Result<Json<RpcRequest>, JsonRejection>,
) -> impl IntoResponse {
    let req = match payload {
        Ok(Json(req)) => req,
        Err(e) => {
            return ErrorResponse {
                error: format!("invalid request body: {e}"),
            }
            .into_response()
        }
    };

    match state.server.process_request(req).await {
        Some(resp) => (StatusCode::OK, Json(resp)).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

async fn sse_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = std::result::Result<Event, axum::Error>>> {
    let (tx, rx) = mpsc::unbounded_channel();
    let session_id = format!(
        "{}-{}",
        chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0),
        NEXT_SESSION.fetch_add(1, Ordering::Relaxed)
    );

    // MCP 客户端按相对 URI 解析 endpoint
    let endpoint_url = format!("/message?session_id={session_id}");
    let _ = tx.send(Event::default().event("endpoint").data(endpoint_url));

    debug!(session_id = %session_id, "sse session opened");
    sessions_write(&state.sessions).insert(session_id.clone(), tx);

    let guard = SessionGuard {
        id: session_id,
        sessions: state.sessions.clone(),
    };
    // 流被 axum 丢弃（客户端断开）时 guard 随闭包一起释放
    let stream = UnboundedReceiverStream::new(rx).map(move |event| {
        let _ = &guard;
        Ok::<_, axum::Error>(event)
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[derive(Deserialize)]
struct MessageQuery {
    session_id: String,
}

async fn message_handler(
    State(state): State<AppState>,
    Query(q): Query<MessageQuery>,
    payload: std::result::Result<Json<RpcRequest>, JsonRejection>,
) -> impl IntoResponse {
    let req = match payload {
        Ok(Json(req)) => req,
        Err(e) => {
            return ErrorResponse {
                error: format!("invalid request body: {e}"),
            }
            .into_response()
        }
    };

    let sender = sessions_read(&state.sessions).get(&q.session_id).cloned();
    let Some(sender) = sender else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let server = state.server.clone();
    let sessions = state.sessions.clone();
    tokio::spawn(async move {
        let Some(resp) = server.process_request(req).await else {
            return;
        };
        if let Ok(json_str) = serde_json::to_string(&resp) {
            if sender.send(Event::default().event("message").data(json_str)).is_err() {
                debug!(session_id = %q.session_id, "sse client gone, dropping session");
                sessions_write(&sessions).remove(&q.session_id);
            }
        }
    });
    StatusCode::ACCEPTED.into_response()
}

async fn health_handler() -> &'static str {
    "ok"
}

fn sessions_read(
    sessions: &Sessions,
) -> std::sync::RwLockReadGuard<'_, HashMap<String, mpsc::UnboundedSender<Event>>> {
    sessions.read().unwrap_or_else(|e| e.into_inner())
}

fn sessions_write(
    sessions: &Sessions,
) -> std::sync::RwLockWriteGuard<'_, HashMap<String, mpsc::UnboundedSender<Event>>> {
    sessions.write().unwrap_or_else(|e| e.into_inner())
}

pub fn build_router(server: McpServer) -> Router {
    let state = AppState {
        server,
        sessions: Arc::new(RwLock::new(HashMap::new())),
    };
    Router::new()
        .route("/mcp", post(rpc_handler))
        .route("/sse", get(sse_handler))
        .route("/message", post(message_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

pub async fn serve_http(
    server: McpServer,
    config: &ServerConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    let addr = config.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| LokiError::ConfigError(format!("bind {addr} failed: {e}")))?;
    info!(addr = %addr, "HTTP server listening");
    axum::serve(listener, build_router(server))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(LokiError::from)
}
