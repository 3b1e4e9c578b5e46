use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{LokiError, Result};
use crate::tools::LokiTools;

pub const PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

impl RpcResponse {
    fn ok(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    fn err(id: Value, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(RpcError { code, message }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct CancelParams {
    #[serde(rename = "requestId")]
    request_id: Value,
}

/// MCP request handler shared by the stdio and HTTP transports.
///
/// Every `tools/call` runs under its own cancellation token, a child of the
/// server-wide shutdown token, so it can be aborted individually through
/// `notifications/cancelled` or all at once on shutdown.
#[derive(Clone)]
pub struct McpServer {
    tools: Arc<LokiTools>,
    shutdown: CancellationToken,
    inflight: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl McpServer {
    pub fn new(tools: Arc<LokiTools>, shutdown: CancellationToken) -> Self {
        Self {
            tools,
            shutdown,
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Server-wide token; cancelling it stops the transports and every call.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Handle one request. Notifications yield `None`.
    pub async fn process_request(&self, req: RpcRequest) -> Option<RpcResponse> {
        let method = req.method.clone();
        match method.as_str() {
            "initialize" => Some(RpcResponse::ok(
                req.id,
                serde_json::json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": { "tools": {} },
                    "serverInfo": {
                        "name": env!("CARGO_PKG_NAME"),
                        "version": env!("CARGO_PKG_VERSION")
                    }
                }),
            )),
            "notifications/initialized" => None,
            "notifications/cancelled" => {
                self.cancel(&req.params);
                None
            }
            "ping" => Some(RpcResponse::ok(req.id, serde_json::json!({}))),
            "tools/list" => Some(RpcResponse::ok(
                req.id,
                serde_json::json!({ "tools": self.tools.definitions() }),
            )),
            "tools/call" => Some(self.call_tool(req).await),
            _ if req.id.is_null() => {
                debug!(method = %req.method, "ignoring notification");
                None
            }
            _ => Some(RpcResponse::err(
                req.id,
                -32601,
                format!("method not found: {}", req.method),
            )),
        }
    }

    async fn call_tool(&self, req: RpcRequest) -> RpcResponse {
        let params: CallParams = match serde_json::from_value(req.params) {
            Ok(p) => p,
            Err(e) => return RpcResponse::err(req.id, -32602, format!("invalid params: {e}")),
        };

        let key = req.id.to_string();
        let token = self.shutdown.child_token();
        // 同一 id 同时只能有一个调用，否则取消通知无法定位
        match self.inflight_map().entry(key.clone()) {
            Entry::Occupied(_) => {
                return RpcResponse::err(
                    req.id,
                    -32600,
                    format!("request id {key} is already in flight"),
                )
            }
            Entry::Vacant(slot) => {
                slot.insert(token.clone());
            }
        }

        let outcome = self.tools.call(&params.name, &params.arguments, &token).await;
        self.inflight_map().remove(&key);

        match outcome {
            Ok(text) => RpcResponse::ok(
                req.id,
                serde_json::json!({ "content": [{ "type": "text", "text": text }] }),
            ),
            Err(e @ LokiError::InvalidArgument { .. }) => {
                RpcResponse::err(req.id, -32602, e.to_string())
            }
            Err(e) => RpcResponse::err(req.id, -32002, e.to_string()),
        }
    }

    fn cancel(&self, params: &Value) {
        let Ok(p) = serde_json::from_value::<CancelParams>(params.clone()) else {
            warn!("malformed cancellation notification");
            return;
        };
        let token = self.inflight_map().remove(&p.request_id.to_string());
        if let Some(token) = token {
            info!(request_id = %p.request_id, "cancelling tool call");
            token.cancel();
        }
    }

    fn inflight_map(&self) -> std::sync::MutexGuard<'_, HashMap<String, CancellationToken>> {
        // 持锁期间不会 panic，中毒后直接沿用内部数据
        self.inflight.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Line-delimited JSON-RPC loop; the stdio transport runs it over stdin/stdout.
///
/// Each request runs in its own task; responses are funnelled through a channel
/// to a single writer so lines never interleave. Returns on EOF or once the
/// server's shutdown token is cancelled, after pending responses are written.
pub async fn serve_lines<R, W>(server: McpServer, reader: R, writer: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let shutdown = server.shutdown_token();
    let mut lines = reader.lines();
    let (tx, mut rx) = mpsc::unbounded_channel::<RpcResponse>();

    let writer = tokio::spawn(async move {
        let mut writer = writer;
        while let Some(resp) = rx.recv().await {
            write_response(&mut writer, &resp).await?;
        }
        Ok::<_, LokiError>(())
    });

    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => {
                info!("shutdown requested, closing stdio transport");
                break;
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            debug!("stdin closed");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        let req: RpcRequest = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                let _ = tx.send(RpcResponse::err(
                    Value::Null,
                    -32700,
                    format!("parse error: {e}"),
                ));
                continue;
            }
        };

        let server = server.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            if let Some(resp) = server.process_request(req).await {
                let _ = tx.send(resp);
            }
        });
    }

    drop(tx);
    writer
        .await
        .map_err(|e| LokiError::Transport(format!("stdout writer task failed: {e}")))?
}

async fn write_response<W>(writer: &mut W, resp: &RpcResponse) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let line = serde_json::to_string(resp).unwrap_or_else(|_| "{}".to_string());
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}
