mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{spawn_stub, StubReply};
use loki_mcp::config::LokiDefaults;
use loki_mcp::mcp::{McpServer, RpcRequest};
use loki_mcp::tools::LokiTools;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

fn request(id: Value, method: &str, params: Value) -> RpcRequest {
    serde_json::from_value(json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params }))
        .unwrap()
}

fn server(defaults: LokiDefaults) -> McpServer {
    McpServer::new(
        Arc::new(LokiTools::new(defaults).unwrap()),
        CancellationToken::new(),
    )
}

#[tokio::test]
async fn tools_call_returns_text_content() {
    let stub = spawn_stub(StubReply::ok(json!({
        "status": "success",
        "data": ["app", "env", "job"]
    })))
    .await;
    let srv = server(LokiDefaults {
        url: Some(stub.base_url.clone()),
        ..Default::default()
    });

    let resp = srv
        .process_request(request(
            json!(1),
            "tools/call",
            json!({ "name": "loki_label_names", "arguments": { "format": "text" } }),
        ))
        .await
        .unwrap();
    assert!(resp.error.is_none());
    let result = resp.result.unwrap();
    assert_eq!(result["content"][0]["type"], "text");
    assert_eq!(
        result["content"][0]["text"],
        "Found 3 labels:\n\n1. app\n2. env\n3. job\n"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelled_notification_aborts_the_matching_call() {
    let stub = spawn_stub(
        StubReply::ok(json!({ "status": "success", "data": [] })).delayed(Duration::from_secs(10)),
    )
    .await;
    let srv = server(LokiDefaults {
        url: Some(stub.base_url.clone()),
        ..Default::default()
    });

    let caller = srv.clone();
    let call = tokio::spawn(async move {
        caller
            .process_request(request(
                json!(7),
                "tools/call",
                json!({ "name": "loki_label_names", "arguments": {} }),
            ))
            .await
    });

    tokio::time::sleep(Duration::from_millis(200)).await;
    let ack = srv
        .process_request(request(
            Value::Null,
            "notifications/cancelled",
            json!({ "requestId": 7, "reason": "user aborted" }),
        ))
        .await;
    assert!(ack.is_none());

    let resp = tokio::time::timeout(Duration::from_secs(5), call)
        .await
        .expect("call should finish promptly after cancellation")
        .unwrap()
        .unwrap();
    let err = resp.error.unwrap();
    assert_eq!(err.code, -32002);
    assert_eq!(err.message, "request cancelled");
}

#[tokio::test]
async fn server_shutdown_cancels_every_call() {
    let stub = spawn_stub(
        StubReply::ok(json!({ "status": "success", "data": [] })).delayed(Duration::from_secs(10)),
    )
    .await;
    let shutdown = CancellationToken::new();
    let srv = McpServer::new(
        Arc::new(
            LokiTools::new(LokiDefaults {
                url: Some(stub.base_url.clone()),
                ..Default::default()
            })
            .unwrap(),
        ),
        shutdown.clone(),
    );
    shutdown.cancel();

    let resp = srv
        .process_request(request(
            json!("q1"),
            "tools/call",
            json!({ "name": "loki_query", "arguments": { "query": "{job=\"x\"}" } }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.error.unwrap().message, "request cancelled");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn duplicate_inflight_id_is_rejected_and_first_call_stays_cancellable() {
    let stub = spawn_stub(
        StubReply::ok(json!({ "status": "success", "data": [] })).delayed(Duration::from_secs(10)),
    )
    .await;
    let srv = server(LokiDefaults {
        url: Some(stub.base_url.clone()),
        ..Default::default()
    });

    let caller = srv.clone();
    let first = tokio::spawn(async move {
        caller
            .process_request(request(
                json!(9),
                "tools/call",
                json!({ "name": "loki_label_names", "arguments": {} }),
            ))
            .await
    });
    tokio::time::sleep(Duration::from_millis(200)).await;

    let dup = srv
        .process_request(request(
            json!(9),
            "tools/call",
            json!({ "name": "loki_label_names", "arguments": {} }),
        ))
        .await
        .unwrap();
    let err = dup.error.unwrap();
    assert_eq!(err.code, -32600);
    assert!(err.message.contains("already in flight"));

    srv.process_request(request(
        Value::Null,
        "notifications/cancelled",
        json!({ "requestId": 9 }),
    ))
    .await;

    let resp = tokio::time::timeout(Duration::from_secs(5), first)
        .await
        .expect("first call should still be cancellable")
        .unwrap()
        .unwrap();
    assert_eq!(resp.error.unwrap().message, "request cancelled");
}
