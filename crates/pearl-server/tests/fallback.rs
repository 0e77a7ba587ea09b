//! A primary backend that always answers 503 should be skipped in favor of
//! the configured fallback chain; the request still completes and the
//! request log shows the fallback model as the one actually routed.

#[path = "support/mod.rs"]
mod support;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::post;
use serde_json::json;
use support::{PearlServer, base_config, read_request_log, reserve_local_port, unique_dir};

async fn always_unavailable() -> StatusCode {
    StatusCode::SERVICE_UNAVAILABLE
}

async fn spawn_failing_primary_mock() -> u16 {
    let port = reserve_local_port();
    let app = Router::new().route("/generate", post(always_unavailable));
    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{port}")).await.unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    port
}

#[tokio::test]
async fn fallback_chain_is_used_when_primary_returns_5xx() {
    let primary_port = spawn_failing_primary_mock().await;

    let dir = unique_dir();
    let port = reserve_local_port();
    let extra = format!(
        r#"
backends:
  primary:
    base_url: "http://127.0.0.1:{primary_port}"
routing:
  rules:
    - name: fallback-rule
      model: "unused/model"
      priority: 0
      default: true
      fallbacks: ["local/mock"]
"#
    );
    let server = PearlServer::start(&base_config(dir.path(), port, &extra), port).await;

    let chat_body = json!({
        "model": "primary/big",
        "messages": [{"role": "user", "content": "hello there"}],
        "metadata": {"agent_id": "nova", "session_id": "session-fallback"},
    });
    let resp = server
        .client()
        .post(server.url("/v1/chat/completions"))
        .json(&chat_body)
        .send()
        .await
        .expect("chat request failed");
    assert!(resp.status().is_success(), "status: {}", resp.status());

    let log_path = dir.path().join("requests.jsonl");
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    let entry = loop {
        let entries = read_request_log(&log_path);
        if let Some(last) = entries.last() {
            break last.clone();
        }
        if std::time::Instant::now() >= deadline {
            panic!("request log entry never appeared within the timeout");
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    };

    assert_eq!(entry["routed_model"], "local/mock");
}
