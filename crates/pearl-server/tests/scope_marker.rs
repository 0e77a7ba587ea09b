//! Background extraction persists a memory whose content carries an explicit
//! "for all agents" marker with global scope, overriding the default
//! per-agent scope the channel would otherwise imply.

#[path = "support/mod.rs"]
mod support;

use axum::Router;
use axum::routing::post;
use serde_json::json;
use std::time::{Duration, Instant};
use support::{PearlServer, base_config, reserve_local_port, unique_dir};

async fn generate_handler() -> String {
    let inner = json!({
        "memories": [{
            "type": "rule",
            "content": "For all agents: use concise responses",
            "confidence": 0.95
        }]
    })
    .to_string();
    let content_line = json!({"content": inner, "done": false}).to_string();
    let done_line = json!({"done": true, "prompt_tokens": 0, "completion_tokens": 0}).to_string();
    format!("{content_line}\n{done_line}\n")
}

async fn spawn_extraction_mock() -> u16 {
    let port = reserve_local_port();
    let app = Router::new().route("/generate", post(generate_handler));
    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{port}")).await.unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    port
}

#[tokio::test]
async fn explicit_global_scope_marker_overrides_default_agent_scope() {
    let extract_port = spawn_extraction_mock().await;

    let dir = unique_dir();
    let port = reserve_local_port();
    let extra = format!(
        r#"
backends:
  extract:
    base_url: "http://127.0.0.1:{extract_port}"
memory:
  extraction_model: "extract/model"
"#
    );
    let server = PearlServer::start(&base_config(dir.path(), port, &extra), port).await;

    let chat_body = json!({
        "model": "local/mock",
        "messages": [{
            "role": "user",
            "content": "For all agents: use concise responses in every conversation from now on."
        }],
        "metadata": {"agent_id": "nova", "session_id": "session-scope"},
    });
    let resp = server
        .client()
        .post(server.url("/v1/chat/completions"))
        .json(&chat_body)
        .send()
        .await
        .expect("chat request failed");
    assert!(resp.status().is_success(), "status: {}", resp.status());

    let deadline = Instant::now() + Duration::from_secs(5);
    let memory = loop {
        if Instant::now() >= deadline {
            panic!("extracted memory never appeared within the timeout");
        }
        let memories: serde_json::Value = server
            .client()
            .get(server.url("/v1/memories?agent=nova"))
            .send()
            .await
            .expect("list memories failed")
            .json()
            .await
            .expect("valid JSON body");
        if let Some(first) = memories["memories"].as_array().and_then(|a| a.first()) {
            break first.clone();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    };

    assert_eq!(memory["scope"], "global");
    assert!(memory["scope_confidence"].as_f64().unwrap() >= 0.95);
}
