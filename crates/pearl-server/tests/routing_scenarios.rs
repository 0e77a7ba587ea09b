//! End-to-end routing: a simple low-complexity message should land on the
//! cheap rule's model, and a sensitive message should be forced local
//! regardless of any competing rule.

#[path = "support/mod.rs"]
mod support;

use serde_json::json;
use support::{PearlServer, base_config, reserve_local_port, unique_dir};

#[tokio::test]
async fn simple_chat_routes_to_cheap_model() {
    let dir = unique_dir();
    let port = reserve_local_port();
    let extra = r#"
routing:
  rules:
    - name: cheap
      match:
        complexity: low
      model: local/small
      priority: 30
"#;
    let server = PearlServer::start(&base_config(dir.path(), port, extra), port).await;

    let body = json!({
        "model": "auto",
        "messages": [{"role": "user", "content": "hello"}],
    });
    let resp = server
        .client()
        .post(server.url("/v1/chat/completions"))
        .json(&body)
        .send()
        .await
        .expect("request failed");
    assert!(resp.status().is_success(), "status: {}", resp.status());
    let payload: serde_json::Value = resp.json().await.expect("valid JSON body");

    assert_eq!(payload["pearl"]["routing"]["model"], "local/small");
    assert_eq!(payload["pearl"]["routing"]["rule"], "cheap");
    assert_eq!(payload["choices"][0]["finish_reason"], "stop");
}

#[tokio::test]
async fn sensitive_content_routes_locally_regardless_of_other_signals() {
    let dir = unique_dir();
    let port = reserve_local_port();
    let extra = r#"
routing:
  rules:
    - name: sensitive
      match:
        sensitive: true
      model: local/model
      priority: 100
    - name: big
      match:
        estimated_tokens:
          comparator: gte
          value: 1
      model: remote/big
      priority: 50
"#;
    let server = PearlServer::start(&base_config(dir.path(), port, extra), port).await;

    let body = json!({
        "model": "auto",
        "messages": [{"role": "user", "content": "my password: hunter2"}],
    });
    let resp = server
        .client()
        .post(server.url("/v1/chat/completions"))
        .json(&body)
        .send()
        .await
        .expect("request failed");
    assert!(resp.status().is_success(), "status: {}", resp.status());
    let payload: serde_json::Value = resp.json().await.expect("valid JSON body");

    assert_eq!(payload["pearl"]["routing"]["model"], "local/model");
    assert_eq!(payload["pearl"]["routing"]["rule"], "sensitive");
}
