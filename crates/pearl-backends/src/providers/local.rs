//! Local provider: HTTP POST to a local endpoint streaming newline-delimited
//! JSON. Each line parses into a chunk; the final line carries `done: true` with
//! token counts.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

use crate::chat::{ChatBackend, ChatChunk, ChatStream, ChatUsage, FinishReason, UnifiedChatRequest};
use crate::error::BackendError;

pub struct LocalProvider {
    client: reqwest::Client,
    base_url: String,
}

impl LocalProvider {
    pub fn new(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        LocalProvider {
            client,
            base_url: base_url.into(),
        }
    }
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Deserialize)]
struct NdjsonLine {
    content: Option<String>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[async_trait]
impl ChatBackend for LocalProvider {
    async fn chat(&self, request: UnifiedChatRequest) -> Result<ChatStream, BackendError> {
        let wire_messages: Vec<WireMessage> = request
            .messages
            .iter()
            .map(|m| WireMessage {
                role: &m.role,
                content: m.content.as_text(),
            })
            .collect();
        let body = WireRequest {
            model: &request.model,
            messages: wire_messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let response = self
            .client
            .post(format!("{}/generate", self.base_url))
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let byte_stream = response.bytes_stream();
        let model = request.model.clone();
        let id = uuid::Uuid::new_v4().to_string();

        let stream = async_stream::stream! {
            futures_util::pin_mut!(byte_stream);
            let mut buf = String::new();
            let now = pearl_core::time::now_unix_secs();
            let mut opened = false;

            while let Some(chunk) = byte_stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => { yield Err(BackendError::from(e)); break; }
                };
                buf.push_str(&String::from_utf8_lossy(&chunk));
                while let Some(pos) = buf.find('\n') {
                    let line = buf[..pos].trim().to_string();
                    buf.drain(..=pos);
                    if line.is_empty() {
                        continue;
                    }
                    let parsed: NdjsonLine = match serde_json::from_str(&line) {
                        Ok(p) => p,
                        Err(e) => { yield Err(BackendError::Validation(format!("malformed NDJSON line: {e}"))); continue; }
                    };
                    if !opened {
                        opened = true;
                        yield Ok(ChatChunk::role_open(id.clone(), now, model.clone()));
                    }
                    if parsed.done {
                        yield Ok(ChatChunk::terminal(
                            id.clone(),
                            now,
                            model.clone(),
                            FinishReason::Stop,
                            Some(ChatUsage {
                                prompt_tokens: parsed.prompt_tokens,
                                completion_tokens: parsed.completion_tokens,
                                total_tokens: parsed.prompt_tokens + parsed.completion_tokens,
                            }),
                        ));
                    } else if let Some(content) = parsed.content {
                        yield Ok(ChatChunk::content_delta(id.clone(), now, model.clone(), content));
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }

    async fn models(&self) -> Result<Vec<String>, BackendError> {
        Ok(vec!["small".to_string(), "mock".to_string()])
    }

    async fn health(&self) -> bool {
        self.client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}
