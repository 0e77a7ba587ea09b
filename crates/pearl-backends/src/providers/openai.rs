//! OpenAI-shaped provider: translates the unified request, consumes the
//! server-sent-event stream line by line via `eventsource-stream`, and stops at
//! the native `[DONE]` sentinel.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

use crate::chat::{ChatBackend, ChatChunk, ChatChunkChoice, ChatDelta, ChatStream, ChatUsage, FinishReason, UnifiedChatRequest};
use crate::error::BackendError;
use crate::retry::RetryPolicy;

pub struct OpenAiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    retry: RetryPolicy,
}

impl OpenAiProvider {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, retry: RetryPolicy, client: reqwest::Client) -> Self {
        OpenAiProvider {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            retry,
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
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<&'a str>,
}

#[derive(Deserialize)]
struct WireChunk {
    id: String,
    created: u64,
    model: String,
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireChoice {
    index: u32,
    #[serde(default)]
    delta: WireDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct WireDelta {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

fn to_chat_chunk(wire: WireChunk) -> ChatChunk {
    ChatChunk {
        id: wire.id,
        created: wire.created,
        model: wire.model,
        choices: wire
            .choices
            .into_iter()
            .map(|c| ChatChunkChoice {
                index: c.index,
                delta: ChatDelta {
                    role: c.delta.role,
                    content: c.delta.content,
                    tool_calls: c.delta.tool_calls,
                },
                finish_reason: c.finish_reason.as_deref().and_then(FinishReason::normalize),
            })
            .collect(),
        usage: wire.usage.map(|u| ChatUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }),
    }
}

#[async_trait]
impl ChatBackend for OpenAiProvider {
    async fn chat(&self, request: UnifiedChatRequest) -> Result<ChatStream, BackendError> {
        let wire_messages: Vec<WireMessage> = request
            .messages
            .iter()
            .map(|m| WireMessage {
                role: &m.role,
                content: m.content.as_text(),
            })
            .collect();
        let wire_request = WireRequest {
            model: &request.model,
            messages: wire_messages,
            stream: true,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            top_p: request.top_p,
            user: request.user.as_deref(),
        };

        let url = format!("{}/chat/completions", self.base_url);
        let client = self.client.clone();
        let api_key = self.api_key.clone();
        let body = serde_json::to_value(&wire_request)
            .map_err(|e| BackendError::Validation(e.to_string()))?;

        let response = self
            .retry
            .run(|| {
                let client = client.clone();
                let api_key = api_key.clone();
                let url = url.clone();
                let body = body.clone();
                async move {
                    client
                        .post(&url)
                        .bearer_auth(&api_key)
                        .json(&body)
                        .send()
                        .await
                        .map_err(BackendError::from)?
                        .error_for_status()
                        .map_err(BackendError::from)
                }
            })
            .await?;

        let byte_stream = response.bytes_stream();
        let event_stream = byte_stream.eventsource();

        let stream = async_stream::stream! {
            futures_util::pin_mut!(event_stream);
            while let Some(event) = event_stream.next().await {
                let event = match event {
                    Ok(e) => e,
                    Err(e) => {
                        yield Err(BackendError::Network(e.to_string()));
                        break;
                    }
                };
                if event.data == "[DONE]" {
                    break;
                }
                match serde_json::from_str::<WireChunk>(&event.data) {
                    Ok(wire) => yield Ok(to_chat_chunk(wire)),
                    Err(e) => yield Err(BackendError::Validation(format!("malformed SSE payload: {e}"))),
                }
            }
        };

        Ok(Box::pin(stream))
    }

    async fn models(&self) -> Result<Vec<String>, BackendError> {
        #[derive(Deserialize)]
        struct ModelsResponse {
            data: Vec<ModelEntry>,
        }
        #[derive(Deserialize)]
        struct ModelEntry {
            id: String,
        }
        let resp: ModelsResponse = self
            .client
            .get(format!("{}/models", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(resp.data.into_iter().map(|m| m.id).collect())
    }

    async fn health(&self) -> bool {
        self.client
            .get(format!("{}/models", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_chunk_finish_reason_normalizes() {
        let raw = r#"{"id":"1","created":0,"model":"gpt","choices":[{"index":0,"delta":{"content":"hi"},"finish_reason":"length"}]}"#;
        let wire: WireChunk = serde_json::from_str(raw).unwrap();
        let chunk = to_chat_chunk(wire);
        assert_eq!(chunk.choices[0].finish_reason, Some(FinishReason::Length));
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("hi"));
    }
}
