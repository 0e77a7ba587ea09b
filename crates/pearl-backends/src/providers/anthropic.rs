//! Anthropic-shaped provider. System messages are concatenated and passed in a
//! dedicated `system` field; in OAuth ("max") mode that field is wrapped with an
//! ephemeral cache directive. The `anthropic/` and `anthropic-max/` prefixes are
//! stripped from the model id before dispatch, and a mid-request auth failure
//! forces exactly one refresh-and-retry.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

use crate::chat::{ChatBackend, ChatChunk, ChatChunkChoice, ChatDelta, ChatStream, ChatUsage, FinishReason, UnifiedChatRequest};
use crate::error::BackendError;
use crate::oauth::OAuthManager;
use crate::retry::RetryPolicy;

pub fn strip_model_prefix(model: &str) -> &str {
    model
        .strip_prefix("anthropic-max/")
        .or_else(|| model.strip_prefix("anthropic/"))
        .unwrap_or(model)
}

enum AuthMode {
    ApiKey(String),
    OAuth(OAuthManager),
}

pub struct AnthropicProvider {
    client: reqwest::Client,
    base_url: String,
    auth: AuthMode,
    retry: RetryPolicy,
}

impl AnthropicProvider {
    pub fn with_api_key(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        retry: RetryPolicy,
        client: reqwest::Client,
    ) -> Self {
        AnthropicProvider {
            client,
            base_url: base_url.into(),
            auth: AuthMode::ApiKey(api_key.into()),
            retry,
        }
    }

    pub fn with_oauth(base_url: impl Into<String>, oauth: OAuthManager, retry: RetryPolicy, client: reqwest::Client) -> Self {
        AnthropicProvider {
            client,
            base_url: base_url.into(),
            auth: AuthMode::OAuth(oauth),
            retry,
        }
    }

    fn is_oauth(&self) -> bool {
        matches!(self.auth, AuthMode::OAuth(_))
    }

    async fn access_token(&self) -> Result<String, BackendError> {
        match &self.auth {
            AuthMode::ApiKey(k) => Ok(k.clone()),
            AuthMode::OAuth(mgr) => Ok(mgr.current_token().await?.access_token),
        }
    }

    async fn force_refresh(&self) -> Result<String, BackendError> {
        match &self.auth {
            AuthMode::ApiKey(k) => Ok(k.clone()),
            AuthMode::OAuth(mgr) => Ok(mgr.force_refresh().await?.access_token),
        }
    }
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Serialize)]
#[serde(untagged)]
enum WireSystem {
    Plain(String),
    Cached(Vec<SystemBlock>),
}

#[derive(Serialize)]
struct SystemBlock {
    #[serde(rename = "type")]
    kind: &'static str,
    text: String,
    cache_control: CacheControl,
}

#[derive(Serialize)]
struct CacheControl {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    max_tokens: u32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<WireSystem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
}

fn build_system(messages: &[pearl_core::ChatMessage], oauth: bool) -> Option<WireSystem> {
    let text = messages
        .iter()
        .filter(|m| m.role == "system")
        .map(|m| m.content.as_text())
        .collect::<Vec<_>>()
        .join("\n\n");
    if text.is_empty() {
        return None;
    }
    if oauth {
        Some(WireSystem::Cached(vec![SystemBlock {
            kind: "text",
            text,
            cache_control: CacheControl { kind: "ephemeral" },
        }]))
    } else {
        Some(WireSystem::Plain(text))
    }
}

fn build_request<'a>(request: &'a UnifiedChatRequest, model: &'a str, oauth: bool) -> WireRequest<'a> {
    let messages = request
        .messages
        .iter()
        .filter(|m| m.role != "system")
        .map(|m| WireMessage {
            role: &m.role,
            content: m.content.as_text(),
        })
        .collect();
    WireRequest {
        model,
        messages,
        max_tokens: request.max_tokens.unwrap_or(4096),
        stream: true,
        system: build_system(&request.messages, oauth),
        temperature: request.temperature,
        top_p: request.top_p,
    }
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum WireEvent {
    #[serde(rename = "message_start")]
    MessageStart { message: MessageStartInner },
    #[serde(rename = "content_block_delta")]
    ContentBlockDelta { delta: ContentDelta },
    #[serde(rename = "message_delta")]
    MessageDelta { usage: MessageDeltaUsage },
    #[serde(rename = "message_stop")]
    MessageStop,
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct MessageStartInner {
    id: String,
    usage: StartUsage,
}

#[derive(Deserialize)]
struct StartUsage {
    input_tokens: u32,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum ContentDelta {
    #[serde(rename = "text_delta")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct MessageDeltaUsage {
    output_tokens: u32,
}

#[async_trait]
impl ChatBackend for AnthropicProvider {
    async fn chat(&self, request: UnifiedChatRequest) -> Result<ChatStream, BackendError> {
        let model = strip_model_prefix(&request.model).to_string();
        let oauth = self.is_oauth();
        let wire_request = build_request(&request, &model, oauth);
        let body = serde_json::to_value(&wire_request)
            .map_err(|e| BackendError::Validation(e.to_string()))?;

        let url = format!("{}/v1/messages", self.base_url);
        let client = self.client.clone();

        let mut token = self.access_token().await?;
        let mut attempted_refresh = false;
        let response = loop {
            let token_for_attempt = token.clone();
            let dispatch = || {
                let client = client.clone();
                let url = url.clone();
                let body = body.clone();
                let token = token_for_attempt.clone();
                async move {
                    client
                        .post(&url)
                        .header("x-api-key", &token)
                        .header("anthropic-version", "2023-06-01")
                        .json(&body)
                        .send()
                        .await
                        .map_err(BackendError::from)?
                        .error_for_status()
                        .map_err(BackendError::from)
                }
            };
            match self.retry.run(dispatch).await {
                Ok(resp) => break resp,
                Err(BackendError::Backend { status: 401, .. }) if !attempted_refresh => {
                    attempted_refresh = true;
                    token = self.force_refresh().await?;
                }
                Err(e) => return Err(e),
            }
        };

        let byte_stream = response.bytes_stream();
        let event_stream = byte_stream.eventsource();
        let model_for_stream = model.clone();

        let stream = async_stream::stream! {
            futures_util::pin_mut!(event_stream);
            let mut message_id = String::new();
            let mut input_tokens: u32 = 0;
            let mut output_tokens: u32 = 0;
            let mut opened = false;
            let now = pearl_core::time::now_unix_secs();

            while let Some(event) = event_stream.next().await {
                let event = match event {
                    Ok(e) => e,
                    Err(e) => {
                        yield Err(BackendError::Network(e.to_string()));
                        break;
                    }
                };
                let parsed: WireEvent = match serde_json::from_str(&event.data) {
                    Ok(p) => p,
                    Err(_) => continue,
                };
                match parsed {
                    WireEvent::MessageStart { message } => {
                        message_id = message.id;
                        input_tokens = message.usage.input_tokens;
                        if !opened {
                            opened = true;
                            yield Ok(ChatChunk::role_open(message_id.clone(), now, model_for_stream.clone()));
                        }
                    }
                    WireEvent::ContentBlockDelta { delta: ContentDelta::Text { text } } => {
                        yield Ok(ChatChunk::content_delta(message_id.clone(), now, model_for_stream.clone(), text));
                    }
                    WireEvent::ContentBlockDelta { delta: ContentDelta::Other } => {}
                    WireEvent::MessageDelta { usage } => {
                        output_tokens = usage.output_tokens;
                    }
                    WireEvent::MessageStop => {
                        yield Ok(ChatChunk::terminal(
                            message_id.clone(),
                            now,
                            model_for_stream.clone(),
                            FinishReason::Stop,
                            Some(ChatUsage {
                                prompt_tokens: input_tokens,
                                completion_tokens: output_tokens,
                                total_tokens: input_tokens + output_tokens,
                            }),
                        ));
                        break;
                    }
                    WireEvent::Other => {}
                }
            }
        };

        Ok(Box::pin(stream))
    }

    async fn models(&self) -> Result<Vec<String>, BackendError> {
        Ok(vec![
            "claude-opus-4".to_string(),
            "claude-sonnet-4".to_string(),
        ])
    }

    async fn health(&self) -> bool {
        self.access_token().await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_both_anthropic_prefixes() {
        assert_eq!(strip_model_prefix("anthropic/claude-opus-4"), "claude-opus-4");
        assert_eq!(strip_model_prefix("anthropic-max/claude-opus-4"), "claude-opus-4");
        assert_eq!(strip_model_prefix("claude-opus-4"), "claude-opus-4");
    }

    #[test]
    fn system_messages_concatenated_double_newline() {
        let messages = vec![
            pearl_core::ChatMessage { role: "system".into(), content: pearl_core::MessageContent::text("first") },
            pearl_core::ChatMessage { role: "user".into(), content: pearl_core::MessageContent::text("hi") },
            pearl_core::ChatMessage { role: "system".into(), content: pearl_core::MessageContent::text("second") },
        ];
        match build_system(&messages, false) {
            Some(WireSystem::Plain(text)) => assert_eq!(text, "first\n\nsecond"),
            _ => panic!("expected plain system text"),
        }
    }

    #[test]
    fn oauth_mode_wraps_system_in_cache_directive() {
        let messages = vec![pearl_core::ChatMessage {
            role: "system".into(),
            content: pearl_core::MessageContent::text("ctx"),
        }];
        match build_system(&messages, true) {
            Some(WireSystem::Cached(blocks)) => assert_eq!(blocks[0].text, "ctx"),
            _ => panic!("expected cached system blocks"),
        }
    }

    #[test]
    fn no_system_message_yields_none() {
        let messages = vec![pearl_core::ChatMessage {
            role: "user".into(),
            content: pearl_core::MessageContent::text("hi"),
        }];
        assert!(build_system(&messages, false).is_none());
    }

    #[test]
    fn plain_system_serializes_as_bare_string_not_tagged_map() {
        let messages = vec![pearl_core::ChatMessage {
            role: "system".into(),
            content: pearl_core::MessageContent::text("be terse"),
        }];
        let system = build_system(&messages, false).unwrap();
        let value = serde_json::to_value(&system).unwrap();
        assert_eq!(value, serde_json::json!("be terse"));
    }

    #[test]
    fn cached_system_serializes_as_bare_array_not_tagged_map() {
        let messages = vec![pearl_core::ChatMessage {
            role: "system".into(),
            content: pearl_core::MessageContent::text("be terse"),
        }];
        let system = build_system(&messages, true).unwrap();
        let value = serde_json::to_value(&system).unwrap();
        assert!(value.is_array(), "expected a bare array, got {value}");
        assert_eq!(value[0]["type"], "text");
        assert_eq!(value[0]["text"], "be terse");
        assert_eq!(value[0]["cache_control"]["type"], "ephemeral");
    }
}
