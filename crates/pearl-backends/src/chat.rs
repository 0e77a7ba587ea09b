//! The unified chat-completion contract every backend adapter normalizes into:
//! a request shape with the fields the three real providers share, and a lazy,
//! finite, non-restartable stream of [`ChatChunk`] terminated by an explicit
//! finish reason.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use pearl_core::ChatMessage;
use serde::{Deserialize, Serialize};

use crate::error::BackendError;

/// The unified request every adapter translates to its native wire shape.
#[derive(Debug, Clone)]
pub struct UnifiedChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f64>,
    /// Opaque per-caller tag threaded through from request metadata (OpenAI's `user`
    /// field); dropped by providers that have no equivalent.
    pub user: Option<String>,
    pub tools: Option<serde_json::Value>,
    pub tool_choice: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
}

impl FinishReason {
    /// Normalizes a provider-native reason string. `length` covers both OpenAI's
    /// `length` and Anthropic's `max_tokens`; anything unrecognized normalizes to
    /// `None` rather than a made-up variant.
    pub fn normalize(raw: &str) -> Option<FinishReason> {
        match raw {
            "stop" | "end_turn" | "stop_sequence" => Some(FinishReason::Stop),
            "length" | "max_tokens" => Some(FinishReason::Length),
            "content_filter" => Some(FinishReason::ContentFilter),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChunkChoice {
    pub index: u32,
    pub delta: ChatDelta,
    pub finish_reason: Option<FinishReason>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChunk {
    pub id: String,
    pub created: u64,
    pub model: String,
    pub choices: Vec<ChatChunkChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<ChatUsage>,
}

impl ChatChunk {
    /// The first chunk of a response: carries `role="assistant"` and no content.
    pub fn role_open(id: impl Into<String>, created: u64, model: impl Into<String>) -> Self {
        ChatChunk {
            id: id.into(),
            created,
            model: model.into(),
            choices: vec![ChatChunkChoice {
                index: 0,
                delta: ChatDelta {
                    role: Some("assistant".to_string()),
                    content: None,
                    tool_calls: None,
                },
                finish_reason: None,
            }],
            usage: None,
        }
    }

    pub fn content_delta(
        id: impl Into<String>,
        created: u64,
        model: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        ChatChunk {
            id: id.into(),
            created,
            model: model.into(),
            choices: vec![ChatChunkChoice {
                index: 0,
                delta: ChatDelta {
                    role: None,
                    content: Some(content.into()),
                    tool_calls: None,
                },
                finish_reason: None,
            }],
            usage: None,
        }
    }

    pub fn terminal(
        id: impl Into<String>,
        created: u64,
        model: impl Into<String>,
        finish_reason: FinishReason,
        usage: Option<ChatUsage>,
    ) -> Self {
        ChatChunk {
            id: id.into(),
            created,
            model: model.into(),
            choices: vec![ChatChunkChoice {
                index: 0,
                delta: ChatDelta::default(),
                finish_reason: Some(finish_reason),
            }],
            usage,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.choices.iter().any(|c| c.finish_reason.is_some())
    }
}

/// A lazy, finite, non-restartable sequence of chunks. Boxed so the registry can
/// hold heterogeneous adapters behind one trait object.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<ChatChunk, BackendError>> + Send>>;

/// Unified contract every chat backend adapter implements.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn chat(&self, request: UnifiedChatRequest) -> Result<ChatStream, BackendError>;
    async fn models(&self) -> Result<Vec<String>, BackendError>;
    async fn health(&self) -> bool;
}
