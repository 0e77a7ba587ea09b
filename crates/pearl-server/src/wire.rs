//! OpenAI-compatible wire shapes for the external HTTP surface. Everything in
//! this module is a serde DTO; translation to/from the internal
//! `pearl_core`/`pearl_backends` types happens in `http::chat`.

use serde::{Deserialize, Serialize};

use pearl_core::ChatMessage;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RequestMetadata {
    pub agent_id: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub tools: Option<serde_json::Value>,
    #[serde(default)]
    pub tool_choice: Option<serde_json::Value>,
    #[serde(default)]
    pub metadata: RequestMetadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionChoice {
    pub index: u32,
    pub message: ChatCompletionMessage,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoutingInfo {
    pub model: String,
    pub rule: Option<String>,
    pub complexity: pearl_core::Complexity,
    #[serde(rename = "type")]
    pub request_type: pearl_core::RequestType,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceInfo {
    pub duration_ms: u64,
    pub memories_injected: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PearlInfo {
    pub routing: RoutingInfo,
    pub performance: PerformanceInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: &'static str,
    pub created: u64,
    pub model: String,
    pub choices: Vec<ChatCompletionChoice>,
    pub usage: Usage,
    pub pearl: PearlInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelEntry {
    pub id: String,
    pub object: &'static str,
    pub owned_by: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelsResponse {
    pub object: &'static str,
    pub data: Vec<ModelEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: String,
    pub uptime_seconds: u64,
    pub pearl_initialized: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListMemoriesQuery {
    pub agent: String,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub search: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoriesResponse {
    pub memories: Vec<pearl_core::Memory>,
    pub total: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateMemoryRequest {
    pub agent: String,
    pub content: String,
    #[serde(rename = "type")]
    pub memory_type: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Reduces a normalized message content to the plain-text form the wire
/// response carries: content blocks never reach the caller as structured
/// data, only flattened text is echoed back.
pub fn as_wire_message(role: &str, content: &str) -> ChatCompletionMessage {
    ChatCompletionMessage {
        role: role.to_string(),
        content: content.to_string(),
    }
}
