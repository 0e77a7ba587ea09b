//! Small helper shared by the extractor and sunrise summarizer: both need a
//! single aggregated text completion rather than a relayed stream.

use futures_util::StreamExt;
use pearl_backends::{BackendError, ChatBackend, UnifiedChatRequest};
use pearl_core::{ChatMessage, MessageContent};

pub fn system(text: impl Into<String>) -> ChatMessage {
    ChatMessage {
        role: "system".to_string(),
        content: MessageContent::Text(text.into()),
    }
}

pub fn user(text: impl Into<String>) -> ChatMessage {
    ChatMessage {
        role: "user".to_string(),
        content: MessageContent::Text(text.into()),
    }
}

/// Drives a backend's stream to completion and concatenates every content delta.
pub async fn complete(
    backend: &dyn ChatBackend,
    model: &str,
    messages: Vec<ChatMessage>,
) -> Result<String, BackendError> {
    let mut stream = backend
        .chat(UnifiedChatRequest {
            model: model.to_string(),
            messages,
            temperature: Some(0.0),
            max_tokens: None,
            top_p: None,
            user: None,
            tools: None,
            tool_choice: None,
        })
        .await?;

    let mut out = String::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        for choice in &chunk.choices {
            if let Some(content) = &choice.delta.content {
                out.push_str(content);
            }
        }
    }
    Ok(out)
}
