//! Deterministic mock adapter. Content is derived from the last user message;
//! chunks are emitted word-by-word to exercise streaming paths in tests without
//! live credentials.

use async_trait::async_trait;

use crate::chat::{ChatBackend, ChatChunk, ChatStream, ChatUsage, FinishReason, UnifiedChatRequest};
use crate::error::BackendError;

#[derive(Default)]
pub struct MockProvider;

impl MockProvider {
    pub fn new() -> Self {
        MockProvider
    }
}

fn canned_response(last_user: &str) -> String {
    if last_user.trim().is_empty() {
        "I don't have a question to respond to.".to_string()
    } else {
        format!("Echo: {last_user}")
    }
}

#[async_trait]
impl ChatBackend for MockProvider {
    async fn chat(&self, request: UnifiedChatRequest) -> Result<ChatStream, BackendError> {
        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_text())
            .unwrap_or_default();
        let content = canned_response(&last_user);
        let words: Vec<String> = content.split(' ').map(|w| w.to_string()).collect();
        let model = request.model.clone();
        let id = uuid::Uuid::new_v4().to_string();

        let stream = async_stream::stream! {
            let now = pearl_core::time::now_unix_secs();
            yield Ok(ChatChunk::role_open(id.clone(), now, model.clone()));
            for (i, word) in words.iter().enumerate() {
                let piece = if i == 0 { word.clone() } else { format!(" {word}") };
                yield Ok(ChatChunk::content_delta(id.clone(), now, model.clone(), piece));
            }
            let completion_tokens = words.len() as u32;
            yield Ok(ChatChunk::terminal(
                id.clone(),
                now,
                model.clone(),
                FinishReason::Stop,
                Some(ChatUsage {
                    prompt_tokens: (last_user.chars().count() as f64 / 3.5).ceil() as u32,
                    completion_tokens,
                    total_tokens: completion_tokens,
                }),
            ));
        };

        Ok(Box::pin(stream))
    }

    async fn models(&self) -> Result<Vec<String>, BackendError> {
        Ok(vec!["mock".to_string()])
    }

    async fn health(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use pearl_core::{ChatMessage, MessageContent};

    #[tokio::test]
    async fn streams_words_and_terminates_with_stop() {
        let provider = MockProvider::new();
        let req = UnifiedChatRequest {
            model: "local/mock".into(),
            messages: vec![ChatMessage {
                role: "user".into(),
                content: MessageContent::text("hello there"),
            }],
            temperature: None,
            max_tokens: None,
            top_p: None,
            user: None,
            tools: None,
            tool_choice: None,
        };
        let mut stream = provider.chat(req).await.unwrap();
        let mut chunks = Vec::new();
        while let Some(chunk) = stream.next().await {
            chunks.push(chunk.unwrap());
        }
        assert!(chunks.first().unwrap().choices[0].delta.role.as_deref() == Some("assistant"));
        assert!(chunks.last().unwrap().is_terminal());
        assert_eq!(
            chunks.last().unwrap().choices[0].finish_reason,
            Some(FinishReason::Stop)
        );
    }

    #[tokio::test]
    async fn empty_user_message_gets_fallback_content() {
        let provider = MockProvider::new();
        let req = UnifiedChatRequest {
            model: "local/mock".into(),
            messages: vec![],
            temperature: None,
            max_tokens: None,
            top_p: None,
            user: None,
            tools: None,
            tool_choice: None,
        };
        let mut stream = provider.chat(req).await.unwrap();
        let mut joined = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.unwrap();
            if let Some(content) = &chunk.choices[0].delta.content {
                joined.push_str(content);
            }
        }
        assert!(joined.contains("don't have a question"));
    }
}
