//! Message content normalization.
//!
//! Incoming chat messages carry content as either a plain string or an array of typed
//! blocks. Both shapes are folded into [`MessageContent`] at the boundary so every
//! downstream stage (classifier, augmenter, extractor) only ever sees plain text.

use serde::{Deserialize, Serialize};

/// One block in a multi-part message body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    /// Any other block type (image, tool_result, ...). Dropped during normalization.
    #[serde(other)]
    Other,
}

/// Content of a chat message: either a bare string, or an array of blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    /// Flattens to plain text, dropping non-text blocks and joining the remainder
    /// with newlines. This is the only form the classifier, augmenter, and extractor
    /// are allowed to see.
    pub fn as_text(&self) -> String {
        match self {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    ContentBlock::Other => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    pub fn text(s: impl Into<String>) -> Self {
        MessageContent::Text(s.into())
    }
}
