//! Injects retrieved memories into a message list without duplicating memories
//! already injected earlier in the same session.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use pearl_core::{ChatMessage, MemoryType, MessageContent, ScoredMemory};

const BLOCK_OPEN: &str = "<memories>";
const BLOCK_CLOSE: &str = "</memories>";

#[derive(Debug, Clone)]
pub struct AugmentOptions {
    /// How many trailing user messages feed the retrieval query.
    pub query_context_messages: usize,
}

impl Default for AugmentOptions {
    fn default() -> Self {
        AugmentOptions {
            query_context_messages: 1,
        }
    }
}

pub struct AugmentResult {
    pub messages: Vec<ChatMessage>,
    pub injected_memories: Vec<ScoredMemory>,
    pub tokens_used: u32,
}

/// Tracks, per session, which memory ids have already been injected.
#[derive(Default)]
pub struct Augmenter {
    injected: Mutex<HashMap<String, HashSet<String>>>,
}

impl Augmenter {
    pub fn new() -> Self {
        Augmenter::default()
    }

    /// Builds the retrieval query text from the trailing user messages.
    pub fn build_query(messages: &[ChatMessage], opts: &AugmentOptions) -> String {
        messages
            .iter()
            .rev()
            .filter(|m| m.role == "user")
            .take(opts.query_context_messages.max(1))
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .map(|m| m.content.as_text())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Injects `candidates` into `messages`, filtering out memories already
    /// injected for `session_id`. Never mutates the input; returns it unchanged
    /// (`injected_memories` empty) when every candidate has already been seen.
    pub fn augment(
        &self,
        session_id: &str,
        messages: &[ChatMessage],
        candidates: Vec<ScoredMemory>,
    ) -> AugmentResult {
        let mut guard = self.injected.lock().unwrap();
        let seen = guard.entry(session_id.to_string()).or_default();

        let fresh: Vec<ScoredMemory> = candidates
            .into_iter()
            .filter(|sm| !seen.contains(&sm.memory.id))
            .collect();

        if fresh.is_empty() {
            return AugmentResult {
                messages: messages.to_vec(),
                injected_memories: Vec::new(),
                tokens_used: 0,
            };
        }

        for sm in &fresh {
            seen.insert(sm.memory.id.clone());
        }
        drop(guard);

        let (block, tokens_used) = format_block(&fresh);
        let mut out = messages.to_vec();
        match out.iter_mut().find(|m| m.role == "system") {
            Some(system) => {
                let existing = system.content.as_text();
                system.content = MessageContent::Text(format!("{block}\n\n{existing}"));
            }
            None => {
                out.insert(
                    0,
                    ChatMessage {
                        role: "system".to_string(),
                        content: MessageContent::Text(block),
                    },
                );
            }
        }

        AugmentResult {
            messages: out,
            injected_memories: fresh,
            tokens_used,
        }
    }

    pub fn clear_session(&self, session_id: &str) {
        self.injected.lock().unwrap().remove(session_id);
    }

    pub fn clear_all_sessions(&self) {
        self.injected.lock().unwrap().clear();
    }
}

/// `decision` and `rule` memories carry a type indicator so the model can tell
/// an instruction from plain context.
fn format_block(memories: &[ScoredMemory]) -> (String, u32) {
    let mut lines = vec![BLOCK_OPEN.to_string()];
    for sm in memories {
        let line = match sm.memory.memory_type {
            MemoryType::Decision => format!("[decision] {}", sm.memory.content),
            MemoryType::Rule => format!("[rule] {}", sm.memory.content),
            _ => sm.memory.content.clone(),
        };
        lines.push(format!("- {line}"));
    }
    lines.push(BLOCK_CLOSE.to_string());
    let block = lines.join("\n");
    let tokens = (block.len() as u32).div_ceil(4);
    (block, tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pearl_core::{Memory, Scope};
    use std::collections::BTreeSet;

    fn memory(id: &str, memory_type: MemoryType, content: &str) -> ScoredMemory {
        ScoredMemory {
            memory: Memory {
                id: id.to_string(),
                agent_id: "nova".to_string(),
                memory_type,
                content: content.to_string(),
                tags: BTreeSet::new(),
                embedding: None,
                confidence: 0.9,
                created_at: 1,
                updated_at: 1,
                accessed_at: None,
                access_count: 0,
                expires_at: None,
                source_session_id: None,
                source_message_id: None,
                scope: Scope::Agent,
                scope_confidence: 1.0,
                target_agent_id: None,
                scope_reasoning: None,
            },
            score: 0.8,
        }
    }

    fn user(text: &str) -> ChatMessage {
        ChatMessage {
            role: "user".to_string(),
            content: MessageContent::Text(text.to_string()),
        }
    }

    #[test]
    fn inserts_new_system_message_when_none_present() {
        let augmenter = Augmenter::new();
        let messages = vec![user("what's my timezone?")];
        let result = augmenter.augment("s1", &messages, vec![memory("1", MemoryType::Fact, "user is in PST")]);
        assert_eq!(result.messages.len(), 2);
        assert_eq!(result.messages[0].role, "system");
        assert_eq!(result.injected_memories.len(), 1);
    }

    #[test]
    fn prepends_to_existing_system_message() {
        let augmenter = Augmenter::new();
        let messages = vec![
            ChatMessage { role: "system".to_string(), content: MessageContent::Text("be terse".to_string()) },
            user("hi"),
        ];
        let result = augmenter.augment("s1", &messages, vec![memory("1", MemoryType::Fact, "likes dark mode")]);
        assert_eq!(result.messages.len(), 2);
        let system_text = result.messages[0].content.as_text();
        assert!(system_text.contains("be terse"));
        assert!(system_text.contains("likes dark mode"));
    }

    #[test]
    fn second_call_same_session_is_identity_preserving_for_seen_memories() {
        let augmenter = Augmenter::new();
        let messages = vec![user("hi")];
        let first = augmenter.augment("s1", &messages, vec![memory("1", MemoryType::Fact, "a fact")]);
        assert_eq!(first.injected_memories.len(), 1);

        let second = augmenter.augment("s1", &messages, vec![memory("1", MemoryType::Fact, "a fact")]);
        assert!(second.injected_memories.is_empty());
        assert_eq!(second.messages.len(), messages.len());
    }

    #[test]
    fn decision_and_rule_memories_carry_type_indicator() {
        let (block, _) = format_block(&[
            memory("1", MemoryType::Decision, "use Rust for the backend"),
            memory("2", MemoryType::Rule, "never ship without tests"),
            memory("3", MemoryType::Fact, "likes tea"),
        ]);
        assert!(block.contains("[decision] use Rust for the backend"));
        assert!(block.contains("[rule] never ship without tests"));
        assert!(block.contains("- likes tea"));
    }

    #[test]
    fn clear_session_resets_dedup_bookkeeping() {
        let augmenter = Augmenter::new();
        let messages = vec![user("hi")];
        augmenter.augment("s1", &messages, vec![memory("1", MemoryType::Fact, "a fact")]);
        augmenter.clear_session("s1");
        let result = augmenter.augment("s1", &messages, vec![memory("1", MemoryType::Fact, "a fact")]);
        assert_eq!(result.injected_memories.len(), 1);
    }

    #[test]
    fn query_is_built_from_trailing_user_messages_only() {
        let messages = vec![
            ChatMessage { role: "system".to_string(), content: MessageContent::Text("sys".to_string()) },
            user("first question"),
            ChatMessage { role: "assistant".to_string(), content: MessageContent::Text("reply".to_string()) },
            user("second question"),
        ];
        let query = Augmenter::build_query(&messages, &AugmentOptions { query_context_messages: 2 });
        assert_eq!(query, "first question\nsecond question");
    }
}
