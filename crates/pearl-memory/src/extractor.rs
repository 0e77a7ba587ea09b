//! Converts a free-text message into zero or more typed memories.
//!
//! A triviality filter skips the LLM call entirely for messages unlikely to carry
//! anything worth remembering; everything else goes through a structured-extraction
//! prompt, validated and normalized before it reaches the store.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use pearl_backends::ChatBackend;
use pearl_core::{MemoryType, Scope};
use regex::Regex;
use serde::Deserialize;

use crate::llm_text::{complete, system, user};

static GREETING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(hi|hello|hey|yo|good (morning|afternoon|evening))[!. ]*$").unwrap());
static ACKNOWLEDGMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(ok|okay|thanks|thank you|thx|cool|great|got it|sounds good|sure|yep|yes|no|nope)[!. ]*$")
        .unwrap()
});
static SIMPLE_QUESTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(what time is it\??|how are you\??|what's up\??)$").unwrap());

static GLOBAL_SCOPE_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bfor all agents\b|\bapplies? (to )?(every|all) agents?\b|\bglobally\b").unwrap()
});

fn is_trivial(text: &str, triviality_chars: usize) -> bool {
    let trimmed = text.trim();
    trimmed.chars().count() < triviality_chars
        || GREETING.is_match(trimmed)
        || ACKNOWLEDGMENT.is_match(trimmed)
        || SIMPLE_QUESTION.is_match(trimmed)
}

/// An explicit "for all agents"-style marker in the source message overrides the
/// default per-agent scope; everything else stays agent-scoped rather than guessed
/// at from weaker signals.
fn detect_scope(source_message: &str) -> (Scope, f64, Option<String>) {
    if GLOBAL_SCOPE_MARKER.is_match(source_message) {
        (Scope::Global, 0.95, Some("explicit global scope marker in source message".to_string()))
    } else {
        (Scope::Agent, 1.0, None)
    }
}

#[derive(Debug, Clone)]
pub struct ExtractedMemory {
    pub memory_type: MemoryType,
    pub content: String,
    pub tags: BTreeSet<String>,
    pub confidence: f64,
    pub scope: Scope,
    pub scope_confidence: f64,
    pub scope_reasoning: Option<String>,
}

#[derive(Debug, Default)]
pub struct ExtractionResult {
    pub memories: Vec<ExtractedMemory>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ExtractorOptions {
    pub model: String,
    pub min_confidence: f64,
    /// Messages shorter than this many characters skip the LLM call entirely.
    pub triviality_chars: usize,
}

impl Default for ExtractorOptions {
    fn default() -> Self {
        ExtractorOptions {
            model: "local/extraction".to_string(),
            min_confidence: 0.7,
            triviality_chars: 20,
        }
    }
}

/// Raw shape the extraction prompt asks the model to emit. Every field is
/// optional on the wire; invalid entries are dropped rather than failing the
/// whole batch.
#[derive(Debug, Deserialize, Default)]
struct RawExtractedMemory {
    #[serde(rename = "type")]
    memory_type: Option<String>,
    content: Option<String>,
    #[serde(default)]
    tags: Option<Vec<String>>,
    confidence: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct RawExtraction {
    #[serde(default)]
    memories: Vec<RawExtractedMemory>,
}

pub struct Extractor<'a> {
    backend: &'a dyn ChatBackend,
    opts: ExtractorOptions,
}

impl<'a> Extractor<'a> {
    pub fn new(backend: &'a dyn ChatBackend, opts: ExtractorOptions) -> Self {
        Extractor { backend, opts }
    }

    pub async fn extract(&self, agent_name: &str, message: &str) -> ExtractionResult {
        if is_trivial(message, self.opts.triviality_chars) {
            return ExtractionResult::default();
        }

        let raw = match complete(self.backend, &self.opts.model, prompt(message)).await {
            Ok(text) => text,
            Err(e) => {
                return ExtractionResult {
                    memories: Vec::new(),
                    error: Some(e.to_string()),
                };
            }
        };

        let parsed: RawExtraction = match parse_json_object(&raw) {
            Some(v) => v,
            None => return ExtractionResult::default(),
        };

        let memories = parsed
            .memories
            .into_iter()
            .filter_map(|m| validate(m, self.opts.min_confidence, agent_name))
            .collect();

        ExtractionResult { memories, error: None }
    }
}

fn prompt(message: &str) -> Vec<pearl_core::ChatMessage> {
    vec![
        system(
            "Extract durable facts worth remembering about the user from their message. \
             Recognized types: fact, preference, rule, decision, health, reminder, relationship. \
             Respond with JSON only: {\"memories\":[{\"type\":...,\"content\":...,\"tags\":[...],\"confidence\":0..1}]}. \
             If nothing is worth remembering, respond {\"memories\":[]}.",
        ),
        user(message),
    ]
}

/// Drops entries missing `type` or `content`, entries below `min_confidence`, and
/// coerces a malformed `tags` array to empty rather than failing the entry.
fn validate(raw: RawExtractedMemory, min_confidence: f64, agent_name: &str) -> Option<ExtractedMemory> {
    let memory_type = MemoryType::from_str(raw.memory_type?.as_str())?;
    let content = raw.content?;
    if content.trim().is_empty() {
        return None;
    }
    let confidence = raw.confidence.unwrap_or(0.0);
    if confidence < min_confidence {
        return None;
    }
    let tags = raw.tags.unwrap_or_default().into_iter().collect::<BTreeSet<_>>();
    let (scope, scope_confidence, scope_reasoning) = detect_scope(&content);
    Some(ExtractedMemory {
        memory_type,
        content: normalize_third_person(&content, agent_name),
        tags,
        confidence,
        scope,
        scope_confidence,
        scope_reasoning,
    })
}

/// Rewrites first-person self-reference into third-person user-reference form
/// so a stored memory reads naturally when injected back into a future prompt.
fn normalize_third_person(content: &str, agent_name: &str) -> String {
    let replacements: &[(&str, &str)] = &[
        ("I am ", "the user is "),
        ("I'm ", "the user is "),
        ("I have ", "the user has "),
        ("I've ", "the user has "),
        ("I like ", "the user likes "),
        ("I prefer ", "the user prefers "),
        ("I want ", "the user wants "),
        ("I need ", "the user needs "),
        ("my ", "their "),
        ("My ", "their "),
        ("me", agent_name),
    ];
    let mut out = content.to_string();
    for (from, to) in replacements {
        if out.starts_with(from) {
            out = format!("{to}{}", &out[from.len()..]);
            break;
        }
    }
    out
}

fn parse_json_object(raw: &str) -> Option<RawExtraction> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&raw[start..=end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pearl_backends::providers::mock::MockProvider;

    #[tokio::test]
    async fn trivial_message_skips_llm_entirely() {
        let backend = MockProvider::new();
        let extractor = Extractor::new(&backend, ExtractorOptions::default());
        let result = extractor.extract("nova", "hi").await;
        assert!(result.memories.is_empty());
        assert!(result.error.is_none());
    }

    #[test]
    fn triviality_filter_catches_short_and_greeting_and_ack() {
        assert!(is_trivial("hi", 20));
        assert!(is_trivial("thanks!", 20));
        assert!(is_trivial("ok", 20));
        assert!(!is_trivial("I prefer dark mode in every editor I use daily", 20));
    }

    #[test]
    fn triviality_filter_respects_configured_char_threshold() {
        assert!(is_trivial("fourteen chars", 20));
        assert!(!is_trivial("fourteen chars", 10));
    }

    #[test]
    fn validate_drops_entries_missing_required_fields() {
        let missing_content = RawExtractedMemory {
            memory_type: Some("fact".into()),
            content: None,
            tags: None,
            confidence: Some(0.9),
        };
        assert!(validate(missing_content, 0.7, "nova").is_none());

        let missing_type = RawExtractedMemory {
            memory_type: None,
            content: Some("likes tea".into()),
            tags: None,
            confidence: Some(0.9),
        };
        assert!(validate(missing_type, 0.7, "nova").is_none());
    }

    #[test]
    fn validate_drops_low_confidence_entries() {
        let low_conf = RawExtractedMemory {
            memory_type: Some("fact".into()),
            content: Some("likes tea".into()),
            tags: None,
            confidence: Some(0.2),
        };
        assert!(validate(low_conf, 0.7, "nova").is_none());
    }

    #[test]
    fn validate_normalizes_first_person_to_third_person() {
        let raw = RawExtractedMemory {
            memory_type: Some("preference".into()),
            content: Some("I prefer dark mode".into()),
            tags: Some(vec!["ui".into()]),
            confidence: Some(0.9),
        };
        let m = validate(raw, 0.7, "nova").unwrap();
        assert_eq!(m.content, "the user prefers dark mode");
        assert_eq!(m.memory_type, MemoryType::Preference);
    }

    #[test]
    fn malformed_json_never_panics_and_yields_empty() {
        assert!(parse_json_object("not json at all").is_none());
        assert!(parse_json_object("").is_none());
    }

    #[test]
    fn explicit_global_marker_overrides_default_agent_scope() {
        let raw = RawExtractedMemory {
            memory_type: Some("rule".into()),
            content: Some("For all agents: use concise responses".into()),
            tags: None,
            confidence: Some(0.9),
        };
        let m = validate(raw, 0.7, "nova").unwrap();
        assert_eq!(m.scope, Scope::Global);
        assert!(m.scope_confidence >= 0.95);
        assert!(m.scope_reasoning.is_some());
    }

    #[test]
    fn no_marker_defaults_to_agent_scope() {
        let raw = RawExtractedMemory {
            memory_type: Some("preference".into()),
            content: Some("I prefer dark mode".into()),
            tags: None,
            confidence: Some(0.9),
        };
        let m = validate(raw, 0.7, "nova").unwrap();
        assert_eq!(m.scope, Scope::Agent);
        assert!(m.scope_reasoning.is_none());
    }

    #[test]
    fn unknown_memory_type_is_dropped() {
        let raw = RawExtractedMemory {
            memory_type: Some("nonsense".into()),
            content: Some("x".into()),
            tags: None,
            confidence: Some(0.9),
        };
        assert!(validate(raw, 0.7, "nova").is_none());
    }
}
