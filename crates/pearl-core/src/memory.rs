//! The `Memory` data model: the atomic unit of long-term state for an agent.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// The seven recognized memory types. Anything else is a validation error at the boundary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    Fact,
    Preference,
    Rule,
    Decision,
    Health,
    Reminder,
    Relationship,
}

impl MemoryType {
    pub const ALL: [MemoryType; 7] = [
        MemoryType::Fact,
        MemoryType::Preference,
        MemoryType::Rule,
        MemoryType::Decision,
        MemoryType::Health,
        MemoryType::Reminder,
        MemoryType::Relationship,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Fact => "fact",
            MemoryType::Preference => "preference",
            MemoryType::Rule => "rule",
            MemoryType::Decision => "decision",
            MemoryType::Health => "health",
            MemoryType::Reminder => "reminder",
            MemoryType::Relationship => "relationship",
        }
    }

    pub fn from_str(s: &str) -> Option<MemoryType> {
        MemoryType::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

/// Whether a memory applies to every agent, to its owner only, or was inferred.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Global,
    Agent,
    Inferred,
}

/// The atomic unit of long-term state for an agent.
///
/// The identifier is unique and monotonic by creation time (a UUIDv7-shaped id is
/// generated by the store on `create`; this type treats it as an opaque string so
/// pearl-core stays free of a time source).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Memory {
    pub id: String,
    pub agent_id: String,
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    pub content: String,
    pub tags: BTreeSet<String>,
    pub embedding: Option<Vec<f32>>,
    pub confidence: f64,
    pub created_at: u64,
    pub updated_at: u64,
    pub accessed_at: Option<u64>,
    pub access_count: u64,
    pub expires_at: Option<u64>,
    pub source_session_id: Option<String>,
    pub source_message_id: Option<String>,
    pub scope: Scope,
    pub scope_confidence: f64,
    pub target_agent_id: Option<String>,
    pub scope_reasoning: Option<String>,
}

impl Memory {
    /// True iff `embedding` has the claimed dimension, or is absent.
    pub fn embedding_matches_dimension(&self, dimension: usize) -> bool {
        match &self.embedding {
            Some(v) => v.len() == dimension,
            None => true,
        }
    }
}

/// A memory plus a relevance score in `[0, 1]`. Ephemeral — produced by the retriever,
/// never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredMemory {
    #[serde(flatten)]
    pub memory: Memory,
    pub score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_type_round_trips_through_str() {
        for t in MemoryType::ALL {
            assert_eq!(MemoryType::from_str(t.as_str()), Some(t));
        }
        assert_eq!(MemoryType::from_str("bogus"), None);
    }

    #[test]
    fn embedding_dimension_check_accepts_absent_embedding() {
        let m = Memory {
            id: "1".into(),
            agent_id: "a".into(),
            memory_type: MemoryType::Fact,
            content: "x".into(),
            tags: BTreeSet::new(),
            embedding: None,
            confidence: 1.0,
            created_at: 0,
            updated_at: 0,
            accessed_at: None,
            access_count: 0,
            expires_at: None,
            source_session_id: None,
            source_message_id: None,
            scope: Scope::Agent,
            scope_confidence: 1.0,
            target_agent_id: None,
            scope_reasoning: None,
        };
        assert!(m.embedding_matches_dimension(384));
    }
}
