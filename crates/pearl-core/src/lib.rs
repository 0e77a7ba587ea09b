//! Classification, routing, and configuration primitives for the pearl chat gateway.
//!
//! Zero I/O — pure logic with no opinions about transport or persistence. Anything that
//! touches a socket, a file, or the clock for "now" lives in `pearl-store`, `pearl-backends`,
//! `pearl-memory`, or `pearl-server` instead.

pub mod classifier;
pub mod config;
pub mod content;
pub mod memory;
pub mod router;
pub mod rule;
pub mod similarity;
pub mod time;

pub use classifier::{Classifier, DimensionScores};
pub use config::{ConfigError, GatewayConfig, deep_merge, expand_env_vars};
pub use content::{ContentBlock, MessageContent};
pub use memory::{Memory, MemoryType, Scope, ScoredMemory};
pub use router::{RouteResult, Router};
pub use rule::{RoutingRule, RuleEngine, TokenComparator};
pub use similarity::{SimilarityError, cosine_similarity};

use serde::{Deserialize, Serialize};

/// A single chat message as accepted at the gateway boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: MessageContent,
}

/// Classification produced by the [`Classifier`] for one request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestClassification {
    pub complexity: Complexity,
    #[serde(rename = "type")]
    pub request_type: RequestType,
    pub sensitive: bool,
    pub estimated_tokens: u32,
    pub requires_tools: bool,
    pub weighted_score: f64,
    pub dimension_scores: DimensionScores,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RequestType {
    General,
    Code,
    Creative,
    Analysis,
    Chat,
}
