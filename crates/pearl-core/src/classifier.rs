//! The weighted 15-dimensional request classifier.
//!
//! Each dimension is scored in `[0, 1]` by counting pattern matches against the joined
//! message text, normalizing by a per-pattern threshold, and averaging across the
//! dimension's sub-patterns. The final `weightedScore` is the dimension scores' weighted
//! sum; weights are fixed constants that sum to 1.0.

use crate::{ChatMessage, Complexity, RequestClassification, RequestType};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Raw per-dimension scores, each in `[0, 1]`, in the order the weight table uses.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct DimensionScores {
    pub reasoning_markers: f64,
    pub code_presence: f64,
    pub technical_depth: f64,
    pub domain_specificity: f64,
    pub question_complexity: f64,
    pub context_length: f64,
    pub multilingual_content: f64,
    pub structured_output: f64,
    pub tool_requirements: f64,
    pub temporal_awareness: f64,
    pub creativity_markers: f64,
    pub conversational_flow: f64,
    pub sensitivity_level: f64,
    pub ambiguity: f64,
    pub custom_keywords: f64,
}

impl DimensionScores {
    fn weighted_sum(&self) -> f64 {
        self.reasoning_markers * WEIGHTS.reasoning_markers
            + self.code_presence * WEIGHTS.code_presence
            + self.technical_depth * WEIGHTS.technical_depth
            + self.domain_specificity * WEIGHTS.domain_specificity
            + self.question_complexity * WEIGHTS.question_complexity
            + self.context_length * WEIGHTS.context_length
            + self.multilingual_content * WEIGHTS.multilingual_content
            + self.structured_output * WEIGHTS.structured_output
            + self.tool_requirements * WEIGHTS.tool_requirements
            + self.temporal_awareness * WEIGHTS.temporal_awareness
            + self.creativity_markers * WEIGHTS.creativity_markers
            + self.conversational_flow * WEIGHTS.conversational_flow
            + self.sensitivity_level * WEIGHTS.sensitivity_level
            + self.ambiguity * WEIGHTS.ambiguity
            + self.custom_keywords * WEIGHTS.custom_keywords
    }

    fn mean(&self) -> f64 {
        let vals = self.as_array();
        vals.iter().sum::<f64>() / vals.len() as f64
    }

    fn max(&self) -> f64 {
        self.as_array().into_iter().fold(0.0_f64, f64::max)
    }

    fn as_array(&self) -> [f64; 15] {
        [
            self.reasoning_markers,
            self.code_presence,
            self.technical_depth,
            self.domain_specificity,
            self.question_complexity,
            self.context_length,
            self.multilingual_content,
            self.structured_output,
            self.tool_requirements,
            self.temporal_awareness,
            self.creativity_markers,
            self.conversational_flow,
            self.sensitivity_level,
            self.ambiguity,
            self.custom_keywords,
        ]
    }
}

struct Weights {
    reasoning_markers: f64,
    code_presence: f64,
    technical_depth: f64,
    domain_specificity: f64,
    question_complexity: f64,
    context_length: f64,
    multilingual_content: f64,
    structured_output: f64,
    tool_requirements: f64,
    temporal_awareness: f64,
    creativity_markers: f64,
    conversational_flow: f64,
    sensitivity_level: f64,
    ambiguity: f64,
    custom_keywords: f64,
}

const WEIGHTS: Weights = Weights {
    reasoning_markers: 0.18,
    code_presence: 0.15,
    technical_depth: 0.12,
    domain_specificity: 0.10,
    question_complexity: 0.08,
    context_length: 0.08,
    multilingual_content: 0.06,
    structured_output: 0.06,
    tool_requirements: 0.05,
    temporal_awareness: 0.04,
    creativity_markers: 0.03,
    conversational_flow: 0.02,
    sensitivity_level: 0.02,
    ambiguity: 0.01,
    custom_keywords: 0.01,
};

/// A compiled pattern plus the match-count it takes to saturate this pattern's score to 1.0.
struct Pattern {
    re: Regex,
    saturation: f64,
}

fn table(specs: &[(&str, f64)]) -> Vec<Pattern> {
    specs
        .iter()
        .map(|(pat, saturation)| Pattern {
            re: Regex::new(pat).expect("static classifier pattern must compile"),
            saturation: *saturation,
        })
        .collect()
}

/// Scores a pattern table against `text`: each pattern contributes
/// `min(1, matches / saturation)`, averaged across patterns in the table.
fn score_table(patterns: &[Pattern], text: &str) -> f64 {
    if patterns.is_empty() {
        return 0.0;
    }
    let sum: f64 = patterns
        .iter()
        .map(|p| {
            let matches = p.re.find_iter(text).count() as f64;
            (matches / p.saturation).min(1.0)
        })
        .sum();
    sum / patterns.len() as f64
}

static REASONING_MARKERS: LazyLock<Vec<Pattern>> = LazyLock::new(|| {
    table(&[
        (r"(?i)\bbecause\b", 2.0),
        (r"(?i)\btherefore\b", 1.0),
        (r"(?i)\bstep[ -]by[ -]step\b", 1.0),
        (r"(?i)\bwhy (does|is|do|did|would|should)\b", 1.0),
        (r"(?i)\bexplain\b", 1.0),
        (r"(?i)\breason(ing)?\b", 1.0),
        (r"(?i)\banalyz(e|ing)\b", 1.0),
        (r"(?i)\bprove\b", 1.0),
    ])
});

static CODE_PRESENCE: LazyLock<Vec<Pattern>> = LazyLock::new(|| {
    table(&[
        (r"```", 1.0),
        (r"(?i)\bfunction\b|\bfn \b|\bdef \b|\bclass \b", 1.0),
        (r"[{};]\s*$", 3.0),
        (r"(?i)\b(bug|error|exception|stack trace|compile|traceback)\b", 2.0),
        (r"\b\w+\(\)", 2.0),
    ])
});

static TECHNICAL_DEPTH: LazyLock<Vec<Pattern>> = LazyLock::new(|| {
    table(&[
        (r"(?i)\b(algorithm|architecture|protocol|runtime|concurrency|database|kernel|compiler)\b", 1.0),
        (r"(?i)\b(api|sdk|cli|http|tcp|json|sql|grpc|oauth)\b", 2.0),
        (r"(?i)\b(complexity|performance|optimi[sz]e|latency|throughput|scalability)\b", 1.0),
    ])
});

static DOMAIN_SPECIFICITY: LazyLock<Vec<Pattern>> = LazyLock::new(|| {
    table(&[
        (r"(?i)\b(diagnosis|symptom|statute|jurisdiction|equity|derivative|portfolio)\b", 1.0),
        (r"(?i)\b(clinical|legal|financial|regulatory|pharmaceutical)\b", 1.0),
    ])
});

static QUESTION_COMPLEXITY: LazyLock<Vec<Pattern>> = LazyLock::new(|| {
    table(&[
        (r"\?", 3.0),
        (r"(?i)\b(how|why)\b", 2.0),
        (r"(?i)\b(compare|versus|vs\.?|trade[ -]?off)\b", 1.0),
    ])
});

static MULTILINGUAL_CONTENT: LazyLock<Vec<Pattern>> = LazyLock::new(|| {
    table(&[
        (r"[\p{Han}]", 5.0),
        (r"[\p{Hiragana}\p{Katakana}]", 5.0),
        (r"[\p{Cyrillic}]", 5.0),
        (r"[\p{Arabic}]", 5.0),
    ])
});

static STRUCTURED_OUTPUT: LazyLock<Vec<Pattern>> = LazyLock::new(|| {
    table(&[
        (r"(?i)\b(json|yaml|csv|table|markdown|xml)\b", 1.0),
        (r"(?i)\bformat(ted)? as\b", 1.0),
        (r"(?i)\blist (of|the)\b", 2.0),
    ])
});

static TOOL_REQUIREMENTS: LazyLock<Vec<Pattern>> = LazyLock::new(|| {
    table(&[
        (r"(?i)\b(search|browse|fetch|call|invoke|run|execute)\b", 2.0),
        (r"(?i)\b(tool|function call|web search|plugin)\b", 1.0),
    ])
});

static TEMPORAL_AWARENESS: LazyLock<Vec<Pattern>> = LazyLock::new(|| {
    table(&[
        (r"(?i)\b(today|now|current|latest|recent|this (week|month|year))\b", 2.0),
        (r"\b(19|20)\d{2}\b", 2.0),
    ])
});

static CREATIVITY_MARKERS: LazyLock<Vec<Pattern>> = LazyLock::new(|| {
    table(&[
        (r"(?i)\b(story|poem|imagine|creative|fiction|metaphor|brainstorm)\b", 1.0),
        (r"(?i)\bwrite (a|an)\b", 2.0),
    ])
});

static CONVERSATIONAL_FLOW: LazyLock<Vec<Pattern>> = LazyLock::new(|| {
    table(&[
        (r"(?i)^(hi|hello|hey|thanks|thank you|ok|okay|cool|great|nice)\b", 1.0),
        (r"(?i)\bhow are you\b", 1.0),
    ])
});

static SENSITIVITY_LEVEL: LazyLock<Vec<Pattern>> = LazyLock::new(|| {
    table(&[
        (r"(?i)\b(password|ssn|social security|credit card|api[ _-]?key|secret|token)\b", 1.0),
        (r"(?i)\b(private|confidential|personal)\b", 2.0),
    ])
});

static AMBIGUITY: LazyLock<Vec<Pattern>> = LazyLock::new(|| {
    table(&[
        (r"(?i)\b(maybe|perhaps|something|somehow|i guess|not sure|kind of|sort of)\b", 2.0),
        (r"(?i)\bor (something|whatever)\b", 1.0),
    ])
});

/// A single per-keyword override: if the text matches, the classifier's output is forced
/// to this exact classification regardless of computed dimension scores.
#[derive(Debug, Clone)]
pub struct KeywordOverride {
    pub pattern: Regex,
    pub classification: RequestClassification,
}

/// Stateless classification engine. Holds no state of its own; `custom_keywords` are
/// supplied per call so config reloads take effect immediately.
pub struct Classifier;

impl Classifier {
    /// Classifies a message list. `overrides` are checked first, in order; the first
    /// match wins and short-circuits dimension scoring entirely.
    pub fn classify(
        messages: &[ChatMessage],
        overrides: &[KeywordOverride],
    ) -> RequestClassification {
        let joined = messages
            .iter()
            .map(|m| m.content.as_text())
            .collect::<Vec<_>>()
            .join("\n");

        for ov in overrides {
            if ov.pattern.is_match(&joined) {
                return ov.classification.clone();
            }
        }

        let latest_user = messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_text())
            .unwrap_or_default();

        let custom_keyword_score = if overrides.is_empty() {
            0.0
        } else {
            score_table(
                &overrides
                    .iter()
                    .map(|o| Pattern {
                        re: o.pattern.clone(),
                        saturation: 1.0,
                    })
                    .collect::<Vec<_>>(),
                &joined,
            )
        };

        let scores = DimensionScores {
            reasoning_markers: score_table(&REASONING_MARKERS, &joined),
            code_presence: score_table(&CODE_PRESENCE, &joined),
            technical_depth: score_table(&TECHNICAL_DEPTH, &joined),
            domain_specificity: score_table(&DOMAIN_SPECIFICITY, &joined),
            question_complexity: score_table(&QUESTION_COMPLEXITY, &joined),
            context_length: (joined.len() as f64 / 2000.0).min(1.0),
            multilingual_content: score_table(&MULTILINGUAL_CONTENT, &joined),
            structured_output: score_table(&STRUCTURED_OUTPUT, &joined),
            tool_requirements: score_table(&TOOL_REQUIREMENTS, &joined),
            temporal_awareness: score_table(&TEMPORAL_AWARENESS, &joined),
            creativity_markers: score_table(&CREATIVITY_MARKERS, &joined),
            conversational_flow: score_table(&CONVERSATIONAL_FLOW, &joined),
            sensitivity_level: score_table(&SENSITIVITY_LEVEL, &joined),
            ambiguity: score_table(&AMBIGUITY, &joined),
            custom_keywords: custom_keyword_score,
        };

        let weighted_score = scores.weighted_sum();

        let complexity = if weighted_score < 0.12 {
            Complexity::Low
        } else if weighted_score < 0.25 {
            Complexity::Medium
        } else {
            Complexity::High
        };

        let request_type = if scores.conversational_flow > 0.5 {
            RequestType::Chat
        } else if scores.code_presence > 0.3 || scores.technical_depth > 0.4 {
            RequestType::Code
        } else if scores.creativity_markers > 0.4 {
            RequestType::Creative
        } else if scores.reasoning_markers > 0.3 || scores.question_complexity > 0.4 {
            RequestType::Analysis
        } else {
            RequestType::General
        };

        let sensitive = scores.sensitivity_level > 0.5;
        let requires_tools = scores.tool_requirements > 0.5;
        let estimated_tokens = ((latest_user.chars().count() as f64) / 3.5).ceil() as u32;
        let confidence = (2.0 * (scores.max() - scores.mean())).min(1.0).max(0.0);

        RequestClassification {
            complexity,
            request_type,
            sensitive,
            estimated_tokens,
            requires_tools,
            weighted_score,
            dimension_scores: scores,
            confidence,
        }
    }
}
