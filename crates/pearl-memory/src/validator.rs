//! Detects assistant responses that claim to have remembered something when no
//! matching memory was actually created, and decides what to do about it.

use std::sync::LazyLock;

use regex::Regex;

static CLAIM_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)\bI(?:'ll| will) remember\b").unwrap(),
        Regex::new(r"(?i)\bnoted\b").unwrap(),
        Regex::new(r"(?i)\bsaved (to|in) (my )?memory\b").unwrap(),
        Regex::new(r"(?i)\bI've (made a note|noted that)\b").unwrap(),
        Regex::new(r"(?i)\bgot it,? I'll keep that in mind\b").unwrap(),
    ]
});

/// Suppresses a claim match when the surrounding text is actually a question
/// about remembering, a disclaimer, past-tense discussion, or technical
/// memory-as-in-RAM vocabulary rather than a present-tense commitment.
static EXCLUSION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)\bdo you remember\b").unwrap(),
        Regex::new(r"(?i)\bwill you remember\b").unwrap(),
        Regex::new(r"(?i)\bI don't (actually )?have (a |persistent )?memory\b").unwrap(),
        Regex::new(r"(?i)\bI (can't|cannot) (actually )?remember\b").unwrap(),
        Regex::new(r"(?i)\bI (remembered|noted) (that )?(earlier|before|last time)\b").unwrap(),
        Regex::new(r"(?i)\b(heap|stack|virtual|shared|cache) memory\b").unwrap(),
        Regex::new(r"(?i)\bmemory (leak|usage|allocation|address|bandwidth)\b").unwrap(),
        Regex::new(r"(?i)\bout of memory\b").unwrap(),
    ]
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardAction {
    AutoFix,
    Warn,
    LogOnly,
}

#[derive(Debug, Clone)]
pub enum GuardOutcome {
    /// No unmatched claim found, or found but suppressed by an exclusion pattern.
    NoClaim,
    /// A memory was created from the claimed content (`auto_fix`).
    Fixed { content: String },
    /// A warning string to surface to the caller (`warn`).
    Warning(String),
    /// A claim was found and only logged (`log_only`).
    LoggedOnly,
}

/// True iff `text` contains a persistence claim not covered by an exclusion pattern.
pub fn contains_unmatched_claim(text: &str) -> bool {
    if EXCLUSION_PATTERNS.iter().any(|re| re.is_match(text)) {
        return false;
    }
    CLAIM_PATTERNS.iter().any(|re| re.is_match(text))
}

/// Checks `assistant_text` for a persistence claim and, if one exists and
/// `existing_memory_ids` is empty (nothing was actually created for this turn),
/// applies `action`.
pub fn guard(assistant_text: &str, existing_memory_ids: &[String], action: GuardAction) -> GuardOutcome {
    if !existing_memory_ids.is_empty() || !contains_unmatched_claim(assistant_text) {
        return GuardOutcome::NoClaim;
    }
    match action {
        GuardAction::AutoFix => GuardOutcome::Fixed {
            content: assistant_text.to_string(),
        },
        GuardAction::Warn => GuardOutcome::Warning(
            "the assistant said it would remember something, but nothing was saved".to_string(),
        ),
        GuardAction::LogOnly => {
            tracing::warn!(text = %assistant_text, "unmatched persistence claim");
            GuardOutcome::LoggedOnly
        }
    }
}
