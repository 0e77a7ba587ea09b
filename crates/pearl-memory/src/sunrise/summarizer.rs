//! Produces a recovery summary from the recent transcript of a session.

use pearl_backends::ChatBackend;
use pearl_core::time::now_unix_secs;
use pearl_store::{TranscriptLog, TranscriptRecord};
use serde::{Deserialize, Serialize};

use crate::llm_text::{complete, system, user};

#[derive(Debug, Clone)]
pub struct SummarizerOptions {
    pub model: String,
    pub lookback_ms: u64,
    pub max_messages: usize,
    pub min_messages: usize,
}

impl Default for SummarizerOptions {
    fn default() -> Self {
        SummarizerOptions {
            model: "local/summary".to_string(),
            lookback_ms: 24 * 3_600_000,
            max_messages: 40,
            min_messages: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub timestamp: u64,
    pub recent_context: String,
    pub progress: String,
    #[serde(default)]
    pub decisions: Vec<String>,
    pub state: String,
    #[serde(default)]
    pub next_steps: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawSummary {
    recent_context: Option<String>,
    progress: Option<String>,
    #[serde(default)]
    decisions: Vec<String>,
    state: Option<String>,
    #[serde(default)]
    next_steps: Vec<String>,
}

pub struct Summarizer<'a> {
    backend: &'a dyn ChatBackend,
    opts: SummarizerOptions,
}

impl<'a> Summarizer<'a> {
    pub fn new(backend: &'a dyn ChatBackend, opts: SummarizerOptions) -> Self {
        Summarizer { backend, opts }
    }

    /// Reads recent transcript messages within `lookback_ms`, capped at
    /// `max_messages`. Returns `None` (no summary, never an error) if there
    /// aren't at least `min_messages` in range, or if the backend call fails.
    pub async fn summarize(&self, transcript: &TranscriptLog, agent_id: &str, session_id: &str) -> Option<SessionSummary> {
        let all = transcript.read_session(agent_id, session_id).ok()?;
        let now = now_unix_secs();
        let cutoff = now.saturating_sub(self.opts.lookback_ms / 1000);

        let mut recent: Vec<&TranscriptRecord> =
            all.iter().filter(|r| r.timestamp >= cutoff).collect();
        if recent.len() > self.opts.max_messages {
            recent = recent.split_off(recent.len() - self.opts.max_messages);
        }
        if recent.len() < self.opts.min_messages {
            return None;
        }

        let transcript_text = recent
            .iter()
            .map(|r| format!("{}: {}", r.role, r.content))
            .collect::<Vec<_>>()
            .join("\n");

        let raw = complete(self.backend, &self.opts.model, prompt(&transcript_text))
            .await
            .ok()?;
        let parsed: RawSummary = parse_json_object(&raw)?;

        Some(SessionSummary {
            timestamp: now,
            recent_context: parsed.recent_context.unwrap_or_default(),
            progress: parsed.progress.unwrap_or_default(),
            decisions: parsed.decisions,
            state: parsed.state.unwrap_or_default(),
            next_steps: parsed.next_steps,
        })
    }
}

fn prompt(transcript_text: &str) -> Vec<pearl_core::ChatMessage> {
    vec![
        system(
            "Summarize this conversation so it can be recovered after a break. \
             Respond with JSON only: {\"recent_context\":...,\"progress\":...,\"decisions\":[...],\"state\":...,\"next_steps\":[...]}.",
        ),
        user(transcript_text),
    ]
}

fn parse_json_object(raw: &str) -> Option<RawSummary> {
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
    use tempfile::tempdir;

    #[tokio::test]
    async fn refuses_to_summarize_below_min_messages() {
        let dir = tempdir().unwrap();
        let transcript = TranscriptLog::new(dir.path());
        transcript
            .append(
                "nova",
                "s1",
                &TranscriptRecord { role: "user".into(), content: "hi".into(), timestamp: now_unix_secs(), message_id: "m1".into() },
            )
            .unwrap();
        let backend = MockProvider::new();
        let summarizer = Summarizer::new(&backend, SummarizerOptions { min_messages: 2, ..Default::default() });
        let summary = summarizer.summarize(&transcript, "nova", "s1").await;
        assert!(summary.is_none());
    }

    #[tokio::test]
    async fn missing_session_yields_no_summary() {
        let dir = tempdir().unwrap();
        let transcript = TranscriptLog::new(dir.path());
        let backend = MockProvider::new();
        let summarizer = Summarizer::new(&backend, SummarizerOptions::default());
        let summary = summarizer.summarize(&transcript, "nova", "unseen").await;
        assert!(summary.is_none());
    }
}
