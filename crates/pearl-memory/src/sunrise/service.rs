//! Orchestrates detection, summarization, and message-list formatting for a
//! single request.

use std::collections::HashMap;
use std::sync::Mutex;

use pearl_backends::ChatBackend;
use pearl_core::{ChatMessage, MessageContent};
use pearl_store::TranscriptLog;

use super::detector::Detector;
use super::summarizer::{SessionSummary, Summarizer, SummarizerOptions};

pub struct SunriseResult {
    pub messages: Vec<ChatMessage>,
    pub summary_injected: bool,
}

pub struct SunriseService {
    detector: Detector,
    summarizer_opts: SummarizerOptions,
    cache: Mutex<HashMap<(String, String), SessionSummary>>,
}

impl SunriseService {
    pub fn new(gap_threshold_ms: u64, summarizer_opts: SummarizerOptions) -> Self {
        SunriseService {
            detector: Detector::new(gap_threshold_ms),
            summarizer_opts,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn handle_request(
        &self,
        backend: &dyn ChatBackend,
        transcript: &TranscriptLog,
        agent_id: &str,
        session_id: &str,
        messages: &[ChatMessage],
        force_sunrise: bool,
    ) -> SunriseResult {
        let detection = self.detector.detect(transcript, agent_id, session_id, force_sunrise);
        if !detection.needs_recovery {
            return SunriseResult {
                messages: messages.to_vec(),
                summary_injected: false,
            };
        }

        let key = (agent_id.to_string(), session_id.to_string());
        let cached = self.cache.lock().unwrap().get(&key).cloned();
        let summary = match cached {
            Some(s) => Some(s),
            None => {
                let summarizer = Summarizer::new(backend, self.summarizer_opts.clone());
                let computed = summarizer.summarize(transcript, agent_id, session_id).await;
                if let Some(s) = &computed {
                    self.cache.lock().unwrap().insert(key, s.clone());
                }
                computed
            }
        };

        let Some(summary) = summary else {
            return SunriseResult {
                messages: messages.to_vec(),
                summary_injected: false,
            };
        };

        let block = format_summary(&summary);
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

        if !force_sunrise {
            self.detector.mark_recovered(agent_id, session_id);
        }

        SunriseResult {
            messages: out,
            summary_injected: true,
        }
    }
}

fn format_summary(summary: &SessionSummary) -> String {
    let mut out = String::from("## Session Recovery\n\n");
    out.push_str(&format!("**Context:** {}\n\n", summary.recent_context));
    out.push_str(&format!("**Progress:** {}\n\n", summary.progress));
    if !summary.decisions.is_empty() {
        out.push_str("**Decisions:**\n");
        for d in &summary.decisions {
            out.push_str(&format!("- {d}\n"));
        }
        out.push('\n');
    }
    out.push_str(&format!("**State:** {}\n", summary.state));
    if !summary.next_steps.is_empty() {
        out.push_str("\n**Next steps:**\n");
        for s in &summary.next_steps {
            out.push_str(&format!("- {s}\n"));
        }
    }
    out
}
