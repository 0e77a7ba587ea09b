//! Request log: one JSON line per chat-completion request, for observability.

use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u32,
    pub output: u32,
    pub total: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestLogEntry {
    pub ts: u64,
    pub id: String,
    pub agent_id: String,
    pub session_id: String,
    pub requested_model: String,
    pub routed_model: String,
    pub prompt: String,
    pub response_preview: String,
    pub tokens: TokenUsage,
    pub duration_ms: u64,
    pub stream: bool,
    pub rule: Option<String>,
}

impl RequestLogEntry {
    /// Truncates `prompt`/`response_preview` to the first 200 characters, as the
    /// external request-log contract requires.
    pub fn truncate_previews(mut self) -> Self {
        self.prompt = truncate_chars(&self.prompt, 200);
        self.response_preview = truncate_chars(&self.response_preview, 200);
        self
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// A single append-only writer behind a mutex — the file handle is opened once at
/// startup and shared, mirroring the store's single-writer discipline scaled down
/// to a plain file.
pub struct RequestLog {
    file: Mutex<std::fs::File>,
}

impl RequestLog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(RequestLog {
            file: Mutex::new(file),
        })
    }

    pub fn append(&self, entry: &RequestLogEntry) -> Result<()> {
        let entry = entry.clone().truncate_previews();
        let line = serde_json::to_string(&entry)?;
        let mut file = self.file.lock().expect("request log mutex poisoned");
        writeln!(file, "{line}")?;
        Ok(())
    }
}
