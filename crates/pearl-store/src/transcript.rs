//! Append-only per-(agent, session) transcript log, one JSON line per message.

use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptRecord {
    pub role: String,
    pub content: String,
    pub timestamp: u64,
    pub message_id: String,
}

/// Writes to and reads from `{dir}/{agent_id}/{session_id}.jsonl`.
pub struct TranscriptLog {
    dir: PathBuf,
}

impl TranscriptLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        TranscriptLog { dir: dir.into() }
    }

    fn path_for(&self, agent_id: &str, session_id: &str) -> PathBuf {
        self.dir.join(sanitize(agent_id)).join(format!("{}.jsonl", sanitize(session_id)))
    }

    pub fn append(&self, agent_id: &str, session_id: &str, record: &TranscriptRecord) -> Result<()> {
        let path = self.path_for(agent_id, session_id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let line = serde_json::to_string(record)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// Reads all records for a session, oldest first. Missing file is an empty transcript.
    pub fn read_session(&self, agent_id: &str, session_id: &str) -> Result<Vec<TranscriptRecord>> {
        let path = self.path_for(agent_id, session_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = std::fs::File::open(path)?;
        let reader = BufReader::new(file);
        let mut out = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            out.push(serde_json::from_str(&line)?);
        }
        Ok(out)
    }

    /// True iff any transcript file exists for this session (used by the sunrise
    /// detector's `new_session` check).
    pub fn session_exists(&self, agent_id: &str, session_id: &str) -> bool {
        self.path_for(agent_id, session_id).exists()
    }
}

fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
