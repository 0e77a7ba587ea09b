//! Decides whether a session needs a recovery summary prepended before the
//! request proceeds.

use std::collections::HashSet;
use std::sync::Mutex;

use pearl_core::time::now_unix_secs;
use pearl_store::TranscriptLog;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryReason {
    Forced,
    AlreadyRecovered,
    NewSession,
    Gap,
    Error,
}

#[derive(Debug, Clone, Copy)]
pub struct DetectionResult {
    pub needs_recovery: bool,
    pub reason: Option<RecoveryReason>,
}

fn no_recovery() -> DetectionResult {
    DetectionResult { needs_recovery: false, reason: None }
}

fn recovery(reason: RecoveryReason) -> DetectionResult {
    DetectionResult { needs_recovery: true, reason: Some(reason) }
}

/// Tracks which `(agent_id, session_id)` pairs have already been recovered so
/// a later request in the same session doesn't re-inject a summary.
#[derive(Default)]
pub struct Detector {
    recovered: Mutex<HashSet<(String, String)>>,
    gap_threshold_ms: u64,
}

impl Detector {
    pub fn new(gap_threshold_ms: u64) -> Self {
        Detector {
            recovered: Mutex::new(HashSet::new()),
            gap_threshold_ms,
        }
    }

    pub fn detect(
        &self,
        transcript: &TranscriptLog,
        agent_id: &str,
        session_id: &str,
        force_sunrise: bool,
    ) -> DetectionResult {
        if force_sunrise {
            return recovery(RecoveryReason::Forced);
        }

        let key = (agent_id.to_string(), session_id.to_string());
        if self.recovered.lock().unwrap().contains(&key) {
            return recovery(RecoveryReason::AlreadyRecovered);
        }

        if !transcript.session_exists(agent_id, session_id) {
            return recovery(RecoveryReason::NewSession);
        }

        // A read failure is treated defensively: recover rather than risk
        // silently skipping a summary the user actually needed.
        match transcript.read_session(agent_id, session_id) {
            Ok(records) => match records.last() {
                Some(last) => {
                    let now = now_unix_secs();
                    let gap_ms = now.saturating_sub(last.timestamp) * 1000;
                    if gap_ms > self.gap_threshold_ms {
                        recovery(RecoveryReason::Gap)
                    } else {
                        no_recovery()
                    }
                }
                None => recovery(RecoveryReason::NewSession),
            },
            Err(_) => recovery(RecoveryReason::Error),
        }
    }

    /// Marks a session recovered so later calls short-circuit to
    /// `already_recovered` until `forget` is called.
    pub fn mark_recovered(&self, agent_id: &str, session_id: &str) {
        self.recovered
            .lock()
            .unwrap()
            .insert((agent_id.to_string(), session_id.to_string()));
    }

    pub fn forget(&self, agent_id: &str, session_id: &str) {
        self.recovered
            .lock()
            .unwrap()
            .remove(&(agent_id.to_string(), session_id.to_string()));
    }
}
