use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Display;

pub const FAILURE_HINT: &str = "Check the log console above for details. If the connection seems stuck, try restarting the console.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Answer,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub content: String,
    pub kind: EntryKind,
}

/// Results shown below the log console, oldest first.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_answer(&mut self, content: impl Into<String>) -> &TranscriptEntry {
        self.push(EntryKind::Answer, content.into())
    }

    pub fn push_failure(&mut self, detail: impl Display) -> &TranscriptEntry {
        self.push(EntryKind::Failure, failure_text(detail))
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn push(&mut self, kind: EntryKind, content: String) -> &TranscriptEntry {
        let timestamp = Utc::now();
        let id = format!("{}-{}", timestamp.timestamp_millis(), self.entries.len());
        self.entries.push(TranscriptEntry {
            id,
            timestamp,
            content,
            kind,
        });
        &self.entries[self.entries.len() - 1]
    }
}

pub fn failure_text(detail: impl Display) -> String {
    format!("Error: {detail}\n\n{FAILURE_HINT}")
}
