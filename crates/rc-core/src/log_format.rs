use crate::envelope::{Envelope, EventKind};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

/// One rendered console line. Built once by [`format_envelope`] and never
/// changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    id: String,
    timestamp: DateTime<Utc>,
    text: String,
    kind: EventKind,
}

impl LogEntry {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn kind(&self) -> &EventKind {
        &self.kind
    }
}

pub fn format_envelope(envelope: &Envelope) -> LogEntry {
    let timestamp = envelope.instant();
    LogEntry {
        id: entry_id(timestamp),
        timestamp,
        text: render_text(envelope),
        kind: envelope.kind.clone(),
    }
}

pub fn render_text(envelope: &Envelope) -> String {
    match &envelope.kind {
        EventKind::StateTransition => format!(
            "State: {} → {}",
            field_text(envelope, "from"),
            field_text(envelope, "to")
        ),
        EventKind::SubStateLog => field_text(envelope, "action"),
        EventKind::Info => field_text(envelope, "message"),
        EventKind::Error => format!("Error: {}", field_text(envelope, "error")),
        EventKind::ChainStart => {
            format!("Chain started: {}", field_or(envelope, "name", "unnamed"))
        }
        EventKind::ChainEnd => {
            format!("Chain completed: {}", field_or(envelope, "name", "unnamed"))
        }
        EventKind::ToolStart => {
            format!("Tool started: {}", field_or(envelope, "tool", "unknown"))
        }
        EventKind::ToolEnd => {
            format!("Tool completed: {}", field_or(envelope, "tool", "unknown"))
        }
        EventKind::Unknown(_) => {
            serde_json::to_string(&envelope.data).unwrap_or_else(|_| "null".to_string())
        }
    }
}

fn entry_id(timestamp: DateTime<Utc>) -> String {
    format!("{}-{}", timestamp.timestamp_millis(), Uuid::new_v4().simple())
}

fn field_text(envelope: &Envelope, key: &str) -> String {
    match envelope.field(key) {
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

fn field_or(envelope: &Envelope, key: &str, fallback: &str) -> String {
    let text = field_text(envelope, key);
    if text.is_empty() {
        fallback.to_string()
    } else {
        text
    }
}
