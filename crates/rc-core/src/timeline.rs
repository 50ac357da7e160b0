use crate::envelope::Envelope;
use crate::log_format::{format_envelope, LogEntry};
use serde::Serialize;

/// A run of log entries attributed to one processing state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateSection {
    label: String,
    logs: Vec<LogEntry>,
    active: bool,
}

impl StateSection {
    fn open(label: String) -> Self {
        Self {
            label,
            logs: Vec::new(),
            active: true,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn logs(&self) -> &[LogEntry] {
        &self.logs
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// A transition opened a new section; `closed` is the index of the
    /// section it closed, if any.
    Opened { index: usize, closed: Option<usize> },
    Appended { index: usize, entry: LogEntry },
    /// No active section to attach the entry to.
    Dropped,
}

/// Ordered sections for one query. The last section is the only one that can
/// be active.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Timeline {
    sections: Vec<StateSection>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.sections.clear();
    }

    pub fn apply(&mut self, envelope: &Envelope) -> Applied {
        if envelope.kind.is_transition() {
            let label = envelope
                .field("to")
                .map(|value| match value.as_str() {
                    Some(text) => text.to_string(),
                    None => value.to_string(),
                })
                .unwrap_or_default();
            let closed = self.close_active();
            self.sections.push(StateSection::open(label));
            return Applied::Opened {
                index: self.sections.len() - 1,
                closed,
            };
        }

        match self.active_index() {
            Some(index) => {
                let entry = format_envelope(envelope);
                self.sections[index].logs.push(entry.clone());
                Applied::Appended { index, entry }
            }
            None => Applied::Dropped,
        }
    }

    /// Closes the active section without opening another.
    pub fn freeze(&mut self) -> Option<usize> {
        self.close_active()
    }

    pub fn sections(&self) -> &[StateSection] {
        &self.sections
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn is_frozen(&self) -> bool {
        self.active_index().is_none()
    }

    pub fn active_section(&self) -> Option<&StateSection> {
        self.active_index().map(|index| &self.sections[index])
    }

    pub fn active_label(&self) -> Option<&str> {
        self.active_section().map(StateSection::label)
    }

    pub fn active_logs(&self) -> &[LogEntry] {
        self.active_section()
            .map(StateSection::logs)
            .unwrap_or_default()
    }

    pub fn closed_sections(&self) -> impl Iterator<Item = &StateSection> + '_ {
        self.sections.iter().filter(|section| !section.active)
    }

    fn active_index(&self) -> Option<usize> {
        self.sections.iter().rposition(|section| section.active)
    }

    fn close_active(&mut self) -> Option<usize> {
        let index = self.active_index()?;
        self.sections[index].active = false;
        Some(index)
    }
}
