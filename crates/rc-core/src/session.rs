use crate::envelope::{parse_envelope, Rejection};
use crate::log_format::LogEntry;
use crate::timeline::{Applied, StateSection, Timeline};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Querying,
}

/// What happened to one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ingest {
    /// No query outstanding.
    Ignored,
    Rejected(Rejection),
    Opened { label: String },
    Appended(LogEntry),
    Dropped,
}

/// Folds the inbound event stream into a [`Timeline`] while a query is
/// outstanding.
#[derive(Debug, Clone, Default)]
pub struct SessionAggregator {
    phase: Phase,
    timeline: Timeline,
}

impl SessionAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Must run before the request is sent so a fast first event lands in
    /// the fresh timeline.
    pub fn begin_query(&mut self) {
        self.timeline.reset();
        self.phase = Phase::Querying;
    }

    pub fn ingest(&mut self, frame: &Value) -> Ingest {
        if self.phase != Phase::Querying {
            return Ingest::Ignored;
        }
        let envelope = match parse_envelope(frame) {
            Ok(envelope) => envelope,
            Err(rejection) => return Ingest::Rejected(rejection),
        };
        match self.timeline.apply(&envelope) {
            Applied::Opened { index, .. } => Ingest::Opened {
                label: self.timeline.sections()[index].label().to_string(),
            },
            Applied::Appended { entry, .. } => Ingest::Appended(entry),
            Applied::Dropped => Ingest::Dropped,
        }
    }

    /// Completion and failure both end here; the timeline is kept for
    /// inspection.
    pub fn finish_query(&mut self) {
        self.timeline.freeze();
        self.phase = Phase::Idle;
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_querying(&self) -> bool {
        self.phase == Phase::Querying
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn active_label(&self) -> Option<&str> {
        self.timeline.active_label()
    }

    pub fn active_logs(&self) -> &[LogEntry] {
        self.timeline.active_logs()
    }

    pub fn closed_sections(&self) -> impl Iterator<Item = &StateSection> + '_ {
        self.timeline.closed_sections()
    }
}
