//! Event parsing, log formatting and the per-query timeline reducer for the
//! research console. Nothing in here does I/O.

pub mod envelope;
pub mod log_format;
pub mod session;
pub mod timeline;
pub mod transcript;

pub use envelope::{parse_envelope, Envelope, EventKind, Rejection, HANDSHAKE_TYPE};
pub use log_format::{format_envelope, render_text, LogEntry};
pub use session::{Ingest, Phase, SessionAggregator};
pub use timeline::{Applied, StateSection, Timeline};
pub use transcript::{EntryKind, Transcript, TranscriptEntry};

/// Splits camelCase state labels into words for display.
pub fn humanize_label(label: &str) -> String {
    let mut out = String::with_capacity(label.len() + 4);
    let mut prev_lower = false;
    for ch in label.chars() {
        if prev_lower && ch.is_ascii_uppercase() {
            out.push(' ');
        }
        prev_lower = ch.is_ascii_lowercase();
        out.push(ch);
    }
    out
}
