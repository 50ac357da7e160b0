use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use rc_client::{finish_query, ClientError, ConnectionManager, ConnectionStatus, ResearchResponse};
use rc_core::{Ingest, SessionAggregator, Transcript};
use serde_json::Value;
use std::collections::HashSet;
use tokio::task::JoinError;
use tracing::debug;

pub const QUERY_PLACEHOLDER: &str = "Ask anything...";
pub const WAITING_FOR_SESSION: &str = "Waiting for a session from the server...";

/// What the event loop has to do after a key press.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    None,
    Submit(String),
    SaveServer(String),
    Quit,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsDialog {
    pub buffer: String,
    pub note: Option<String>,
    pub error: Option<String>,
}

pub struct App {
    pub input: String,
    pub settings: Option<SettingsDialog>,
    pub aggregator: SessionAggregator,
    pub transcript: Transcript,
    pub selected: usize,
    pub expanded: HashSet<usize>,
    pub show_help: bool,
    pub status_note: Option<String>,
    pub scroll_back: u16,
    pub tick: usize,
    pub server_url: Option<String>,
    pub connection_status: ConnectionStatus,
    pub connection_id: Option<String>,
    pub should_quit: bool,
}

impl App {
    pub fn new(server_url: Option<String>) -> Self {
        Self {
            input: String::new(),
            settings: None,
            aggregator: SessionAggregator::new(),
            transcript: Transcript::new(),
            selected: 0,
            expanded: HashSet::new(),
            show_help: false,
            status_note: None,
            scroll_back: 0,
            tick: 0,
            server_url,
            connection_status: ConnectionStatus::Idle,
            connection_id: None,
            should_quit: false,
        }
    }

    pub fn is_querying(&self) -> bool {
        self.aggregator.is_querying()
    }

    pub fn sync_connection(&mut self, server_url: Option<&str>, connection: &ConnectionManager) {
        self.server_url = server_url.map(str::to_string);
        self.connection_status = connection.status();
        self.connection_id = connection.connection_id();
        if connection.is_identity_assigned()
            && self.status_note.as_deref() == Some(WAITING_FOR_SESSION)
        {
            self.status_note = None;
        }
    }

    pub fn on_tick(&mut self) {
        self.tick = self.tick.wrapping_add(1);
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> Action {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        if ctrl && key.code == KeyCode::Char('c') {
            self.should_quit = true;
            return Action::Quit;
        }
        if self.settings.is_some() {
            return self.handle_settings_key(key);
        }
        if (ctrl && key.code == KeyCode::Char('s')) || key.code == KeyCode::F(2) {
            self.open_settings(None);
            return Action::None;
        }
        if self.show_help {
            if matches!(key.code, KeyCode::Char('?') | KeyCode::Esc) {
                self.show_help = false;
            }
            return Action::None;
        }

        match key.code {
            KeyCode::Esc => {
                self.should_quit = true;
                Action::Quit
            }
            KeyCode::Char('?') if self.input.is_empty() => {
                self.show_help = true;
                Action::None
            }
            KeyCode::Enter => {
                let query = self.input.trim();
                if self.is_querying() || query.is_empty() {
                    Action::None
                } else {
                    Action::Submit(query.to_string())
                }
            }
            KeyCode::Up => {
                self.move_selection(-1);
                Action::None
            }
            KeyCode::Down => {
                self.move_selection(1);
                Action::None
            }
            KeyCode::PageUp => {
                self.scroll_back = self.scroll_back.saturating_add(5);
                Action::None
            }
            KeyCode::PageDown => {
                self.scroll_back = self.scroll_back.saturating_sub(5);
                Action::None
            }
            KeyCode::Char(' ') if self.input.is_empty() && self.can_browse() => {
                self.toggle_selected();
                Action::None
            }
            KeyCode::Backspace => {
                if !self.is_querying() {
                    self.input.pop();
                }
                Action::None
            }
            KeyCode::Char(c) if !ctrl => {
                if !self.is_querying() {
                    self.input.push(c);
                }
                Action::None
            }
            _ => Action::None,
        }
    }

    fn handle_settings_key(&mut self, key: KeyEvent) -> Action {
        let Some(dialog) = self.settings.as_mut() else {
            return Action::None;
        };
        match key.code {
            KeyCode::Esc => {
                self.settings = None;
                Action::None
            }
            KeyCode::Enter => Action::SaveServer(dialog.buffer.trim().to_string()),
            KeyCode::Backspace => {
                dialog.buffer.pop();
                dialog.error = None;
                Action::None
            }
            KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
                dialog.buffer.push(c);
                dialog.error = None;
                Action::None
            }
            _ => Action::None,
        }
    }

    pub fn open_settings(&mut self, note: Option<String>) {
        self.show_help = false;
        self.settings = Some(SettingsDialog {
            buffer: self.server_url.clone().unwrap_or_default(),
            note,
            error: None,
        });
    }

    pub fn server_saved(&mut self, url: &str) {
        self.settings = None;
        self.server_url = Some(url.to_string());
        self.status_note = Some(format!("Connecting to {url}"));
    }

    pub fn server_rejected(&mut self, err: &ClientError) {
        if let Some(dialog) = self.settings.as_mut() {
            dialog.error = Some(err.to_string());
        }
    }

    pub fn query_started(&mut self) {
        self.input.clear();
        self.selected = 0;
        self.expanded.clear();
        self.scroll_back = 0;
        self.status_note = None;
    }

    pub fn ingest(&mut self, frame: &Value) {
        match self.aggregator.ingest(frame) {
            Ingest::Rejected(reason) => debug!(event = "frame_rejected", reason = %reason),
            Ingest::Dropped => debug!(event = "frame_dropped", reason = "no active section"),
            _ => {}
        }
    }

    pub fn finish(&mut self, result: Result<Result<ResearchResponse, ClientError>, JoinError>) {
        let outcome = finish_query(&mut self.aggregator, &mut self.transcript, result);
        self.selected = self.aggregator.timeline().sections().len().saturating_sub(1);
        self.scroll_back = 0;
        self.status_note = outcome.err().map(|_| "Query failed".to_string());
    }

    /// The frozen timeline can be browsed once the query is over.
    pub fn can_browse(&self) -> bool {
        !self.is_querying() && !self.aggregator.timeline().is_empty()
    }

    fn move_selection(&mut self, delta: isize) {
        if !self.can_browse() {
            return;
        }
        let len = self.aggregator.timeline().sections().len();
        let next = (self.selected as isize + delta).clamp(0, len as isize - 1);
        self.selected = next as usize;
    }

    fn toggle_selected(&mut self) {
        if !self.expanded.remove(&self.selected) {
            self.expanded.insert(self.selected);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn ctrl(c: char) -> KeyEvent {
        KeyEvent::new(KeyCode::Char(c), KeyModifiers::CONTROL)
    }

    fn type_text(app: &mut App, text: &str) {
        for c in text.chars() {
            app.handle_key(key(KeyCode::Char(c)));
        }
    }

    fn transition(from: &str, to: &str) -> Value {
        json!({ "type": "state_transition", "timestamp": "2025-03-01T10:00:00Z",
                "data": { "from": from, "to": to } })
    }

    fn completed(app: &mut App) {
        app.finish(Ok(Ok(ResearchResponse(json!({ "content": "done" })))));
    }

    #[test]
    fn enter_submits_trimmed_query() {
        let mut app = App::new(None);
        type_text(&mut app, "  rainfall data ");
        assert_eq!(
            app.handle_key(key(KeyCode::Enter)),
            Action::Submit("rainfall data".to_string())
        );

        let mut blank = App::new(None);
        type_text(&mut blank, "   ");
        assert_eq!(blank.handle_key(key(KeyCode::Enter)), Action::None);
    }

    #[test]
    fn query_bar_is_read_only_while_querying() {
        let mut app = App::new(None);
        type_text(&mut app, "first");
        app.aggregator.begin_query();
        app.query_started();

        type_text(&mut app, "second");
        app.handle_key(key(KeyCode::Backspace));
        assert!(app.input.is_empty());

        app.input = "queued".to_string();
        assert_eq!(app.handle_key(key(KeyCode::Enter)), Action::None);
    }

    #[test]
    fn question_mark_toggles_help_only_on_empty_input() {
        let mut app = App::new(None);
        app.handle_key(key(KeyCode::Char('?')));
        assert!(app.show_help);
        app.handle_key(key(KeyCode::Char('x')));
        assert!(app.input.is_empty());
        app.handle_key(key(KeyCode::Char('?')));
        assert!(!app.show_help);

        type_text(&mut app, "why?");
        assert_eq!(app.input, "why?");
        assert!(!app.show_help);
    }

    #[test]
    fn settings_dialog_edits_and_saves_server() {
        let mut app = App::new(Some("http://old:8000".to_string()));
        app.handle_key(ctrl('s'));
        assert_eq!(
            app.settings.as_ref().map(|d| d.buffer.as_str()),
            Some("http://old:8000")
        );

        for _ in 0.."8000".len() {
            app.handle_key(key(KeyCode::Backspace));
        }
        type_text(&mut app, "9000");
        assert_eq!(
            app.handle_key(key(KeyCode::Enter)),
            Action::SaveServer("http://old:9000".to_string())
        );

        app.server_saved("http://old:9000");
        assert!(app.settings.is_none());
        assert_eq!(app.server_url.as_deref(), Some("http://old:9000"));
    }

    #[test]
    fn settings_dialog_cancels_and_shows_errors() {
        let mut app = App::new(None);
        app.handle_key(key(KeyCode::F(2)));
        type_text(&mut app, "ftp://x");
        app.server_rejected(&ClientError::InvalidServerUrl {
            url: "ftp://x".to_string(),
            reason: "unsupported scheme".to_string(),
        });
        assert!(app.settings.as_ref().and_then(|d| d.error.as_ref()).is_some());

        assert_eq!(app.handle_key(key(KeyCode::Esc)), Action::None);
        assert!(app.settings.is_none());
        assert!(!app.should_quit);
    }

    #[test]
    fn escape_and_ctrl_c_quit() {
        let mut app = App::new(None);
        assert_eq!(app.handle_key(key(KeyCode::Esc)), Action::Quit);

        let mut app = App::new(None);
        app.handle_key(key(KeyCode::F(2)));
        assert_eq!(app.handle_key(ctrl('c')), Action::Quit);
        assert!(app.should_quit);
    }

    #[test]
    fn accordion_browses_frozen_timeline() {
        let mut app = App::new(None);
        app.aggregator.begin_query();
        app.query_started();
        app.ingest(&transition("A", "B"));
        app.ingest(&transition("B", "C"));

        app.handle_key(key(KeyCode::Char(' ')));
        assert!(app.expanded.is_empty(), "no browsing mid-query");

        completed(&mut app);
        assert_eq!(app.selected, 1);

        app.handle_key(key(KeyCode::Up));
        app.handle_key(key(KeyCode::Up));
        assert_eq!(app.selected, 0);
        app.handle_key(key(KeyCode::Char(' ')));
        assert!(app.expanded.contains(&0));
        app.handle_key(key(KeyCode::Char(' ')));
        assert!(!app.expanded.contains(&0));

        app.handle_key(key(KeyCode::Down));
        app.handle_key(key(KeyCode::Down));
        assert_eq!(app.selected, 1);
    }

    #[test]
    fn finish_records_transcript_and_failure_note() {
        let mut app = App::new(None);
        app.aggregator.begin_query();
        app.finish(Ok(Err(ClientError::RequestFailed {
            status: 503,
            reason: "Service Unavailable".to_string(),
        })));
        assert_eq!(app.status_note.as_deref(), Some("Query failed"));
        assert_eq!(app.transcript.entries().len(), 1);

        app.aggregator.begin_query();
        completed(&mut app);
        assert_eq!(app.status_note, None);
        assert_eq!(app.transcript.entries().len(), 2);
    }
}
