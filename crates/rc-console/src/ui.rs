use crate::app::{App, SettingsDialog, QUERY_PLACEHOLDER};
use crate::markdown::render_markdown;
use crate::theme::{self, icons};
use chrono::Local;
use rc_core::{humanize_label, EntryKind, LogEntry, StateSection};
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
    Frame,
};

pub const EMPTY_STATE: &str = "What can I help you find?";
pub const PROCESSING: &str = "Processing query...";
pub const THINKING: &str = "Thinking...";
pub const NO_LOGS: &str = "No logs for this state";

pub fn render(f: &mut Frame, app: &App) {
    let area = f.size();
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(3),
            Constraint::Length(3),
            Constraint::Length(1),
        ])
        .split(area);

    render_header(f, app, rows[0]);
    if app.show_help {
        let cols = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
            .split(rows[1]);
        render_body(f, app, cols[0]);
        render_help(f, cols[1]);
    } else {
        render_body(f, app, rows[1]);
    }
    render_input(f, app, rows[2]);
    render_footer(f, app, rows[3]);

    if let Some(dialog) = &app.settings {
        render_settings(f, dialog, area);
    }
}

fn render_header(f: &mut Frame, app: &App, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title(Span::styled("Research Console", theme::HEADER_STYLE));
    let server = app.server_url.as_deref().unwrap_or("not set");
    let session = app.connection_id.as_deref().unwrap_or("-");
    let line = Line::from(vec![
        Span::styled("server ", Style::default().fg(theme::MUTED)),
        Span::raw(server.to_string()),
        Span::raw("  "),
        Span::styled(
            app.connection_status.as_str(),
            Style::default()
                .fg(theme::status_color(app.connection_status))
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled("  session ", Style::default().fg(theme::MUTED)),
        Span::raw(session.to_string()),
    ]);
    f.render_widget(Paragraph::new(line).block(block), area);
}

fn render_body(f: &mut Frame, app: &App, area: Rect) {
    let block = Block::default().borders(Borders::ALL).title("Research");
    let inner = block.inner(area);
    f.render_widget(block, area);

    let lines = body_lines(app, inner.width as usize);
    let overflow = lines.len().saturating_sub(inner.height as usize);
    let offset = overflow.saturating_sub(app.scroll_back as usize);
    let offset = u16::try_from(offset).unwrap_or(u16::MAX);
    f.render_widget(Paragraph::new(lines).scroll((offset, 0)), inner);
}

/// Lines of the main pane. Answers are rendered from Markdown and wrapped to
/// `width` here so the scroll offset can be computed from the line count.
pub fn body_lines(app: &App, width: usize) -> Vec<Line<'static>> {
    let mut lines = Vec::new();
    let spinner = theme::spinner_frame(app.tick);
    let timeline = app.aggregator.timeline();

    if app.is_querying() {
        for section in app.aggregator.closed_sections() {
            lines.push(section_row(section, false, false));
        }
        match timeline.active_section() {
            Some(active) => {
                lines.push(Line::from(vec![
                    Span::styled(format!("{spinner} "), Style::default().fg(theme::ACCENT)),
                    Span::styled(humanize_label(active.label()), theme::HEADER_STYLE),
                ]));
                if active.logs().is_empty() {
                    lines.push(muted_line(THINKING));
                } else {
                    lines.extend(active.logs().iter().map(log_line));
                }
            }
            None => lines.push(Line::from(vec![
                Span::styled(format!("{spinner} "), Style::default().fg(theme::ACCENT)),
                Span::styled(PROCESSING, Style::default().fg(theme::MUTED)),
            ])),
        }
    } else {
        for (index, section) in timeline.sections().iter().enumerate() {
            let expanded = app.expanded.contains(&index);
            lines.push(section_row(section, index == app.selected, expanded));
            if expanded {
                if section.logs().is_empty() {
                    lines.push(muted_line(NO_LOGS));
                } else {
                    lines.extend(section.logs().iter().map(log_line));
                }
            }
        }
    }

    if !app.transcript.is_empty() {
        if !lines.is_empty() {
            lines.push(Line::from(""));
        }
        for entry in app.transcript.entries() {
            let title = match entry.kind {
                EntryKind::Answer => "Answer",
                EntryKind::Failure => "Failed",
            };
            lines.push(Line::from(vec![
                Span::styled(title, theme::entry_style(entry.kind)),
                Span::styled(
                    format!("  {}", entry.timestamp.with_timezone(&Local).format("%H:%M:%S")),
                    Style::default().fg(theme::MUTED),
                ),
            ]));
            match entry.kind {
                EntryKind::Answer => lines.extend(render_markdown(&entry.content, width)),
                EntryKind::Failure => {
                    for raw in entry.content.lines() {
                        lines.extend(wrap_text(raw, width).into_iter().map(Line::from));
                    }
                }
            }
            lines.push(Line::from(""));
        }
    }

    if lines.is_empty() {
        lines.push(Line::from(Span::styled(
            EMPTY_STATE,
            Style::default().fg(theme::MUTED).add_modifier(Modifier::ITALIC),
        )));
    }
    lines
}

fn section_row(section: &StateSection, selected: bool, expanded: bool) -> Line<'static> {
    let icon = if expanded {
        icons::EXPANDED
    } else {
        icons::COLLAPSED
    };
    let count = section.logs().len();
    let style = if selected {
        theme::SELECTED_STYLE
    } else {
        Style::default()
    };
    Line::from(vec![
        Span::styled(format!("{icon} {} ", icons::DONE), style),
        Span::styled(humanize_label(section.label()), style),
        Span::styled(
            format!("  {count} log{}", if count == 1 { "" } else { "s" }),
            Style::default().fg(theme::MUTED),
        ),
    ])
}

fn log_line(entry: &LogEntry) -> Line<'static> {
    let time = entry.timestamp().with_timezone(&Local).format("%H:%M:%S");
    Line::from(vec![
        Span::styled(format!("    [{time}] "), Style::default().fg(theme::MUTED)),
        Span::styled(
            entry.text().to_string(),
            Style::default().fg(theme::log_color(entry.kind())),
        ),
    ])
}

fn muted_line(text: &str) -> Line<'static> {
    Line::from(Span::styled(
        format!("    {text}"),
        Style::default().fg(theme::MUTED),
    ))
}

fn render_input(f: &mut Frame, app: &App, area: Rect) {
    let querying = app.is_querying();
    let border = if querying {
        Style::default().fg(theme::MUTED)
    } else {
        Style::default().fg(theme::ACCENT)
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .title("Query")
        .border_style(border);
    let inner = block.inner(area);

    let text = if querying {
        Span::styled(PROCESSING, Style::default().fg(theme::MUTED))
    } else if app.input.is_empty() {
        Span::styled(QUERY_PLACEHOLDER, Style::default().fg(theme::MUTED))
    } else {
        Span::raw(app.input.clone())
    };
    f.render_widget(Paragraph::new(Line::from(text)).block(block), area);

    if !querying && app.settings.is_none() && !app.show_help {
        let typed = u16::try_from(app.input.chars().count()).unwrap_or(u16::MAX);
        let x = inner.x.saturating_add(typed).min(inner.right().saturating_sub(1));
        f.set_cursor(x, inner.y);
    }
}

fn render_footer(f: &mut Frame, app: &App, area: Rect) {
    let line = match &app.status_note {
        Some(note) => Line::from(Span::styled(
            note.clone(),
            Style::default().fg(Color::Yellow),
        )),
        None => Line::from(Span::styled(
            "Enter ask  Ctrl+S settings  ? help  Esc quit",
            Style::default().fg(theme::MUTED),
        )),
    };
    f.render_widget(Paragraph::new(line), area);
}

fn render_help(f: &mut Frame, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title("Help")
        .border_style(Style::default().fg(Color::Yellow));
    let inner = block.inner(area);
    f.render_widget(block, area);

    let keys = [
        ("Enter", "Submit query"),
        ("Up / Down", "Select state"),
        ("Space", "Expand/collapse state"),
        ("PgUp / PgDn", "Scroll"),
        ("Ctrl+S / F2", "Server settings"),
        ("?", "Toggle help"),
        ("Esc", "Quit"),
        ("Ctrl+C", "Quit"),
    ];
    let mut text = vec![
        Line::from(Span::styled(
            "Keyboard Shortcuts",
            Style::default().add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
    ];
    text.extend(keys.iter().map(|(key, what)| {
        Line::from(vec![
            Span::styled(format!("{key:<13}"), Color::Cyan),
            Span::raw(*what),
        ])
    }));
    f.render_widget(Paragraph::new(text).wrap(Wrap { trim: true }), inner);
}

fn render_settings(f: &mut Frame, dialog: &SettingsDialog, area: Rect) {
    let popup = centered_rect(60, 8, area);
    f.render_widget(Clear, popup);
    let block = Block::default()
        .borders(Borders::ALL)
        .title(Span::styled("Server address", theme::HEADER_STYLE))
        .border_style(Style::default().fg(theme::ACCENT));
    let inner = block.inner(popup);

    let mut text = vec![Line::from(dialog.buffer.clone())];
    if let Some(note) = &dialog.note {
        text.push(Line::from(Span::styled(note.clone(), Style::default().fg(Color::Yellow))));
    }
    if let Some(error) = &dialog.error {
        text.push(Line::from(Span::styled(error.clone(), Style::default().fg(Color::Red))));
    }
    text.push(Line::from(""));
    text.push(Line::from(Span::styled(
        "Enter save  Esc cancel",
        Style::default().fg(theme::MUTED),
    )));
    f.render_widget(Paragraph::new(text).block(block).wrap(Wrap { trim: false }), popup);

    let typed = u16::try_from(dialog.buffer.chars().count()).unwrap_or(u16::MAX);
    let x = inner.x.saturating_add(typed).min(inner.right().saturating_sub(1));
    f.set_cursor(x, inner.y);
}

fn centered_rect(percent_x: u16, height: u16, area: Rect) -> Rect {
    let width = area.width.saturating_mul(percent_x) / 100;
    let height = height.min(area.height);
    Rect {
        x: area.x + (area.width.saturating_sub(width)) / 2,
        y: area.y + (area.height.saturating_sub(height)) / 2,
        width,
        height,
    }
}

/// Greedy word wrap on character counts; words longer than `width` are split.
pub fn wrap_text(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut out = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;
    for word in text.split(' ') {
        let word_len = word.chars().count();
        if current_len > 0 && current_len + 1 + word_len > width {
            out.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if current_len > 0 {
            current.push(' ');
            current_len += 1;
        }
        current.push_str(word);
        current_len += word_len;
        while current_len > width {
            let head: String = current.chars().take(width).collect();
            current = current.chars().skip(width).collect();
            current_len -= width;
            out.push(head);
        }
    }
    out.push(current);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratatui::{backend::TestBackend, Terminal};
    use rc_client::ResearchResponse;
    use serde_json::{json, Value};

    fn text_of(lines: &[Line<'_>]) -> Vec<String> {
        lines
            .iter()
            .map(|line| line.spans.iter().map(|s| s.content.as_ref()).collect())
            .collect()
    }

    fn event(kind: &str, data: Value) -> Value {
        json!({ "type": kind, "timestamp": "2025-03-01T10:00:00Z", "data": data })
    }

    #[test]
    fn empty_app_shows_prompt() {
        let app = App::new(None);
        assert_eq!(text_of(&body_lines(&app, 80)), vec![EMPTY_STATE]);
    }

    #[test]
    fn querying_shows_processing_then_thinking_then_logs() {
        let mut app = App::new(None);
        app.aggregator.begin_query();
        let lines = text_of(&body_lines(&app, 80));
        assert!(lines[0].ends_with(PROCESSING));

        app.ingest(&event("state_transition", json!({ "from": "idle", "to": "gatherSources" })));
        let lines = text_of(&body_lines(&app, 80));
        assert!(lines[0].ends_with("gather Sources"));
        assert_eq!(lines[1].trim(), THINKING);

        app.ingest(&event("tool_start", json!({ "tool": "search" })));
        let lines = text_of(&body_lines(&app, 80));
        assert!(lines[1].starts_with("    ["));
        assert!(lines[1].ends_with("] Tool started: search"));
    }

    #[test]
    fn frozen_timeline_expands_selected_section() {
        let mut app = App::new(None);
        app.aggregator.begin_query();
        app.ingest(&event("state_transition", json!({ "from": "A", "to": "B" })));
        app.ingest(&event("info", json!({ "message": "found it" })));
        app.ingest(&event("state_transition", json!({ "from": "B", "to": "C" })));
        app.finish(Ok(Ok(ResearchResponse(json!({ "content": "the answer" })))));

        app.expanded.insert(0);
        app.expanded.insert(1);
        let lines = text_of(&body_lines(&app, 80));
        assert!(lines[0].contains("B"));
        assert!(lines[0].ends_with("1 log"));
        assert!(lines[1].ends_with("found it"));
        assert!(lines[2].contains("C"));
        assert_eq!(lines[3].trim(), NO_LOGS);
        assert!(lines.iter().any(|l| l.starts_with("Answer")));
        assert!(lines.iter().any(|l| l == "the answer"));
    }

    #[test]
    fn answer_markdown_renders_without_markers() {
        let mut app = App::new(None);
        app.aggregator.begin_query();
        let answer = "## Rainfall datasets\n\n- **NOAA** daily totals\n- County *gauges*";
        app.finish(Ok(Ok(ResearchResponse(json!({ "content": answer })))));

        let lines = text_of(&body_lines(&app, 80));
        assert!(lines.iter().any(|l| l == "Rainfall datasets"));
        assert!(lines.iter().any(|l| l == "• NOAA daily totals"));
        assert!(lines.iter().any(|l| l == "• County gauges"));
        assert!(!lines
            .iter()
            .any(|l| l.contains('#') || l.contains("**") || l.starts_with("- ")));
    }

    #[test]
    fn failures_stay_plain_text() {
        let mut app = App::new(None);
        app.aggregator.begin_query();
        app.finish(Ok(Err(rc_client::ClientError::RequestFailed {
            status: 500,
            reason: "Internal Server Error".to_string(),
        })));
        let lines = text_of(&body_lines(&app, 200));
        assert!(lines.iter().any(|l| l.starts_with("Failed")));
        assert!(lines
            .iter()
            .any(|l| l.contains("Research request failed: Internal Server Error")));
    }

    #[test]
    fn wrap_text_breaks_on_words_and_splits_long_ones() {
        assert_eq!(wrap_text("alpha beta gamma", 10), vec!["alpha beta", "gamma"]);
        assert_eq!(wrap_text("abcdefghij", 4), vec!["abcd", "efgh", "ij"]);
        assert_eq!(wrap_text("", 10), vec![""]);
    }

    #[test]
    fn renders_with_dialog_and_help() {
        let mut app = App::new(Some("http://localhost:8000".to_string()));
        app.open_settings(Some("Set a server address to start".to_string()));
        app.show_help = true;
        let mut terminal = Terminal::new(TestBackend::new(80, 24)).expect("terminal");
        terminal.draw(|f| render(f, &app)).expect("draw");

        let buffer = terminal.backend().buffer().clone();
        let screen: String = buffer.content().iter().map(|cell| cell.symbol()).collect();
        assert!(screen.contains("Server address"));
        assert!(screen.contains("Research Console"));
    }
}
