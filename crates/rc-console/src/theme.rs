use rc_client::ConnectionStatus;
use rc_core::{EntryKind, EventKind};
use ratatui::style::{Color, Modifier, Style};

pub const HEADER_STYLE: Style = Style::new()
    .fg(Color::Rgb(142, 192, 124))
    .add_modifier(Modifier::BOLD);
pub const SELECTED_STYLE: Style = Style::new()
    .bg(Color::Rgb(131, 165, 152))
    .fg(Color::Black)
    .add_modifier(Modifier::BOLD);
pub const MUTED: Color = Color::Rgb(146, 131, 116);
pub const ACCENT: Color = Color::Rgb(131, 165, 152);

pub mod icons {
    pub const EXPANDED: &str = "v";
    pub const COLLAPSED: &str = ">";
    pub const DONE: &str = "x";
    pub const SPINNER: [&str; 4] = ["|", "/", "-", "\\"];
}

pub fn spinner_frame(tick: usize) -> &'static str {
    icons::SPINNER[tick % icons::SPINNER.len()]
}

pub fn status_color(status: ConnectionStatus) -> Color {
    match status {
        ConnectionStatus::Connected => Color::Rgb(184, 187, 38),
        ConnectionStatus::Connecting => Color::Rgb(250, 189, 47),
        ConnectionStatus::Disconnected => Color::Rgb(254, 128, 25),
        ConnectionStatus::Idle => MUTED,
    }
}

pub fn log_color(kind: &EventKind) -> Color {
    match kind {
        EventKind::Error => Color::Rgb(251, 73, 52),
        EventKind::ToolStart | EventKind::ToolEnd => Color::Rgb(211, 134, 155),
        EventKind::ChainStart | EventKind::ChainEnd => Color::Rgb(69, 133, 136),
        EventKind::SubStateLog => Color::Rgb(189, 174, 147),
        EventKind::Unknown(_) => MUTED,
        _ => Color::Rgb(235, 219, 178),
    }
}

pub fn entry_style(kind: EntryKind) -> Style {
    match kind {
        EntryKind::Answer => HEADER_STYLE,
        EntryKind::Failure => Style::new()
            .fg(Color::Rgb(251, 73, 52))
            .add_modifier(Modifier::BOLD),
    }
}
