use crate::theme;
use pulldown_cmark::{Event, HeadingLevel, Options, Parser, Tag, TagEnd};
use ratatui::style::{Modifier, Style};
use ratatui::text::{Line, Span};

const BULLET: &str = "• ";
const CODE_INDENT: &str = "    ";

/// Renders answer Markdown as styled lines wrapped to `width`. Markup
/// characters are consumed; structure survives as style, bullets and indent.
pub fn render_markdown(text: &str, width: usize) -> Vec<Line<'static>> {
    let mut renderer = Renderer::new(width);
    for event in Parser::new_ext(text, Options::ENABLE_STRIKETHROUGH) {
        renderer.event(event);
    }
    renderer.finish()
}

struct Renderer {
    width: usize,
    lines: Vec<Line<'static>>,
    segments: Vec<Span<'static>>,
    styles: Vec<Style>,
    lists: Vec<Option<u64>>,
    indents: Vec<usize>,
    marker: Option<String>,
    in_code: bool,
}

impl Renderer {
    fn new(width: usize) -> Self {
        Self {
            width: width.max(1),
            lines: Vec::new(),
            segments: Vec::new(),
            styles: Vec::new(),
            lists: Vec::new(),
            indents: Vec::new(),
            marker: None,
            in_code: false,
        }
    }

    fn style(&self) -> Style {
        self.styles.last().copied().unwrap_or_default()
    }

    fn push_style(&mut self, modifier: Modifier) {
        let style = self.style().add_modifier(modifier);
        self.styles.push(style);
    }

    fn indent(&self) -> usize {
        self.indents.last().copied().unwrap_or(0)
    }

    fn event(&mut self, event: Event<'_>) {
        match event {
            Event::Start(tag) => self.start(tag),
            Event::End(tag) => self.end(tag),
            Event::Text(text) if self.in_code => {
                let style = Style::default().fg(theme::ACCENT);
                let pad = format!("{}{CODE_INDENT}", " ".repeat(self.indent()));
                for line in text.lines() {
                    self.lines.push(Line::from(vec![
                        Span::raw(pad.clone()),
                        Span::styled(line.to_string(), style),
                    ]));
                }
            }
            Event::Text(text) => {
                let style = self.style();
                self.segments.push(Span::styled(text.into_string(), style));
            }
            Event::Code(code) => {
                let style = self.style().fg(theme::ACCENT);
                self.segments.push(Span::styled(code.into_string(), style));
            }
            Event::SoftBreak => {
                let style = self.style();
                self.segments.push(Span::styled(" ", style));
            }
            Event::HardBreak => self.flush(),
            Event::Rule => {
                self.flush();
                self.lines.push(Line::from(Span::styled(
                    "─".repeat(self.width.min(40)),
                    Style::default().fg(theme::MUTED),
                )));
                self.blank();
            }
            _ => {}
        }
    }

    fn start(&mut self, tag: Tag<'_>) {
        match tag {
            Tag::Heading { level, .. } => {
                self.flush();
                let mut style = self.style().fg(theme::ACCENT).add_modifier(Modifier::BOLD);
                if level == HeadingLevel::H1 {
                    style = style.add_modifier(Modifier::UNDERLINED);
                }
                self.styles.push(style);
            }
            Tag::Emphasis => self.push_style(Modifier::ITALIC),
            Tag::Strong => self.push_style(Modifier::BOLD),
            Tag::Strikethrough => self.push_style(Modifier::CROSSED_OUT),
            Tag::List(start) => {
                self.flush();
                self.lists.push(start);
            }
            Tag::Item => {
                self.flush();
                let marker = match self.lists.last_mut() {
                    Some(Some(number)) => {
                        let marker = format!("{number}. ");
                        *number += 1;
                        marker
                    }
                    _ => BULLET.to_string(),
                };
                let base = self.indent();
                let marker = format!("{}{marker}", " ".repeat(base));
                self.indents.push(marker.chars().count());
                self.marker = Some(marker);
            }
            Tag::CodeBlock(_) => {
                self.flush();
                self.in_code = true;
            }
            _ => {}
        }
    }

    fn end(&mut self, tag: TagEnd) {
        match tag {
            TagEnd::Paragraph => {
                self.flush();
                if self.lists.is_empty() {
                    self.blank();
                }
            }
            TagEnd::Heading(_) => {
                self.flush();
                self.styles.pop();
                self.blank();
            }
            TagEnd::Emphasis | TagEnd::Strong | TagEnd::Strikethrough => {
                self.styles.pop();
            }
            TagEnd::Item => {
                self.flush();
                self.indents.pop();
                self.marker = None;
            }
            TagEnd::List(_) => {
                self.flush();
                self.lists.pop();
                if self.lists.is_empty() {
                    self.blank();
                }
            }
            TagEnd::CodeBlock => {
                self.in_code = false;
                self.blank();
            }
            _ => {}
        }
    }

    fn blank(&mut self) {
        if self.lines.last().is_some_and(|line| line.width() > 0) {
            self.lines.push(Line::from(""));
        }
    }

    fn flush(&mut self) {
        if self.segments.is_empty() {
            return;
        }
        let segments = std::mem::take(&mut self.segments);
        let indent = self.indent();
        let first = self.marker.take().unwrap_or_else(|| " ".repeat(indent));
        let wrapped = wrap_spans(segments, first, indent, self.width);
        self.lines.extend(wrapped);
    }

    fn finish(mut self) -> Vec<Line<'static>> {
        self.flush();
        while self.lines.last().is_some_and(|line| line.width() == 0) {
            self.lines.pop();
        }
        self.lines
    }
}

/// Greedy word wrap over styled spans. The first line starts with `first`,
/// continuation lines with `indent` spaces.
fn wrap_spans(
    segments: Vec<Span<'static>>,
    first: String,
    indent: usize,
    width: usize,
) -> Vec<Line<'static>> {
    let mut lines = Vec::new();
    let mut start = first.chars().count();
    let mut len = start;
    let mut current = vec![Span::raw(first)];
    let mut pending_space = false;

    for span in segments {
        for (index, word) in span.content.split(' ').enumerate() {
            if index > 0 {
                pending_space = true;
            }
            if word.is_empty() {
                continue;
            }
            let word_len = word.chars().count();
            let gap = usize::from(pending_space && len > start);
            if len > start && len + gap + word_len > width {
                lines.push(Line::from(std::mem::take(&mut current)));
                current.push(Span::raw(" ".repeat(indent)));
                start = indent;
                len = indent;
            } else if gap == 1 {
                current.push(Span::styled(" ", span.style));
                len += 1;
            }
            pending_space = false;
            current.push(Span::styled(word.to_string(), span.style));
            len += word_len;
        }
    }
    lines.push(Line::from(current));
    lines
}
