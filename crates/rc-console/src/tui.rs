use crate::app::{Action, App, WAITING_FOR_SESSION};
use crate::ui;
use anyhow::Result;
use crossterm::{
    event::{Event, EventStream, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures_util::StreamExt;
use rc_client::{ClientContext, ClientError, PendingQuery, QueryError, ResearchResponse};
use ratatui::{backend::CrosstermBackend, Terminal};
use serde_json::Value;
use std::{io, time::Duration};
use tokio::{sync::mpsc, task::JoinError};
use tracing::{info, warn};

const TICK_INTERVAL: Duration = Duration::from_millis(120);

type ConsoleTerminal = Terminal<CrosstermBackend<io::Stdout>>;

pub async fn run(ctx: &mut ClientContext) -> Result<()> {
    let (_subscription, mut frames) = ctx.connection().subscribe_channel();
    let mut app = App::new(ctx.server_url().map(str::to_string));
    if ctx.server_url().is_none() {
        app.open_settings(Some("Set the research server address to get started".to_string()));
    }

    let mut terminal = setup_terminal()?;
    let result = run_app(&mut terminal, &mut app, ctx, &mut frames).await;
    restore_terminal(&mut terminal)?;
    result
}

fn setup_terminal() -> Result<ConsoleTerminal> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut ConsoleTerminal) -> Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

async fn run_app(
    terminal: &mut ConsoleTerminal,
    app: &mut App,
    ctx: &mut ClientContext,
    frames: &mut mpsc::UnboundedReceiver<Value>,
) -> Result<()> {
    let mut events = EventStream::new();
    let mut ticker = tokio::time::interval(TICK_INTERVAL);
    let mut pending: Option<PendingQuery> = None;

    loop {
        app.sync_connection(ctx.server_url(), ctx.connection());
        terminal.draw(|frame| ui::render(frame, app))?;
        if app.should_quit {
            break;
        }

        tokio::select! {
            biased;
            Some(frame) = frames.recv() => {
                app.ingest(&frame);
            }
            joined = join_pending(&mut pending) => {
                pending = None;
                while let Ok(frame) = frames.try_recv() {
                    app.ingest(&frame);
                }
                app.finish(joined);
            }
            maybe_event = events.next() => {
                match maybe_event {
                    Some(Ok(Event::Key(key)))
                        if matches!(key.kind, KeyEventKind::Press | KeyEventKind::Repeat) =>
                    {
                        let action = app.handle_key(key);
                        perform(action, app, ctx, frames, &mut pending);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => return Err(err.into()),
                    None => break,
                }
            }
            _ = ticker.tick() => {
                app.on_tick();
            }
        }
    }

    if pending.is_some() {
        info!(event = "query_abandoned", reason = "console closed");
    }
    Ok(())
}

async fn join_pending(
    pending: &mut Option<PendingQuery>,
) -> Result<Result<ResearchResponse, ClientError>, JoinError> {
    match pending.as_mut() {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

fn perform(
    action: Action,
    app: &mut App,
    ctx: &mut ClientContext,
    frames: &mut mpsc::UnboundedReceiver<Value>,
    pending: &mut Option<PendingQuery>,
) {
    match action {
        Action::None | Action::Quit => {}
        Action::SaveServer(url) => match ctx.set_server_url(&url) {
            Ok(()) => app.server_saved(ctx.server_url().unwrap_or(url.as_str())),
            Err(err) => {
                warn!(event = "server_url_rejected", error = %err);
                app.server_rejected(&err);
            }
        },
        Action::Submit(query) => {
            while frames.try_recv().is_ok() {}
            match ctx.start_query(&query, &mut app.aggregator) {
                Ok(handle) => {
                    *pending = Some(handle);
                    app.query_started();
                }
                Err(QueryError::MissingServerUrl) => {
                    app.open_settings(Some("Set the research server address first".to_string()));
                }
                Err(QueryError::MissingConnectionId) => {
                    app.status_note = Some(WAITING_FOR_SESSION.to_string());
                }
                Err(err) => {
                    app.status_note = Some(err.to_string());
                }
            }
        }
    }
}
