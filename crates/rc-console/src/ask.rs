use anyhow::{anyhow, bail, Result};
use chrono::Local;
use rc_client::{ClientContext, ConnectionStatus, QueryError};
use rc_core::{humanize_label, transcript::failure_text, Ingest, SessionAggregator, Transcript};
use std::io::{self, Write};
use std::process::ExitCode;
use std::time::Duration;
use tracing::info;

/// Line-mode query: streams the timeline to stdout as it arrives, then
/// prints the answer. A failed request exits non-zero.
pub async fn run(ctx: &ClientContext, query: &str, wait: Duration) -> Result<ExitCode> {
    let Some(server_url) = ctx.server_url().map(str::to_string) else {
        bail!("no server address configured; run `research-console config set-server <URL>`");
    };
    let (_subscription, mut frames) = ctx.connection().subscribe_channel();

    info!(event = "ask_waiting_for_session", server_url = %server_url, wait_secs = wait.as_secs());
    if !wait_until_connected(ctx, wait).await {
        bail!(
            "could not connect to {server_url} within {}s; check the server or run `research-console config set-server <URL>`",
            wait.as_secs()
        );
    }
    if ctx.connection().wait_for_connection_id(wait).await.is_none() {
        bail!(
            "no session identity from {server_url} after {}s; check the server or run `research-console config set-server <URL>`",
            wait.as_secs()
        );
    }

    let mut aggregator = SessionAggregator::new();
    let mut transcript = Transcript::new();
    let stdout = io::stdout();
    let outcome = ctx
        .run_query(query, &mut frames, &mut aggregator, &mut transcript, |_, ingest| {
            if let Some(line) = describe_ingest(ingest) {
                let mut out = stdout.lock();
                let _ = writeln!(out, "{line}");
                let _ = out.flush();
            }
        })
        .await
        .map_err(|err| match err {
            QueryError::MissingConnectionId => anyhow!("session identity was lost before the query"),
            other => anyhow!(other),
        })?;

    match outcome {
        Ok(answer) => {
            println!();
            println!("{answer}");
            Ok(ExitCode::SUCCESS)
        }
        Err(detail) => {
            eprintln!();
            eprintln!("{}", failure_text(detail));
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn wait_until_connected(ctx: &ClientContext, wait: Duration) -> bool {
    let mut status = ctx.connection().watch_status();
    let connected = async {
        loop {
            if *status.borrow_and_update() == ConnectionStatus::Connected {
                return true;
            }
            if status.changed().await.is_err() {
                return false;
            }
        }
    };
    tokio::time::timeout(wait, connected).await.unwrap_or(false)
}

/// One output line per opened section or appended log.
pub fn describe_ingest(ingest: &Ingest) -> Option<String> {
    match ingest {
        Ingest::Opened { label } => Some(format!("== {} ==", humanize_label(label))),
        Ingest::Appended(entry) => Some(format!(
            "  [{}] {}",
            entry.timestamp().with_timezone(&Local).format("%H:%M:%S"),
            entry.text()
        )),
        _ => None,
    }
}
