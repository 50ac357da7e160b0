mod app;
mod ask;
mod config;
mod logging;
mod markdown;
mod theme;
mod tui;
mod ui;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::{Overrides, Settings};
use rc_client::{
    derive_socket_url, ClientContext, ConnectionOptions, FileStateStore, ResearchClient, StateKey,
    StateStore,
};
use std::{path::PathBuf, process::ExitCode, sync::Arc, time::Duration};
use tracing::info;

#[derive(Parser)]
#[command(name = "research-console")]
#[command(about = "Terminal console for a streaming research agent", long_about = None)]
struct Cli {
    /// Research server address (http or https)
    #[arg(long, global = true)]
    server_url: Option<String>,
    /// Directory holding the persisted server address and session identity
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,
    /// Config file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive console (default)
    Tui,
    /// Run one query and print the answer
    Ask {
        #[arg(required = true)]
        query: Vec<String>,
        /// Seconds to wait for a session from the server
        #[arg(long)]
        wait_secs: Option<u64>,
    },
    /// Inspect or change persisted settings
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand)]
#[command(rename_all = "kebab-case")]
enum ConfigCommands {
    Show,
    SetServer { url: String },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let settings = Settings::resolve(&Overrides {
        server_url: cli.server_url.clone(),
        state_dir: cli.state_dir.clone(),
        config: cli.config.clone(),
    })?;
    let _log_guard = logging::init_logging(&settings);
    let store: Arc<dyn StateStore> = Arc::new(FileStateStore::new(settings.state_dir.clone()));

    match cli.command.unwrap_or(Commands::Tui) {
        Commands::Config { action } => run_config(action, &settings, store.as_ref()),
        Commands::Tui => {
            let mut ctx = build_context(&settings, store)?;
            let result = tui::run(&mut ctx).await;
            ctx.shutdown();
            result.map(|_| ExitCode::SUCCESS)
        }
        Commands::Ask { query, wait_secs } => {
            let mut ctx = build_context(&settings, store)?;
            let wait = wait_secs
                .map(Duration::from_secs)
                .unwrap_or(settings.identity_wait);
            let result = ask::run(&ctx, &query.join(" "), wait).await;
            ctx.shutdown();
            result
        }
    }
}

fn build_context(settings: &Settings, store: Arc<dyn StateStore>) -> Result<ClientContext> {
    let research = match settings.request_timeout {
        Some(timeout) => {
            ResearchClient::with_timeout(timeout).context("failed to build http client")?
        }
        None => ResearchClient::new(),
    };
    let options = ConnectionOptions {
        retry_interval: settings.retry_interval,
    };
    let mut ctx = ClientContext::new(store, options, research);

    match settings.server_url.as_deref() {
        Some(url) if ctx.server_url() != Some(url.trim_end_matches('/')) => {
            ctx.set_server_url(url)
                .with_context(|| format!("invalid server url {url}"))?;
        }
        _ => {
            ctx.start().context("failed to start connection")?;
        }
    }
    info!(
        event = "console_start",
        server_url = ?ctx.server_url(),
        connection_id = ?ctx.connection_id(),
        state_dir = %settings.state_dir.display()
    );
    Ok(ctx)
}

fn run_config(action: ConfigCommands, settings: &Settings, store: &dyn StateStore) -> Result<ExitCode> {
    match action {
        ConfigCommands::Show => {
            let stored_url = store.load(StateKey::ServerUrl);
            let (server_url, source) = match (&settings.server_url, &stored_url) {
                (Some(url), _) => (url.as_str(), "override"),
                (None, Some(url)) => (url.as_str(), "stored"),
                (None, None) => ("not set", "-"),
            };
            let config_note = if settings.config_path.exists() {
                ""
            } else {
                " (missing)"
            };
            println!("config file      {}{config_note}", settings.config_path.display());
            println!("state dir        {}", settings.state_dir.display());
            println!("log file         {}", settings.log_file().display());
            println!("log level        {}", settings.log_level);
            println!("server url       {server_url} ({source})");
            println!(
                "session id       {}",
                store.load(StateKey::ConnectionId).as_deref().unwrap_or("-")
            );
            println!("retry interval   {} ms", settings.retry_interval.as_millis());
            match settings.request_timeout {
                Some(timeout) => println!("request timeout  {}s", timeout.as_secs()),
                None => println!("request timeout  none"),
            }
            println!("identity wait    {}s", settings.identity_wait.as_secs());
        }
        ConfigCommands::SetServer { url } => {
            let url = url.trim().trim_end_matches('/');
            derive_socket_url(url, None).with_context(|| format!("invalid server url {url}"))?;
            store
                .save(StateKey::ServerUrl, url)
                .context("failed to persist server url")?;
            info!(event = "server_url_changed", server_url = %url);
            println!("server url saved: {url}");
        }
    }
    Ok(ExitCode::SUCCESS)
}
