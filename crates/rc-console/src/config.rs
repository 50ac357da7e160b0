use anyhow::{Context, Result};
use rc_client::DEFAULT_RETRY_INTERVAL;
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

pub const APP_DIR: &str = "research-console";
pub const LOG_FILE_NAME: &str = "research-console.log";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_IDENTITY_WAIT_SECS: u64 = 10;

/// On-disk TOML config. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub server_url: Option<String>,
    pub retry_interval_ms: Option<u64>,
    pub request_timeout_secs: Option<u64>,
    pub log_level: Option<String>,
    pub log_dir: Option<String>,
    pub identity_wait_secs: Option<u64>,
}

/// Values given on the command line; they win over everything else.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub server_url: Option<String>,
    pub state_dir: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub config_path: PathBuf,
    pub state_dir: PathBuf,
    pub log_dir: PathBuf,
    pub log_level: String,
    pub log_stdout: bool,
    /// Server address from flag, environment or config file. The persisted
    /// address is consulted later, by the client context.
    pub server_url: Option<String>,
    pub retry_interval: Duration,
    pub request_timeout: Option<Duration>,
    pub identity_wait: Duration,
}

impl Settings {
    pub fn resolve(overrides: &Overrides) -> Result<Self> {
        Self::resolve_with(overrides, |key| env::var(key).ok())
    }

    pub fn resolve_with<F>(overrides: &Overrides, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let config_path = overrides
            .config
            .clone()
            .or_else(|| var("RC_CONFIG_PATH").map(PathBuf::from))
            .unwrap_or_else(|| config_home(&var).join(APP_DIR).join("config.toml"));
        let config = load_config(&config_path)?;

        let state_dir = overrides
            .state_dir
            .clone()
            .or_else(|| var("RC_STATE_DIR").map(PathBuf::from))
            .unwrap_or_else(|| state_home(&var).join(APP_DIR));

        let log_dir = var("RC_LOG_DIR")
            .or_else(|| config.log_dir.clone())
            .map(PathBuf::from)
            .unwrap_or_else(|| state_dir.join("logs"));

        let log_level = var("RC_LOG_LEVEL")
            .or_else(|| config.log_level.clone())
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());

        let log_stdout = matches!(
            var("RC_LOG_STDOUT").as_deref(),
            Some("1") | Some("true") | Some("TRUE") | Some("yes") | Some("YES")
        );

        let server_url = overrides
            .server_url
            .clone()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .or_else(|| var("RC_SERVER_URL"))
            .or_else(|| config.server_url.clone().filter(|v| !v.trim().is_empty()));

        let retry_interval = config
            .retry_interval_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_RETRY_INTERVAL);
        let request_timeout = config
            .request_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);
        let identity_wait = Duration::from_secs(
            config
                .identity_wait_secs
                .unwrap_or(DEFAULT_IDENTITY_WAIT_SECS),
        );

        Ok(Self {
            config_path,
            state_dir,
            log_dir,
            log_level,
            log_stdout,
            server_url,
            retry_interval,
            request_timeout,
            identity_wait,
        })
    }

    pub fn log_file(&self) -> PathBuf {
        self.log_dir.join(LOG_FILE_NAME)
    }
}

/// A missing file is an empty config; a malformed one is an error.
pub fn load_config(path: &Path) -> Result<ConsoleConfig> {
    if !path.exists() {
        return Ok(ConsoleConfig::default());
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    toml::from_str(&contents).with_context(|| format!("invalid config {}", path.display()))
}

fn config_home<F>(var: &F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = var("XDG_CONFIG_HOME") {
        return PathBuf::from(path);
    }
    dirs::config_dir().unwrap_or_else(|| home_dir().join(".config"))
}

fn state_home<F>(var: &F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = var("XDG_STATE_HOME") {
        return PathBuf::from(path);
    }
    home_dir().join(".local/state")
}

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}
