use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid server url '{url}': {reason}")]
    InvalidServerUrl { url: String, reason: String },
    #[error("Research request failed: {reason}")]
    RequestFailed { status: u16, reason: String },
    #[error("Research request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid research response: {0}")]
    Decode(String),
    #[error("state store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Reasons a query is not attempted at all.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("query is empty")]
    EmptyQuery,
    #[error("no server address configured")]
    MissingServerUrl,
    #[error("no session identity assigned by the server yet")]
    MissingConnectionId,
    #[error("a query is already in progress")]
    AlreadyQuerying,
}
