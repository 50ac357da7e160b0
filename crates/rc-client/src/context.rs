use crate::connection::{derive_socket_url, ConnectionManager, ConnectionOptions};
use crate::error::{ClientError, QueryError};
use crate::research::{ResearchClient, ResearchRequest, ResearchResponse};
use crate::state_store::{StateKey, StateStore};
use rc_core::{Ingest, SessionAggregator, Transcript};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub type PendingQuery = JoinHandle<Result<ResearchResponse, ClientError>>;

/// Everything a query needs, resolved before anything is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTicket {
    pub server_url: String,
    pub request: ResearchRequest,
}

/// Owns the persisted client state, the event-stream connection and the REST
/// client. Built explicitly; torn down with [`ClientContext::shutdown`] or on
/// drop.
pub struct ClientContext {
    store: Arc<dyn StateStore>,
    connection: ConnectionManager,
    research: ResearchClient,
    server_url: Option<String>,
}

impl ClientContext {
    pub fn new(
        store: Arc<dyn StateStore>,
        options: ConnectionOptions,
        research: ResearchClient,
    ) -> Self {
        let server_url = store.load(StateKey::ServerUrl);
        let connection = ConnectionManager::new(store.clone(), options);
        Self {
            store,
            connection,
            research,
            server_url,
        }
    }

    /// Connects to the stored server address, if there is one.
    pub fn start(&mut self) -> Result<bool, ClientError> {
        match self.server_url.clone() {
            Some(url) => {
                self.connection.connect(&url)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Validates, persists and reconnects to a new server address. The
    /// session identity is carried over.
    pub fn set_server_url(&mut self, url: &str) -> Result<(), ClientError> {
        let url = url.trim().trim_end_matches('/').to_string();
        derive_socket_url(&url, None)?;
        self.store.save(StateKey::ServerUrl, &url)?;
        info!(event = "server_url_changed", server_url = %url);
        self.connection.disconnect();
        self.connection.connect(&url)?;
        self.server_url = Some(url);
        Ok(())
    }

    pub fn server_url(&self) -> Option<&str> {
        self.server_url.as_deref()
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn connection_id(&self) -> Option<String> {
        self.connection.connection_id()
    }

    pub fn research_client(&self) -> &ResearchClient {
        &self.research
    }

    /// Checks the prerequisites of a query without side effects. The
    /// identity must have been assigned on the live transport; a value
    /// restored from disk only serves as the resumption hint.
    pub fn prepare_query(&self, query: &str) -> Result<QueryTicket, QueryError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(QueryError::EmptyQuery);
        }
        let server_url = self.server_url.clone().ok_or(QueryError::MissingServerUrl)?;
        let connection_id = self
            .connection
            .session_id()
            .ok_or(QueryError::MissingConnectionId)?;
        Ok(QueryTicket {
            server_url,
            request: ResearchRequest {
                query: query.to_string(),
                connection_id,
            },
        })
    }

    /// Resets the aggregator and only then spawns the request, so events
    /// for this query cannot land in the previous timeline.
    pub fn start_query(
        &self,
        query: &str,
        aggregator: &mut SessionAggregator,
    ) -> Result<PendingQuery, QueryError> {
        if aggregator.is_querying() {
            return Err(QueryError::AlreadyQuerying);
        }
        let ticket = self.prepare_query(query)?;
        aggregator.begin_query();
        info!(
            event = "query_start",
            connection_id = %ticket.request.connection_id,
            query_len = ticket.request.query.len()
        );
        let client = self.research.clone();
        Ok(tokio::spawn(async move {
            client.research(&ticket.server_url, &ticket.request).await
        }))
    }

    /// Runs one query to completion, feeding `frames` into `aggregator` while
    /// the request is outstanding. The outcome is appended to `transcript`.
    pub async fn run_query<F>(
        &self,
        query: &str,
        frames: &mut mpsc::UnboundedReceiver<Value>,
        aggregator: &mut SessionAggregator,
        transcript: &mut Transcript,
        mut on_ingest: F,
    ) -> Result<Result<String, String>, QueryError>
    where
        F: FnMut(&SessionAggregator, &Ingest),
    {
        while frames.try_recv().is_ok() {}
        let mut pending = self.start_query(query, aggregator)?;

        let result = loop {
            tokio::select! {
                biased;
                Some(frame) = frames.recv() => {
                    let outcome = aggregator.ingest(&frame);
                    on_ingest(aggregator, &outcome);
                }
                joined = &mut pending => break joined,
            }
        };

        while let Ok(frame) = frames.try_recv() {
            let outcome = aggregator.ingest(&frame);
            on_ingest(aggregator, &outcome);
        }
        Ok(finish_query(aggregator, transcript, result))
    }

    pub fn shutdown(&mut self) {
        self.connection.disconnect();
    }
}

/// Freezes the timeline and records the outcome. Returns the answer or the
/// failure detail.
pub fn finish_query(
    aggregator: &mut SessionAggregator,
    transcript: &mut Transcript,
    result: Result<Result<ResearchResponse, ClientError>, tokio::task::JoinError>,
) -> Result<String, String> {
    aggregator.finish_query();
    let outcome = match result {
        Ok(Ok(response)) => Ok(response.answer()),
        Ok(Err(err)) => Err(err.to_string()),
        Err(err) => Err(format!("request task failed: {err}")),
    };
    match &outcome {
        Ok(answer) => {
            info!(event = "query_complete", answer_len = answer.len());
            transcript.push_answer(answer.clone());
        }
        Err(detail) => {
            warn!(event = "query_failed", error = %detail);
            transcript.push_failure(detail);
        }
    }
    outcome
}
