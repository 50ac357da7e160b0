//! Network side of the research console: the event-stream connection, the
//! REST client and the client context that ties them to persisted state.

pub mod connection;
pub mod context;
pub mod error;
pub mod research;
pub mod state_store;
pub mod subscribers;

pub use connection::{
    derive_socket_url, identity_assignment, ConnectionManager, ConnectionOptions,
    ConnectionStatus, DEFAULT_RETRY_INTERVAL,
};
pub use context::{finish_query, ClientContext, PendingQuery, QueryTicket};
pub use error::{ClientError, QueryError, StoreError};
pub use research::{ResearchClient, ResearchRequest, ResearchResponse};
pub use state_store::{FileStateStore, MemoryStateStore, StateKey, StateStore};
pub use subscribers::{Subscribers, Subscription};
