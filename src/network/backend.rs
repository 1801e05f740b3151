use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::common::types::{Collection, Row};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("backend rejected the request with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("malformed row payload: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Per-subscription status, as reported by the change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedStatus {
    Subscribing,
    Live,
    Error,
    TimedOut,
    Closed,
}

/// Everything a feed task sends back to the engine loop. Each message is
/// tagged with the session generation it belongs to; the engine drops
/// messages from generations that have since been torn down.
#[derive(Debug)]
pub enum FeedMessage {
    Status {
        collection: Collection,
        generation: u64,
        status: FeedStatus,
    },
    Insert {
        collection: Collection,
        generation: u64,
        row: Row,
    },
}

/// Seam between the sync engine and the hosted backend: snapshot reads,
/// row inserts, and one change-feed subscription per collection. The
/// production implementation talks to Supabase; tests swap in a fake.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Read all rows of one collection for a room, ascending by timestamp.
    async fn fetch_rows(
        &self,
        collection: Collection,
        room_id: &str,
    ) -> Result<Vec<Row>, BackendError>;

    /// Insert one row. The row id is client-generated, so a duplicate
    /// insert is detectable by the backend and harmless to retry manually.
    async fn insert_row(&self, collection: Collection, row: Row) -> Result<(), BackendError>;

    /// Spawn a task that owns one live subscription and reports status and
    /// inserted rows over `feed_tx` until it dies or is aborted.
    fn subscribe(
        &self,
        collection: Collection,
        room_id: &str,
        generation: u64,
        feed_tx: mpsc::Sender<FeedMessage>,
    ) -> JoinHandle<()>;
}
