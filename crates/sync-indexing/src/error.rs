//! Error types for the indexing pipeline.

use sync_queue::QueueError;
use sync_remote::RemoteError;
use sync_types::{EntityId, EntityKind, SyncError};
use thiserror::Error;

/// Errors that can occur while building or enqueueing an index build
#[derive(Error, Debug)]
pub enum IndexingError {
    /// Search engine call failed
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// Enqueue or queue storage failed
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Entity source could not be read
    #[error("Provider error: {0}")]
    Provider(String),

    /// A builder was handed an entity of another kind
    #[error("Expected a {expected} entity, got a {found} (id {entity_id})")]
    WrongEntityKind {
        expected: EntityKind,
        found: EntityKind,
        entity_id: EntityId,
    },

    /// A transform removed or blanked the object id
    #[error("Record for entity {0} has no objectID")]
    MissingObjectId(EntityId),

    /// Bad or missing configuration
    #[error("Configuration error: {0}")]
    Config(#[from] SyncError),

    /// Credential validation failed for the store
    #[error("Invalid search credentials for store {store_id}")]
    InvalidCredentials { store_id: u32 },

    /// No indexer registered for the entity kind
    #[error("No indexer registered for {0}")]
    NoIndexer(EntityKind),

    /// JSON encoding/decoding errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl IndexingError {
    /// Whether a later attempt of the same build may succeed.
    ///
    /// Configuration, credential and contract errors are permanent; remote,
    /// provider and data errors are environmental and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            IndexingError::Remote(e) => {
                !matches!(e, RemoteError::Auth(_) | RemoteError::Config(_))
            }
            IndexingError::Queue(_) | IndexingError::Provider(_) => true,
            IndexingError::Serialization(_) => true,
            IndexingError::WrongEntityKind { .. }
            | IndexingError::MissingObjectId(_)
            | IndexingError::Config(_)
            | IndexingError::InvalidCredentials { .. }
            | IndexingError::NoIndexer(_) => false,
        }
    }
}

impl From<serde_json::Error> for IndexingError {
    fn from(err: serde_json::Error) -> Self {
        IndexingError::Serialization(err.to_string())
    }
}
