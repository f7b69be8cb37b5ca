//! The search engine contract.
//!
//! The engine is treated as a black-box key/value index service. Long
//! running operations (move, settings, clear) complete asynchronously on
//! the engine side; callers sequence dependent steps with
//! [`IndexRemote::wait_last_task`].

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

use sync_types::{Record, StoreSettings};

use crate::error::RemoteError;

/// Index-level configuration (ranking, facets, replicas, custom fields).
pub type IndexSettings = Map<String, Value>;

/// Operations against one engine application.
#[async_trait]
pub trait IndexRemote: Send + Sync {
    /// Upsert records by object id. Creates the index if missing.
    async fn save_objects(&self, records: &[Record], index: &str) -> Result<(), RemoteError>;

    /// Delete records by object id. Unknown ids are ignored.
    async fn delete_objects(&self, object_ids: &[String], index: &str)
        -> Result<(), RemoteError>;

    /// Replace the query rules of `to` with those of `from`.
    ///
    /// A missing `from` index is not an error: there is nothing to carry over.
    async fn copy_query_rules(&self, from: &str, to: &str) -> Result<(), RemoteError>;

    /// Atomically replace `to` with `from` (records, settings and rules),
    /// then discard `from`.
    async fn move_index(&self, from: &str, to: &str) -> Result<(), RemoteError>;

    /// Replace the index settings.
    async fn set_settings(&self, index: &str, settings: &IndexSettings)
        -> Result<(), RemoteError>;

    /// Remove every record, keeping settings and rules.
    async fn clear_index(&self, index: &str) -> Result<(), RemoteError>;

    /// Block until the most recent asynchronous operation has been applied.
    async fn wait_last_task(&self) -> Result<(), RemoteError>;

    /// Number of records currently served under `index` (0 if missing).
    async fn record_count(&self, index: &str) -> Result<usize, RemoteError>;
}

/// Hands out a connector scoped to one store's application and keys.
pub trait RemoteFactory: Send + Sync {
    fn connect(&self, store: &StoreSettings) -> Result<Arc<dyn IndexRemote>, RemoteError>;
}

/// Factory returning the same connector for every store.
#[derive(Clone)]
pub struct FixedRemoteFactory {
    remote: Arc<dyn IndexRemote>,
}

impl FixedRemoteFactory {
    pub fn new(remote: Arc<dyn IndexRemote>) -> Self {
        Self { remote }
    }
}

impl RemoteFactory for FixedRemoteFactory {
    fn connect(&self, _store: &StoreSettings) -> Result<Arc<dyn IndexRemote>, RemoteError> {
        Ok(self.remote.clone())
    }
}
