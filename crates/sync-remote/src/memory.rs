//! In-process search engine.
//!
//! Behaves like the remote service for the operations the pipeline uses:
//! named indexes holding records, settings and query rules, with `move`
//! applied atomically under one lock. Every call is appended to an
//! operation log so tests can assert what was written where, and failures
//! can be injected per operation kind.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use sync_types::{Record, StoreSettings};

use crate::error::RemoteError;
use crate::remote::{IndexRemote, IndexSettings, RemoteFactory};

/// One index as the engine stores it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteIndex {
    pub records: BTreeMap<String, Record>,
    pub settings: IndexSettings,
    pub query_rules: Vec<Value>,
}

/// A call made against the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteOperation {
    SaveObjects { index: String, count: usize },
    DeleteObjects { index: String, count: usize },
    CopyQueryRules { from: String, to: String },
    MoveIndex { from: String, to: String },
    SetSettings { index: String },
    ClearIndex { index: String },
    WaitLastTask,
}

impl RemoteOperation {
    pub fn kind(&self) -> OperationKind {
        match self {
            RemoteOperation::SaveObjects { .. } => OperationKind::SaveObjects,
            RemoteOperation::DeleteObjects { .. } => OperationKind::DeleteObjects,
            RemoteOperation::CopyQueryRules { .. } => OperationKind::CopyQueryRules,
            RemoteOperation::MoveIndex { .. } => OperationKind::MoveIndex,
            RemoteOperation::SetSettings { .. } => OperationKind::SetSettings,
            RemoteOperation::ClearIndex { .. } => OperationKind::ClearIndex,
            RemoteOperation::WaitLastTask => OperationKind::WaitLastTask,
        }
    }

    /// Index written by this operation, if any.
    pub fn target(&self) -> Option<&str> {
        match self {
            RemoteOperation::SaveObjects { index, .. }
            | RemoteOperation::DeleteObjects { index, .. }
            | RemoteOperation::SetSettings { index }
            | RemoteOperation::ClearIndex { index } => Some(index),
            RemoteOperation::CopyQueryRules { to, .. } | RemoteOperation::MoveIndex { to, .. } => {
                Some(to)
            }
            RemoteOperation::WaitLastTask => None,
        }
    }
}

/// Operation kinds, used to inject failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    SaveObjects,
    DeleteObjects,
    CopyQueryRules,
    MoveIndex,
    SetSettings,
    ClearIndex,
    WaitLastTask,
}

#[derive(Debug, Default)]
struct EngineState {
    indexes: HashMap<String, RemoteIndex>,
    operations: Vec<RemoteOperation>,
    failures: HashMap<OperationKind, usize>,
}

/// Shared in-memory engine. Clones address the same indexes.
#[derive(Debug, Clone, Default)]
pub struct InMemoryIndexRemote {
    state: Arc<Mutex<EngineState>>,
}

impl InMemoryIndexRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, EngineState>, RemoteError> {
        self.state
            .lock()
            .map_err(|_| RemoteError::Transient("engine state poisoned".to_string()))
    }

    /// Record the call, or fail it if a failure is pending for its kind.
    fn begin(state: &mut EngineState, op: RemoteOperation) -> Result<(), RemoteError> {
        let kind = op.kind();
        if let Some(remaining) = state.failures.get_mut(&kind) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(RemoteError::Transient(format!("injected {:?} failure", kind)));
            }
        }
        state.operations.push(op);
        Ok(())
    }

    /// Make the next `times` calls of `kind` fail with a transient error.
    pub fn fail_next(&self, kind: OperationKind, times: usize) {
        if let Ok(mut state) = self.state.lock() {
            state.failures.insert(kind, times);
        }
    }

    /// Seed an index directly, bypassing the operation log.
    pub fn seed_index(&self, name: &str, index: RemoteIndex) {
        if let Ok(mut state) = self.state.lock() {
            state.indexes.insert(name.to_string(), index);
        }
    }

    /// Snapshot of an index.
    pub fn index(&self, name: &str) -> Option<RemoteIndex> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.indexes.get(name).cloned())
    }

    /// Names of all existing indexes, sorted.
    pub fn index_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .state
            .lock()
            .map(|state| state.indexes.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Calls made so far, in order.
    pub fn operations(&self) -> Vec<RemoteOperation> {
        self.state
            .lock()
            .map(|state| state.operations.clone())
            .unwrap_or_default()
    }

    pub fn clear_operations(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.operations.clear();
        }
    }
}

#[async_trait]
impl IndexRemote for InMemoryIndexRemote {
    async fn save_objects(&self, records: &[Record], index: &str) -> Result<(), RemoteError> {
        let mut state = self.lock()?;
        Self::begin(
            &mut state,
            RemoteOperation::SaveObjects {
                index: index.to_string(),
                count: records.len(),
            },
        )?;

        let target = state.indexes.entry(index.to_string()).or_default();
        for record in records {
            let object_id = record
                .object_id()
                .ok_or_else(|| RemoteError::Rejected {
                    status: 400,
                    body: "record without objectID".to_string(),
                })?
                .to_string();
            target.records.insert(object_id, record.clone());
        }
        debug!(index, count = records.len(), "Saved objects");
        Ok(())
    }

    async fn delete_objects(
        &self,
        object_ids: &[String],
        index: &str,
    ) -> Result<(), RemoteError> {
        let mut state = self.lock()?;
        Self::begin(
            &mut state,
            RemoteOperation::DeleteObjects {
                index: index.to_string(),
                count: object_ids.len(),
            },
        )?;

        if let Some(target) = state.indexes.get_mut(index) {
            for id in object_ids {
                target.records.remove(id);
            }
        }
        Ok(())
    }

    async fn copy_query_rules(&self, from: &str, to: &str) -> Result<(), RemoteError> {
        let mut state = self.lock()?;
        Self::begin(
            &mut state,
            RemoteOperation::CopyQueryRules {
                from: from.to_string(),
                to: to.to_string(),
            },
        )?;

        let rules = match state.indexes.get(from) {
            Some(source) => source.query_rules.clone(),
            None => return Ok(()),
        };
        state.indexes.entry(to.to_string()).or_default().query_rules = rules;
        Ok(())
    }

    async fn move_index(&self, from: &str, to: &str) -> Result<(), RemoteError> {
        let mut state = self.lock()?;
        Self::begin(
            &mut state,
            RemoteOperation::MoveIndex {
                from: from.to_string(),
                to: to.to_string(),
            },
        )?;

        let source = state
            .indexes
            .remove(from)
            .ok_or_else(|| RemoteError::NotFound(from.to_string()))?;
        debug!(from, to, records = source.records.len(), "Moved index");
        state.indexes.insert(to.to_string(), source);
        Ok(())
    }

    async fn set_settings(
        &self,
        index: &str,
        settings: &IndexSettings,
    ) -> Result<(), RemoteError> {
        let mut state = self.lock()?;
        Self::begin(
            &mut state,
            RemoteOperation::SetSettings {
                index: index.to_string(),
            },
        )?;
        state.indexes.entry(index.to_string()).or_default().settings = settings.clone();
        Ok(())
    }

    async fn clear_index(&self, index: &str) -> Result<(), RemoteError> {
        let mut state = self.lock()?;
        Self::begin(
            &mut state,
            RemoteOperation::ClearIndex {
                index: index.to_string(),
            },
        )?;
        if let Some(target) = state.indexes.get_mut(index) {
            target.records.clear();
        }
        Ok(())
    }

    async fn wait_last_task(&self) -> Result<(), RemoteError> {
        let mut state = self.lock()?;
        Self::begin(&mut state, RemoteOperation::WaitLastTask)
    }

    async fn record_count(&self, index: &str) -> Result<usize, RemoteError> {
        let state = self.lock()?;
        Ok(state.indexes.get(index).map_or(0, |i| i.records.len()))
    }
}

impl RemoteFactory for InMemoryIndexRemote {
    fn connect(&self, _store: &StoreSettings) -> Result<Arc<dyn IndexRemote>, RemoteError> {
        Ok(Arc::new(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn records(ids: &[&str]) -> Vec<Record> {
        ids.iter().map(|id| Record::new(*id).with("name", *id)).collect()
    }

    #[tokio::test]
    async fn test_save_and_delete() {
        let remote = InMemoryIndexRemote::new();
        remote.save_objects(&records(&["1", "2", "3"]), "idx").await.unwrap();
        assert_eq!(remote.record_count("idx").await.unwrap(), 3);

        remote
            .delete_objects(&["2".to_string(), "missing".to_string()], "idx")
            .await
            .unwrap();
        let index = remote.index("idx").unwrap();
        assert_eq!(
            index.records.keys().cloned().collect::<Vec<_>>(),
            vec!["1".to_string(), "3".to_string()]
        );
    }

    #[tokio::test]
    async fn test_save_upserts_by_object_id() {
        let remote = InMemoryIndexRemote::new();
        remote.save_objects(&[Record::new("1").with("v", 1)], "idx").await.unwrap();
        remote.save_objects(&[Record::new("1").with("v", 2)], "idx").await.unwrap();

        let index = remote.index("idx").unwrap();
        assert_eq!(index.records.len(), 1);
        assert_eq!(index.records["1"].get("v"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn test_move_replaces_destination_and_drops_source() {
        let remote = InMemoryIndexRemote::new();
        remote.save_objects(&records(&["old1", "old2"]), "prod").await.unwrap();
        remote.save_objects(&records(&["new1"]), "prod_tmp").await.unwrap();

        remote.move_index("prod_tmp", "prod").await.unwrap();

        assert!(remote.index("prod_tmp").is_none());
        let prod = remote.index("prod").unwrap();
        assert_eq!(prod.records.keys().cloned().collect::<Vec<_>>(), vec!["new1"]);
    }

    #[tokio::test]
    async fn test_rules_survive_move_only_when_copied() {
        let remote = InMemoryIndexRemote::new();
        remote.seed_index(
            "prod",
            RemoteIndex {
                query_rules: vec![json!({"objectID": "rule-1"})],
                ..Default::default()
            },
        );

        remote.save_objects(&records(&["a"]), "prod_tmp").await.unwrap();
        remote.copy_query_rules("prod", "prod_tmp").await.unwrap();
        remote.move_index("prod_tmp", "prod").await.unwrap();
        assert_eq!(remote.index("prod").unwrap().query_rules.len(), 1);

        remote.save_objects(&records(&["b"]), "prod_tmp").await.unwrap();
        remote.move_index("prod_tmp", "prod").await.unwrap();
        assert!(remote.index("prod").unwrap().query_rules.is_empty());
    }

    #[tokio::test]
    async fn test_copy_rules_from_missing_index_is_noop() {
        let remote = InMemoryIndexRemote::new();
        remote.copy_query_rules("nope", "tmp").await.unwrap();
        assert!(remote.index("tmp").is_none());
    }

    #[tokio::test]
    async fn test_move_missing_source_fails() {
        let remote = InMemoryIndexRemote::new();
        let result = remote.move_index("nope", "prod").await;
        assert!(matches!(result, Err(RemoteError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let remote = InMemoryIndexRemote::new();
        remote.fail_next(OperationKind::SaveObjects, 1);

        let err = remote.save_objects(&records(&["1"]), "idx").await.unwrap_err();
        assert!(err.is_transient());
        remote.save_objects(&records(&["1"]), "idx").await.unwrap();

        assert_eq!(
            remote.operations(),
            vec![RemoteOperation::SaveObjects {
                index: "idx".to_string(),
                count: 1
            }]
        );
    }

    #[tokio::test]
    async fn test_clear_keeps_settings() {
        let remote = InMemoryIndexRemote::new();
        let mut settings = IndexSettings::new();
        settings.insert("searchableAttributes".into(), json!(["name"]));
        remote.set_settings("idx", &settings).await.unwrap();
        remote.save_objects(&records(&["1"]), "idx").await.unwrap();

        remote.clear_index("idx").await.unwrap();

        let index = remote.index("idx").unwrap();
        assert!(index.records.is_empty());
        assert_eq!(index.settings, settings);
    }

    #[test]
    fn test_clones_share_state() {
        let remote = InMemoryIndexRemote::new();
        let other = remote.clone();
        other.seed_index("shared", RemoteIndex::default());
        assert_eq!(remote.index_names(), vec!["shared".to_string()]);
    }
}
