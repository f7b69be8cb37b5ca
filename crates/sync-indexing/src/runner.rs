//! Job dispatch from the queue to the index builders.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use sync_queue::{JobFailure, JobRunner};
use sync_remote::RemoteFactory;
use sync_types::{EntityId, EntityKind, IndexOptions, JobKind, Settings, StoreSettings};

use crate::builder::{BuildReport, IndexBuilder};
use crate::catalog::CatalogSnapshotProvider;
use crate::error::IndexingError;
use crate::provider::EntityDataProvider;
use crate::record_builder::{
    CategoryRecordBuilder, PageRecordBuilder, ProductRecordBuilder, RecordBuilder,
    RecordPipeline, SuggestionRecordBuilder,
};

/// Object-safe face of an [`IndexBuilder`].
#[async_trait]
pub trait EntityIndexer: Send + Sync {
    fn kind(&self) -> EntityKind;

    async fn build(
        &self,
        store: &StoreSettings,
        entity_ids: Option<&[EntityId]>,
        options: Option<&IndexOptions>,
    ) -> Result<BuildReport, IndexingError>;
}

#[async_trait]
impl<P, B> EntityIndexer for IndexBuilder<P, B>
where
    P: EntityDataProvider,
    B: RecordBuilder,
{
    fn kind(&self) -> EntityKind {
        IndexBuilder::kind(self)
    }

    async fn build(
        &self,
        store: &StoreSettings,
        entity_ids: Option<&[EntityId]>,
        options: Option<&IndexOptions>,
    ) -> Result<BuildReport, IndexingError> {
        self.build_index(store, entity_ids, options).await
    }
}

/// Runs queued jobs against the registered indexers.
pub struct IndexingJobRunner {
    indexers: HashMap<EntityKind, Arc<dyn EntityIndexer>>,
    settings: Arc<Settings>,
}

impl IndexingJobRunner {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self {
            indexers: HashMap::new(),
            settings,
        }
    }

    /// Indexers for every kind, reading catalog snapshots under `root`.
    pub fn for_catalog(
        settings: Arc<Settings>,
        root: &Path,
        remotes: Arc<dyn RemoteFactory>,
    ) -> Self {
        let rules = settings.indexing.clone();
        let provider = |kind| CatalogSnapshotProvider::new(kind, root, rules.clone());

        Self::new(settings.clone())
            .with_indexer(Arc::new(IndexBuilder::new(
                provider(EntityKind::Product),
                RecordPipeline::new(ProductRecordBuilder),
                remotes.clone(),
                rules.clone(),
            )))
            .with_indexer(Arc::new(IndexBuilder::new(
                provider(EntityKind::Category),
                RecordPipeline::new(CategoryRecordBuilder),
                remotes.clone(),
                rules.clone(),
            )))
            .with_indexer(Arc::new(IndexBuilder::new(
                provider(EntityKind::Page),
                RecordPipeline::new(PageRecordBuilder),
                remotes.clone(),
                rules.clone(),
            )))
            .with_indexer(Arc::new(IndexBuilder::new(
                provider(EntityKind::Suggestion),
                RecordPipeline::new(SuggestionRecordBuilder),
                remotes,
                rules,
            )))
    }

    /// Register an indexer, replacing any previous one for its kind.
    pub fn register(&mut self, indexer: Arc<dyn EntityIndexer>) {
        self.indexers.insert(indexer.kind(), indexer);
    }

    pub fn with_indexer(mut self, indexer: Arc<dyn EntityIndexer>) -> Self {
        self.register(indexer);
        self
    }

    pub fn indexer(&self, kind: EntityKind) -> Option<&Arc<dyn EntityIndexer>> {
        self.indexers.get(&kind)
    }

    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    /// Execute a job payload and return the build report.
    pub async fn run_kind(&self, kind: &JobKind) -> Result<BuildReport, IndexingError> {
        let store = self.settings.store(kind.store_id())?;
        let indexer = self
            .indexer(kind.entity())
            .ok_or(IndexingError::NoIndexer(kind.entity()))?;
        debug!(store_id = store.store_id, kind = %kind, "Running job");

        match kind {
            JobKind::BuildIndexFull { options, .. } => {
                indexer.build(store, None, options.as_ref()).await
            }
            JobKind::BuildIndex {
                entity_ids,
                options,
                ..
            } => {
                indexer
                    .build(store, Some(entity_ids.as_slice()), options.as_ref())
                    .await
            }
        }
    }
}

#[async_trait]
impl JobRunner for IndexingJobRunner {
    async fn run(&self, kind: &JobKind) -> Result<(), JobFailure> {
        match self.run_kind(kind).await {
            Ok(report) => {
                if !report.is_complete() {
                    warn!(
                        kind = %kind,
                        skipped_chunks = report.skipped_chunks,
                        dropped_records = report.dropped_records,
                        "Job finished with skipped records"
                    );
                }
                Ok(())
            }
            Err(e) if e.is_retryable() => Err(JobFailure::retryable(e.to_string())),
            Err(e) => Err(JobFailure::permanent(e.to_string())),
        }
    }
}
