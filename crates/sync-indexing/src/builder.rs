//! Index builds for one entity kind.
//!
//! [`IndexBuilder`] composes an [`EntityDataProvider`] with a
//! [`RecordPipeline`] and pushes the result through the store's
//! [`IndexRemote`]. Two modes:
//!
//! - Full rebuild: records go to the staging twin of the production
//!   index, query rules are copied onto it, it is moved over production in
//!   one step, then settings are applied. Readers see either the old index
//!   or the new one, never a half-built state.
//! - Incremental: the requested entities are upserted into, or deleted
//!   from, the production index directly. No staging index is touched.
//!
//! Entities are processed in fixed-size chunks. A chunk in which any record
//! fails to build is logged and skipped as a whole; the build continues.
//! Push failures are not swallowed: they fail the build so the queue can
//! retry it.

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use sync_remote::{IndexRemote, IndexSettings, RemoteFactory};
use sync_types::{Entity, EntityId, EntityKind, IndexOptions, IndexingSettings, Record, StoreSettings};

use crate::batch::RecordBatcher;
use crate::error::IndexingError;
use crate::provider::EntityDataProvider;
use crate::record_builder::{RecordBuilder, RecordPipeline};

/// Outcome of one build call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub store_id: u32,
    pub entity: Option<EntityKind>,
    /// Production index name
    pub index: String,
    /// Indexing disabled for the store or kind; nothing was done
    pub disabled: bool,
    pub full: bool,
    /// Records pushed
    pub indexed: usize,
    /// Object ids deleted from production
    pub removed: usize,
    /// Chunks skipped because a record failed to build
    pub skipped_chunks: usize,
    /// Entities inside skipped chunks
    pub skipped_entities: usize,
    /// Records over the batch byte ceiling
    pub dropped_records: usize,
    /// Staging index moved over production
    pub swapped: bool,
    pub elapsed_ms: u64,
}

impl BuildReport {
    fn new(store_id: u32, entity: EntityKind, index: String, full: bool) -> Self {
        Self {
            store_id,
            entity: Some(entity),
            index,
            full,
            ..Default::default()
        }
    }

    fn disabled(store_id: u32, entity: EntityKind) -> Self {
        Self {
            store_id,
            entity: Some(entity),
            disabled: true,
            ..Default::default()
        }
    }

    /// Whether every chunk made it.
    pub fn is_complete(&self) -> bool {
        self.skipped_chunks == 0 && self.dropped_records == 0
    }

    /// Merge another result into this one.
    pub fn merge(&mut self, other: &BuildReport) {
        self.indexed += other.indexed;
        self.removed += other.removed;
        self.skipped_chunks += other.skipped_chunks;
        self.skipped_entities += other.skipped_entities;
        self.dropped_records += other.dropped_records;
        self.swapped |= other.swapped;
        self.elapsed_ms += other.elapsed_ms;
    }
}

/// Builds one kind of index, generic over where entities come from and
/// how they become records.
pub struct IndexBuilder<P, B> {
    provider: P,
    pipeline: RecordPipeline<B>,
    remotes: Arc<dyn RemoteFactory>,
    settings: IndexingSettings,
}

impl<P, B> IndexBuilder<P, B>
where
    P: EntityDataProvider,
    B: RecordBuilder,
{
    pub fn new(
        provider: P,
        pipeline: RecordPipeline<B>,
        remotes: Arc<dyn RemoteFactory>,
        settings: IndexingSettings,
    ) -> Self {
        Self {
            provider,
            pipeline,
            remotes,
            settings,
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.pipeline.kind()
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Rebuild the whole index for a store.
    pub async fn build_index_full(
        &self,
        store: &StoreSettings,
        options: Option<&IndexOptions>,
    ) -> Result<BuildReport, IndexingError> {
        self.build_index(store, None, options).await
    }

    /// Build for a store. `entity_ids == None` is a full rebuild.
    ///
    /// Returns a no-op report when indexing is disabled for the store or
    /// the kind's feature toggle is off.
    pub async fn build_index(
        &self,
        store: &StoreSettings,
        entity_ids: Option<&[EntityId]>,
        options: Option<&IndexOptions>,
    ) -> Result<BuildReport, IndexingError> {
        let kind = self.kind();
        if !store.indexing_enabled || !store.kind_enabled(kind) {
            debug!(store_id = store.store_id, entity = %kind, "Indexing disabled, skipping build");
            return Ok(BuildReport::disabled(store.store_id, kind));
        }

        let options = options
            .cloned()
            .unwrap_or_else(|| IndexOptions::for_kind(store.store_id, kind));
        let remote = self.remotes.connect(store)?;
        let started = Instant::now();

        let mut report = match entity_ids {
            None => self.rebuild_full(store, &options, remote.as_ref()).await?,
            Some(ids) => {
                self.update_incremental(store, ids, &options, remote.as_ref())
                    .await?
            }
        };
        report.elapsed_ms = started.elapsed().as_millis() as u64;

        info!(
            store_id = store.store_id,
            entity = %kind,
            index = %report.index,
            full = report.full,
            indexed = report.indexed,
            removed = report.removed,
            skipped_chunks = report.skipped_chunks,
            swapped = report.swapped,
            elapsed_ms = report.elapsed_ms,
            "Index build complete"
        );
        Ok(report)
    }

    async fn rebuild_full(
        &self,
        store: &StoreSettings,
        options: &IndexOptions,
        remote: &dyn IndexRemote,
    ) -> Result<BuildReport, IndexingError> {
        let index = options.index_name(store);
        let tmp_index = options.temporary().index_name(store);
        let mut report = BuildReport::new(store.store_id, self.kind(), index.clone(), true);

        let index_settings = self.provider.index_settings(store).await?;
        let set = self.provider.entities_to_index(store, None).await?;
        info!(
            store_id = store.store_id,
            entity = %self.kind(),
            tmp_index = %tmp_index,
            count = set.to_index.len(),
            "Starting full rebuild"
        );

        // Leftovers of an interrupted rebuild must not reach production.
        remote.clear_index(&tmp_index).await?;
        remote.set_settings(&tmp_index, &index_settings).await?;
        debug!(tmp_index = %tmp_index, "Staging index cleared");

        self.push_entities(store, &set.to_index, &tmp_index, remote, &mut report)
            .await?;
        remote.wait_last_task().await?;
        debug!(tmp_index = %tmp_index, indexed = report.indexed, "Staging index populated");

        if report.skipped_chunks > 0 && self.settings.abort_swap_on_chunk_failure {
            warn!(
                store_id = store.store_id,
                index = %index,
                skipped_chunks = report.skipped_chunks,
                "Chunks failed, production index left untouched"
            );
            return Ok(report);
        }

        remote.copy_query_rules(&index, &tmp_index).await?;
        remote.wait_last_task().await?;
        debug!(from = %index, to = %tmp_index, "Query rules copied");

        remote.move_index(&tmp_index, &index).await?;
        remote.wait_last_task().await?;
        report.swapped = true;
        debug!(from = %tmp_index, to = %index, "Staging index moved over production");

        self.apply_settings(&index, &index_settings, remote).await?;
        Ok(report)
    }

    async fn apply_settings(
        &self,
        index: &str,
        settings: &IndexSettings,
        remote: &dyn IndexRemote,
    ) -> Result<(), IndexingError> {
        remote.set_settings(index, settings).await?;
        remote.wait_last_task().await?;
        debug!(index, "Index settings applied");
        Ok(())
    }

    async fn update_incremental(
        &self,
        store: &StoreSettings,
        ids: &[EntityId],
        options: &IndexOptions,
        remote: &dyn IndexRemote,
    ) -> Result<BuildReport, IndexingError> {
        let index = options.index_name(store);
        let mut report = BuildReport::new(store.store_id, self.kind(), index.clone(), false);

        let set = self.provider.entities_to_index(store, Some(ids)).await?;
        debug!(
            store_id = store.store_id,
            index = %index,
            to_index = set.to_index.len(),
            to_remove = set.to_remove.len(),
            "Starting incremental update"
        );

        self.push_entities(store, &set.to_index, &index, remote, &mut report)
            .await?;

        for chunk in set.to_remove.chunks(self.settings.chunk_size.max(1)) {
            remote.delete_objects(chunk, &index).await?;
            report.removed += chunk.len();
        }
        Ok(report)
    }

    /// Build and push entities chunk by chunk, strictly in order.
    async fn push_entities(
        &self,
        store: &StoreSettings,
        entities: &[Entity],
        index: &str,
        remote: &dyn IndexRemote,
        report: &mut BuildReport,
    ) -> Result<(), IndexingError> {
        let batcher = RecordBatcher::new(self.settings.chunk_size, self.settings.max_batch_bytes);

        for (chunk_no, chunk) in entities.chunks(self.settings.chunk_size.max(1)).enumerate() {
            let records = match self.build_chunk(store, chunk) {
                Ok(records) => records,
                Err((entity_id, e)) => {
                    warn!(
                        store_id = store.store_id,
                        index,
                        chunk = chunk_no,
                        entity_id,
                        error = %e,
                        "Record build failed, chunk skipped"
                    );
                    report.skipped_chunks += 1;
                    report.skipped_entities += chunk.len();
                    continue;
                }
            };

            let batches = batcher.split(records);
            report.dropped_records += batches.dropped;
            for batch in batches.batches {
                remote.save_objects(&batch, index).await?;
                report.indexed += batch.len();
            }
            debug!(index, chunk = chunk_no, indexed = report.indexed, "Chunk pushed");
        }
        Ok(())
    }

    fn build_chunk(
        &self,
        store: &StoreSettings,
        chunk: &[Entity],
    ) -> Result<Vec<Record>, (EntityId, IndexingError)> {
        chunk
            .iter()
            .map(|entity| {
                self.pipeline
                    .build(entity, store)
                    .map_err(|e| (entity.id(), e))
            })
            .collect()
    }
}
