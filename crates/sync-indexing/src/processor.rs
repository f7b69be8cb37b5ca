//! Entry point for change notifications.
//!
//! A [`BatchQueueProcessor`] exists per entity kind. Given a store and an
//! optional list of changed ids it decides whether to do nothing, run the
//! build inline, or defer it to the queue.

use std::sync::Arc;
use tracing::{debug, error, info};

use sync_queue::Queue;
use sync_remote::CredentialsValidator;
use sync_types::{EntityId, EntityKind, Job, JobKind, Settings};

use crate::builder::BuildReport;
use crate::error::IndexingError;
use crate::runner::IndexingJobRunner;

/// What [`BatchQueueProcessor::process_batch`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    /// Indexing disabled for the store or kind
    Skipped,
    /// Deferred to the queue, as one job or several for large batches
    Enqueued(Vec<Job>),
    /// Queue inactive; the build ran synchronously
    RanInline(BuildReport),
}

pub struct BatchQueueProcessor {
    kind: EntityKind,
    queue: Arc<Queue>,
    runner: Arc<IndexingJobRunner>,
    validator: Arc<dyn CredentialsValidator>,
    settings: Arc<Settings>,
}

impl BatchQueueProcessor {
    pub fn new(
        kind: EntityKind,
        queue: Arc<Queue>,
        runner: Arc<IndexingJobRunner>,
        validator: Arc<dyn CredentialsValidator>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            kind,
            queue,
            runner,
            validator,
            settings,
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Schedule an index build for a store.
    ///
    /// `entity_ids == None` schedules a full rebuild. Invalid credentials
    /// are reported and nothing is enqueued. An id list is split into jobs
    /// of at most `chunk_size` ids whose payload fits `max_payload_bytes`;
    /// each job weighs its number of ids, at least 1.
    pub async fn process_batch(
        &self,
        store_id: u32,
        entity_ids: Option<Vec<EntityId>>,
    ) -> Result<ProcessOutcome, IndexingError> {
        let store = self.settings.store(store_id)?;
        if !store.indexing_enabled || !store.kind_enabled(self.kind) {
            debug!(store_id, entity = %self.kind, "Indexing disabled, batch skipped");
            return Ok(ProcessOutcome::Skipped);
        }

        if !self.validator.check_credentials(store).await {
            error!(
                store_id,
                entity = %self.kind,
                "Invalid search credentials for store, nothing enqueued"
            );
            return Err(IndexingError::InvalidCredentials { store_id });
        }

        if !self.queue.settings().active {
            let kind = JobKind::for_ids(self.kind, store_id, entity_ids);
            info!(store_id, kind = %kind, "Queue inactive, running build inline");
            let report = self.runner.run_kind(&kind).await?;
            return Ok(ProcessOutcome::RanInline(report));
        }

        let Some(ids) = entity_ids else {
            let job = self.queue.add_to_queue(JobKind::full(self.kind, store_id), 1)?;
            return Ok(ProcessOutcome::Enqueued(vec![job]));
        };

        let slices = self.split_ids(store_id, ids)?;
        if slices.len() > 1 {
            debug!(
                store_id,
                entity = %self.kind,
                jobs = slices.len(),
                "Batch split into several jobs"
            );
        }
        let mut jobs = Vec::with_capacity(slices.len());
        for slice in slices {
            let weight = slice.len().max(1) as u64;
            let kind = JobKind::incremental(self.kind, store_id, slice);
            jobs.push(self.queue.add_to_queue(kind, weight)?);
        }
        Ok(ProcessOutcome::Enqueued(jobs))
    }

    /// Split `ids` into slices bounded by `chunk_size` and by the serialized
    /// job payload ceiling. An empty list stays a single empty slice.
    fn split_ids(
        &self,
        store_id: u32,
        ids: Vec<EntityId>,
    ) -> Result<Vec<Vec<EntityId>>, IndexingError> {
        let max_ids = self.settings.indexing.chunk_size.max(1);
        let max_bytes = self.queue.settings().max_payload_bytes;
        let base = JobKind::incremental(self.kind, store_id, Vec::new()).payload_size()?;

        let mut slices = Vec::new();
        let mut current: Vec<EntityId> = Vec::new();
        let mut size = base;
        for id in ids {
            // Digits plus the separating comma.
            let cost = id.to_string().len() + 1;
            if !current.is_empty() && (current.len() >= max_ids || size + cost > max_bytes) {
                slices.push(std::mem::take(&mut current));
                size = base;
            }
            size += cost;
            current.push(id);
        }
        if !current.is_empty() || slices.is_empty() {
            slices.push(current);
        }
        Ok(slices)
    }
}
