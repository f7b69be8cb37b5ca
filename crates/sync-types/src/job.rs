//! Queue job types.
//!
//! A job is one deferred unit of indexing work. Instead of storing a class
//! and method name to call, a job carries a closed [`JobKind`] with a typed
//! payload; the runner dispatches on it with a `match`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::{EntityId, EntityKind};
use crate::index::IndexOptions;

/// What a job does when it runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum JobKind {
    /// Rebuild the whole index of `entity` for a store through the staging index.
    BuildIndexFull {
        entity: EntityKind,
        store_id: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        options: Option<IndexOptions>,
    },

    /// Upsert/delete the given entities directly in the production index.
    BuildIndex {
        entity: EntityKind,
        store_id: u32,
        entity_ids: Vec<EntityId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        options: Option<IndexOptions>,
    },
}

impl JobKind {
    /// Full rebuild for a store.
    pub fn full(entity: EntityKind, store_id: u32) -> Self {
        JobKind::BuildIndexFull {
            entity,
            store_id,
            options: None,
        }
    }

    /// Incremental update for specific entities.
    pub fn incremental(entity: EntityKind, store_id: u32, entity_ids: Vec<EntityId>) -> Self {
        JobKind::BuildIndex {
            entity,
            store_id,
            entity_ids,
            options: None,
        }
    }

    /// Map `None` ids to a full rebuild, as `buildIndex(store, null)` does.
    pub fn for_ids(entity: EntityKind, store_id: u32, entity_ids: Option<Vec<EntityId>>) -> Self {
        match entity_ids {
            Some(ids) => Self::incremental(entity, store_id, ids),
            None => Self::full(entity, store_id),
        }
    }

    pub fn entity(&self) -> EntityKind {
        match self {
            JobKind::BuildIndexFull { entity, .. } | JobKind::BuildIndex { entity, .. } => *entity,
        }
    }

    pub fn store_id(&self) -> u32 {
        match self {
            JobKind::BuildIndexFull { store_id, .. } | JobKind::BuildIndex { store_id, .. } => {
                *store_id
            }
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, JobKind::BuildIndexFull { .. })
    }

    /// Short method name for logs and listings.
    pub fn method(&self) -> &'static str {
        match self {
            JobKind::BuildIndexFull { .. } => "build_index_full",
            JobKind::BuildIndex { .. } => "build_index",
        }
    }

    /// Serialized payload size in bytes.
    pub fn payload_size(&self) -> Result<usize, serde_json::Error> {
        serde_json::to_vec(self).map(|bytes| bytes.len())
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}::{}", self.entity(), self.method())
    }
}

/// A job waiting to be inserted; the storage layer assigns id and timestamps.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub kind: JobKind,
    pub weight: u64,
    pub max_retries: u32,
    pub data_size: usize,
}

impl NewJob {
    /// Build a new job, measuring its payload.
    pub fn new(kind: JobKind, weight: u64, max_retries: u32) -> Result<Self, serde_json::Error> {
        let data_size = kind.payload_size()?;
        Ok(Self {
            kind,
            weight: weight.max(1),
            max_retries,
            data_size,
        })
    }
}

/// A persisted queue row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Insertion-ordered id
    pub id: u64,

    /// Runner holding the claim, if any
    pub pid: Option<u32>,

    /// What to run
    pub kind: JobKind,

    /// Opaque cost used for claim budgeting and reporting
    pub weight: u64,

    pub max_retries: u32,

    /// Failed attempts so far
    pub retries: u32,

    /// Last failure message
    pub error_log: Option<String>,

    /// Serialized payload size in bytes
    pub data_size: usize,

    pub store_id: u32,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,

    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub locked_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Materialize a new job with its assigned id.
    pub fn from_new(id: u64, new_job: NewJob, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            pid: None,
            store_id: new_job.kind.store_id(),
            kind: new_job.kind,
            weight: new_job.weight,
            max_retries: new_job.max_retries,
            retries: 0,
            error_log: None,
            data_size: new_job.data_size,
            created_at,
            locked_at: None,
        }
    }

    pub fn is_claimed(&self) -> bool {
        self.pid.is_some()
    }

    /// Count a failed attempt. Returns true while another attempt is allowed.
    ///
    /// A job that always fails runs `max_retries + 1` times in total.
    pub fn record_failure(&mut self, error: impl Into<String>) -> bool {
        self.retries += 1;
        self.error_log = Some(error.into());
        self.retries <= self.max_retries
    }

    /// Drop the claim so a later pass may pick the job up again.
    pub fn release(&mut self) {
        self.pid = None;
        self.locked_at = None;
    }

    /// Serialize to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Terminal state of an archived job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Success,
    Failed,
}

/// Read-only record of a finished job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedJob {
    pub job: Job,
    pub outcome: JobOutcome,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub finished_at: DateTime<Utc>,
    /// Wall time of the final attempt
    pub duration_ms: u64,
}

impl ArchivedJob {
    pub fn new(job: Job, outcome: JobOutcome, duration_ms: u64) -> Self {
        Self {
            job,
            outcome,
            finished_at: Utc::now(),
            duration_ms,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
