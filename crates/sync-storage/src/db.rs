//! RocksDB wrapper for the job queue.
//!
//! Provides:
//! - Database open with column family setup
//! - Enqueue with a persisted id counter
//! - Atomic claim of the oldest unclaimed jobs
//! - Complete / release / archive as single-row atomic writes, conditional
//!   on the caller still holding the claim
//!
//! RocksDB admits one process per database directory, so serializing
//! mutations behind `write_lock` makes the claim a conditional update at
//! the storage layer: concurrent runners never receive the same job.

use chrono::{DateTime, Utc};
use rocksdb::{IteratorMode, Options, WriteBatch, DB};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use sync_types::{ArchivedJob, Job, JobOutcome, NewJob};

use crate::column_families::{
    build_cf_descriptors, ALL_CF_NAMES, CF_JOBS, CF_JOBS_ARCHIVE, CF_META,
};
use crate::error::StorageError;
use crate::keys::{ArchiveKey, JobKey, NEXT_JOB_ID_KEY};

/// Queue storage
pub struct Storage {
    db: DB,
    /// Next job id, mirrored in the meta column family
    next_job_id: AtomicU64,
    /// Serializes every mutation of the jobs table
    write_lock: Mutex<()>,
}

impl Storage {
    /// Open storage at the given path, creating if necessary
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        info!("Opening queue storage at {:?}", path);

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_background_jobs(2);

        let cf_descriptors = build_cf_descriptors();
        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        let next_job_id = Self::load_next_job_id(&db)?;
        debug!(next_job_id, "Recovered job id counter");

        Ok(Self {
            db,
            next_job_id: AtomicU64::new(next_job_id),
            write_lock: Mutex::new(()),
        })
    }

    /// Load the next job id from meta, falling back to the highest job key
    fn load_next_job_id(db: &DB) -> Result<u64, StorageError> {
        let meta_cf = db
            .cf_handle(CF_META)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(CF_META.to_string()))?;

        if let Some(bytes) = db.get_cf(&meta_cf, NEXT_JOB_ID_KEY)? {
            if bytes.len() == 8 {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&bytes);
                return Ok(u64::from_be_bytes(buf));
            }
        }

        let jobs_cf = db
            .cf_handle(CF_JOBS)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(CF_JOBS.to_string()))?;
        let mut iter = db.iterator_cf(&jobs_cf, IteratorMode::End);
        if let Some(result) = iter.next() {
            let (key, _) = result?;
            return Ok(JobKey::from_bytes(&key)?.id + 1);
        }
        Ok(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>, StorageError> {
        self.write_lock.lock().map_err(|_| StorageError::LockPoisoned)
    }

    fn jobs_cf(&self) -> Result<&rocksdb::ColumnFamily, StorageError> {
        self.db
            .cf_handle(CF_JOBS)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(CF_JOBS.to_string()))
    }

    fn archive_cf(&self) -> Result<&rocksdb::ColumnFamily, StorageError> {
        self.db
            .cf_handle(CF_JOBS_ARCHIVE)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(CF_JOBS_ARCHIVE.to_string()))
    }

    fn meta_cf(&self) -> Result<&rocksdb::ColumnFamily, StorageError> {
        self.db
            .cf_handle(CF_META)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(CF_META.to_string()))
    }

    // ==================== Enqueue ====================

    /// Append a job to the queue.
    ///
    /// The row and the advanced id counter are written in one batch.
    pub fn enqueue_job(&self, new_job: NewJob) -> Result<Job, StorageError> {
        let _guard = self.lock()?;
        let jobs_cf = self.jobs_cf()?;
        let meta_cf = self.meta_cf()?;

        let id = self.next_job_id.fetch_add(1, Ordering::SeqCst);
        let job = Job::from_new(id, new_job, Utc::now());

        let mut batch = WriteBatch::default();
        batch.put_cf(jobs_cf, JobKey::new(id).to_bytes(), job.to_bytes()?);
        batch.put_cf(meta_cf, NEXT_JOB_ID_KEY, (id + 1).to_be_bytes());
        self.db.write(batch)?;

        debug!(job_id = id, kind = %job.kind, weight = job.weight, "Enqueued job");
        Ok(job)
    }

    /// Get a pending job by id.
    pub fn get_job(&self, id: u64) -> Result<Option<Job>, StorageError> {
        let cf = self.jobs_cf()?;
        match self.db.get_cf(cf, JobKey::new(id).to_bytes())? {
            Some(bytes) => Ok(Some(Job::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    // ==================== Claim ====================

    /// Claim the oldest unclaimed jobs for runner `pid`.
    ///
    /// Jobs of stores in `skip_stores` are passed over and stay queued.
    /// Stops at `limit` jobs or once the next job would push the summed
    /// weight past `max_weight`. The first job is always taken so an
    /// oversized job cannot block the queue.
    pub fn claim_jobs(
        &self,
        pid: u32,
        limit: usize,
        max_weight: u64,
        skip_stores: &HashSet<u32>,
    ) -> Result<Vec<Job>, StorageError> {
        let _guard = self.lock()?;
        let cf = self.jobs_cf()?;

        let now = Utc::now();
        let mut claimed = Vec::new();
        let mut weight = 0u64;
        let mut batch = WriteBatch::default();

        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            if claimed.len() >= limit {
                break;
            }
            let (key, value) = item?;
            let mut job = Job::from_bytes(&value)?;
            if job.is_claimed() || skip_stores.contains(&job.store_id) {
                continue;
            }
            if !claimed.is_empty() && weight.saturating_add(job.weight) > max_weight {
                break;
            }

            job.pid = Some(pid);
            job.locked_at = Some(now);
            weight = weight.saturating_add(job.weight);
            batch.put_cf(cf, &key, job.to_bytes()?);
            claimed.push(job);
        }

        if !claimed.is_empty() {
            self.db.write(batch)?;
            debug!(pid, count = claimed.len(), weight, "Claimed jobs");
        }

        Ok(claimed)
    }

    /// Unclaimed jobs per store.
    pub fn pending_by_store(&self) -> Result<HashMap<u32, usize>, StorageError> {
        let mut counts = HashMap::new();
        for item in self.db.iterator_cf(self.jobs_cf()?, IteratorMode::Start) {
            let (_, value) = item?;
            let job = Job::from_bytes(&value)?;
            if !job.is_claimed() {
                *counts.entry(job.store_id).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    /// Release claims taken before `cutoff`; their runner is presumed dead.
    pub fn release_stale_claims(&self, cutoff: DateTime<Utc>) -> Result<usize, StorageError> {
        let _guard = self.lock()?;
        let cf = self.jobs_cf()?;

        let mut batch = WriteBatch::default();
        let mut count = 0;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item?;
            let mut job = Job::from_bytes(&value)?;
            let stale = matches!(job.locked_at, Some(locked_at) if locked_at < cutoff);
            if job.is_claimed() && stale {
                job.release();
                batch.put_cf(cf, &key, job.to_bytes()?);
                count += 1;
            }
        }

        if count > 0 {
            self.db.write(batch)?;
            info!(count, "Released stale job claims");
        }
        Ok(count)
    }

    // ==================== Completion ====================

    /// Load the stored row of `job` and check that the caller's claim on it
    /// is still the current one.
    fn check_claim(&self, cf: &rocksdb::ColumnFamily, job: &Job) -> Result<Vec<u8>, StorageError> {
        let key = JobKey::new(job.id).to_bytes();
        let stored = match self.db.get_cf(cf, &key)? {
            Some(bytes) => Job::from_bytes(&bytes)?,
            None => return Err(StorageError::NotFound(job.id)),
        };
        // Rows store claim times at millisecond precision.
        let held = |j: &Job| (j.pid, j.locked_at.map(|t| t.timestamp_millis()));
        if held(&stored) != held(job) {
            return Err(StorageError::ClaimLost {
                id: job.id,
                pid: job.pid,
            });
        }
        Ok(key)
    }

    /// Remove a finished job, optionally archiving it in the same write.
    ///
    /// `job` is the caller's claimed copy; the write is refused with
    /// `ClaimLost` when the row was released or claimed again meanwhile.
    pub fn complete_job(&self, job: &Job, archive: Option<&ArchivedJob>) -> Result<(), StorageError> {
        let _guard = self.lock()?;
        let jobs_cf = self.jobs_cf()?;
        let key = self.check_claim(jobs_cf, job)?;

        let mut batch = WriteBatch::default();
        batch.delete_cf(jobs_cf, &key);
        if let Some(archived) = archive {
            let archive_cf = self.archive_cf()?;
            batch.put_cf(archive_cf, ArchiveKey::new(job.id).to_bytes(), archived.to_bytes()?);
        }
        self.db.write(batch)?;

        debug!(job_id = job.id, archived = archive.is_some(), "Completed job");
        Ok(())
    }

    /// Persist a failed attempt and drop the claim so a later pass retries.
    ///
    /// Same ownership check as [`Storage::complete_job`].
    pub fn release_job(&self, job: &Job) -> Result<(), StorageError> {
        let _guard = self.lock()?;
        let cf = self.jobs_cf()?;
        let key = self.check_claim(cf, job)?;

        let mut released = job.clone();
        released.release();
        self.db.put_cf(cf, &key, released.to_bytes()?)?;

        debug!(job_id = job.id, retries = job.retries, "Released job");
        Ok(())
    }

    /// Move an exhausted job to the archive as failed.
    pub fn archive_failed_job(&self, archived: &ArchivedJob) -> Result<(), StorageError> {
        debug_assert_eq!(archived.outcome, JobOutcome::Failed);
        self.complete_job(&archived.job, Some(archived))
    }

    // ==================== Inspection ====================

    /// Pending and claimed jobs, oldest first.
    pub fn list_jobs(&self, limit: usize) -> Result<Vec<Job>, StorageError> {
        let cf = self.jobs_cf()?;
        let mut jobs = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start).take(limit) {
            let (_, value) = item?;
            jobs.push(Job::from_bytes(&value)?);
        }
        Ok(jobs)
    }

    /// Archived jobs, oldest first.
    pub fn list_archive(&self, limit: usize) -> Result<Vec<ArchivedJob>, StorageError> {
        let cf = self.archive_cf()?;
        let mut archived = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start).take(limit) {
            let (_, value) = item?;
            archived.push(ArchivedJob::from_bytes(&value)?);
        }
        Ok(archived)
    }

    /// Counts for status output and health checks.
    pub fn queue_stats(&self) -> Result<QueueStats, StorageError> {
        let mut stats = QueueStats::default();

        for item in self.db.iterator_cf(self.jobs_cf()?, IteratorMode::Start) {
            let (_, value) = item?;
            let job = Job::from_bytes(&value)?;
            if job.is_claimed() {
                stats.claimed += 1;
            } else {
                stats.pending += 1;
            }
            stats.pending_weight += job.weight;
            if stats.oldest_created_at.map_or(true, |t| job.created_at < t) {
                stats.oldest_created_at = Some(job.created_at);
            }
        }

        for item in self.db.iterator_cf(self.archive_cf()?, IteratorMode::Start) {
            let (_, value) = item?;
            match ArchivedJob::from_bytes(&value)?.outcome {
                JobOutcome::Success => stats.archived_success += 1,
                JobOutcome::Failed => stats.archived_failed += 1,
            }
        }

        Ok(stats)
    }

    // ==================== Maintenance ====================

    /// Delete every job, claimed ones included. Returns count deleted.
    pub fn clear_jobs(&self) -> Result<usize, StorageError> {
        let _guard = self.lock()?;
        let cf = self.jobs_cf()?;
        let count = self.delete_where(cf, |_| Ok(true))?;
        info!(count, "Cleared job queue");
        Ok(count)
    }

    /// Delete every archived job. Returns count deleted.
    pub fn clear_archive(&self) -> Result<usize, StorageError> {
        let _guard = self.lock()?;
        let cf = self.archive_cf()?;
        let count = self.delete_where(cf, |_| Ok(true))?;
        info!(count, "Cleared job archive");
        Ok(count)
    }

    /// Delete archived jobs finished before `cutoff`.
    pub fn prune_archive(&self, cutoff: DateTime<Utc>) -> Result<usize, StorageError> {
        let _guard = self.lock()?;
        let cf = self.archive_cf()?;
        let count = self.delete_where(cf, |value| {
            Ok(ArchivedJob::from_bytes(value)?.finished_at < cutoff)
        })?;
        debug!(count, %cutoff, "Pruned job archive");
        Ok(count)
    }

    fn delete_where<F>(&self, cf: &rocksdb::ColumnFamily, predicate: F) -> Result<usize, StorageError>
    where
        F: Fn(&[u8]) -> Result<bool, StorageError>,
    {
        let mut batch = WriteBatch::default();
        let mut count = 0;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item?;
            if predicate(&value)? {
                batch.delete_cf(cf, &key);
                count += 1;
            }
        }
        if count > 0 {
            self.db.write(batch)?;
        }
        Ok(count)
    }

    /// Flush all column families to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        for cf_name in ALL_CF_NAMES {
            if let Some(cf) = self.db.cf_handle(cf_name) {
                self.db.flush_cf(cf)?;
            }
        }
        Ok(())
    }
}

/// Queue statistics.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct QueueStats {
    /// Jobs waiting for a runner
    pub pending: u64,
    /// Jobs held by a runner
    pub claimed: u64,
    /// Summed weight of pending and claimed jobs
    pub pending_weight: u64,
    /// Creation time of the oldest job still in the queue
    pub oldest_created_at: Option<DateTime<Utc>>,
    pub archived_success: u64,
    pub archived_failed: u64,
}

impl QueueStats {
    /// Jobs still in the queue table.
    pub fn total_queued(&self) -> u64 {
        self.pending + self.claimed
    }
}
