//! Durable, at-least-once execution of deferred indexing jobs.
//!
//! A runner pass (`run_cron`) is invoked periodically or from the CLI.
//! Several passes may overlap; the storage claim guarantees that each job
//! is held by at most one of them.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use sync_remote::CredentialsValidator;
use sync_storage::{QueueStats, Storage, StorageError};
use sync_types::{ArchivedJob, Job, JobKind, JobOutcome, NewJob, QueueSettings, Settings};

use crate::error::QueueError;
use crate::health::{HealthThresholds, QueueHealth};
use crate::runner::JobRunner;

/// Counts from one runner pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Stale claims released before claiming
    pub released_stale: usize,
    pub claimed: usize,
    pub succeeded: usize,
    /// Failed attempts released for a later pass
    pub retried: usize,
    /// Jobs archived as permanently failed
    pub failed: usize,
    /// Jobs left untouched because their store's credentials are invalid
    pub blocked: usize,
    /// Jobs another runner took over while they were running
    pub lost_claims: usize,
    /// Jobs whose bookkeeping write failed
    pub errors: usize,
}

impl RunReport {
    fn record(&mut self, step: StepOutcome) {
        match step {
            StepOutcome::Succeeded => self.succeeded += 1,
            StepOutcome::Retried => self.retried += 1,
            StepOutcome::Failed => self.failed += 1,
            StepOutcome::Blocked => self.blocked += 1,
        }
    }

    /// True when no job failed permanently and none was blocked.
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.blocked == 0 && self.errors == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepOutcome {
    Succeeded,
    Retried,
    Failed,
    Blocked,
}

/// The job queue.
pub struct Queue {
    storage: Arc<Storage>,
    settings: QueueSettings,
    pid: u32,
}

impl Queue {
    /// Create a queue over `storage`, identified as the current process.
    pub fn new(storage: Arc<Storage>, settings: QueueSettings) -> Self {
        Self {
            storage,
            settings,
            pid: std::process::id(),
        }
    }

    /// Override the runner id (several runners in one process, tests).
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    /// Override how many jobs one pass claims.
    pub fn with_jobs_per_run(mut self, jobs_per_run: usize) -> Self {
        self.settings.jobs_per_run = jobs_per_run.max(1);
        self
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    /// Append a job.
    ///
    /// The serialized payload must fit `max_payload_bytes`; a larger payload
    /// is rejected here rather than failing later in a runner.
    pub fn add_to_queue(&self, kind: JobKind, weight: u64) -> Result<Job, QueueError> {
        let new_job = NewJob::new(kind, weight, self.settings.max_retries)?;
        if new_job.data_size > self.settings.max_payload_bytes {
            return Err(QueueError::PayloadTooLarge {
                size: new_job.data_size,
                max: self.settings.max_payload_bytes,
            });
        }

        let job = self.storage.enqueue_job(new_job)?;
        info!(
            job_id = job.id,
            store_id = job.store_id,
            kind = %job.kind,
            weight = job.weight,
            data_size = job.data_size,
            "Job added to queue"
        );
        Ok(job)
    }

    /// Run one pass: claim a bounded batch of the oldest jobs and execute them.
    ///
    /// Credentials are checked once per store with waiting jobs before
    /// claiming; jobs of stores that fail the check stay queued and are
    /// passed over, so they never crowd out other stores.
    ///
    /// A single job's failure never escapes this call; it is retried or
    /// archived. Only failures to read or claim from storage are returned.
    pub async fn run_cron(
        &self,
        runner: &dyn JobRunner,
        validator: &dyn CredentialsValidator,
        settings: &Settings,
    ) -> Result<RunReport, QueueError> {
        let mut report = RunReport::default();

        let stale_cutoff = Utc::now() - Duration::seconds(self.settings.stale_lock_secs as i64);
        report.released_stale = self.storage.release_stale_claims(stale_cutoff)?;

        let mut credentials: HashMap<u32, bool> = HashMap::new();
        let mut blocked_stores = HashSet::new();
        for (store_id, waiting) in self.storage.pending_by_store()? {
            // Unknown stores are claimed and archived by `execute`.
            let Ok(store) = settings.store(store_id) else {
                continue;
            };
            let valid = validator.check_credentials(store).await;
            credentials.insert(store_id, valid);
            if !valid {
                error!(
                    store_id,
                    jobs = waiting,
                    "Invalid search credentials for store, jobs left queued"
                );
                blocked_stores.insert(store_id);
                report.blocked += waiting;
            }
        }

        let jobs = self.storage.claim_jobs(
            self.pid,
            self.settings.jobs_per_run,
            self.settings.max_weight_per_run,
            &blocked_stores,
        )?;
        report.claimed = jobs.len();
        if jobs.is_empty() {
            debug!(pid = self.pid, blocked = report.blocked, "No jobs to run");
            return Ok(report);
        }
        info!(pid = self.pid, count = jobs.len(), "Claimed jobs");

        for job in jobs {
            let job_id = job.id;
            match self.execute(job, runner, validator, settings, &mut credentials).await {
                Ok(step) => report.record(step),
                Err(QueueError::Storage(StorageError::ClaimLost { .. })) => {
                    warn!(
                        job_id,
                        pid = self.pid,
                        "Job was taken over by another runner, result dropped"
                    );
                    report.lost_claims += 1;
                }
                Err(e) => {
                    error!(job_id, error = %e, "Failed to record job result");
                    report.errors += 1;
                }
            }
        }

        info!(
            claimed = report.claimed,
            succeeded = report.succeeded,
            retried = report.retried,
            failed = report.failed,
            blocked = report.blocked,
            lost_claims = report.lost_claims,
            "Queue run complete"
        );
        Ok(report)
    }

    async fn execute(
        &self,
        mut job: Job,
        runner: &dyn JobRunner,
        validator: &dyn CredentialsValidator,
        settings: &Settings,
        credentials: &mut HashMap<u32, bool>,
    ) -> Result<StepOutcome, QueueError> {
        let store = match settings.store(job.store_id) {
            Ok(store) => store,
            Err(e) => {
                job.record_failure(e.to_string());
                return self.archive_failed(job, 0);
            }
        };

        // Stores first seen between the check above and the claim.
        let valid = match credentials.get(&job.store_id) {
            Some(valid) => *valid,
            None => {
                let valid = validator.check_credentials(store).await;
                credentials.insert(job.store_id, valid);
                valid
            }
        };
        if !valid {
            error!(
                job_id = job.id,
                store_id = job.store_id,
                "Invalid search credentials for store, job not run"
            );
            self.storage.release_job(&job)?;
            return Ok(StepOutcome::Blocked);
        }

        let started = Instant::now();
        let result = runner.run(&job.kind).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(()) => {
                let archived = self
                    .settings
                    .archive_successful_jobs
                    .then(|| ArchivedJob::new(job.clone(), JobOutcome::Success, duration_ms));
                self.storage.complete_job(&job, archived.as_ref())?;
                info!(job_id = job.id, kind = %job.kind, duration_ms, "Job succeeded");
                Ok(StepOutcome::Succeeded)
            }
            Err(failure) if !failure.retryable => {
                job.record_failure(failure.message);
                self.archive_failed(job, duration_ms)
            }
            Err(failure) => {
                if job.record_failure(failure.message) {
                    warn!(
                        job_id = job.id,
                        kind = %job.kind,
                        retries = job.retries,
                        max_retries = job.max_retries,
                        error = job.error_log.as_deref().unwrap_or_default(),
                        "Job failed, will retry"
                    );
                    self.storage.release_job(&job)?;
                    Ok(StepOutcome::Retried)
                } else {
                    self.archive_failed(job, duration_ms)
                }
            }
        }
    }

    fn archive_failed(&self, job: Job, duration_ms: u64) -> Result<StepOutcome, QueueError> {
        error!(
            job_id = job.id,
            kind = %job.kind,
            store_id = job.store_id,
            retries = job.retries,
            error = job.error_log.as_deref().unwrap_or_default(),
            "Job failed permanently, archived"
        );
        let archived = ArchivedJob::new(job, JobOutcome::Failed, duration_ms);
        self.storage.archive_failed_job(&archived)?;
        Ok(StepOutcome::Failed)
    }

    /// Queue counts.
    pub fn status(&self) -> Result<QueueStats, QueueError> {
        Ok(self.storage.queue_stats()?)
    }

    /// Jobs still queued, oldest first.
    pub fn pending_jobs(&self, limit: usize) -> Result<Vec<Job>, QueueError> {
        Ok(self.storage.list_jobs(limit)?)
    }

    /// Archived jobs, oldest first.
    pub fn archived_jobs(&self, limit: usize) -> Result<Vec<ArchivedJob>, QueueError> {
        Ok(self.storage.list_archive(limit)?)
    }

    /// Delete queued jobs, and the archive too if asked. Returns (jobs, archived) deleted.
    pub fn clear(&self, include_archive: bool) -> Result<(usize, usize), QueueError> {
        let jobs = self.storage.clear_jobs()?;
        let archived = if include_archive {
            self.storage.clear_archive()?
        } else {
            0
        };
        Ok((jobs, archived))
    }

    /// Drop archived jobs older than the retention window.
    pub fn prune_archive(&self) -> Result<usize, QueueError> {
        let cutoff = Utc::now() - Duration::days(self.settings.archive_retention_days as i64);
        Ok(self.storage.prune_archive(cutoff)?)
    }

    /// Advisory health report from job timestamps.
    pub fn health(&self, now: DateTime<Utc>) -> Result<QueueHealth, QueueError> {
        let jobs = self.storage.list_jobs(usize::MAX)?;
        let archive = self.storage.list_archive(usize::MAX)?;
        let thresholds = HealthThresholds::from_settings(&self.settings);
        Ok(QueueHealth::assess(&jobs, &archive, now, &thresholds))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use sync_remote::StaticCredentialsValidator;
    use sync_types::{EntityKind, StoreSettings};
    use tempfile::TempDir;

    use crate::runner::JobFailure;

    /// Runner returning scripted results and recording what it ran.
    struct ScriptedRunner {
        results: Mutex<Vec<Result<(), JobFailure>>>,
        calls: Mutex<Vec<JobKind>>,
    }

    impl ScriptedRunner {
        fn new(results: Vec<Result<(), JobFailure>>) -> Self {
            Self {
                results: Mutex::new(results),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn always_ok() -> Self {
            Self::new(Vec::new())
        }

        fn calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl JobRunner for ScriptedRunner {
        async fn run(&self, kind: &JobKind) -> Result<(), JobFailure> {
            self.calls.lock().unwrap().push(kind.clone());
            let mut results = self.results.lock().unwrap();
            if results.is_empty() {
                Ok(())
            } else {
                results.remove(0)
            }
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl JobRunner for AlwaysFails {
        async fn run(&self, _kind: &JobKind) -> Result<(), JobFailure> {
            Err(JobFailure::retryable("remote unavailable"))
        }
    }

    fn settings() -> Settings {
        let mut settings = Settings::default();
        settings
            .stores
            .push(StoreSettings::new(1, "default").with_credentials("APP", "search", "admin"));
        settings.stores.push(StoreSettings::new(2, "fr"));
        settings
    }

    fn create_queue(queue_settings: QueueSettings) -> (Queue, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::open(temp_dir.path()).unwrap());
        (Queue::new(storage, queue_settings), temp_dir)
    }

    #[test]
    fn test_add_to_queue_records_size() {
        let (queue, _temp) = create_queue(QueueSettings::default());
        let job = queue
            .add_to_queue(JobKind::incremental(EntityKind::Product, 1, vec![1, 2]), 2)
            .unwrap();
        assert_eq!(job.weight, 2);
        assert_eq!(job.max_retries, 3);
        assert!(job.data_size > 0);
        assert_eq!(queue.status().unwrap().pending, 1);
    }

    #[test]
    fn test_oversized_payload_fails_fast() {
        let settings = QueueSettings {
            max_payload_bytes: 200,
            ..Default::default()
        };
        let (queue, _temp) = create_queue(settings);
        let ids: Vec<u64> = (1_000_000..1_000_100).collect();
        let result = queue.add_to_queue(JobKind::incremental(EntityKind::Product, 1, ids), 100);

        assert!(matches!(result, Err(QueueError::PayloadTooLarge { max: 200, .. })));
        assert_eq!(queue.status().unwrap().pending, 0);
    }

    #[tokio::test]
    async fn test_successful_job_is_archived() {
        let (queue, _temp) = create_queue(QueueSettings::default());
        queue.add_to_queue(JobKind::full(EntityKind::Product, 1), 1).unwrap();

        let runner = ScriptedRunner::always_ok();
        let report = queue
            .run_cron(&runner, &StaticCredentialsValidator, &settings())
            .await
            .unwrap();

        assert_eq!(report.claimed, 1);
        assert_eq!(report.succeeded, 1);
        let stats = queue.status().unwrap();
        assert_eq!(stats.total_queued(), 0);
        assert_eq!(stats.archived_success, 1);
    }

    #[tokio::test]
    async fn test_successful_job_deleted_without_archive() {
        let settings_q = QueueSettings {
            archive_successful_jobs: false,
            ..Default::default()
        };
        let (queue, _temp) = create_queue(settings_q);
        queue.add_to_queue(JobKind::full(EntityKind::Product, 1), 1).unwrap();

        queue
            .run_cron(&ScriptedRunner::always_ok(), &StaticCredentialsValidator, &settings())
            .await
            .unwrap();

        let stats = queue.status().unwrap();
        assert_eq!(stats.total_queued(), 0);
        assert_eq!(stats.archived_success, 0);
    }

    #[tokio::test]
    async fn test_retry_bound() {
        let queue_settings = QueueSettings {
            max_retries: 2,
            ..Default::default()
        };
        let (queue, _temp) = create_queue(queue_settings);
        let job = queue.add_to_queue(JobKind::full(EntityKind::Product, 1), 1).unwrap();

        let mut passes = 0;
        loop {
            let report = queue
                .run_cron(&AlwaysFails, &StaticCredentialsValidator, &settings())
                .await
                .unwrap();
            if report.claimed == 0 {
                break;
            }
            passes += 1;
        }

        assert_eq!(passes, 3);
        let archive = queue.archived_jobs(10).unwrap();
        assert_eq!(archive.len(), 1);
        assert_eq!(archive[0].job.id, job.id);
        assert_eq!(archive[0].outcome, JobOutcome::Failed);
        assert_eq!(archive[0].job.retries, 3);
        assert_eq!(archive[0].job.error_log.as_deref(), Some("remote unavailable"));
    }

    #[tokio::test]
    async fn test_permanent_failure_archives_immediately() {
        let (queue, _temp) = create_queue(QueueSettings::default());
        queue.add_to_queue(JobKind::full(EntityKind::Product, 1), 1).unwrap();

        let runner = ScriptedRunner::new(vec![Err(JobFailure::permanent("wrong entity kind"))]);
        let report = queue
            .run_cron(&runner, &StaticCredentialsValidator, &settings())
            .await
            .unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(queue.status().unwrap().archived_failed, 1);
    }

    #[tokio::test]
    async fn test_one_failure_does_not_block_batch() {
        let (queue, _temp) = create_queue(QueueSettings::default());
        for _ in 0..3 {
            queue.add_to_queue(JobKind::full(EntityKind::Product, 1), 1).unwrap();
        }

        let runner = ScriptedRunner::new(vec![
            Ok(()),
            Err(JobFailure::retryable("timeout")),
            Ok(()),
        ]);
        let report = queue
            .run_cron(&runner, &StaticCredentialsValidator, &settings())
            .await
            .unwrap();

        assert_eq!(runner.calls(), 3);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.retried, 1);

        let pending = queue.pending_jobs(10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].retries, 1);
        assert!(!pending[0].is_claimed());
    }

    #[tokio::test]
    async fn test_invalid_credentials_block_without_retry() {
        let (queue, _temp) = create_queue(QueueSettings::default());
        queue.add_to_queue(JobKind::full(EntityKind::Product, 2), 1).unwrap();

        let runner = ScriptedRunner::always_ok();
        let report = queue
            .run_cron(&runner, &StaticCredentialsValidator, &settings())
            .await
            .unwrap();

        assert_eq!(report.blocked, 1);
        assert_eq!(runner.calls(), 0);
        let pending = queue.pending_jobs(10).unwrap();
        assert_eq!(pending[0].retries, 0);
        assert!(!pending[0].is_claimed());
    }

    /// A full claim window of jobs for a store without credentials does not
    /// hold back a later job of a valid store.
    #[tokio::test]
    async fn test_blocked_store_does_not_starve_others() {
        let (queue, _temp) = create_queue(QueueSettings::default());
        let queue = queue.with_jobs_per_run(10);
        for _ in 0..10 {
            queue.add_to_queue(JobKind::full(EntityKind::Product, 2), 1).unwrap();
        }
        queue.add_to_queue(JobKind::full(EntityKind::Product, 1), 1).unwrap();

        let runner = ScriptedRunner::always_ok();
        let report = queue
            .run_cron(&runner, &StaticCredentialsValidator, &settings())
            .await
            .unwrap();

        assert_eq!(report.claimed, 1);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.blocked, 10);
        assert_eq!(
            runner.calls.lock().unwrap().as_slice(),
            &[JobKind::full(EntityKind::Product, 1)]
        );

        let pending = queue.pending_jobs(20).unwrap();
        assert_eq!(pending.len(), 10);
        assert!(pending.iter().all(|job| job.store_id == 2 && !job.is_claimed()));
    }

    /// A runner whose claim was released as stale and taken by another
    /// runner does not archive the job.
    #[tokio::test]
    async fn test_result_of_lost_claim_is_dropped() {
        struct SlowRunner {
            storage: Arc<Storage>,
        }

        #[async_trait]
        impl JobRunner for SlowRunner {
            async fn run(&self, _kind: &JobKind) -> Result<(), JobFailure> {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                self.storage
                    .release_stale_claims(Utc::now() + Duration::seconds(1))
                    .unwrap();
                self.storage.claim_jobs(99, 1, u64::MAX, &HashSet::new()).unwrap();
                Ok(())
            }
        }

        let (queue, _temp) = create_queue(QueueSettings::default());
        queue.add_to_queue(JobKind::full(EntityKind::Product, 1), 1).unwrap();
        let runner = SlowRunner {
            storage: queue.storage().clone(),
        };

        let report = queue
            .run_cron(&runner, &StaticCredentialsValidator, &settings())
            .await
            .unwrap();

        assert_eq!(report.claimed, 1);
        assert_eq!(report.succeeded, 0);
        assert_eq!(report.lost_claims, 1);
        assert_eq!(queue.status().unwrap().archived_success, 0);
        let pending = queue.pending_jobs(10).unwrap();
        assert_eq!(pending[0].pid, Some(99));
    }

    #[tokio::test]
    async fn test_unknown_store_is_archived() {
        let (queue, _temp) = create_queue(QueueSettings::default());
        queue.add_to_queue(JobKind::full(EntityKind::Product, 99), 1).unwrap();

        let report = queue
            .run_cron(&ScriptedRunner::always_ok(), &StaticCredentialsValidator, &settings())
            .await
            .unwrap();

        assert_eq!(report.failed, 1);
        let archive = queue.archived_jobs(10).unwrap();
        assert!(archive[0].job.error_log.as_deref().unwrap().contains("99"));
    }

    #[tokio::test]
    async fn test_jobs_per_run_bounds_a_pass() {
        let (queue, _temp) = create_queue(QueueSettings::default());
        let queue = queue.with_jobs_per_run(2);
        for _ in 0..5 {
            queue.add_to_queue(JobKind::full(EntityKind::Page, 1), 1).unwrap();
        }

        let report = queue
            .run_cron(&ScriptedRunner::always_ok(), &StaticCredentialsValidator, &settings())
            .await
            .unwrap();
        assert_eq!(report.claimed, 2);
        assert_eq!(queue.status().unwrap().pending, 3);
    }

    #[test]
    fn test_clear() {
        let (queue, _temp) = create_queue(QueueSettings::default());
        queue.add_to_queue(JobKind::full(EntityKind::Page, 1), 1).unwrap();
        queue.add_to_queue(JobKind::full(EntityKind::Page, 1), 1).unwrap();
        assert_eq!(queue.clear(true).unwrap(), (2, 0));
        assert_eq!(queue.status().unwrap().total_queued(), 0);
    }
}
