//! Queue health heuristics.
//!
//! Derived from job timestamps only and purely advisory: nothing here
//! changes how jobs run.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::fmt;

use sync_types::{ArchivedJob, Job, JobOutcome, QueueSettings};

/// Minimum successful jobs before a processing-speed advisory is given.
const MIN_SPEED_SAMPLES: usize = 5;

/// Limits the advisories are measured against.
#[derive(Debug, Clone)]
pub struct HealthThresholds {
    /// A claim held longer than this is stuck
    pub stuck_after: Duration,
    /// A pending job older than this means no runner is processing the queue
    pub not_processed_after: Duration,
    /// A full pass estimated below this many ms is too fast
    pub fast_run_ms: u64,
    pub jobs_per_run: usize,
}

impl HealthThresholds {
    pub fn from_settings(settings: &QueueSettings) -> Self {
        Self {
            stuck_after: Duration::seconds(settings.stale_lock_secs as i64),
            not_processed_after: Duration::hours(1),
            fast_run_ms: 10_000,
            jobs_per_run: settings.jobs_per_run,
        }
    }
}

/// One advisory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Advisory {
    /// A runner claimed a job and never finished it
    Stuck { job_id: u64, locked_for_secs: i64 },
    /// Pending jobs are piling up with nobody running the queue
    NotProcessed { oldest_age_secs: i64 },
    /// Passes finish quickly while a backlog waits; raise `jobs_per_run`
    TooFast {
        avg_processing_ms: u64,
        suggested_jobs_per_run: usize,
    },
}

impl fmt::Display for Advisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Advisory::Stuck {
                job_id,
                locked_for_secs,
            } => write!(f, "job {} has been locked for {}s", job_id, locked_for_secs),
            Advisory::NotProcessed { oldest_age_secs } => write!(
                f,
                "oldest pending job is {}s old; is the queue runner scheduled?",
                oldest_age_secs
            ),
            Advisory::TooFast {
                avg_processing_ms,
                suggested_jobs_per_run,
            } => write!(
                f,
                "jobs average {}ms; consider jobs_per_run = {}",
                avg_processing_ms, suggested_jobs_per_run
            ),
        }
    }
}

/// Snapshot of queue health.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueHealth {
    pub pending: usize,
    pub claimed: usize,
    /// Mean wall time of archived successful jobs
    pub avg_processing_ms: Option<u64>,
    pub oldest_pending_age_secs: Option<i64>,
    pub advisories: Vec<Advisory>,
}

impl QueueHealth {
    pub fn assess(
        jobs: &[Job],
        archive: &[ArchivedJob],
        now: DateTime<Utc>,
        thresholds: &HealthThresholds,
    ) -> Self {
        let mut advisories = Vec::new();

        let claimed: Vec<&Job> = jobs.iter().filter(|j| j.is_claimed()).collect();
        for job in &claimed {
            if let Some(locked_at) = job.locked_at {
                let locked_for = now - locked_at;
                if locked_for > thresholds.stuck_after {
                    advisories.push(Advisory::Stuck {
                        job_id: job.id,
                        locked_for_secs: locked_for.num_seconds(),
                    });
                }
            }
        }

        let pending = jobs.len() - claimed.len();
        let oldest_pending = jobs
            .iter()
            .filter(|j| !j.is_claimed())
            .map(|j| j.created_at)
            .min();
        let oldest_pending_age = oldest_pending.map(|created| now - created);
        if let Some(age) = oldest_pending_age {
            if age > thresholds.not_processed_after {
                advisories.push(Advisory::NotProcessed {
                    oldest_age_secs: age.num_seconds(),
                });
            }
        }

        let durations: Vec<u64> = archive
            .iter()
            .filter(|a| a.outcome == JobOutcome::Success)
            .map(|a| a.duration_ms)
            .collect();
        let avg_processing_ms = if durations.is_empty() {
            None
        } else {
            Some(durations.iter().sum::<u64>() / durations.len() as u64)
        };

        if let Some(avg) = avg_processing_ms {
            let estimated_run_ms = avg.saturating_mul(thresholds.jobs_per_run as u64);
            if durations.len() >= MIN_SPEED_SAMPLES
                && pending > thresholds.jobs_per_run
                && estimated_run_ms < thresholds.fast_run_ms
            {
                let suggested = (thresholds.fast_run_ms / avg.max(1)) as usize;
                advisories.push(Advisory::TooFast {
                    avg_processing_ms: avg,
                    suggested_jobs_per_run: suggested.max(thresholds.jobs_per_run + 1),
                });
            }
        }

        Self {
            pending,
            claimed: claimed.len(),
            avg_processing_ms,
            oldest_pending_age_secs: oldest_pending_age.map(|a| a.num_seconds()),
            advisories,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.advisories.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_types::{EntityKind, JobKind, NewJob};

    fn job(id: u64, created_at: DateTime<Utc>) -> Job {
        let new_job = NewJob::new(JobKind::full(EntityKind::Product, 1), 1, 3).unwrap();
        Job::from_new(id, new_job, created_at)
    }

    fn thresholds() -> HealthThresholds {
        HealthThresholds::from_settings(&QueueSettings::default())
    }

    #[test]
    fn test_empty_queue_is_healthy() {
        let health = QueueHealth::assess(&[], &[], Utc::now(), &thresholds());
        assert!(health.is_healthy());
        assert_eq!(health.avg_processing_ms, None);
        assert_eq!(health.oldest_pending_age_secs, None);
    }

    #[test]
    fn test_stuck_claim() {
        let now = Utc::now();
        let mut stuck = job(1, now - Duration::hours(3));
        stuck.pid = Some(10);
        stuck.locked_at = Some(now - Duration::hours(2));

        let health = QueueHealth::assess(&[stuck], &[], now, &thresholds());
        assert_eq!(health.claimed, 1);
        assert_eq!(
            health.advisories,
            vec![Advisory::Stuck {
                job_id: 1,
                locked_for_secs: 7200
            }]
        );
    }

    #[test]
    fn test_not_processed() {
        let now = Utc::now();
        let jobs = vec![job(1, now - Duration::hours(2)), job(2, now)];
        let health = QueueHealth::assess(&jobs, &[], now, &thresholds());
        assert_eq!(health.pending, 2);
        assert_eq!(health.oldest_pending_age_secs, Some(7200));
        assert!(matches!(
            health.advisories[0],
            Advisory::NotProcessed { oldest_age_secs: 7200 }
        ));
    }

    #[test]
    fn test_too_fast_with_backlog() {
        let now = Utc::now();
        let jobs: Vec<Job> = (0..20).map(|i| job(i, now)).collect();
        let archive: Vec<ArchivedJob> = (100..106)
            .map(|i| ArchivedJob::new(job(i, now), JobOutcome::Success, 50))
            .collect();

        let health = QueueHealth::assess(&jobs, &archive, now, &thresholds());
        assert_eq!(health.avg_processing_ms, Some(50));
        assert_eq!(
            health.advisories,
            vec![Advisory::TooFast {
                avg_processing_ms: 50,
                suggested_jobs_per_run: 200
            }]
        );
    }

    #[test]
    fn test_failed_jobs_do_not_count_toward_speed() {
        let now = Utc::now();
        let archive = vec![ArchivedJob::new(job(1, now), JobOutcome::Failed, 5)];
        let health = QueueHealth::assess(&[], &archive, now, &thresholds());
        assert_eq!(health.avg_processing_ms, None);
    }

    #[test]
    fn test_advisory_display() {
        let advisory = Advisory::Stuck {
            job_id: 4,
            locked_for_secs: 90,
        };
        assert_eq!(advisory.to_string(), "job 4 has been locked for 90s");
    }
}
