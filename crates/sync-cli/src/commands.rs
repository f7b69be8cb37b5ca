//! Command implementations for catalog-sync.
//!
//! Handles:
//! - reindex: build indexes inline, or enqueue the builds
//! - queue: run a pass, inspect, clear and prune the job queue
//! - credentials: validate search keys per store
//! - config: print the effective settings

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};

use sync_indexing::{BatchQueueProcessor, IndexingJobRunner, ProcessOutcome};
use sync_queue::Queue;
use sync_remote::{
    CredentialsValidator, HttpRemoteFactory, InMemoryIndexRemote, RemoteCredentialsValidator,
    RemoteFactory,
};
use sync_storage::Storage;
use sync_types::{EntityId, EntityKind, JobKind, Settings};

use crate::cli::{ConfigCommands, CredentialsCommands, EntitySelector, QueueCommands};

/// Load configuration and apply CLI overrides (highest precedence).
pub fn load_settings(config_path: Option<&str>, log_level: Option<&str>) -> Result<Settings> {
    let mut settings = Settings::load(config_path).context("Failed to load configuration")?;
    if let Some(level) = log_level {
        settings.log_level = level.to_string();
    }
    Ok(settings)
}

/// Install the tracing subscriber. `RUST_LOG` wins over the configured level.
pub fn init_logging(log_level: &str) {
    let result = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .try_init();
    if result.is_err() {
        eprintln!("Tracing subscriber already installed");
    }
}

/// Open the queue over the configured (or overridden) database path.
pub fn open_queue(settings: &Settings, db_path_override: Option<&str>) -> Result<Arc<Queue>> {
    let db_path = match db_path_override {
        Some(path) => Path::new(path).to_path_buf(),
        None => settings.expanded_db_path(),
    };
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    let storage = Storage::open(&db_path).context("Failed to open queue storage")?;
    Ok(Arc::new(Queue::new(Arc::new(storage), settings.queue.clone())))
}

fn indexing_runner(settings: &Arc<Settings>, remotes: Arc<dyn RemoteFactory>) -> IndexingJobRunner {
    IndexingJobRunner::for_catalog(settings.clone(), &settings.expanded_catalog_path(), remotes)
}

fn target_stores(settings: &Settings, store: Option<u32>) -> Result<Vec<u32>> {
    match store {
        Some(id) => {
            settings.store(id)?;
            Ok(vec![id])
        }
        None => Ok(settings.stores.iter().map(|s| s.store_id).collect()),
    }
}

/// Per-store, per-kind result lines and the number of failures.
#[derive(Debug, Default)]
pub struct ReindexSummary {
    pub lines: Vec<String>,
    pub failures: usize,
}

impl ReindexSummary {
    fn ok(&mut self, store_id: u32, kind: EntityKind, message: String) {
        self.lines
            .push(format!("store {} {}: {}", store_id, kind, message));
    }

    fn fail(&mut self, store_id: u32, kind: Option<EntityKind>, message: String) {
        let scope = kind.map_or_else(String::new, |k| format!(" {}", k));
        self.lines
            .push(format!("store {}{}: FAILED {}", store_id, scope, message));
        self.failures += 1;
    }
}

/// Build now, bypassing the queue.
///
/// With `validator == None` credentials are not checked (dry runs).
pub async fn reindex_inline(
    settings: &Arc<Settings>,
    selector: EntitySelector,
    store: Option<u32>,
    ids: Option<Vec<EntityId>>,
    remotes: Arc<dyn RemoteFactory>,
    validator: Option<&dyn CredentialsValidator>,
) -> Result<ReindexSummary> {
    let runner = indexing_runner(settings, remotes);
    let mut summary = ReindexSummary::default();

    for store_id in target_stores(settings, store)? {
        let store = settings.store(store_id)?;
        if let Some(validator) = validator {
            if !validator.check_credentials(store).await {
                summary.fail(store_id, None, "invalid search credentials".to_string());
                continue;
            }
        }

        for kind in selector.kinds() {
            let job = JobKind::for_ids(kind, store_id, ids.clone());
            match runner.run_kind(&job).await {
                Ok(report) if report.disabled => summary.ok(store_id, kind, "disabled".to_string()),
                Ok(report) => summary.ok(
                    store_id,
                    kind,
                    format!(
                        "{} indexed, {} removed, {} chunks skipped, index {}{}",
                        report.indexed,
                        report.removed,
                        report.skipped_chunks,
                        report.index,
                        if report.swapped { " (swapped)" } else { "" }
                    ),
                ),
                Err(e) => {
                    warn!(store_id, entity = %kind, error = %e, "Reindex failed");
                    summary.fail(store_id, Some(kind), e.to_string());
                }
            }
        }
    }
    Ok(summary)
}

/// Hand every (store, kind) to its batch processor.
pub async fn reindex_queued(
    settings: &Arc<Settings>,
    selector: EntitySelector,
    store: Option<u32>,
    ids: Option<Vec<EntityId>>,
    queue: Arc<Queue>,
    remotes: Arc<dyn RemoteFactory>,
    validator: Arc<dyn CredentialsValidator>,
) -> Result<ReindexSummary> {
    let runner = Arc::new(indexing_runner(settings, remotes));
    let mut summary = ReindexSummary::default();

    for store_id in target_stores(settings, store)? {
        for kind in selector.kinds() {
            let processor = BatchQueueProcessor::new(
                kind,
                queue.clone(),
                runner.clone(),
                validator.clone(),
                settings.clone(),
            );
            match processor.process_batch(store_id, ids.clone()).await {
                Ok(ProcessOutcome::Skipped) => summary.ok(store_id, kind, "disabled".to_string()),
                Ok(ProcessOutcome::Enqueued(jobs)) => summary.ok(
                    store_id,
                    kind,
                    format!(
                        "enqueued {} job(s) {:?} (weight {})",
                        jobs.len(),
                        jobs.iter().map(|job| job.id).collect::<Vec<_>>(),
                        jobs.iter().map(|job| job.weight).sum::<u64>()
                    ),
                ),
                Ok(ProcessOutcome::RanInline(report)) => summary.ok(
                    store_id,
                    kind,
                    format!("ran inline, {} indexed", report.indexed),
                ),
                Err(e) => summary.fail(store_id, Some(kind), e.to_string()),
            }
        }
    }
    Ok(summary)
}

/// `reindex` entry point. Fails when any store failed.
pub async fn handle_reindex(
    settings: Arc<Settings>,
    selector: EntitySelector,
    store: Option<u32>,
    ids: Option<Vec<EntityId>>,
    queue: bool,
    dry_run: bool,
) -> Result<()> {
    let summary = if dry_run {
        let engine = InMemoryIndexRemote::new();
        let summary =
            reindex_inline(&settings, selector, store, ids, Arc::new(engine.clone()), None).await?;
        for name in engine.index_names() {
            let count = engine.index(&name).map_or(0, |i| i.records.len());
            println!("dry-run index {}: {} records", name, count);
        }
        summary
    } else {
        let remotes: Arc<dyn RemoteFactory> =
            Arc::new(HttpRemoteFactory::new(settings.remote.clone()));
        let validator: Arc<dyn CredentialsValidator> =
            Arc::new(RemoteCredentialsValidator::new(settings.remote.clone()));
        if queue {
            let queue = open_queue(&settings, None)?;
            reindex_queued(&settings, selector, store, ids, queue, remotes, validator).await?
        } else {
            reindex_inline(&settings, selector, store, ids, remotes, Some(validator.as_ref()))
                .await?
        }
    };

    for line in &summary.lines {
        println!("{}", line);
    }
    if summary.failures > 0 {
        anyhow::bail!("{} reindex target(s) failed", summary.failures);
    }
    Ok(())
}

/// `queue` entry point.
pub async fn handle_queue(
    settings: Arc<Settings>,
    db_path: Option<&str>,
    command: QueueCommands,
) -> Result<()> {
    let queue = open_queue(&settings, db_path)?;

    match command {
        QueueCommands::Run { jobs } => {
            let queue = match jobs {
                Some(n) => Arc::new(
                    Queue::new(queue.storage().clone(), settings.queue.clone())
                        .with_jobs_per_run(n),
                ),
                None => queue,
            };
            let remotes = Arc::new(HttpRemoteFactory::new(settings.remote.clone()));
            let runner = indexing_runner(&settings, remotes);
            let validator = RemoteCredentialsValidator::new(settings.remote.clone());

            let report = queue
                .run_cron(&runner, &validator, &settings)
                .await
                .context("Queue run failed")?;
            println!(
                "claimed {}, succeeded {}, retried {}, failed {}, blocked {}, lost {}, stale released {}",
                report.claimed,
                report.succeeded,
                report.retried,
                report.failed,
                report.blocked,
                report.lost_claims,
                report.released_stale
            );
            if !report.is_clean() {
                anyhow::bail!("queue run finished with failed or blocked jobs");
            }
        }
        QueueCommands::Status => {
            let stats = queue.status()?;
            println!("Queue status:");
            println!("  Pending:          {}", stats.pending);
            println!("  Claimed:          {}", stats.claimed);
            println!("  Queued weight:    {}", stats.pending_weight);
            match stats.oldest_created_at {
                Some(at) => println!("  Oldest job:       {}", at.to_rfc3339()),
                None => println!("  Oldest job:       -"),
            }
            println!("  Archived (ok):    {}", stats.archived_success);
            println!("  Archived (fail):  {}", stats.archived_failed);

            for job in queue.pending_jobs(20)? {
                println!(
                    "  #{} {} store={} weight={} retries={}/{}{}",
                    job.id,
                    job.kind,
                    job.store_id,
                    job.weight,
                    job.retries,
                    job.max_retries,
                    if job.is_claimed() { " [claimed]" } else { "" }
                );
            }
        }
        QueueCommands::Health => {
            let health = queue.health(Utc::now())?;
            println!("Queue health:");
            println!("  Pending: {}, claimed: {}", health.pending, health.claimed);
            if let Some(avg) = health.avg_processing_ms {
                println!("  Average processing time: {}ms", avg);
            }
            if let Some(age) = health.oldest_pending_age_secs {
                println!("  Oldest pending job age: {}s", age);
            }
            if health.is_healthy() {
                println!("  No advisories");
            }
            for advisory in &health.advisories {
                println!("  ! {}", advisory);
            }
        }
        QueueCommands::Clear { archive } => {
            let (jobs, archived) = queue.clear(archive)?;
            info!(jobs, archived, "Queue cleared");
            println!("Deleted {} queued jobs, {} archived jobs", jobs, archived);
        }
        QueueCommands::PruneArchive => {
            let pruned = queue.prune_archive()?;
            println!("Pruned {} archived jobs", pruned);
        }
    }

    Ok(())
}

/// Check every targeted store and return the ids that failed.
pub async fn check_credentials(
    settings: &Settings,
    store: Option<u32>,
    validator: &dyn CredentialsValidator,
) -> Result<Vec<u32>> {
    let mut invalid = Vec::new();
    for store_id in target_stores(settings, store)? {
        let store = settings.store(store_id)?;
        let valid = validator.check_credentials(store).await;
        println!(
            "store {} ({}): {}",
            store_id,
            store.code,
            if valid { "ok" } else { "INVALID" }
        );
        if !valid {
            invalid.push(store_id);
        }
    }
    Ok(invalid)
}

/// `credentials` entry point.
pub async fn handle_credentials(settings: Arc<Settings>, command: CredentialsCommands) -> Result<()> {
    match command {
        CredentialsCommands::Check { store } => {
            let validator = RemoteCredentialsValidator::new(settings.remote.clone());
            let invalid = check_credentials(&settings, store, &validator).await?;
            if !invalid.is_empty() {
                anyhow::bail!("invalid credentials for store(s) {:?}", invalid);
            }
        }
    }
    Ok(())
}

/// Effective settings as TOML. Keys are redacted by serialization.
pub fn render_config(settings: &Settings) -> Result<String> {
    toml::to_string_pretty(settings).context("Failed to render settings")
}

/// `config` entry point.
pub fn handle_config(settings: &Settings, command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Show => print!("{}", render_config(settings)?),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sync_remote::{IndexRemote, StaticCredentialsValidator};
    use sync_types::StoreSettings;
    use tempfile::TempDir;

    fn settings(catalog: &Path) -> Arc<Settings> {
        let mut settings = Settings::default();
        settings.catalog_path = catalog.to_string_lossy().to_string();
        settings
            .stores
            .push(StoreSettings::new(1, "default").with_credentials("APP", "search", "admin"));
        settings.stores.push(StoreSettings::new(2, "fr"));
        Arc::new(settings)
    }

    fn write_snapshot(root: &Path, code: &str, name: &str, value: serde_json::Value) {
        let dir = root.join(code);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(name), value.to_string()).unwrap();
    }

    fn seed_default_store(root: &Path) {
        write_snapshot(
            root,
            "default",
            "products.json",
            json!([
                { "id": 1, "sku": "A", "name": "Lamp", "price": 10.0 },
                { "id": 2, "sku": "B", "name": "Desk", "price": 99.0 }
            ]),
        );
    }

    #[tokio::test]
    async fn test_reindex_inline_counts_failures_per_store() {
        let temp = TempDir::new().unwrap();
        seed_default_store(temp.path());
        let settings = settings(temp.path());
        let engine = InMemoryIndexRemote::new();

        let summary = reindex_inline(
            &settings,
            EntitySelector::One(EntityKind::Product),
            None,
            None,
            Arc::new(engine.clone()),
            Some(&StaticCredentialsValidator),
        )
        .await
        .unwrap();

        // Store 2 has no credentials.
        assert_eq!(summary.failures, 1);
        assert_eq!(summary.lines.len(), 2);
        assert_eq!(engine.record_count("catalog_default_products").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_reindex_missing_snapshot_fails_store() {
        let temp = TempDir::new().unwrap();
        let settings = settings(temp.path());

        let summary = reindex_inline(
            &settings,
            EntitySelector::One(EntityKind::Category),
            Some(1),
            None,
            Arc::new(InMemoryIndexRemote::new()),
            None,
        )
        .await
        .unwrap();
        assert_eq!(summary.failures, 1);
    }

    #[tokio::test]
    async fn test_reindex_unknown_store_is_an_error() {
        let temp = TempDir::new().unwrap();
        let result = reindex_inline(
            &settings(temp.path()),
            EntitySelector::All,
            Some(9),
            None,
            Arc::new(InMemoryIndexRemote::new()),
            None,
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_reindex_queued_enqueues() {
        let temp = TempDir::new().unwrap();
        let settings = settings(temp.path());
        let db_path = temp.path().join("db");
        let queue = open_queue(&settings, db_path.to_str()).unwrap();

        let summary = reindex_queued(
            &settings,
            EntitySelector::One(EntityKind::Product),
            Some(1),
            Some(vec![1, 2]),
            queue.clone(),
            Arc::new(InMemoryIndexRemote::new()),
            Arc::new(StaticCredentialsValidator),
        )
        .await
        .unwrap();

        assert_eq!(summary.failures, 0);
        let stats = queue.status().unwrap();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.pending_weight, 2);
    }

    #[tokio::test]
    async fn test_check_credentials() {
        let temp = TempDir::new().unwrap();
        let invalid = check_credentials(&settings(temp.path()), None, &StaticCredentialsValidator)
            .await
            .unwrap();
        assert_eq!(invalid, vec![2]);
    }

    #[test]
    fn test_render_config_redacts_keys() {
        let temp = TempDir::new().unwrap();
        let rendered = render_config(&settings(temp.path())).unwrap();
        assert!(rendered.contains("[REDACTED]"));
        assert!(!rendered.contains("\"admin\""));
        assert!(rendered.contains("[[stores]]"));
    }
}
