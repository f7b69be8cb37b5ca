//! Configuration loading for catalog-sync.
//!
//! Layered config: defaults -> config file -> CLI config file -> env vars.
//! The default config file lives at `<config dir>/catalog-sync/config.toml`.
//!
//! Settings are passed explicitly into every build and enqueue call;
//! nothing reads configuration from ambient state.

use config::{Config, Environment, File};
use directories::ProjectDirs;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::PathBuf;

use crate::entity::EntityKind;
use crate::error::SyncError;

/// Per-store scope: credentials, index naming and feature toggles.
#[derive(Debug, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Numeric store id from the source system
    pub store_id: u32,

    /// Store code, used as the index scope (e.g. "default", "fr")
    pub code: String,

    /// Master switch for this store
    #[serde(default = "default_true")]
    pub indexing_enabled: bool,

    /// Prefix prepended to every index name of this store
    #[serde(default = "default_index_prefix")]
    pub index_prefix: String,

    /// Search engine application id
    #[serde(default)]
    pub application_id: String,

    /// Search-only API key (must not carry write ACLs)
    #[serde(
        default = "empty_secret",
        deserialize_with = "deserialize_secret",
        serialize_with = "serialize_redacted"
    )]
    pub search_api_key: SecretString,

    /// Admin API key used for writes
    #[serde(
        default = "empty_secret",
        deserialize_with = "deserialize_secret",
        serialize_with = "serialize_redacted"
    )]
    pub admin_api_key: SecretString,

    #[serde(default = "default_true")]
    pub categories_enabled: bool,

    #[serde(default = "default_true")]
    pub pages_enabled: bool,

    #[serde(default)]
    pub suggestions_enabled: bool,
}

impl StoreSettings {
    /// Create a store with default toggles and empty credentials.
    pub fn new(store_id: u32, code: impl Into<String>) -> Self {
        Self {
            store_id,
            code: code.into(),
            indexing_enabled: true,
            index_prefix: default_index_prefix(),
            application_id: String::new(),
            search_api_key: empty_secret(),
            admin_api_key: empty_secret(),
            categories_enabled: true,
            pages_enabled: true,
            suggestions_enabled: false,
        }
    }

    /// Set application id and keys.
    pub fn with_credentials(
        mut self,
        application_id: impl Into<String>,
        search_api_key: impl Into<String>,
        admin_api_key: impl Into<String>,
    ) -> Self {
        self.application_id = application_id.into();
        self.search_api_key = SecretString::from(search_api_key.into());
        self.admin_api_key = SecretString::from(admin_api_key.into());
        self
    }

    /// Whether the per-kind feature toggle allows indexing this kind.
    ///
    /// Products have no toggle of their own; the store switch covers them.
    pub fn kind_enabled(&self, kind: EntityKind) -> bool {
        match kind {
            EntityKind::Product => true,
            EntityKind::Category => self.categories_enabled,
            EntityKind::Page => self.pages_enabled,
            EntityKind::Suggestion => self.suggestions_enabled,
        }
    }

    /// True when application id and both keys are present.
    pub fn has_credentials(&self) -> bool {
        !self.application_id.is_empty()
            && !self.search_api_key.expose_secret().is_empty()
            && !self.admin_api_key.expose_secret().is_empty()
    }
}

/// Search engine connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSettings {
    /// Base URL; `{app_id}` is replaced with the store's application id
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Attempts per request before a transient error is surfaced
    #[serde(default = "default_remote_retries")]
    pub max_retries: u32,

    /// Interval between task status polls
    #[serde(default = "default_task_poll_ms")]
    pub task_poll_ms: u64,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_remote_retries(),
            task_poll_ms: default_task_poll_ms(),
        }
    }
}

impl RemoteSettings {
    /// Resolve the base URL for an application id.
    pub fn base_url_for(&self, application_id: &str) -> String {
        self.base_url.replace("{app_id}", application_id)
    }
}

/// Build-time knobs for the index builders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingSettings {
    /// Entities per chunk; one failing entity skips its whole chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Byte ceiling of a single push request
    #[serde(default = "default_max_batch_bytes")]
    pub max_batch_bytes: usize,

    /// Keep production untouched when any chunk of a full rebuild failed
    #[serde(default)]
    pub abort_swap_on_chunk_failure: bool,

    /// Index products that are out of stock
    #[serde(default)]
    pub show_out_of_stock: bool,

    /// Suggestions below this result count are not indexed
    #[serde(default = "default_min_suggestion_results")]
    pub min_suggestion_results: u32,

    /// Suggestions below this popularity are not indexed
    #[serde(default = "default_min_suggestion_popularity")]
    pub min_suggestion_popularity: u32,
}

impl Default for IndexingSettings {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_batch_bytes: default_max_batch_bytes(),
            abort_swap_on_chunk_failure: false,
            show_out_of_stock: false,
            min_suggestion_results: default_min_suggestion_results(),
            min_suggestion_popularity: default_min_suggestion_popularity(),
        }
    }
}

/// Job queue knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    /// When false, batches run inline instead of being enqueued
    #[serde(default = "default_true")]
    pub active: bool,

    /// Maximum jobs claimed by one runner pass
    #[serde(default = "default_jobs_per_run")]
    pub jobs_per_run: usize,

    /// Maximum summed job weight claimed by one runner pass
    #[serde(default = "default_max_weight_per_run")]
    pub max_weight_per_run: u64,

    /// Retries after the first failed attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Serialized payload ceiling; larger payloads are rejected at enqueue
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,

    /// Keep successful jobs in the archive for processing-time statistics
    #[serde(default = "default_true")]
    pub archive_successful_jobs: bool,

    /// Claims older than this are considered abandoned by a dead runner
    #[serde(default = "default_stale_lock_secs")]
    pub stale_lock_secs: u64,

    /// Archived jobs older than this are pruned
    #[serde(default = "default_archive_retention_days")]
    pub archive_retention_days: u32,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            active: true,
            jobs_per_run: default_jobs_per_run(),
            max_weight_per_run: default_max_weight_per_run(),
            max_retries: default_max_retries(),
            max_payload_bytes: default_max_payload_bytes(),
            archive_successful_jobs: true,
            stale_lock_secs: default_stale_lock_secs(),
            archive_retention_days: default_archive_retention_days(),
        }
    }
}

/// Main application settings
#[derive(Debug, Serialize, Deserialize)]
pub struct Settings {
    /// Path to the RocksDB queue directory
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Root directory of catalog snapshot files (`<code>/<kind>.json`)
    #[serde(default = "default_catalog_path")]
    pub catalog_path: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub remote: RemoteSettings,

    #[serde(default)]
    pub indexing: IndexingSettings,

    #[serde(default)]
    pub queue: QueueSettings,

    #[serde(default)]
    pub stores: Vec<StoreSettings>,
}

fn default_true() -> bool {
    true
}

fn default_index_prefix() -> String {
    "catalog_".to_string()
}

fn empty_secret() -> SecretString {
    SecretString::from(String::new())
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer).map(SecretString::from)
}

fn serialize_redacted<S>(secret: &SecretString, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    if secret.expose_secret().is_empty() {
        serializer.serialize_str("")
    } else {
        serializer.serialize_str("[REDACTED]")
    }
}

fn default_base_url() -> String {
    "https://{app_id}.algolia.net".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_remote_retries() -> u32 {
    3
}

fn default_task_poll_ms() -> u64 {
    250
}

fn default_chunk_size() -> usize {
    100
}

fn default_max_batch_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_min_suggestion_results() -> u32 {
    3
}

fn default_min_suggestion_popularity() -> u32 {
    1000
}

fn default_jobs_per_run() -> usize {
    10
}

fn default_max_weight_per_run() -> u64 {
    1000
}

fn default_max_retries() -> u32 {
    3
}

fn default_max_payload_bytes() -> usize {
    5000
}

fn default_stale_lock_secs() -> u64 {
    3600
}

fn default_archive_retention_days() -> u32 {
    30
}

fn default_db_path() -> String {
    ProjectDirs::from("", "", "catalog-sync")
        .map(|p| p.data_local_dir().join("queue"))
        .unwrap_or_else(|| PathBuf::from("./queue"))
        .to_string_lossy()
        .to_string()
}

fn default_catalog_path() -> String {
    ProjectDirs::from("", "", "catalog-sync")
        .map(|p| p.data_local_dir().join("catalog"))
        .unwrap_or_else(|| PathBuf::from("./catalog"))
        .to_string_lossy()
        .to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            catalog_path: default_catalog_path(),
            log_level: default_log_level(),
            remote: RemoteSettings::default(),
            indexing: IndexingSettings::default(),
            queue: QueueSettings::default(),
            stores: Vec::new(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (`<config dir>/catalog-sync/config.toml`)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (`CATALOG_SYNC_*`, `__` between sections)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, SyncError> {
        let config_dir = ProjectDirs::from("", "", "catalog-sync")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .set_default("db_path", default_db_path())
            .map_err(|e| SyncError::Config(e.to_string()))?
            .set_default("catalog_path", default_catalog_path())
            .map_err(|e| SyncError::Config(e.to_string()))?
            .set_default("log_level", default_log_level())
            .map_err(|e| SyncError::Config(e.to_string()))?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // CATALOG_SYNC_DB_PATH, CATALOG_SYNC_QUEUE__MAX_RETRIES, ...
        builder = builder.add_source(
            Environment::with_prefix("CATALOG_SYNC")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| SyncError::Config(e.to_string()))?;

        let settings: Settings = config
            .try_deserialize()
            .map_err(|e| SyncError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings no build could run with.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.indexing.chunk_size == 0 {
            return Err(SyncError::Config("indexing.chunk_size must be > 0".to_string()));
        }
        if self.indexing.max_batch_bytes == 0 {
            return Err(SyncError::Config(
                "indexing.max_batch_bytes must be > 0".to_string(),
            ));
        }
        if self.queue.jobs_per_run == 0 {
            return Err(SyncError::Config("queue.jobs_per_run must be > 0".to_string()));
        }
        let mut seen = std::collections::HashSet::new();
        for store in &self.stores {
            if !seen.insert(store.store_id) {
                return Err(SyncError::Config(format!(
                    "store {} is configured twice",
                    store.store_id
                )));
            }
        }
        Ok(())
    }

    /// Look up a store by id.
    pub fn store(&self, store_id: u32) -> Result<&StoreSettings, SyncError> {
        self.stores
            .iter()
            .find(|s| s.store_id == store_id)
            .ok_or(SyncError::UnknownStore(store_id))
    }

    /// Expand ~ in db_path to the home directory
    pub fn expanded_db_path(&self) -> PathBuf {
        expand_home(&self.db_path)
    }

    /// Expand ~ in catalog_path to the home directory
    pub fn expanded_catalog_path(&self) -> PathBuf {
        expand_home(&self.catalog_path)
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(base) = directories::BaseDirs::new() {
            return base.home_dir().join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.log_level, "info");
        assert_eq!(settings.indexing.chunk_size, 100);
        assert_eq!(settings.indexing.max_batch_bytes, 10 * 1024 * 1024);
        assert_eq!(settings.queue.max_retries, 3);
        assert_eq!(settings.queue.max_payload_bytes, 5000);
        assert!(settings.queue.active);
        assert!(settings.stores.is_empty());
    }

    #[test]
    fn test_load_with_defaults() {
        let settings = Settings::load(None).unwrap();
        assert_eq!(settings.queue.jobs_per_run, 10);
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("sync.toml");
        std::fs::write(
            &path,
            r#"
db_path = "/tmp/queue"

[queue]
max_retries = 5

[[stores]]
store_id = 1
code = "default"
application_id = "APP"
search_api_key = "search"
admin_api_key = "admin"
pages_enabled = false
"#,
        )
        .unwrap();

        let settings = Settings::load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(settings.db_path, "/tmp/queue");
        assert_eq!(settings.queue.max_retries, 5);
        let store = settings.store(1).unwrap();
        assert_eq!(store.code, "default");
        assert!(store.has_credentials());
        assert!(!store.kind_enabled(EntityKind::Page));
        assert!(store.kind_enabled(EntityKind::Product));
        assert_eq!(store.search_api_key.expose_secret(), "search");
    }

    #[test]
    fn test_unknown_store() {
        let settings = Settings::default();
        assert!(matches!(settings.store(3), Err(SyncError::UnknownStore(3))));
    }

    #[test]
    fn test_validate_rejects_duplicate_store() {
        let settings = Settings {
            stores: vec![StoreSettings::new(1, "a"), StoreSettings::new(1, "b")],
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_chunk() {
        let mut settings = Settings::default();
        settings.indexing.chunk_size = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_store_without_keys_has_no_credentials() {
        let store = StoreSettings::new(2, "fr");
        assert!(!store.has_credentials());
        let store = store.with_credentials("APP", "s", "a");
        assert!(store.has_credentials());
    }

    #[test]
    fn test_keys_are_redacted_when_serialized() {
        let store = StoreSettings::new(1, "default").with_credentials("APP", "s3cret", "adm1n");
        let json = serde_json::to_string(&store).unwrap();
        assert!(!json.contains("s3cret"));
        assert!(!json.contains("adm1n"));
        assert!(json.contains("[REDACTED]"));
    }

    #[test]
    fn test_base_url_for_app() {
        let remote = RemoteSettings::default();
        assert_eq!(remote.base_url_for("ABC"), "https://ABC.algolia.net");
    }
}
