//! HTTP connector for an Algolia-compatible search REST API.

use async_trait::async_trait;
use backoff::{backoff::Backoff, ExponentialBackoff};
use reqwest::{Client, Method, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

use sync_types::{Record, RemoteSettings, StoreSettings};

use crate::error::RemoteError;
use crate::remote::{IndexRemote, IndexSettings, RemoteFactory};

const APPLICATION_ID_HEADER: &str = "X-Algolia-Application-Id";
const API_KEY_HEADER: &str = "X-Algolia-API-Key";

/// Connection settings for one store's application.
#[derive(Debug, Clone)]
pub struct HttpRemoteConfig {
    /// Base URL with `{app_id}` already substituted
    pub base_url: String,

    pub application_id: String,

    /// Key sent with every request
    pub api_key: SecretString,

    /// Per-request timeout
    pub timeout: Duration,

    /// Attempts per request before a transient error is surfaced
    pub max_retries: u32,

    /// First retry delay; doubles on every further attempt
    pub initial_backoff: Duration,

    /// Interval between task status polls
    pub poll_interval: Duration,

    /// Give up waiting for a task after this long
    pub task_timeout: Duration,
}

impl HttpRemoteConfig {
    /// Admin connection for a store.
    pub fn for_store(remote: &RemoteSettings, store: &StoreSettings) -> Self {
        Self::with_key(remote, store, &store.admin_api_key)
    }

    /// Connection for a store using an explicit key.
    pub fn with_key(remote: &RemoteSettings, store: &StoreSettings, key: &SecretString) -> Self {
        let timeout = Duration::from_secs(remote.timeout_secs);
        Self {
            base_url: remote.base_url_for(&store.application_id),
            application_id: store.application_id.clone(),
            api_key: SecretString::from(key.expose_secret().to_string()),
            timeout,
            max_retries: remote.max_retries.max(1),
            initial_backoff: Duration::from_millis(500),
            poll_interval: Duration::from_millis(remote.task_poll_ms),
            task_timeout: timeout * 10,
        }
    }
}

/// Asynchronous engine task to wait on.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingTask {
    index: String,
    task_id: u64,
}

#[derive(Debug, Deserialize)]
struct TaskStatus {
    status: String,
}

/// REST client for one application.
pub struct HttpIndexRemote {
    client: Client,
    config: HttpRemoteConfig,
    last_task: Mutex<Option<PendingTask>>,
}

impl HttpIndexRemote {
    pub fn new(config: HttpRemoteConfig) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RemoteError::Config(e.to_string()))?;

        Ok(Self {
            client,
            config,
            last_task: Mutex::new(None),
        })
    }

    /// `{base}/1/indexes/{index}/{rest...}` with each segment escaped.
    fn index_url(&self, index: &str, rest: &[&str]) -> Result<Url, RemoteError> {
        let mut url = Url::parse(&self.config.base_url)
            .map_err(|e| RemoteError::Config(format!("invalid base url: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| RemoteError::Config("base url cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend(["1", "indexes", index])
            .extend(rest);
        Ok(url)
    }

    /// Send a request, retrying transient failures with exponential backoff.
    async fn call(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
    ) -> Result<Value, RemoteError> {
        let mut backoff = ExponentialBackoff {
            current_interval: self.config.initial_backoff,
            initial_interval: self.config.initial_backoff,
            max_elapsed_time: Some(Duration::from_secs(120)),
            ..Default::default()
        };

        let mut attempts = 0;

        loop {
            attempts += 1;
            debug!(attempt = attempts, %method, path = url.path(), "Calling search API");

            match self.send_once(method.clone(), url.clone(), body).await {
                Ok(response) => return Ok(response),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => {
                    if attempts >= self.config.max_retries {
                        error!(error = %e, "Max retries exceeded");
                        return Err(e);
                    }

                    match backoff.next_backoff() {
                        Some(duration) => {
                            warn!(
                                error = %e,
                                retry_in_ms = duration.as_millis(),
                                "Search API call failed, retrying"
                            );
                            tokio::time::sleep(duration).await;
                        }
                        None => {
                            error!(error = %e, "Backoff exhausted");
                            return Err(e);
                        }
                    }
                }
            }
        }
    }

    async fn send_once(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
    ) -> Result<Value, RemoteError> {
        let mut request = self
            .client
            .request(method, url)
            .header(APPLICATION_ID_HEADER, &self.config.application_id)
            .header(API_KEY_HEADER, self.config.api_key.expose_secret());
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RemoteError::Transient(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(RemoteError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 | 403 => RemoteError::Auth(body),
                404 => RemoteError::NotFound(body),
                code if status.is_server_error() => {
                    RemoteError::Transient(format!("HTTP {}: {}", code, body))
                }
                code => RemoteError::Rejected { status: code, body },
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| RemoteError::Transient(e.to_string()))?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }

    /// Remember the task id of a write so `wait_last_task` can poll it.
    fn track_task(&self, index: &str, response: &Value) {
        if let Some(task_id) = response.get("taskID").and_then(Value::as_u64) {
            if let Ok(mut last) = self.last_task.lock() {
                *last = Some(PendingTask {
                    index: index.to_string(),
                    task_id,
                });
            }
        }
    }

    async fn write(
        &self,
        method: Method,
        index: &str,
        rest: &[&str],
        body: Option<&Value>,
    ) -> Result<(), RemoteError> {
        let url = self.index_url(index, rest)?;
        let response = self.call(method, url, body).await?;
        self.track_task(index, &response);
        Ok(())
    }

    /// Describe an API key (`GET /1/keys/{key}`).
    pub async fn get_key(&self, key: &str) -> Result<Value, RemoteError> {
        let mut url = Url::parse(&self.config.base_url)
            .map_err(|e| RemoteError::Config(format!("invalid base url: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| RemoteError::Config("base url cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend(["1", "keys", key]);
        self.call(Method::GET, url, None).await
    }

    async fn batch(&self, index: &str, requests: Vec<Value>) -> Result<(), RemoteError> {
        let body = json!({ "requests": requests });
        self.write(Method::POST, index, &["batch"], Some(&body)).await
    }
}

#[async_trait]
impl IndexRemote for HttpIndexRemote {
    async fn save_objects(&self, records: &[Record], index: &str) -> Result<(), RemoteError> {
        if records.is_empty() {
            return Ok(());
        }
        let requests = records
            .iter()
            .map(|record| json!({ "action": "updateObject", "body": record }))
            .collect();
        self.batch(index, requests).await
    }

    async fn delete_objects(
        &self,
        object_ids: &[String],
        index: &str,
    ) -> Result<(), RemoteError> {
        if object_ids.is_empty() {
            return Ok(());
        }
        let requests = object_ids
            .iter()
            .map(|id| json!({ "action": "deleteObject", "body": { "objectID": id } }))
            .collect();
        self.batch(index, requests).await
    }

    async fn copy_query_rules(&self, from: &str, to: &str) -> Result<(), RemoteError> {
        let body = json!({ "operation": "copy", "destination": to, "scope": ["rules"] });
        match self.write(Method::POST, from, &["operation"], Some(&body)).await {
            Err(RemoteError::NotFound(_)) => {
                debug!(from, to, "No source index, no query rules to copy");
                Ok(())
            }
            other => other,
        }
    }

    async fn move_index(&self, from: &str, to: &str) -> Result<(), RemoteError> {
        let body = json!({ "operation": "move", "destination": to });
        self.write(Method::POST, from, &["operation"], Some(&body))
            .await
    }

    async fn set_settings(
        &self,
        index: &str,
        settings: &IndexSettings,
    ) -> Result<(), RemoteError> {
        let body = Value::Object(settings.clone());
        self.write(Method::PUT, index, &["settings"], Some(&body))
            .await
    }

    async fn clear_index(&self, index: &str) -> Result<(), RemoteError> {
        match self.write(Method::POST, index, &["clear"], None).await {
            Err(RemoteError::NotFound(_)) => Ok(()),
            other => other,
        }
    }

    async fn wait_last_task(&self) -> Result<(), RemoteError> {
        let pending = match self.last_task.lock() {
            Ok(mut last) => last.take(),
            Err(_) => None,
        };
        let Some(task) = pending else {
            return Ok(());
        };

        let task_id = task.task_id.to_string();
        let url = self.index_url(&task.index, &["task", &task_id])?;
        let started = Instant::now();

        loop {
            let response = self.call(Method::GET, url.clone(), None).await?;
            let status: TaskStatus = serde_json::from_value(response)?;
            if status.status == "published" {
                debug!(index = %task.index, task_id = task.task_id, "Task published");
                return Ok(());
            }
            if started.elapsed() >= self.config.task_timeout {
                return Err(RemoteError::Transient(format!(
                    "task {} on {} not published after {:?}",
                    task.task_id, task.index, self.config.task_timeout
                )));
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    async fn record_count(&self, index: &str) -> Result<usize, RemoteError> {
        let mut url = self.index_url(index, &[])?;
        url.query_pairs_mut()
            .append_pair("hitsPerPage", "0")
            .append_pair("attributesToRetrieve", "");

        match self.call(Method::GET, url, None).await {
            Ok(response) => Ok(response
                .get("nbHits")
                .and_then(Value::as_u64)
                .unwrap_or(0) as usize),
            Err(RemoteError::NotFound(_)) => Ok(0),
            Err(e) => Err(e),
        }
    }
}

/// Builds an admin-key HTTP connector per store.
#[derive(Debug, Clone)]
pub struct HttpRemoteFactory {
    settings: RemoteSettings,
}

impl HttpRemoteFactory {
    pub fn new(settings: RemoteSettings) -> Self {
        Self { settings }
    }
}

impl RemoteFactory for HttpRemoteFactory {
    fn connect(&self, store: &StoreSettings) -> Result<Arc<dyn IndexRemote>, RemoteError> {
        if store.application_id.is_empty() {
            return Err(RemoteError::Config(format!(
                "store {} has no application id",
                store.store_id
            )));
        }
        let config = HttpRemoteConfig::for_store(&self.settings, store);
        Ok(Arc::new(HttpIndexRemote::new(config)?))
    }
}
