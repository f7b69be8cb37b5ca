//! Store credential validation.
//!
//! Consulted before enqueueing and before a queue pass runs a store's jobs,
//! so bad credentials short-circuit instead of filling the queue with
//! jobs that cannot succeed.

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::{debug, error, warn};

use sync_types::{RemoteSettings, StoreSettings};

use crate::error::RemoteError;
use crate::http::{HttpIndexRemote, HttpRemoteConfig};

/// ACLs the search-only key must not carry.
pub const WRITE_ACLS: &[&str] = &["addObject", "deleteObject", "deleteIndex", "editSettings"];

#[async_trait]
pub trait CredentialsValidator: Send + Sync {
    /// True when the store can talk to the engine with its configured keys.
    async fn check_credentials(&self, store: &StoreSettings) -> bool;
}

/// Accepts any store with an application id and both keys set.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticCredentialsValidator;

#[async_trait]
impl CredentialsValidator for StaticCredentialsValidator {
    async fn check_credentials(&self, store: &StoreSettings) -> bool {
        store.has_credentials()
    }
}

/// Result of asking the engine about a store's search-only key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialStatus {
    Valid,
    /// Application id or a key is missing from the configuration
    Incomplete,
    /// The key exists but its ACL is not search-only
    NotSearchOnly(Vec<String>),
    /// The engine refused the key or the request
    Rejected(String),
    /// The engine could not be reached; says nothing about the keys
    Unreachable(String),
}

#[derive(Debug, Deserialize)]
struct KeyDescription {
    #[serde(default)]
    acl: Vec<String>,
}

/// Asks the engine what the search-only key may do.
///
/// Valid when the key can `search` and carries no write ACL.
#[derive(Debug, Clone)]
pub struct RemoteCredentialsValidator {
    settings: RemoteSettings,
}

impl RemoteCredentialsValidator {
    pub fn new(settings: RemoteSettings) -> Self {
        Self { settings }
    }

    async fn fetch_acl(&self, store: &StoreSettings) -> Result<Vec<String>, RemoteError> {
        let config = HttpRemoteConfig::with_key(&self.settings, store, &store.search_api_key);
        let client = HttpIndexRemote::new(config)?;
        let response = client
            .get_key(store.search_api_key.expose_secret())
            .await?;
        let description: KeyDescription = serde_json::from_value(response)?;
        Ok(description.acl)
    }
}

/// Whether an ACL list is acceptable for a search-only key.
pub fn is_search_only(acl: &[String]) -> bool {
    acl.iter().any(|a| a == "search") && !acl.iter().any(|a| WRITE_ACLS.contains(&a.as_str()))
}

impl RemoteCredentialsValidator {
    /// Classify the store's keys without logging.
    pub async fn status(&self, store: &StoreSettings) -> CredentialStatus {
        if !store.has_credentials() {
            return CredentialStatus::Incomplete;
        }
        match self.fetch_acl(store).await {
            Ok(acl) if is_search_only(&acl) => CredentialStatus::Valid,
            Ok(acl) => CredentialStatus::NotSearchOnly(acl),
            Err(e) if e.is_transient() => CredentialStatus::Unreachable(e.to_string()),
            Err(e) => CredentialStatus::Rejected(e.to_string()),
        }
    }
}

#[async_trait]
impl CredentialsValidator for RemoteCredentialsValidator {
    async fn check_credentials(&self, store: &StoreSettings) -> bool {
        let store_id = store.store_id;
        match self.status(store).await {
            CredentialStatus::Valid => {
                debug!(store_id, "Credentials valid");
                true
            }
            CredentialStatus::Incomplete => {
                warn!(store_id, "Store has incomplete credentials");
                false
            }
            CredentialStatus::NotSearchOnly(acl) => {
                warn!(
                    store_id,
                    acl = ?acl,
                    "Search-only key must allow search and nothing writable"
                );
                false
            }
            CredentialStatus::Rejected(reason) => {
                warn!(store_id, error = %reason, "Engine rejected store credentials");
                false
            }
            CredentialStatus::Unreachable(reason) => {
                error!(
                    store_id,
                    error = %reason,
                    "Search engine unreachable, credentials not verified"
                );
                false
            }
        }
    }
}
