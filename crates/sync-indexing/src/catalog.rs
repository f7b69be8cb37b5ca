//! Provider reading catalog snapshots exported from the store.
//!
//! Layout: `<root>/<store code>/<kind>.json` holds a JSON array of
//! entities of that kind; an optional `<kind>.settings.json` next to it
//! overrides keys of the default index settings.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::debug;

use sync_remote::IndexSettings;
use sync_types::{
    Category, Entity, EntityId, EntityKind, IndexingSettings, Page, Product, StoreSettings,
    Suggestion,
};

use crate::error::IndexingError;
use crate::provider::{default_index_settings, partition, EntityDataProvider, EntitySet};

pub struct CatalogSnapshotProvider {
    kind: EntityKind,
    root: PathBuf,
    rules: IndexingSettings,
}

impl CatalogSnapshotProvider {
    pub fn new(kind: EntityKind, root: impl Into<PathBuf>, rules: IndexingSettings) -> Self {
        Self {
            kind,
            root: root.into(),
            rules,
        }
    }

    fn store_dir(&self, store: &StoreSettings) -> PathBuf {
        self.root.join(&store.code)
    }

    /// Path of the entity snapshot for a store.
    pub fn snapshot_path(&self, store: &StoreSettings) -> PathBuf {
        self.store_dir(store)
            .join(format!("{}.json", self.kind.snapshot_name()))
    }

    fn settings_path(&self, store: &StoreSettings) -> PathBuf {
        self.store_dir(store)
            .join(format!("{}.settings.json", self.kind.snapshot_name()))
    }

    async fn load(&self, path: &Path) -> Result<Vec<Entity>, IndexingError> {
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            IndexingError::Provider(format!("cannot read {}: {}", path.display(), e))
        })?;

        let entities = match self.kind {
            EntityKind::Product => parse::<Product>(&bytes)?
                .into_iter()
                .map(Entity::Product)
                .collect(),
            EntityKind::Category => parse::<Category>(&bytes)?
                .into_iter()
                .map(Entity::Category)
                .collect(),
            EntityKind::Page => parse::<Page>(&bytes)?.into_iter().map(Entity::Page).collect(),
            EntityKind::Suggestion => parse::<Suggestion>(&bytes)?
                .into_iter()
                .map(Entity::Suggestion)
                .collect(),
        };
        Ok(entities)
    }
}

fn parse<T: DeserializeOwned>(bytes: &[u8]) -> Result<Vec<T>, IndexingError> {
    Ok(serde_json::from_slice(bytes)?)
}

#[async_trait]
impl EntityDataProvider for CatalogSnapshotProvider {
    fn kind(&self) -> EntityKind {
        self.kind
    }

    async fn entities_to_index(
        &self,
        store: &StoreSettings,
        ids: Option<&[EntityId]>,
    ) -> Result<EntitySet, IndexingError> {
        let path = self.snapshot_path(store);
        let entities = self.load(&path).await?;
        debug!(
            store_id = store.store_id,
            entity = %self.kind,
            path = %path.display(),
            count = entities.len(),
            "Loaded catalog snapshot"
        );
        Ok(partition(self.kind, entities, ids, &self.rules))
    }

    async fn index_settings(&self, store: &StoreSettings) -> Result<IndexSettings, IndexingError> {
        let mut settings = default_index_settings(self.kind);
        let path = self.settings_path(store);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(settings);
        }

        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            IndexingError::Provider(format!("cannot read {}: {}", path.display(), e))
        })?;
        let overrides: IndexSettings = serde_json::from_slice(&bytes)?;
        settings.extend(overrides);
        Ok(settings)
    }
}
