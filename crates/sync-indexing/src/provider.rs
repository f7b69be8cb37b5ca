//! Entity sources.
//!
//! A provider answers two questions for a store: which entities should be
//! in the index (already filtered by business rules) and which requested
//! ids must be removed from it.

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::RwLock;

use sync_remote::IndexSettings;
use sync_types::{Entity, EntityId, EntityKind, IndexingSettings, StoreSettings};

use crate::error::IndexingError;

/// Entities to upsert and object ids to delete.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntitySet {
    pub to_index: Vec<Entity>,
    pub to_remove: Vec<String>,
}

#[async_trait]
pub trait EntityDataProvider: Send + Sync {
    fn kind(&self) -> EntityKind;

    /// `ids == None` means every indexable entity of the store; `to_remove`
    /// is then empty. With ids, each requested id lands in exactly one of
    /// the two sets.
    async fn entities_to_index(
        &self,
        store: &StoreSettings,
        ids: Option<&[EntityId]>,
    ) -> Result<EntitySet, IndexingError>;

    /// Index configuration written after a full rebuild.
    async fn index_settings(&self, store: &StoreSettings) -> Result<IndexSettings, IndexingError>;
}

/// Business rules deciding whether an entity belongs in the search index.
pub fn is_indexable(entity: &Entity, rules: &IndexingSettings) -> bool {
    match entity {
        Entity::Product(p) => {
            p.enabled && p.visible_in_search && (p.in_stock || rules.show_out_of_stock)
        }
        Entity::Category(c) => c.active,
        Entity::Page(p) => p.active && !p.excluded,
        Entity::Suggestion(s) => {
            s.num_results >= rules.min_suggestion_results
                && s.popularity >= rules.min_suggestion_popularity
        }
    }
}

/// Split a store's entities into the upsert and delete sets.
///
/// Entities of other kinds are ignored. Requested ids missing from the
/// source are deleted: the entity no longer exists.
pub fn partition(
    kind: EntityKind,
    entities: Vec<Entity>,
    ids: Option<&[EntityId]>,
    rules: &IndexingSettings,
) -> EntitySet {
    let entities = entities.into_iter().filter(|e| e.kind() == kind);

    let Some(ids) = ids else {
        return EntitySet {
            to_index: entities.filter(|e| is_indexable(e, rules)).collect(),
            to_remove: Vec::new(),
        };
    };

    let mut by_id: HashMap<EntityId, Entity> = entities.map(|e| (e.id(), e)).collect();
    let mut set = EntitySet::default();
    for id in ids {
        match by_id.remove(id) {
            Some(entity) if is_indexable(&entity, rules) => set.to_index.push(entity),
            _ => set.to_remove.push(id.to_string()),
        }
    }
    set
}

/// Default index configuration per kind.
pub fn default_index_settings(kind: EntityKind) -> IndexSettings {
    let settings = match kind {
        EntityKind::Product => json!({
            "searchableAttributes": ["name", "sku", "unordered(description)"],
            "attributesForFaceting": ["categories", "in_stock"],
            "customRanking": ["desc(in_stock)"],
        }),
        EntityKind::Category => json!({
            "searchableAttributes": ["name", "path"],
            "customRanking": ["desc(product_count)"],
        }),
        EntityKind::Page => json!({
            "searchableAttributes": ["name", "unordered(content)"],
        }),
        EntityKind::Suggestion => json!({
            "searchableAttributes": ["query"],
            "customRanking": ["desc(popularity)", "desc(nb_hits)"],
        }),
    };
    match settings {
        serde_json::Value::Object(map) => map,
        _ => IndexSettings::new(),
    }
}

/// Provider over entities held in memory, keyed by store id.
///
/// Entities can be replaced between builds to simulate catalog changes.
pub struct StaticEntityProvider {
    kind: EntityKind,
    rules: IndexingSettings,
    entities: RwLock<HashMap<u32, Vec<Entity>>>,
}

impl StaticEntityProvider {
    pub fn new(kind: EntityKind, rules: IndexingSettings) -> Self {
        Self {
            kind,
            rules,
            entities: RwLock::new(HashMap::new()),
        }
    }

    /// Replace a store's entities.
    pub fn set_entities(&self, store_id: u32, entities: Vec<Entity>) {
        if let Ok(mut map) = self.entities.write() {
            map.insert(store_id, entities);
        }
    }

    pub fn with_entities(self, store_id: u32, entities: Vec<Entity>) -> Self {
        self.set_entities(store_id, entities);
        self
    }
}

#[async_trait]
impl EntityDataProvider for StaticEntityProvider {
    fn kind(&self) -> EntityKind {
        self.kind
    }

    async fn entities_to_index(
        &self,
        store: &StoreSettings,
        ids: Option<&[EntityId]>,
    ) -> Result<EntitySet, IndexingError> {
        let entities = self
            .entities
            .read()
            .map_err(|_| IndexingError::Provider("entity map poisoned".to_string()))?
            .get(&store.store_id)
            .cloned()
            .unwrap_or_default();
        Ok(partition(self.kind, entities, ids, &self.rules))
    }

    async fn index_settings(&self, _store: &StoreSettings) -> Result<IndexSettings, IndexingError> {
        Ok(default_index_settings(self.kind))
    }
}
