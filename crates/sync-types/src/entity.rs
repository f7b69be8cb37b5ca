//! Catalog entities that can be pushed to the search index.
//!
//! Entities arrive from the transactional store already loaded; the
//! indexing crate turns them into [`crate::Record`]s.

use serde::{Deserialize, Serialize};

/// Identifier of an entity in the source store.
pub type EntityId = u64;

/// Kind of entity, one search index per kind and store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Product,
    Category,
    Page,
    Suggestion,
}

impl EntityKind {
    /// All kinds, in the order a store-wide reindex walks them.
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Product,
        EntityKind::Category,
        EntityKind::Page,
        EntityKind::Suggestion,
    ];

    /// Suffix appended to the store scope to form the index name.
    pub fn index_suffix(&self) -> &'static str {
        match self {
            EntityKind::Product => "_products",
            EntityKind::Category => "_categories",
            EntityKind::Page => "_pages",
            EntityKind::Suggestion => "_suggestions",
        }
    }

    /// File stem used by catalog snapshots.
    pub fn snapshot_name(&self) -> &'static str {
        match self {
            EntityKind::Product => "products",
            EntityKind::Category => "categories",
            EntityKind::Page => "pages",
            EntityKind::Suggestion => "suggestions",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Product => write!(f, "product"),
            EntityKind::Category => write!(f, "category"),
            EntityKind::Page => write!(f, "page"),
            EntityKind::Suggestion => write!(f, "suggestion"),
        }
    }
}

impl std::str::FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "product" | "products" => Ok(EntityKind::Product),
            "category" | "categories" => Ok(EntityKind::Category),
            "page" | "pages" => Ok(EntityKind::Page),
            "suggestion" | "suggestions" => Ok(EntityKind::Suggestion),
            other => Err(format!("unknown entity kind: {}", other)),
        }
    }
}

/// A catalog product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: EntityId,
    pub sku: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price: f64,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub category_ids: Vec<EntityId>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub visible_in_search: bool,
    #[serde(default = "default_true")]
    pub in_stock: bool,
}

/// A catalog category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub path: Vec<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub product_count: u32,
    #[serde(default = "default_true")]
    pub active: bool,
}

/// A CMS page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub id: EntityId,
    pub identifier: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub excluded: bool,
}

/// A popular search query offered as an autocomplete suggestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub id: EntityId,
    pub query: String,
    #[serde(default)]
    pub num_results: u32,
    #[serde(default)]
    pub popularity: u32,
}

fn default_true() -> bool {
    true
}

/// Any indexable entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Entity {
    Product(Product),
    Category(Category),
    Page(Page),
    Suggestion(Suggestion),
}

impl Entity {
    /// The kind of this entity.
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Product(_) => EntityKind::Product,
            Entity::Category(_) => EntityKind::Category,
            Entity::Page(_) => EntityKind::Page,
            Entity::Suggestion(_) => EntityKind::Suggestion,
        }
    }

    /// Source-store identifier.
    pub fn id(&self) -> EntityId {
        match self {
            Entity::Product(p) => p.id,
            Entity::Category(c) => c.id,
            Entity::Page(p) => p.id,
            Entity::Suggestion(s) => s.id,
        }
    }
}
