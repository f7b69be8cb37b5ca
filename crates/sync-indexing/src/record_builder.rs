//! Entity to record conversion.
//!
//! A [`RecordBuilder`] turns one entity into a flat search record. External
//! code extends records through [`RecordTransform`]s registered on a
//! [`RecordPipeline`]; they run in registration order after the builder and
//! before the record is handed to the batcher.

use std::sync::Arc;

use serde_json::{json, Value};
use sync_types::{Entity, EntityKind, Record, StoreSettings};

use crate::error::IndexingError;

/// Converts entities of one kind into records.
pub trait RecordBuilder: Send + Sync {
    fn kind(&self) -> EntityKind;

    /// Build the record for `entity`. Always sets the object id.
    ///
    /// Returns [`IndexingError::WrongEntityKind`] for an entity of another kind.
    fn build_record(&self, entity: &Entity, store: &StoreSettings)
        -> Result<Record, IndexingError>;
}

/// A post-build hook that may add, change or remove fields.
pub trait RecordTransform: Send + Sync {
    fn apply(&self, record: Record, entity: &Entity) -> Record;
}

impl<F> RecordTransform for F
where
    F: Fn(Record, &Entity) -> Record + Send + Sync,
{
    fn apply(&self, record: Record, entity: &Entity) -> Record {
        self(record, entity)
    }
}

/// A builder plus its ordered transforms.
pub struct RecordPipeline<B> {
    builder: B,
    transforms: Vec<Arc<dyn RecordTransform>>,
}

impl<B: RecordBuilder> RecordPipeline<B> {
    pub fn new(builder: B) -> Self {
        Self {
            builder,
            transforms: Vec::new(),
        }
    }

    /// Register a transform; it runs after those registered before it.
    pub fn with_transform(mut self, transform: impl RecordTransform + 'static) -> Self {
        self.transforms.push(Arc::new(transform));
        self
    }

    pub fn kind(&self) -> EntityKind {
        self.builder.kind()
    }

    pub fn transform_count(&self) -> usize {
        self.transforms.len()
    }

    /// Build the record and run every transform over it.
    pub fn build(&self, entity: &Entity, store: &StoreSettings) -> Result<Record, IndexingError> {
        let mut record = self.builder.build_record(entity, store)?;
        for transform in &self.transforms {
            record = transform.apply(record, entity);
        }
        if record.object_id().is_none() {
            return Err(IndexingError::MissingObjectId(entity.id()));
        }
        Ok(record)
    }
}

fn wrong_kind(expected: EntityKind, entity: &Entity) -> IndexingError {
    IndexingError::WrongEntityKind {
        expected,
        found: entity.kind(),
        entity_id: entity.id(),
    }
}

fn optional(value: &Option<String>) -> Value {
    value.as_ref().map_or(Value::Null, |v| Value::from(v.as_str()))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProductRecordBuilder;

impl RecordBuilder for ProductRecordBuilder {
    fn kind(&self) -> EntityKind {
        EntityKind::Product
    }

    fn build_record(
        &self,
        entity: &Entity,
        _store: &StoreSettings,
    ) -> Result<Record, IndexingError> {
        let Entity::Product(product) = entity else {
            return Err(wrong_kind(EntityKind::Product, entity));
        };

        Ok(Record::new(product.id.to_string())
            .with("sku", product.sku.as_str())
            .with("name", product.name.as_str())
            .with("description", optional(&product.description))
            .with("price", product.price)
            .with("url", optional(&product.url))
            .with("image_url", optional(&product.image_url))
            .with("categories", json!(product.category_ids))
            .with("in_stock", product.in_stock))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CategoryRecordBuilder;

impl RecordBuilder for CategoryRecordBuilder {
    fn kind(&self) -> EntityKind {
        EntityKind::Category
    }

    fn build_record(
        &self,
        entity: &Entity,
        _store: &StoreSettings,
    ) -> Result<Record, IndexingError> {
        let Entity::Category(category) = entity else {
            return Err(wrong_kind(EntityKind::Category, entity));
        };

        Ok(Record::new(category.id.to_string())
            .with("name", category.name.as_str())
            .with("path", category.path.join(" / "))
            .with("level", category.path.len())
            .with("url", optional(&category.url))
            .with("product_count", category.product_count))
    }
}

/// Page content is truncated to keep records well under the engine's size limit.
const MAX_PAGE_CONTENT_CHARS: usize = 5000;

#[derive(Debug, Clone, Copy, Default)]
pub struct PageRecordBuilder;

impl RecordBuilder for PageRecordBuilder {
    fn kind(&self) -> EntityKind {
        EntityKind::Page
    }

    fn build_record(
        &self,
        entity: &Entity,
        _store: &StoreSettings,
    ) -> Result<Record, IndexingError> {
        let Entity::Page(page) = entity else {
            return Err(wrong_kind(EntityKind::Page, entity));
        };

        let content: String = page.content.chars().take(MAX_PAGE_CONTENT_CHARS).collect();
        Ok(Record::new(page.id.to_string())
            .with("slug", page.identifier.as_str())
            .with("name", page.title.as_str())
            .with("content", content))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SuggestionRecordBuilder;

impl RecordBuilder for SuggestionRecordBuilder {
    fn kind(&self) -> EntityKind {
        EntityKind::Suggestion
    }

    fn build_record(
        &self,
        entity: &Entity,
        _store: &StoreSettings,
    ) -> Result<Record, IndexingError> {
        let Entity::Suggestion(suggestion) = entity else {
            return Err(wrong_kind(EntityKind::Suggestion, entity));
        };

        Ok(Record::new(suggestion.id.to_string())
            .with("query", suggestion.query.as_str())
            .with("nb_hits", suggestion.num_results)
            .with("popularity", suggestion.popularity))
    }
}
