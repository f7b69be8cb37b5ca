//! End-to-end test infrastructure for catalog-sync.
//!
//! Provides a shared TestHarness and helper functions for E2E tests
//! covering enqueue, queue runs and index builds against an in-memory engine.

use std::path::PathBuf;
use std::sync::Arc;

use sync_indexing::{
    IndexBuilder, IndexingJobRunner, ProductRecordBuilder, RecordPipeline, StaticEntityProvider,
};
use sync_queue::Queue;
use sync_remote::{InMemoryIndexRemote, RemoteFactory};
use sync_storage::Storage;
use sync_types::{Entity, EntityKind, IndexingSettings, Product, Settings, StoreSettings};

/// Production product index of the default store.
pub const DEFAULT_PRODUCTS: &str = "catalog_default_products";

/// Staging twin of [`DEFAULT_PRODUCTS`].
pub const DEFAULT_PRODUCTS_TMP: &str = "catalog_default_products_tmp";

/// Shared test harness for E2E tests.
///
/// Stores:
/// - 1 `default`: indexing enabled, credentials set
/// - 2 `fr`: indexing enabled, no credentials
/// - 3 `de`: indexing disabled
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    /// Queue storage
    pub storage: Arc<Storage>,
    /// Root of the catalog snapshot files
    pub catalog_path: PathBuf,
    /// The search engine
    pub remote: InMemoryIndexRemote,
    pub settings: Arc<Settings>,
}

impl TestHarness {
    /// Create a new test harness with temp directory, storage and default stores.
    pub fn new() -> Self {
        Self::with_settings(|_| {})
    }

    /// Like [`TestHarness::new`], letting the caller adjust settings first.
    pub fn with_settings(adjust: impl FnOnce(&mut Settings)) -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let storage = Arc::new(
            Storage::open(&temp_dir.path().join("queue")).expect("Failed to open test storage"),
        );
        let catalog_path = temp_dir.path().join("catalog");
        std::fs::create_dir_all(&catalog_path).expect("Failed to create catalog dir");

        let mut settings = Settings::default();
        settings.catalog_path = catalog_path.to_string_lossy().to_string();
        settings
            .stores
            .push(StoreSettings::new(1, "default").with_credentials("APP", "search", "admin"));
        settings.stores.push(StoreSettings::new(2, "fr"));
        let mut disabled = StoreSettings::new(3, "de").with_credentials("APP", "search", "admin");
        disabled.indexing_enabled = false;
        settings.stores.push(disabled);
        adjust(&mut settings);

        Self {
            _temp_dir: temp_dir,
            storage,
            catalog_path,
            remote: InMemoryIndexRemote::new(),
            settings: Arc::new(settings),
        }
    }

    /// A queue over the harness storage.
    pub fn queue(&self) -> Queue {
        Queue::new(self.storage.clone(), self.settings.queue.clone())
    }

    /// The engine as a factory.
    pub fn remotes(&self) -> Arc<dyn RemoteFactory> {
        Arc::new(self.remote.clone())
    }

    /// Job runner reading catalog snapshots and writing to the harness engine.
    pub fn runner(&self) -> IndexingJobRunner {
        IndexingJobRunner::for_catalog(self.settings.clone(), &self.catalog_path, self.remotes())
    }

    /// Write the product snapshot of a store.
    pub fn write_products(&self, store_code: &str, products: &[Product]) {
        let dir = self.catalog_path.join(store_code);
        std::fs::create_dir_all(&dir).expect("Failed to create store dir");
        let bytes = serde_json::to_vec(products).expect("Failed to serialize products");
        std::fs::write(dir.join("products.json"), bytes).expect("Failed to write snapshot");
    }

    /// Product builder over in-memory entities for store 1.
    pub fn product_builder(
        &self,
        products: Vec<Product>,
        indexing: IndexingSettings,
    ) -> IndexBuilder<StaticEntityProvider, ProductRecordBuilder> {
        let provider = StaticEntityProvider::new(EntityKind::Product, indexing.clone())
            .with_entities(1, products.into_iter().map(Entity::Product).collect());
        IndexBuilder::new(
            provider,
            RecordPipeline::new(ProductRecordBuilder),
            self.remotes(),
            indexing,
        )
    }

    pub fn default_store(&self) -> &StoreSettings {
        self.settings.store(1).expect("store 1 is configured")
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// A visible, in-stock product.
pub fn product(id: u64) -> Product {
    Product {
        id,
        sku: format!("SKU-{:05}", id),
        name: format!("Product {}", id),
        description: Some(format!("Description of product {}", id)),
        price: 10.0 + id as f64,
        url: Some(format!("/catalog/product/{}", id)),
        image_url: None,
        category_ids: vec![1],
        enabled: true,
        visible_in_search: true,
        in_stock: true,
    }
}

/// A product excluded from search.
pub fn hidden_product(id: u64) -> Product {
    Product {
        visible_in_search: false,
        ..product(id)
    }
}

/// Products with ids `1..=count`.
pub fn products(count: u64) -> Vec<Product> {
    (1..=count).map(product).collect()
}
