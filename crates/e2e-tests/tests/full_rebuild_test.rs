//! Full rebuild E2E tests: staging index, swap, rules, chunk isolation.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::json;

use e2e_tests::{product, products, TestHarness, DEFAULT_PRODUCTS, DEFAULT_PRODUCTS_TMP};
use sync_indexing::{IndexBuilder, ProductRecordBuilder, RecordPipeline, StaticEntityProvider};
use sync_remote::{
    FixedRemoteFactory, InMemoryIndexRemote, IndexRemote, IndexSettings, OperationKind,
    RemoteError, RemoteIndex,
};
use sync_types::{Entity, EntityKind, IndexingSettings, Record, OBJECT_ID_FIELD};

/// Engine wrapper that samples the production record count around every call.
struct ObservingRemote {
    inner: InMemoryIndexRemote,
    watched: String,
    samples: Mutex<Vec<(&'static str, usize)>>,
}

impl ObservingRemote {
    fn new(inner: InMemoryIndexRemote, watched: &str) -> Self {
        Self {
            inner,
            watched: watched.to_string(),
            samples: Mutex::new(Vec::new()),
        }
    }

    async fn sample(&self, op: &'static str) {
        let count = self.inner.record_count(&self.watched).await.unwrap_or(0);
        self.samples.lock().unwrap().push((op, count));
    }

    fn samples(&self) -> Vec<(&'static str, usize)> {
        self.samples.lock().unwrap().clone()
    }
}

#[async_trait]
impl IndexRemote for ObservingRemote {
    async fn save_objects(&self, records: &[Record], index: &str) -> Result<(), RemoteError> {
        self.sample("save_objects").await;
        self.inner.save_objects(records, index).await
    }

    async fn delete_objects(&self, object_ids: &[String], index: &str) -> Result<(), RemoteError> {
        self.sample("delete_objects").await;
        self.inner.delete_objects(object_ids, index).await
    }

    async fn copy_query_rules(&self, from: &str, to: &str) -> Result<(), RemoteError> {
        self.sample("copy_query_rules").await;
        self.inner.copy_query_rules(from, to).await
    }

    async fn move_index(&self, from: &str, to: &str) -> Result<(), RemoteError> {
        self.sample("before_move").await;
        self.inner.move_index(from, to).await?;
        self.sample("after_move").await;
        Ok(())
    }

    async fn set_settings(&self, index: &str, settings: &IndexSettings) -> Result<(), RemoteError> {
        self.sample("set_settings").await;
        self.inner.set_settings(index, settings).await
    }

    async fn clear_index(&self, index: &str) -> Result<(), RemoteError> {
        self.sample("clear_index").await;
        self.inner.clear_index(index).await
    }

    async fn wait_last_task(&self) -> Result<(), RemoteError> {
        self.inner.wait_last_task().await
    }

    async fn record_count(&self, index: &str) -> Result<usize, RemoteError> {
        self.inner.record_count(index).await
    }
}

fn indexing(chunk_size: usize) -> IndexingSettings {
    IndexingSettings {
        chunk_size,
        ..Default::default()
    }
}

/// Readers of the production index see the old content until the move,
/// then exactly the new content.
#[tokio::test]
async fn test_production_never_observes_partial_rebuild() {
    let harness = TestHarness::new();
    harness
        .remote
        .save_objects(
            &[Record::new("old-1"), Record::new("old-2"), Record::new("old-3")],
            DEFAULT_PRODUCTS,
        )
        .await
        .unwrap();

    let observer = Arc::new(ObservingRemote::new(harness.remote.clone(), DEFAULT_PRODUCTS));
    let provider = StaticEntityProvider::new(EntityKind::Product, indexing(10))
        .with_entities(1, products(45).into_iter().map(Entity::Product).collect());
    let builder = IndexBuilder::new(
        provider,
        RecordPipeline::new(ProductRecordBuilder),
        Arc::new(FixedRemoteFactory::new(observer.clone())),
        indexing(10),
    );

    let report = builder
        .build_index_full(harness.default_store(), None)
        .await
        .unwrap();
    assert_eq!(report.indexed, 45);
    assert!(report.swapped);

    let samples = observer.samples();
    let move_at = samples
        .iter()
        .position(|(op, _)| *op == "after_move")
        .unwrap();
    for (op, count) in &samples[..move_at] {
        assert_eq!(*count, 3, "production changed before the move, at {}", op);
    }
    for (op, count) in &samples[move_at..] {
        assert_eq!(*count, 45, "production not fully swapped, at {}", op);
    }

    let prod = harness.remote.index(DEFAULT_PRODUCTS).unwrap();
    assert!(!prod.records.contains_key("old-1"));
    assert!(harness.remote.index(DEFAULT_PRODUCTS_TMP).is_none());
}

/// 250 entities, chunk size 100, the record of entity 120 fails to build:
/// its chunk (101..=200) is skipped, the build returns normally.
#[tokio::test]
async fn test_failing_record_skips_its_whole_chunk() {
    let harness = TestHarness::new();
    let provider = StaticEntityProvider::new(EntityKind::Product, indexing(100))
        .with_entities(1, products(250).into_iter().map(Entity::Product).collect());
    let pipeline = RecordPipeline::new(ProductRecordBuilder).with_transform(
        |mut record: Record, entity: &Entity| {
            if entity.id() == 120 {
                record.insert(OBJECT_ID_FIELD, serde_json::Value::Null);
            }
            record
        },
    );
    let builder = IndexBuilder::new(provider, pipeline, harness.remotes(), indexing(100));

    let report = builder
        .build_index_full(harness.default_store(), None)
        .await
        .unwrap();

    assert_eq!(report.skipped_chunks, 1);
    assert_eq!(report.skipped_entities, 100);
    assert_eq!(report.indexed, 150);
    assert!(report.swapped);

    let prod = harness.remote.index(DEFAULT_PRODUCTS).unwrap();
    assert_eq!(prod.records.len(), 150);
    assert!(prod.records.contains_key("100"));
    assert!(!prod.records.contains_key("101"));
    assert!(!prod.records.contains_key("200"));
    assert!(prod.records.contains_key("201"));
}

/// With the abort switch on, a failed chunk keeps production as it was.
#[tokio::test]
async fn test_abort_switch_keeps_production() {
    let harness = TestHarness::new();
    harness
        .remote
        .save_objects(&[Record::new("old")], DEFAULT_PRODUCTS)
        .await
        .unwrap();

    let settings = IndexingSettings {
        abort_swap_on_chunk_failure: true,
        ..indexing(10)
    };
    let provider = StaticEntityProvider::new(EntityKind::Product, settings.clone())
        .with_entities(1, products(30).into_iter().map(Entity::Product).collect());
    let pipeline = RecordPipeline::new(ProductRecordBuilder).with_transform(
        |mut record: Record, entity: &Entity| {
            if entity.id() == 15 {
                record.insert(OBJECT_ID_FIELD, "");
            }
            record
        },
    );
    let builder = IndexBuilder::new(provider, pipeline, harness.remotes(), settings);

    let report = builder
        .build_index_full(harness.default_store(), None)
        .await
        .unwrap();
    assert!(!report.swapped);

    let prod = harness.remote.index(DEFAULT_PRODUCTS).unwrap();
    assert_eq!(prod.records.keys().cloned().collect::<Vec<_>>(), vec!["old".to_string()]);
}

/// Query rules configured on production survive the swap.
#[tokio::test]
async fn test_query_rules_survive_rebuild() {
    let harness = TestHarness::new();
    let rules = vec![
        json!({ "objectID": "summer-sale", "condition": { "pattern": "sale" } }),
        json!({ "objectID": "pin-lamp", "consequence": { "promote": [{ "objectID": "1" }] } }),
    ];
    harness.remote.seed_index(
        DEFAULT_PRODUCTS,
        RemoteIndex {
            query_rules: rules.clone(),
            ..Default::default()
        },
    );

    let builder = harness.product_builder(products(5), indexing(100));
    builder
        .build_index_full(harness.default_store(), None)
        .await
        .unwrap();

    let prod = harness.remote.index(DEFAULT_PRODUCTS).unwrap();
    assert_eq!(prod.query_rules, rules);
    assert_eq!(prod.records.len(), 5);
}

/// Settings land on production after the move, not before.
#[tokio::test]
async fn test_settings_written_after_move() {
    let harness = TestHarness::new();
    let builder = harness.product_builder(products(3), indexing(100));
    builder
        .build_index_full(harness.default_store(), None)
        .await
        .unwrap();

    let ops = harness.remote.operations();
    let move_at = ops
        .iter()
        .position(|op| op.kind() == OperationKind::MoveIndex)
        .unwrap();
    let prod_settings_at = ops
        .iter()
        .position(|op| {
            op.kind() == OperationKind::SetSettings && op.target() == Some(DEFAULT_PRODUCTS)
        })
        .unwrap();
    assert!(prod_settings_at > move_at);
    assert_eq!(ops[prod_settings_at + 1].kind(), OperationKind::WaitLastTask);

    let prod = harness.remote.index(DEFAULT_PRODUCTS).unwrap();
    assert!(prod.settings.contains_key("customRanking"));
}

/// Two full rebuilds with no data change produce the same index.
#[tokio::test]
async fn test_full_rebuild_is_idempotent() {
    let harness = TestHarness::new();
    let builder = harness.product_builder((1..=120).map(product).collect(), indexing(50));

    builder
        .build_index_full(harness.default_store(), None)
        .await
        .unwrap();
    let first = harness.remote.index(DEFAULT_PRODUCTS).unwrap();

    builder
        .build_index_full(harness.default_store(), None)
        .await
        .unwrap();
    let second = harness.remote.index(DEFAULT_PRODUCTS).unwrap();

    assert_eq!(first.records.len(), 120);
    assert_eq!(first, second);
}

/// Leftovers of an interrupted rebuild in the staging index are discarded.
#[tokio::test]
async fn test_stale_staging_content_is_cleared() {
    let harness = TestHarness::new();
    harness
        .remote
        .save_objects(&[Record::new("leftover")], DEFAULT_PRODUCTS_TMP)
        .await
        .unwrap();

    let builder = harness.product_builder(products(2), indexing(100));
    builder
        .build_index_full(harness.default_store(), None)
        .await
        .unwrap();

    let prod = harness.remote.index(DEFAULT_PRODUCTS).unwrap();
    assert_eq!(
        prod.records.keys().cloned().collect::<Vec<_>>(),
        vec!["1".to_string(), "2".to_string()]
    );
}
