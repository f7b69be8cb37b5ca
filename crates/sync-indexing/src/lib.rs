//! # sync-indexing
//!
//! Turns catalog entities into search records and pushes them to the engine.
//!
//! - [`RecordPipeline`]: entity to record, plus registered transforms
//! - [`EntityDataProvider`]: which entities to index or remove for a store
//! - [`IndexBuilder`]: full rebuild through a staging index, or incremental update
//! - [`IndexingJobRunner`]: executes queued jobs against the builders
//! - [`BatchQueueProcessor`]: decides between skip, inline build and enqueue
//!
//! ## Full rebuild
//!
//! ```text
//! clear(tmp) -> settings(tmp) -> push chunks(tmp) -> wait
//!   -> copy rules(prod -> tmp) -> wait -> move(tmp -> prod) -> wait
//!   -> settings(prod) -> wait
//! ```

pub mod batch;
pub mod builder;
pub mod catalog;
pub mod error;
pub mod processor;
pub mod provider;
pub mod record_builder;
pub mod runner;

pub use batch::{Batches, RecordBatcher};
pub use builder::{BuildReport, IndexBuilder};
pub use catalog::CatalogSnapshotProvider;
pub use error::IndexingError;
pub use processor::{BatchQueueProcessor, ProcessOutcome};
pub use provider::{
    default_index_settings, is_indexable, partition, EntityDataProvider, EntitySet,
    StaticEntityProvider,
};
pub use record_builder::{
    CategoryRecordBuilder, PageRecordBuilder, ProductRecordBuilder, RecordBuilder,
    RecordPipeline, RecordTransform, SuggestionRecordBuilder,
};
pub use runner::{EntityIndexer, IndexingJobRunner};
