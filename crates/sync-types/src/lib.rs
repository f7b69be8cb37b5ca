//! # sync-types
//!
//! Shared domain types for the catalog search sync pipeline.
//!
//! This crate defines the data structures every other crate speaks:
//! - Entities: products, categories, CMS pages and search suggestions
//! - Records: flat key/value documents pushed to the search engine
//! - Index options: how a logical index name is derived for a store
//! - Jobs: deferred indexing work persisted in the queue
//! - Settings: layered configuration, scoped per store
//!
//! ## Usage
//!
//! ```rust
//! use sync_types::{EntityKind, IndexOptions};
//!
//! let options = IndexOptions::for_kind(1, EntityKind::Product);
//! assert_eq!(options.index_suffix, "_products");
//! ```

pub mod config;
pub mod entity;
pub mod error;
pub mod index;
pub mod job;
pub mod record;

pub use config::{
    IndexingSettings, QueueSettings, RemoteSettings, Settings, StoreSettings,
};
pub use entity::{Category, Entity, EntityId, EntityKind, Page, Product, Suggestion};
pub use error::SyncError;
pub use index::{IndexOptions, TMP_SUFFIX};
pub use job::{ArchivedJob, Job, JobKind, JobOutcome, NewJob};
pub use record::{Record, OBJECT_ID_FIELD};
