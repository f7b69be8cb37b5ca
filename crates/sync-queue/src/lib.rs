//! Persistent job queue for deferred indexing work.
//!
//! Jobs are enqueued by the batch processors and executed by periodic
//! runner passes. Each pass claims the oldest jobs, checks the store's
//! credentials, runs the job through a [`JobRunner`], then completes,
//! retries or archives it. One job's failure never aborts a pass.

pub mod error;
pub mod health;
pub mod queue;
pub mod runner;

pub use error::QueueError;
pub use health::{Advisory, HealthThresholds, QueueHealth};
pub use queue::{Queue, RunReport};
pub use runner::{JobFailure, JobRunner};
