//! The seam between the queue and the work it defers.

use async_trait::async_trait;
use std::fmt;

use sync_types::JobKind;

/// Why a job attempt failed, and whether another attempt may help.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub message: String,
    pub retryable: bool,
}

impl JobFailure {
    /// Environmental failure (remote 5xx, network, vanished entity).
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    /// Configuration or contract failure; retrying cannot succeed.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Executes a dequeued job.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, kind: &JobKind) -> Result<(), JobFailure>;
}
