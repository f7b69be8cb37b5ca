//! Key encoding and decoding for the queue tables.
//!
//! Key format: `{prefix}:{id:020}`. Zero padding makes lexicographic
//! order equal numeric order, so a forward scan is oldest-first.

use crate::error::StorageError;

/// Meta key holding the next job id.
pub const NEXT_JOB_ID_KEY: &[u8] = b"next_job_id";

fn parse_sequence(bytes: &[u8], prefix: &str) -> Result<u64, StorageError> {
    let s = std::str::from_utf8(bytes)
        .map_err(|e| StorageError::Key(format!("Invalid UTF-8: {}", e)))?;

    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 2 || parts[0] != prefix {
        return Err(StorageError::Key(format!("Invalid {} key format: {}", prefix, s)));
    }

    parts[1]
        .parse()
        .map_err(|e| StorageError::Key(format!("Invalid job id: {}", e)))
}

/// Key for a pending job
/// Format: job:{id:020}
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobKey {
    pub id: u64,
}

impl JobKey {
    pub fn new(id: u64) -> Self {
        Self { id }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("job:{:020}", self.id).into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        parse_sequence(bytes, "job").map(Self::new)
    }
}

/// Key for an archived job
/// Format: archive:{id:020}
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveKey {
    pub id: u64,
}

impl ArchiveKey {
    pub fn new(id: u64) -> Self {
        Self { id }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("archive:{:020}", self.id).into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        parse_sequence(bytes, "archive").map(Self::new)
    }
}
