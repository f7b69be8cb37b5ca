//! Splitting records into push batches.
//!
//! A batch is bounded by a record count and by the encoded byte size the
//! engine accepts in one request.

use tracing::warn;

use sync_types::Record;

/// Per-record envelope in a batch request (`{"action":...,"body":...}`).
const REQUEST_OVERHEAD_BYTES: usize = 48;

#[derive(Debug, Clone, Copy)]
pub struct RecordBatcher {
    max_records: usize,
    max_bytes: usize,
}

/// Batches ready to push, and how many records were too large to send.
#[derive(Debug, Default)]
pub struct Batches {
    pub batches: Vec<Vec<Record>>,
    pub dropped: usize,
}

impl RecordBatcher {
    pub fn new(max_records: usize, max_bytes: usize) -> Self {
        Self {
            max_records: max_records.max(1),
            max_bytes,
        }
    }

    /// Split `records`, keeping their order.
    ///
    /// A record that alone exceeds the byte ceiling can never be accepted;
    /// it is dropped with a warning instead of failing the batch.
    pub fn split(&self, records: Vec<Record>) -> Batches {
        let mut out = Batches::default();
        let mut current: Vec<Record> = Vec::new();
        let mut current_bytes = 0usize;

        for record in records {
            let size = record.encoded_len() + REQUEST_OVERHEAD_BYTES;
            if size > self.max_bytes {
                warn!(
                    object_id = record.object_id().unwrap_or_default(),
                    size,
                    max = self.max_bytes,
                    "Record exceeds the batch size ceiling, dropped"
                );
                out.dropped += 1;
                continue;
            }

            if !current.is_empty()
                && (current.len() >= self.max_records || current_bytes + size > self.max_bytes)
            {
                out.batches.push(std::mem::take(&mut current));
                current_bytes = 0;
            }
            current_bytes += size;
            current.push(record);
        }

        if !current.is_empty() {
            out.batches.push(current);
        }
        out
    }
}
