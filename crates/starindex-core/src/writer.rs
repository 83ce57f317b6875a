//! Batch writer: buffers normalized rows and commits them in fixed-size
//! transactional upserts.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error};

use crate::error::IngestError;
use crate::types::NormalizedRecord;

/// Write side of the `StarSystem` table.
///
/// Implementations include `MemoryStore`, `SqliteStore` and `MySqlStore`
/// in `starindex-storage`.
#[async_trait]
pub trait SystemStore: Send + Sync {
    /// Insert-or-update every row of `batch` inside one transaction.
    ///
    /// Rows whose `id64` already exists have every other column overwritten.
    /// On error nothing from `batch` may be visible. Returns the number of
    /// rows written.
    async fn upsert_batch(&self, batch: &[NormalizedRecord]) -> Result<u64, IngestError>;
}

/// Counters kept by a [`BatchWriter`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    /// Batches committed.
    pub batches: u64,
    /// Rows committed.
    pub written: u64,
    /// Batches rolled back.
    pub failed_batches: u64,
    /// Rows lost to rolled-back batches.
    pub failed_records: u64,
}

/// Accumulates rows and flushes them through a [`SystemStore`].
///
/// Not meant for concurrent use; the owning task is the only writer.
pub struct BatchWriter {
    store: Arc<dyn SystemStore>,
    buf: Vec<NormalizedRecord>,
    batch_size: usize,
    stats: WriterStats,
}

impl BatchWriter {
    pub fn new(store: Arc<dyn SystemStore>, batch_size: usize) -> Result<Self, IngestError> {
        if batch_size == 0 {
            return Err(IngestError::Config("batch size must be at least 1".into()));
        }
        Ok(Self {
            store,
            buf: Vec::with_capacity(batch_size),
            batch_size,
            stats: WriterStats::default(),
        })
    }

    /// Buffer a row, flushing inline once the batch is full.
    ///
    /// Returns `Some(n)` when a flush of `n` rows happened.
    pub async fn append(&mut self, record: NormalizedRecord) -> Result<Option<u64>, IngestError> {
        self.buf.push(record);
        if self.buf.len() >= self.batch_size {
            return self.flush().await.map(Some);
        }
        Ok(None)
    }

    /// Commit whatever is buffered. Empty buffers are a no-op.
    ///
    /// The buffer is cleared whether or not the commit succeeds; a failed
    /// batch is not retried.
    pub async fn flush(&mut self) -> Result<u64, IngestError> {
        if self.buf.is_empty() {
            return Ok(0);
        }
        let batch = std::mem::replace(&mut self.buf, Vec::with_capacity(self.batch_size));
        match self.store.upsert_batch(&batch).await {
            Ok(n) => {
                self.stats.batches += 1;
                self.stats.written += n;
                debug!(rows = n, batch = self.stats.batches, "batch committed");
                Ok(n)
            }
            Err(e) => {
                self.stats.failed_batches += 1;
                self.stats.failed_records += batch.len() as u64;
                error!(
                    rows = batch.len(),
                    first_id64 = batch[0].id64,
                    error = %e,
                    "batch rolled back"
                );
                Err(e)
            }
        }
    }

    /// Rows waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn stats(&self) -> WriterStats {
        self.stats
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::Coords;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Minimal transactional store: a batch containing `poison` fails whole.
    #[derive(Default)]
    pub(crate) struct RecordingStore {
        pub rows: Mutex<HashMap<u64, NormalizedRecord>>,
        pub commits: Mutex<Vec<usize>>,
        pub poison: Option<u64>,
    }

    #[async_trait]
    impl SystemStore for RecordingStore {
        async fn upsert_batch(&self, batch: &[NormalizedRecord]) -> Result<u64, IngestError> {
            if let Some(bad) = self.poison {
                if batch.iter().any(|r| r.id64 == bad) {
                    return Err(IngestError::Persistence(format!("constraint violation on {bad}")));
                }
            }
            let mut rows = self.rows.lock().unwrap();
            for r in batch {
                rows.insert(r.id64, r.clone());
            }
            self.commits.lock().unwrap().push(batch.len());
            Ok(batch.len() as u64)
        }
    }

    pub(crate) fn record(id64: u64) -> NormalizedRecord {
        NormalizedRecord {
            id64,
            name: format!("System {id64}"),
            coords: Coords::new(id64 as f64, 0.0, 0.0),
            allegiance_id: None,
            government_id: None,
            primary_economy_id: None,
            secondary_economy_id: None,
            security_id: None,
            population: 0,
            ingested_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn flushes_when_full() {
        let store = Arc::new(RecordingStore::default());
        let mut w = BatchWriter::new(store.clone(), 2).unwrap();

        assert_eq!(w.append(record(1)).await.unwrap(), None);
        assert_eq!(w.pending(), 1);
        assert_eq!(w.append(record(2)).await.unwrap(), Some(2));
        assert_eq!(w.pending(), 0);
        assert_eq!(w.append(record(3)).await.unwrap(), None);
        assert_eq!(w.flush().await.unwrap(), 1);

        assert_eq!(*store.commits.lock().unwrap(), vec![2, 1]);
        assert_eq!(w.stats().written, 3);
        assert_eq!(w.stats().batches, 2);
    }

    #[tokio::test]
    async fn empty_flush_is_noop() {
        let store = Arc::new(RecordingStore::default());
        let mut w = BatchWriter::new(store.clone(), 10).unwrap();
        assert_eq!(w.flush().await.unwrap(), 0);
        assert!(store.commits.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_batch_clears_buffer_and_surfaces_error() {
        let store = Arc::new(RecordingStore {
            poison: Some(3),
            ..Default::default()
        });
        let mut w = BatchWriter::new(store.clone(), 1000).unwrap();
        for id in 1..=1000 {
            w.append(record(id)).await.unwrap_or(None);
        }
        // The 1000th append flushed and failed; nothing from it is visible.
        assert_eq!(w.pending(), 0);
        assert!(store.rows.lock().unwrap().is_empty());
        assert_eq!(w.stats().failed_batches, 1);
        assert_eq!(w.stats().failed_records, 1000);

        // The writer is usable again afterwards.
        w.append(record(5000)).await.unwrap();
        assert_eq!(w.flush().await.unwrap(), 1);
        assert_eq!(store.rows.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn zero_batch_size_rejected() {
        let store = Arc::new(RecordingStore::default());
        assert!(matches!(BatchWriter::new(store, 0), Err(IngestError::Config(_))));
    }
}
