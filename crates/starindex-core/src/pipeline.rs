//! Bulk pipeline driver: decoder → normalizer → batch writer.
//!
//! The byte scanner runs on a blocking worker and hands decoded objects to
//! the async driver through a bounded queue, so decompression overlaps with
//! database round-trips while write order is preserved.

use std::collections::BTreeSet;
use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::catalog::{CatalogResolver, CatalogSource};
use crate::config::IngestConfig;
use crate::decoder::{DecoderStats, StreamDecoder};
use crate::error::IngestError;
use crate::input::open_input;
use crate::normalizer::normalize;
use crate::writer::{BatchWriter, SystemStore};

/// Outcome of one bulk run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Rows committed.
    pub written: u64,
    /// Array elements the decoder dropped (malformed, oversized, stray).
    pub skipped_decode: u64,
    /// Decoded objects that could not be normalized.
    pub skipped_normalize: u64,
    /// Rows lost to the batch that halted the run.
    pub failed_records: u64,
    /// Batches committed.
    pub batches: u64,
    /// The input ended with a read error or inside an object.
    pub truncated: bool,
    /// Persistence error that halted the run, if any.
    pub failure: Option<String>,
    pub elapsed: Duration,
}

impl RunReport {
    /// Records that were seen but not persisted for record-local reasons.
    pub fn skipped(&self) -> u64 {
        self.skipped_decode + self.skipped_normalize
    }

    /// `true` if the whole input was read and every batch committed.
    pub fn is_complete(&self) -> bool {
        self.failure.is_none() && !self.truncated
    }
}

/// Format a duration as `hh:mm:ss`.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Wires the decoder, catalogs and writer together for one destination.
pub struct PipelineDriver {
    config: IngestConfig,
    resolver: CatalogResolver,
    store: Arc<dyn SystemStore>,
}

impl PipelineDriver {
    pub fn new(
        config: IngestConfig,
        catalogs: Arc<dyn CatalogSource>,
        store: Arc<dyn SystemStore>,
    ) -> Self {
        Self {
            config,
            resolver: CatalogResolver::new(catalogs),
            store,
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Open `path` (gzip or plain) and run the bulk pipeline over it.
    pub async fn run_bulk_file(&self, path: impl AsRef<Path>) -> Result<RunReport, IngestError> {
        let stream = open_input(path)?;
        self.run_bulk(stream).await
    }

    /// Ingest every object of a decompressed JSON array.
    ///
    /// Record-local defects are counted and skipped. A failed batch halts the
    /// run; batches committed before it stay committed. `Err` is reserved for
    /// problems that prevent the run from starting.
    pub async fn run_bulk<R>(&self, reader: R) -> Result<RunReport, IngestError>
    where
        R: BufRead + Send + 'static,
    {
        self.config.validate()?;
        let started = Instant::now();

        let catalogs = self.resolver.load_all().await;
        let mut writer = BatchWriter::new(Arc::clone(&self.store), self.config.batch_size)?;

        let (tx, mut rx) = mpsc::channel::<Value>(self.config.channel_capacity);
        let max_object_bytes = self.config.max_object_bytes;
        let decode = tokio::task::spawn_blocking(move || {
            let mut decoder = StreamDecoder::new(reader).with_max_object_bytes(max_object_bytes);
            for object in decoder.by_ref() {
                if tx.blocking_send(object).is_err() {
                    // Driver halted.
                    break;
                }
            }
            decoder.into_stats()
        });

        info!(batch_size = self.config.batch_size, "bulk ingest started");

        let mut skipped_normalize = 0u64;
        let mut failure = None;
        while let Some(object) = rx.recv().await {
            let record = match normalize(&object, &catalogs) {
                Ok(r) => r,
                Err(e) => {
                    skipped_normalize += 1;
                    warn!(id64 = ?object.get("id64"), error = %e, "skipping record");
                    continue;
                }
            };
            if let Err(e) = writer.append(record).await {
                failure = Some(e.to_string());
                break;
            }
        }
        if failure.is_none() {
            if let Err(e) = writer.flush().await {
                failure = Some(e.to_string());
            }
        }

        // Closing the queue stops the decoder if we halted early; the task
        // then drops the reader.
        drop(rx);
        let stats: DecoderStats = decode
            .await
            .map_err(|e| IngestError::Other(format!("decoder task failed: {e}")))?;

        let ws = writer.stats();
        let report = RunReport {
            written: ws.written,
            skipped_decode: stats.skipped(),
            skipped_normalize,
            failed_records: ws.failed_records,
            batches: ws.batches,
            truncated: stats.is_truncated(),
            failure,
            elapsed: started.elapsed(),
        };

        info!(
            written = report.written,
            skipped = report.skipped(),
            failed = report.failed_records,
            batches = report.batches,
            truncated = report.truncated,
            elapsed = %format_duration(report.elapsed),
            "bulk ingest finished"
        );
        Ok(report)
    }
}

/// Distinct non-empty allegiance names in a stream, sorted.
///
/// Used to seed the `AllianceType` catalog from a dump.
pub fn collect_allegiances(objects: impl Iterator<Item = Value>) -> BTreeSet<String> {
    objects
        .filter_map(|o| o.get("allegiance").and_then(Value::as_str).map(str::to_string))
        .filter(|name| !name.is_empty())
        .collect()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
