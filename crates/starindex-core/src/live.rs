//! Live ingestion from a message-bus feed.
//!
//! The bus client itself (transport, payload decompression, schema routing,
//! software allow-lists) lives outside this crate and is plugged in as an
//! [`EventSource`]. Each item it yields is one decoded event object carrying
//! a star system (`SystemAddress`, `StarSystem`, `StarPos`, ...), which goes
//! through the same normalize → append path as the bulk dump.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::catalog::{CatalogResolver, CatalogSource, Catalogs};
use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::normalizer::normalize;
use crate::writer::{BatchWriter, SystemStore};

/// A stream of decoded event objects from one subscription.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<Value, IngestError>> + Send>>;

/// Abstracts over the message-bus subscriber.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Human-readable endpoint name for logs.
    fn name(&self) -> &str;

    /// Connect and start streaming events.
    async fn subscribe(&self) -> Result<EventStream, IngestError>;
}

/// Counters for a live session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LiveReport {
    pub received: u64,
    pub written: u64,
    pub skipped_normalize: u64,
    /// Events dropped because their batch failed to commit.
    pub dropped: u64,
    pub reconnects: u64,
}

// ─── LiveSink ────────────────────────────────────────────────────────────────

/// Accepts events one at a time; usable directly by a bus client that
/// drives its own receive loop.
pub struct LiveSink {
    catalogs: Arc<Catalogs>,
    writer: BatchWriter,
    report: LiveReport,
}

impl LiveSink {
    pub fn new(catalogs: Arc<Catalogs>, store: Arc<dyn SystemStore>, batch_size: usize) -> Result<Self, IngestError> {
        Ok(Self {
            catalogs,
            writer: BatchWriter::new(store, batch_size)?,
            report: LiveReport::default(),
        })
    }

    /// Normalize and buffer one event.
    ///
    /// Normalization defects are logged and swallowed. A persistence failure
    /// is returned so the caller can decide between dropping and retrying;
    /// the failed rows are no longer buffered either way.
    pub async fn accept(&mut self, event: &Value) -> Result<(), IngestError> {
        self.report.received += 1;
        let record = match normalize(event, &self.catalogs) {
            Ok(r) => r,
            Err(e) => {
                self.report.skipped_normalize += 1;
                debug!(error = %e, "ignoring event without a usable star system");
                return Ok(());
            }
        };
        let id64 = record.id64;
        match self.writer.append(record).await {
            Ok(Some(n)) => {
                self.report.written += n;
                debug!(id64, "live system stored");
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => {
                self.report.dropped = self.writer.stats().failed_records;
                Err(e)
            }
        }
    }

    /// Flush anything still buffered and return the counters.
    pub async fn finish(mut self) -> LiveReport {
        match self.writer.flush().await {
            Ok(n) => self.report.written += n,
            Err(e) => {
                warn!(error = %e, "final live flush failed");
                self.report.dropped = self.writer.stats().failed_records;
            }
        }
        self.report
    }
}

// ─── LiveIngest ──────────────────────────────────────────────────────────────

/// Subscribe/reconnect loop around an [`EventSource`].
pub struct LiveIngest {
    config: IngestConfig,
    resolver: CatalogResolver,
    store: Arc<dyn SystemStore>,
    source: Arc<dyn EventSource>,
}

impl LiveIngest {
    pub fn new(
        config: IngestConfig,
        catalogs: Arc<dyn CatalogSource>,
        store: Arc<dyn SystemStore>,
        source: Arc<dyn EventSource>,
    ) -> Self {
        Self {
            config,
            resolver: CatalogResolver::new(catalogs),
            store,
            source,
        }
    }

    /// Consume events until the reconnect budget is exhausted.
    ///
    /// With `max_reconnects = None` this only returns on a configuration
    /// error. Failed batches are dropped and counted.
    pub async fn run(&self) -> Result<LiveReport, IngestError> {
        self.config.validate()?;
        let catalogs = Arc::new(self.resolver.load_all().await);
        let mut sink = LiveSink::new(catalogs, Arc::clone(&self.store), self.config.live_batch_size)?;
        let backoff = Duration::from_millis(self.config.reconnect_backoff_ms);
        let name = self.source.name().to_string();
        let mut reconnects = 0u32;

        loop {
            info!(source = %name, "connecting");
            match self.source.subscribe().await {
                Err(e) => error!(source = %name, error = %e, "subscribe failed"),
                Ok(mut stream) => {
                    while let Some(item) = stream.next().await {
                        match item {
                            Ok(event) => {
                                if let Err(e) = sink.accept(&event).await {
                                    warn!(error = %e, "dropping live event");
                                }
                            }
                            Err(e) => {
                                warn!(source = %name, error = %e, "stream error");
                                break;
                            }
                        }
                    }
                    info!(source = %name, "disconnected");
                }
            }

            if self.config.max_reconnects.is_some_and(|max| reconnects >= max) {
                break;
            }
            reconnects += 1;
            tokio::time::sleep(backoff).await;
        }

        let mut report = sink.finish().await;
        report.reconnects = u64::from(reconnects);
        info!(
            received = report.received,
            written = report.written,
            dropped = report.dropped,
            reconnects = report.reconnects,
            "live ingest stopped"
        );
        Ok(report)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogKind;
    use crate::writer::tests::RecordingStore;
    use serde_json::json;
    use std::sync::Mutex;

    struct NoCatalogs;

    #[async_trait]
    impl CatalogSource for NoCatalogs {
        async fn load_catalog(&self, _kind: CatalogKind) -> Result<Vec<(i64, String)>, IngestError> {
            Ok(vec![])
        }
    }

    /// Replays one scripted session per subscribe call.
    struct ScriptedSource {
        sessions: Mutex<Vec<Vec<Result<Value, IngestError>>>>,
    }

    #[async_trait]
    impl EventSource for ScriptedSource {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn subscribe(&self) -> Result<EventStream, IngestError> {
            let mut sessions = self.sessions.lock().unwrap();
            if sessions.is_empty() {
                return Err(IngestError::Other("connection refused".into()));
            }
            let items = sessions.remove(0);
            Ok(Box::pin(futures::stream::iter(items)))
        }
    }

    fn fsd_jump(id: u64, name: &str) -> Value {
        json!({
            "event": "FSDJump",
            "timestamp": "2025-10-16T16:24:19Z",
            "SystemAddress": id,
            "StarSystem": name,
            "StarPos": [1.0, 2.0, 3.0],
            "SystemSecurity": "$SYSTEM_SECURITY_high;"
        })
    }

    #[tokio::test]
    async fn reconnects_and_stores_each_event() {
        let source = ScriptedSource {
            sessions: Mutex::new(vec![
                vec![
                    Ok(fsd_jump(1, "Sol")),
                    Ok(json!({"event": "Scan", "BodyName": "Sol 3"})),
                    Err(IngestError::Other("socket timeout".into())),
                    Ok(fsd_jump(99, "never delivered")),
                ],
                vec![Ok(fsd_jump(2, "Achenar"))],
            ]),
        };
        let store = Arc::new(RecordingStore::default());
        let config = IngestConfig {
            reconnect_backoff_ms: 0,
            max_reconnects: Some(2),
            ..IngestConfig::default()
        };
        let live = LiveIngest::new(config, Arc::new(NoCatalogs), store.clone(), Arc::new(source));

        let report = live.run().await.unwrap();

        assert_eq!(report.received, 3);
        assert_eq!(report.written, 2);
        assert_eq!(report.skipped_normalize, 1);
        assert_eq!(report.reconnects, 2);
        // Batch size 1: every event is its own transaction.
        assert_eq!(*store.commits.lock().unwrap(), vec![1, 1]);
        let rows = store.rows.lock().unwrap();
        assert_eq!(rows[&2].name, "Achenar");
        assert_eq!(rows[&1].security_id, None);
    }

    #[tokio::test]
    async fn failed_event_is_reported_to_caller() {
        let store = Arc::new(RecordingStore {
            poison: Some(5),
            ..Default::default()
        });
        let mut sink = LiveSink::new(Arc::new(Catalogs::default()), store.clone(), 1).unwrap();

        sink.accept(&fsd_jump(4, "A")).await.unwrap();
        assert!(sink.accept(&fsd_jump(5, "B")).await.is_err());
        sink.accept(&fsd_jump(6, "C")).await.unwrap();

        let report = sink.finish().await;
        assert_eq!(report.written, 2);
        assert_eq!(report.dropped, 1);
        assert!(!store.rows.lock().unwrap().contains_key(&5));
    }

    #[tokio::test]
    async fn buffered_live_batches_flush_on_finish() {
        let store = Arc::new(RecordingStore::default());
        let mut sink = LiveSink::new(Arc::new(Catalogs::default()), store.clone(), 10).unwrap();
        sink.accept(&fsd_jump(1, "A")).await.unwrap();
        sink.accept(&fsd_jump(2, "B")).await.unwrap();
        assert!(store.commits.lock().unwrap().is_empty());

        let report = sink.finish().await;
        assert_eq!(report.written, 2);
        assert_eq!(*store.commits.lock().unwrap(), vec![2]);
    }
}
