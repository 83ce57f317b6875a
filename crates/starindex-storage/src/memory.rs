//! In-memory storage backend.
//!
//! Holds catalogs and star systems in RAM with the same transactional
//! contract as the SQL backends. Failures can be injected so rollback and
//! catalog-outage paths are testable without a database.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use starindex_core::catalog::{CatalogKind, CatalogSource};
use starindex_core::error::IngestError;
use starindex_core::types::NormalizedRecord;
use starindex_core::writer::SystemStore;

/// In-memory star system store.
///
/// All data is lost when the process exits.
#[derive(Default)]
pub struct MemoryStore {
    systems: Mutex<HashMap<u64, NormalizedRecord>>,
    catalogs: Mutex<HashMap<CatalogKind, Vec<(i64, String)>>>,
    commits: Mutex<Vec<usize>>,
    fail_on_id: Mutex<Option<u64>>,
    fail_next_flush: Mutex<bool>,
    failed_catalogs: Mutex<HashSet<CatalogKind>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a catalog name, returning its id (existing names keep theirs).
    pub fn insert_catalog_entry(&self, kind: CatalogKind, name: &str) -> i64 {
        let mut catalogs = self.catalogs.lock().unwrap();
        let rows = catalogs.entry(kind).or_default();
        if let Some((id, _)) = rows.iter().find(|(_, n)| n == name) {
            return *id;
        }
        let id = rows.len() as i64 + 1;
        rows.push((id, name.to_string()));
        id
    }

    /// Any batch containing `id64` fails as a whole.
    pub fn fail_on_id(&self, id64: u64) {
        *self.fail_on_id.lock().unwrap() = Some(id64);
    }

    /// The next flush fails regardless of content.
    pub fn fail_next_flush(&self) {
        *self.fail_next_flush.lock().unwrap() = true;
    }

    /// Loading `kind` fails until the store is dropped.
    pub fn fail_catalog(&self, kind: CatalogKind) {
        self.failed_catalogs.lock().unwrap().insert(kind);
    }

    pub fn get(&self, id64: u64) -> Option<NormalizedRecord> {
        self.systems.lock().unwrap().get(&id64).cloned()
    }

    pub fn system_count(&self) -> usize {
        self.systems.lock().unwrap().len()
    }

    /// Sizes of the committed batches, in commit order.
    pub fn commit_log(&self) -> Vec<usize> {
        self.commits.lock().unwrap().clone()
    }
}

#[async_trait]
impl SystemStore for MemoryStore {
    async fn upsert_batch(&self, batch: &[NormalizedRecord]) -> Result<u64, IngestError> {
        if std::mem::take(&mut *self.fail_next_flush.lock().unwrap()) {
            return Err(IngestError::Persistence("injected flush failure".into()));
        }
        if let Some(bad) = *self.fail_on_id.lock().unwrap() {
            if batch.iter().any(|r| r.id64 == bad) {
                return Err(IngestError::Persistence(format!("injected failure on id64 {bad}")));
            }
        }

        // Validation happens before the first write, so a batch is all-or-nothing.
        let mut systems = self.systems.lock().unwrap();
        for r in batch {
            systems.insert(r.id64, r.clone());
        }
        self.commits.lock().unwrap().push(batch.len());
        Ok(batch.len() as u64)
    }
}

#[async_trait]
impl CatalogSource for MemoryStore {
    async fn load_catalog(&self, kind: CatalogKind) -> Result<Vec<(i64, String)>, IngestError> {
        if self.failed_catalogs.lock().unwrap().contains(&kind) {
            return Err(IngestError::CatalogLoad {
                catalog: kind.table().into(),
                reason: "injected outage".into(),
            });
        }
        Ok(self
            .catalogs
            .lock()
            .unwrap()
            .get(&kind)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use starindex_core::types::Coords;

    fn rec(id64: u64, name: &str) -> NormalizedRecord {
        NormalizedRecord {
            id64,
            name: name.into(),
            coords: Coords::default(),
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
    async fn upsert_overwrites_existing() {
        let store = MemoryStore::new();
        store.upsert_batch(&[rec(1, "Old")]).await.unwrap();
        store.upsert_batch(&[rec(1, "New"), rec(2, "Other")]).await.unwrap();

        assert_eq!(store.system_count(), 2);
        assert_eq!(store.get(1).unwrap().name, "New");
        assert_eq!(store.commit_log(), vec![1, 2]);
    }

    #[tokio::test]
    async fn injected_failure_writes_nothing() {
        let store = MemoryStore::new();
        store.fail_on_id(3);
        let batch: Vec<_> = (1..=1000).map(|i| rec(i, "S")).collect();

        assert!(store.upsert_batch(&batch).await.is_err());
        assert_eq!(store.system_count(), 0);
        assert!(store.commit_log().is_empty());
    }

    #[tokio::test]
    async fn fail_next_flush_is_one_shot() {
        let store = MemoryStore::new();
        store.fail_next_flush();
        assert!(store.upsert_batch(&[rec(1, "A")]).await.is_err());
        assert!(store.upsert_batch(&[rec(1, "A")]).await.is_ok());
    }

    #[tokio::test]
    async fn catalog_entries_and_outage() {
        let store = MemoryStore::new();
        assert_eq!(store.insert_catalog_entry(CatalogKind::Security, "High"), 1);
        assert_eq!(store.insert_catalog_entry(CatalogKind::Security, "Low"), 2);
        assert_eq!(store.insert_catalog_entry(CatalogKind::Security, "High"), 1);

        let rows = store.load_catalog(CatalogKind::Security).await.unwrap();
        assert_eq!(rows, vec![(1, "High".to_string()), (2, "Low".to_string())]);
        assert!(store.load_catalog(CatalogKind::Economy).await.unwrap().is_empty());

        store.fail_catalog(CatalogKind::Security);
        assert!(store.load_catalog(CatalogKind::Security).await.is_err());
    }
}
