//! starindex-storage: pluggable storage backends for StarIndex.
//!
//! Backends:
//! - [`memory`]: in-memory (dry runs/testing, no persistence)
//! - `sqlite`: SQLite via `sqlx` (embedded, single-file persistence)
//! - `mysql`: MySQL/MariaDB via `sqlx` (production galaxy database)
//!
//! [`AnyStore::connect`] picks a backend from a URL scheme so binaries can
//! stay backend-agnostic.

use std::fmt;

use async_trait::async_trait;

use starindex_core::catalog::{CatalogKind, CatalogSource};
use starindex_core::error::IngestError;
use starindex_core::types::NormalizedRecord;
use starindex_core::writer::SystemStore;

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "mysql")]
pub mod mysql;

pub use memory::MemoryStore;

/// Column list shared by the SQL backends; `push_values` appends the rows.
#[cfg_attr(not(any(feature = "sqlite", feature = "mysql")), allow(dead_code))]
pub(crate) const INSERT_SYSTEMS: &str = "INSERT INTO StarSystem (id64, name, coords_x, coords_y, coords_z, \
     allegiance_id, government_id, primary_economy_id, secondary_economy_id, security_id, population, date) ";

/// Rows per multi-row INSERT. A batch larger than this spans several
/// statements inside the same transaction.
#[cfg_attr(not(any(feature = "sqlite", feature = "mysql")), allow(dead_code))]
pub(crate) const ROWS_PER_STATEMENT: usize = 500;

#[cfg_attr(not(any(feature = "sqlite", feature = "mysql")), allow(dead_code))]
pub(crate) fn persistence(e: impl fmt::Display) -> IngestError {
    IngestError::Persistence(e.to_string())
}

// ─── AnyStore ────────────────────────────────────────────────────────────────

/// A backend chosen at runtime from a database URL.
pub enum AnyStore {
    Memory(MemoryStore),
    #[cfg(feature = "sqlite")]
    Sqlite(sqlite::SqliteStore),
    #[cfg(feature = "mysql")]
    MySql(mysql::MySqlStore),
}

impl AnyStore {
    /// Connect by URL scheme: `memory:`, `sqlite:<path>` or `mysql://...`.
    ///
    /// SQL backends create their schema on connect.
    pub async fn connect(url: &str) -> Result<Self, IngestError> {
        if url == "memory:" {
            return Ok(Self::Memory(MemoryStore::new()));
        }
        #[cfg(feature = "sqlite")]
        if url.starts_with("sqlite:") {
            return Ok(Self::Sqlite(sqlite::SqliteStore::open(url).await?));
        }
        #[cfg(feature = "mysql")]
        if url.starts_with("mysql://") || url.starts_with("mariadb://") {
            return Ok(Self::MySql(mysql::MySqlStore::connect(url).await?));
        }
        let scheme = url.split(':').next().unwrap_or_default();
        Err(IngestError::Config(format!(
            "unsupported database url scheme '{scheme}' (is the backend feature enabled?)"
        )))
    }

    /// Backend name for logs.
    pub fn backend(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            #[cfg(feature = "sqlite")]
            Self::Sqlite(_) => "sqlite",
            #[cfg(feature = "mysql")]
            Self::MySql(_) => "mysql",
        }
    }

    /// Create any missing tables. Idempotent.
    pub async fn init_schema(&self) -> Result<(), IngestError> {
        match self {
            Self::Memory(_) => Ok(()),
            #[cfg(feature = "sqlite")]
            Self::Sqlite(s) => s.init_schema().await,
            #[cfg(feature = "mysql")]
            Self::MySql(s) => s.init_schema().await,
        }
    }

    pub async fn insert_catalog_entry(&self, kind: CatalogKind, name: &str) -> Result<i64, IngestError> {
        match self {
            Self::Memory(s) => Ok(s.insert_catalog_entry(kind, name)),
            #[cfg(feature = "sqlite")]
            Self::Sqlite(s) => s.insert_catalog_entry(kind, name).await,
            #[cfg(feature = "mysql")]
            Self::MySql(s) => s.insert_catalog_entry(kind, name).await,
        }
    }

    pub async fn system_count(&self) -> Result<u64, IngestError> {
        match self {
            Self::Memory(s) => Ok(s.system_count() as u64),
            #[cfg(feature = "sqlite")]
            Self::Sqlite(s) => s.system_count().await,
            #[cfg(feature = "mysql")]
            Self::MySql(s) => s.system_count().await,
        }
    }

    pub async fn close(&self) {
        match self {
            Self::Memory(_) => {}
            #[cfg(feature = "sqlite")]
            Self::Sqlite(s) => s.close().await,
            #[cfg(feature = "mysql")]
            Self::MySql(s) => s.close().await,
        }
    }
}

#[async_trait]
impl SystemStore for AnyStore {
    async fn upsert_batch(&self, batch: &[NormalizedRecord]) -> Result<u64, IngestError> {
        match self {
            Self::Memory(s) => s.upsert_batch(batch).await,
            #[cfg(feature = "sqlite")]
            Self::Sqlite(s) => s.upsert_batch(batch).await,
            #[cfg(feature = "mysql")]
            Self::MySql(s) => s.upsert_batch(batch).await,
        }
    }
}

#[async_trait]
impl CatalogSource for AnyStore {
    async fn load_catalog(&self, kind: CatalogKind) -> Result<Vec<(i64, String)>, IngestError> {
        match self {
            Self::Memory(s) => s.load_catalog(kind).await,
            #[cfg(feature = "sqlite")]
            Self::Sqlite(s) => s.load_catalog(kind).await,
            #[cfg(feature = "mysql")]
            Self::MySql(s) => s.load_catalog(kind).await,
        }
    }
}
