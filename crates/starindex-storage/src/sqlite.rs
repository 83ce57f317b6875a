//! SQLite storage backend for StarIndex.
//!
//! Persists catalogs and star systems to a single SQLite file via `sqlx`.
//! Used for local runs and as the transactional backend in tests.
//!
//! # Usage
//! ```rust,no_run
//! use starindex_storage::sqlite::SqliteStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStore::open("./galaxy.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStore::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool, Transaction};
use tracing::{debug, warn};

use starindex_core::catalog::{CatalogKind, CatalogSource};
use starindex_core::error::IngestError;
use starindex_core::types::{Coords, NormalizedRecord};
use starindex_core::writer::SystemStore;

use crate::{persistence, INSERT_SYSTEMS, ROWS_PER_STATEMENT};

/// SQLite-backed star system store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./galaxy.db"`) or a full
    /// SQLite URL (`"sqlite:./galaxy.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, IngestError> {
        if path.contains(":memory:") {
            return Self::in_memory().await;
        }
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(persistence)?;

        // WAL mode: readers don't block the bulk writer
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&pool)
            .await
            .map_err(persistence)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Open an in-memory SQLite database.
    ///
    /// A single connection is kept alive for the pool's lifetime, since
    /// every SQLite connection to `:memory:` is a separate database.
    pub async fn in_memory() -> Result<Self, IngestError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(persistence)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create catalog tables and the `StarSystem` table.
    pub async fn init_schema(&self) -> Result<(), IngestError> {
        for kind in CatalogKind::ALL {
            let ddl = format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id   INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT    NOT NULL UNIQUE
                );",
                kind.table()
            );
            sqlx::query(&ddl).execute(&self.pool).await.map_err(persistence)?;
        }

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS StarSystem (
                id64                 INTEGER PRIMARY KEY,
                name                 TEXT    NOT NULL,
                coords_x             REAL    NOT NULL,
                coords_y             REAL    NOT NULL,
                coords_z             REAL    NOT NULL,
                allegiance_id        INTEGER REFERENCES AllianceType(id),
                government_id        INTEGER REFERENCES GovernmentType(id),
                primary_economy_id   INTEGER REFERENCES EconomyType(id),
                secondary_economy_id INTEGER REFERENCES EconomyType(id),
                security_id          INTEGER REFERENCES SecurityType(id),
                population           INTEGER NOT NULL DEFAULT 0,
                date                 TEXT    NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(persistence)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_starsystem_name ON StarSystem (name);")
            .execute(&self.pool)
            .await
            .map_err(persistence)?;

        Ok(())
    }

    // ─── Catalogs ────────────────────────────────────────────────────────────────

    /// Add a catalog name, returning its id (existing names keep theirs).
    pub async fn insert_catalog_entry(&self, kind: CatalogKind, name: &str) -> Result<i64, IngestError> {
        let table = kind.table();
        sqlx::query(&format!("INSERT OR IGNORE INTO {table} (name) VALUES (?)"))
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(persistence)?;

        let row = sqlx::query(&format!("SELECT id FROM {table} WHERE name = ?"))
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(persistence)?;
        Ok(row.get("id"))
    }

    // ─── Star systems ────────────────────────────────────────────────────────────

    async fn write_chunks(
        tx: &mut Transaction<'_, Sqlite>,
        batch: &[NormalizedRecord],
    ) -> Result<(), IngestError> {
        for chunk in batch.chunks(ROWS_PER_STATEMENT) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(INSERT_SYSTEMS);
            qb.push_values(chunk, |mut b, r| {
                b.push_bind(r.id64 as i64)
                    .push_bind(r.name.as_str())
                    .push_bind(r.coords.x)
                    .push_bind(r.coords.y)
                    .push_bind(r.coords.z)
                    .push_bind(r.allegiance_id)
                    .push_bind(r.government_id)
                    .push_bind(r.primary_economy_id)
                    .push_bind(r.secondary_economy_id)
                    .push_bind(r.security_id)
                    .push_bind(r.population as i64)
                    .push_bind(r.ingested_at);
            });
            qb.push(
                " ON CONFLICT(id64) DO UPDATE SET
                    name = excluded.name,
                    coords_x = excluded.coords_x,
                    coords_y = excluded.coords_y,
                    coords_z = excluded.coords_z,
                    allegiance_id = excluded.allegiance_id,
                    government_id = excluded.government_id,
                    primary_economy_id = excluded.primary_economy_id,
                    secondary_economy_id = excluded.secondary_economy_id,
                    security_id = excluded.security_id,
                    population = excluded.population,
                    date = excluded.date",
            );
            qb.build().execute(&mut **tx).await.map_err(persistence)?;
        }
        Ok(())
    }

    /// Look up one stored system.
    pub async fn get_system(&self, id64: u64) -> Result<Option<NormalizedRecord>, IngestError> {
        let row = sqlx::query(
            "SELECT id64, name, coords_x, coords_y, coords_z, allegiance_id, government_id,
                    primary_economy_id, secondary_economy_id, security_id, population, date
             FROM StarSystem WHERE id64 = ?",
        )
        .bind(id64 as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(persistence)?;

        Ok(row.map(|r| NormalizedRecord {
            id64: r.get::<i64, _>("id64") as u64,
            name: r.get("name"),
            coords: Coords::new(r.get("coords_x"), r.get("coords_y"), r.get("coords_z")),
            allegiance_id: r.get("allegiance_id"),
            government_id: r.get("government_id"),
            primary_economy_id: r.get("primary_economy_id"),
            secondary_economy_id: r.get("secondary_economy_id"),
            security_id: r.get("security_id"),
            population: r.get::<i64, _>("population") as u64,
            ingested_at: r.get::<DateTime<Utc>, _>("date"),
        }))
    }

    /// Number of stored systems.
    pub async fn system_count(&self) -> Result<u64, IngestError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM StarSystem")
            .fetch_one(&self.pool)
            .await
            .map_err(persistence)?;
        Ok(row.get::<i64, _>("cnt") as u64)
    }

    /// Close every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

// ─── Core trait impls ────────────────────────────────────────────────────────

#[async_trait]
impl SystemStore for SqliteStore {
    async fn upsert_batch(&self, batch: &[NormalizedRecord]) -> Result<u64, IngestError> {
        if batch.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await.map_err(persistence)?;
        if let Err(e) = Self::write_chunks(&mut tx, batch).await {
            if let Err(rb) = tx.rollback().await {
                warn!(error = %rb, "rollback failed");
            }
            return Err(e);
        }
        tx.commit().await.map_err(persistence)?;

        debug!(rows = batch.len(), "sqlite batch committed");
        Ok(batch.len() as u64)
    }
}

#[async_trait]
impl CatalogSource for SqliteStore {
    async fn load_catalog(&self, kind: CatalogKind) -> Result<Vec<(i64, String)>, IngestError> {
        let rows = sqlx::query(&format!("SELECT id, name FROM {}", kind.table()))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| IngestError::CatalogLoad {
                catalog: kind.table().into(),
                reason: e.to_string(),
            })?;

        Ok(rows
            .into_iter()
            .map(|r| (r.get::<i64, _>("id"), r.get::<String, _>("name")))
            .collect())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
