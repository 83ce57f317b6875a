//! Reference catalogs: name → id lookups for the normalizer.
//!
//! Catalogs are loaded once at the start of a run and are read-only
//! afterwards, so a `Catalogs` value can be shared behind an `Arc` by any
//! number of normalization workers. A lookup miss is an ordinary `None`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::IngestError;

/// The four reference tables star systems point into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CatalogKind {
    Alliance,
    Government,
    Economy,
    Security,
}

impl CatalogKind {
    pub const ALL: [CatalogKind; 4] = [
        CatalogKind::Alliance,
        CatalogKind::Government,
        CatalogKind::Economy,
        CatalogKind::Security,
    ];

    /// Backing table name.
    pub fn table(&self) -> &'static str {
        match self {
            Self::Alliance => "AllianceType",
            Self::Government => "GovernmentType",
            Self::Economy => "EconomyType",
            Self::Security => "SecurityType",
        }
    }
}

impl std::fmt::Display for CatalogKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.table())
    }
}

// ─── Catalog ─────────────────────────────────────────────────────────────────

/// One loaded name → id mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    entries: HashMap<String, i64>,
}

impl Catalog {
    pub fn from_entries(entries: impl IntoIterator<Item = (i64, String)>) -> Self {
        let mut map = HashMap::new();
        for (id, name) in entries {
            if let Some(prev) = map.insert(name, id) {
                debug!(prev, id, "duplicate catalog name, keeping the later id");
            }
        }
        Self { entries: map }
    }

    /// Resolve a name. Absent names and unknown names both give `None`.
    pub fn lookup(&self, name: Option<&str>) -> Option<i64> {
        name.and_then(|n| self.entries.get(n).copied())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// All four catalogs for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalogs {
    pub alliance: Catalog,
    pub government: Catalog,
    pub economy: Catalog,
    pub security: Catalog,
}

impl Catalogs {
    pub fn get(&self, kind: CatalogKind) -> &Catalog {
        match kind {
            CatalogKind::Alliance => &self.alliance,
            CatalogKind::Government => &self.government,
            CatalogKind::Economy => &self.economy,
            CatalogKind::Security => &self.security,
        }
    }

    fn get_mut(&mut self, kind: CatalogKind) -> &mut Catalog {
        match kind {
            CatalogKind::Alliance => &mut self.alliance,
            CatalogKind::Government => &mut self.government,
            CatalogKind::Economy => &mut self.economy,
            CatalogKind::Security => &mut self.security,
        }
    }
}

// ─── Source + resolver ───────────────────────────────────────────────────────

/// Read side of the catalog tables (`SELECT id, name FROM <table>`).
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Fetch every `(id, name)` row of one catalog.
    async fn load_catalog(&self, kind: CatalogKind) -> Result<Vec<(i64, String)>, IngestError>;
}

/// Loads catalogs, turning per-catalog failures into empty mappings.
pub struct CatalogResolver {
    source: Arc<dyn CatalogSource>,
}

impl CatalogResolver {
    pub fn new(source: Arc<dyn CatalogSource>) -> Self {
        Self { source }
    }

    /// Load one catalog. A failure yields an empty catalog and a warning.
    pub async fn load(&self, kind: CatalogKind) -> Catalog {
        match self.source.load_catalog(kind).await {
            Ok(rows) => {
                let catalog = Catalog::from_entries(rows);
                debug!(catalog = %kind, entries = catalog.len(), "catalog loaded");
                catalog
            }
            Err(e) => {
                warn!(catalog = %kind, error = %e, "catalog unavailable, treating as empty");
                Catalog::default()
            }
        }
    }

    /// Load all four catalogs independently.
    pub async fn load_all(&self) -> Catalogs {
        let mut catalogs = Catalogs::default();
        for kind in CatalogKind::ALL {
            *catalogs.get_mut(kind) = self.load(kind).await;
        }
        catalogs
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
