//! Decoded object → persistence row.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::catalog::Catalogs;
use crate::error::IngestError;
use crate::types::{NormalizedRecord, RawRecord};

/// Normalize a decoded object, stamping it with the current time.
pub fn normalize(value: &Value, catalogs: &Catalogs) -> Result<NormalizedRecord, IngestError> {
    normalize_at(value, catalogs, Utc::now())
}

/// Normalize a decoded object with an explicit ingestion timestamp.
pub fn normalize_at(
    value: &Value,
    catalogs: &Catalogs,
    at: DateTime<Utc>,
) -> Result<NormalizedRecord, IngestError> {
    let raw = RawRecord::from_value(value)?;
    Ok(normalize_record(raw, catalogs, at))
}

/// Resolve catalog names of an already extracted record.
///
/// Both economy fields resolve against the economy catalog.
pub fn normalize_record(raw: RawRecord, catalogs: &Catalogs, at: DateTime<Utc>) -> NormalizedRecord {
    NormalizedRecord {
        allegiance_id: catalogs.alliance.lookup(raw.allegiance.as_deref()),
        government_id: catalogs.government.lookup(raw.government.as_deref()),
        primary_economy_id: catalogs.economy.lookup(raw.primary_economy.as_deref()),
        secondary_economy_id: catalogs.economy.lookup(raw.secondary_economy.as_deref()),
        security_id: catalogs.security.lookup(raw.security.as_deref()),
        id64: raw.id64,
        name: raw.name,
        coords: raw.coords,
        population: raw.population,
        ingested_at: at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::types::Coords;
    use chrono::TimeZone;
    use serde_json::json;

    fn catalogs() -> Catalogs {
        Catalogs {
            alliance: Catalog::from_entries(vec![(1, "Federation".into()), (2, "Independent".into())]),
            government: Catalog::from_entries(vec![(10, "Democracy".into()), (11, "Anarchy".into())]),
            economy: Catalog::from_entries(vec![(20, "Industrial".into()), (21, "Agriculture".into())]),
            security: Catalog::from_entries(vec![(30, "High".into()), (31, "Low".into())]),
        }
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 16, 16, 24, 19).unwrap()
    }

    #[test]
    fn resolves_all_catalog_fields() {
        let v = json!({
            "id64": 123456790, "name": "Alpha Centauri",
            "coords": {"x": 1.25, "y": 2.34, "z": 3.45},
            "allegiance": "Federation", "government": "Democracy",
            "primaryEconomy": "Industrial", "secondaryEconomy": "Agriculture",
            "security": "High", "population": 5000000000u64
        });
        let rec = normalize_at(&v, &catalogs(), at()).unwrap();
        assert_eq!(rec.id64, 123456790);
        assert_eq!(rec.coords, Coords::new(1.25, 2.34, 3.45));
        assert_eq!(rec.allegiance_id, Some(1));
        assert_eq!(rec.government_id, Some(10));
        assert_eq!(rec.primary_economy_id, Some(20));
        assert_eq!(rec.secondary_economy_id, Some(21));
        assert_eq!(rec.security_id, Some(30));
        assert_eq!(rec.population, 5_000_000_000);
        assert_eq!(rec.ingested_at, at());
    }

    #[test]
    fn unknown_allegiance_is_absent_not_error() {
        let v = json!({
            "id64": 1, "name": "Polaris", "coords": [0, 0, 0],
            "allegiance": "Thargoid", "government": "Anarchy"
        });
        let rec = normalize_at(&v, &catalogs(), at()).unwrap();
        assert_eq!(rec.allegiance_id, None);
        assert_eq!(rec.government_id, Some(11));
        assert_eq!(rec.primary_economy_id, None);
        assert_eq!(rec.population, 0);
    }

    #[test]
    fn empty_catalogs_resolve_nothing() {
        let v = json!({"id64": 1, "name": "A", "coords": [0, 0, 0], "security": "High"});
        let rec = normalize(&v, &Catalogs::default()).unwrap();
        assert_eq!(rec.security_id, None);
    }

    #[test]
    fn deterministic_for_fixed_clock() {
        let v = json!({"id64": 9, "name": "B", "coords": [1, 2, 3], "security": "Low"});
        let a = normalize_at(&v, &catalogs(), at()).unwrap();
        let b = normalize_at(&v, &catalogs(), at()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn missing_coords_fail_one_record() {
        let err = normalize(&json!({"id64": 1, "name": "A"}), &catalogs()).unwrap_err();
        assert!(err.is_record_local());
    }
}
