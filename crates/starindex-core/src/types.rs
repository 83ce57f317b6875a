//! Record types flowing through the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::IngestError;

// ─── Coords ──────────────────────────────────────────────────────────────────

/// Galactic coordinates of a star system (light years, Sol-relative).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Coords {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Coords {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Accepts both the dump shape `{"x":..,"y":..,"z":..}` and the journal
    /// shape `[x, y, z]`.
    fn from_value(v: &Value) -> Result<Self, IngestError> {
        let axis = |v: Option<&Value>, name: &str| -> Result<f64, IngestError> {
            v.and_then(Value::as_f64).ok_or_else(|| IngestError::Normalization {
                field: format!("coords.{name}"),
                reason: "expected a number".into(),
            })
        };
        match v {
            Value::Object(m) => Ok(Self {
                x: axis(m.get("x"), "x")?,
                y: axis(m.get("y"), "y")?,
                z: axis(m.get("z"), "z")?,
            }),
            Value::Array(a) if a.len() == 3 => Ok(Self {
                x: axis(a.first(), "x")?,
                y: axis(a.get(1), "y")?,
                z: axis(a.get(2), "z")?,
            }),
            other => Err(IngestError::Normalization {
                field: "coords".into(),
                reason: format!("expected object or 3-element array, got {}", kind_of(other)),
            }),
        }
    }
}

// ─── RawRecord ───────────────────────────────────────────────────────────────

/// One star system as decoded from the dump or a live event, before catalog
/// resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub id64: u64,
    pub name: String,
    pub coords: Coords,
    pub allegiance: Option<String>,
    pub government: Option<String>,
    pub primary_economy: Option<String>,
    pub secondary_economy: Option<String>,
    pub security: Option<String>,
    pub population: u64,
}

// Dump field name first, journal alias second.
const ID64: &[&str] = &["id64", "SystemAddress"];
const NAME: &[&str] = &["name", "StarSystem"];
const COORDS: &[&str] = &["coords", "StarPos"];
const ALLEGIANCE: &[&str] = &["allegiance", "SystemAllegiance"];
const GOVERNMENT: &[&str] = &["government", "SystemGovernment"];
const PRIMARY_ECONOMY: &[&str] = &["primaryEconomy", "SystemEconomy"];
const SECONDARY_ECONOMY: &[&str] = &["secondaryEconomy", "SystemSecondEconomy"];
const SECURITY: &[&str] = &["security", "SystemSecurity"];
const POPULATION: &[&str] = &["population", "Population"];

impl RawRecord {
    /// Extract a record from a decoded JSON object.
    ///
    /// Identifier, name and coordinates are required; everything else falls
    /// back to absent (or zero for population).
    pub fn from_value(value: &Value) -> Result<Self, IngestError> {
        let obj = value.as_object().ok_or_else(|| IngestError::Normalization {
            field: "<root>".into(),
            reason: format!("expected object, got {}", kind_of(value)),
        })?;

        let id64 = match lookup(obj, ID64) {
            None => return Err(IngestError::missing("id64")),
            Some(v) => v.as_u64().ok_or_else(|| IngestError::Normalization {
                field: "id64".into(),
                reason: format!("expected unsigned integer, got {}", kind_of(v)),
            })?,
        };

        let name = match lookup(obj, NAME) {
            None => return Err(IngestError::missing("name")),
            Some(v) => v
                .as_str()
                .ok_or_else(|| IngestError::Normalization {
                    field: "name".into(),
                    reason: format!("expected string, got {}", kind_of(v)),
                })?
                .to_string(),
        };

        let coords = match lookup(obj, COORDS) {
            None => return Err(IngestError::missing("coords")),
            Some(v) => Coords::from_value(v)?,
        };

        Ok(Self {
            id64,
            name,
            coords,
            allegiance: optional_str(obj, ALLEGIANCE),
            government: optional_str(obj, GOVERNMENT),
            primary_economy: optional_str(obj, PRIMARY_ECONOMY),
            secondary_economy: optional_str(obj, SECONDARY_ECONOMY),
            security: optional_str(obj, SECURITY),
            population: population(obj)?,
        })
    }
}

/// First non-null value among `keys`.
fn lookup<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find(|v| !v.is_null())
}

fn optional_str(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    lookup(obj, keys).and_then(Value::as_str).map(str::to_string)
}

fn population(obj: &Map<String, Value>) -> Result<u64, IngestError> {
    let Some(v) = lookup(obj, POPULATION) else {
        return Ok(0);
    };
    if let Some(n) = v.as_u64() {
        return Ok(n);
    }
    // Some dumps write large populations as floats (e.g. 2.5e10).
    match v.as_f64() {
        Some(f) if f.is_finite() && f >= 0.0 && f.fract() == 0.0 && f <= u64::MAX as f64 => {
            Ok(f as u64)
        }
        _ => Err(IngestError::Normalization {
            field: "population".into(),
            reason: format!("expected non-negative integer, got {v}"),
        }),
    }
}

fn kind_of(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ─── NormalizedRecord ────────────────────────────────────────────────────────

/// A persistence-ready `StarSystem` row.
///
/// Catalog foreign keys are either an id from the catalogs loaded for this
/// run or `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub id64: u64,
    pub name: String,
    pub coords: Coords,
    pub allegiance_id: Option<i64>,
    pub government_id: Option<i64>,
    pub primary_economy_id: Option<i64>,
    pub secondary_economy_id: Option<i64>,
    pub security_id: Option<i64>,
    pub population: u64,
    pub ingested_at: DateTime<Utc>,
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dump_shape() {
        let v = json!({
            "id64": 10477373803u64,
            "name": "Sol",
            "coords": {"x": 0.0, "y": 0.0, "z": 0.0},
            "allegiance": "Federation",
            "government": "Democracy",
            "primaryEconomy": "Refinery",
            "secondaryEconomy": "Service",
            "security": "High",
            "population": 22780919531u64
        });
        let r = RawRecord::from_value(&v).unwrap();
        assert_eq!(r.id64, 10477373803);
        assert_eq!(r.name, "Sol");
        assert_eq!(r.allegiance.as_deref(), Some("Federation"));
        assert_eq!(r.secondary_economy.as_deref(), Some("Service"));
        assert_eq!(r.population, 22780919531);
    }

    #[test]
    fn journal_shape() {
        let v = json!({
            "event": "FSDJump",
            "SystemAddress": 5068463809865u64,
            "StarSystem": "Wolf 359",
            "StarPos": [3.875, 6.46875, -1.90625],
            "SystemAllegiance": "",
            "Population": 0
        });
        let r = RawRecord::from_value(&v).unwrap();
        assert_eq!(r.id64, 5068463809865);
        assert_eq!(r.name, "Wolf 359");
        assert_eq!(r.coords, Coords::new(3.875, 6.46875, -1.90625));
        assert_eq!(r.allegiance.as_deref(), Some(""));
    }

    #[test]
    fn population_defaults_to_zero() {
        let v = json!({"id64": 1, "name": "A", "coords": {"x": 1, "y": 2, "z": 3}});
        let r = RawRecord::from_value(&v).unwrap();
        assert_eq!(r.population, 0);
        assert!(r.security.is_none());

        let v = json!({"id64": 1, "name": "A", "coords": [1, 2, 3], "population": null});
        assert_eq!(RawRecord::from_value(&v).unwrap().population, 0);
    }

    #[test]
    fn population_accepts_integral_float() {
        let v = json!({"id64": 1, "name": "A", "coords": [1, 2, 3], "population": 2.5e10});
        assert_eq!(RawRecord::from_value(&v).unwrap().population, 25_000_000_000);
    }

    #[test]
    fn negative_population_rejected() {
        let v = json!({"id64": 1, "name": "A", "coords": [1, 2, 3], "population": -4});
        let err = RawRecord::from_value(&v).unwrap_err();
        assert!(matches!(err, IngestError::Normalization { ref field, .. } if field == "population"));
    }

    #[test]
    fn missing_required_fields() {
        let err = RawRecord::from_value(&json!({"name": "A", "coords": [0, 0, 0]})).unwrap_err();
        assert!(matches!(err, IngestError::Normalization { ref field, .. } if field == "id64"));

        let err = RawRecord::from_value(&json!({"id64": 1, "coords": [0, 0, 0]})).unwrap_err();
        assert!(matches!(err, IngestError::Normalization { ref field, .. } if field == "name"));

        let err = RawRecord::from_value(&json!({"id64": 1, "name": "A"})).unwrap_err();
        assert!(matches!(err, IngestError::Normalization { ref field, .. } if field == "coords"));
    }

    #[test]
    fn type_mismatch_rejected() {
        let err =
            RawRecord::from_value(&json!({"id64": "1", "name": "A", "coords": [0, 0, 0]}))
                .unwrap_err();
        assert!(err.is_record_local());

        let err = RawRecord::from_value(&json!({"id64": 1, "name": "A", "coords": {"x": 0, "y": "up", "z": 0}}))
            .unwrap_err();
        assert!(matches!(err, IngestError::Normalization { ref field, .. } if field == "coords.y"));

        let err = RawRecord::from_value(&json!({"id64": 1, "name": "A", "coords": [0, 0]}))
            .unwrap_err();
        assert!(matches!(err, IngestError::Normalization { ref field, .. } if field == "coords"));
    }

    #[test]
    fn non_object_rejected() {
        assert!(RawRecord::from_value(&json!([1, 2, 3])).is_err());
    }
}
