//! Raw-row normalization into permit records.
//!
//! Portal field names vary per jurisdiction, so each normalized field is
//! probed against a small ordered list of candidate names; the first
//! non-empty match wins and is recorded in the record's provenance
//! `fields_map`. No reflection, just string-keyed lookups.

mod address;

pub use address::parse_address;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;

use crate::classify::RoofingRules;
use crate::models::{compute_fingerprint, generate_permit_id, Permit, Platform, Provenance};

/// Source identity snapshot handed to the normalizer with each record.
#[derive(Debug, Clone)]
pub struct SourceRef {
    pub id: i64,
    pub name: String,
    pub platform: Platform,
}

/// Fields a connector extracted from one raw portal row.
#[derive(Debug, Clone, Default)]
pub struct ExtractedRecord {
    pub source_record_id: String,
    pub permit_type: Option<String>,
    pub work_description: Option<String>,
    pub permit_status: Option<String>,
    pub issue_date: Option<String>,
    pub raw_address: Option<String>,
    pub parcel_id: Option<String>,
    pub owner_name: Option<String>,
    pub contractor_name: Option<String>,
    pub permit_value: Option<f64>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub geom_json: Option<serde_json::Value>,
    /// Normalized field name -> portal field name used.
    pub fields_map: BTreeMap<String, String>,
    /// Largest record id in the batch this record belonged to.
    pub max_record_id: Option<i64>,
}

/// Shapes extracted rows into permits: address parse, fingerprint,
/// classification, provenance assembly.
pub struct Normalizer {
    rules: Arc<RoofingRules>,
    /// Applied when the address parse yields no state. Per-source,
    /// from the `default_state` config key.
    default_state: Option<String>,
}

impl Normalizer {
    pub fn new(rules: Arc<RoofingRules>, default_state: Option<String>) -> Self {
        Self {
            rules,
            default_state,
        }
    }

    /// Build a permit record from an extracted row.
    pub fn permit(&self, source: &SourceRef, url: &str, rec: ExtractedRecord) -> Permit {
        let mut address = rec
            .raw_address
            .as_deref()
            .map(parse_address)
            .unwrap_or_default();
        if address.state.is_none() && !address.is_empty() {
            address.state = self.default_state.clone();
        }

        let fingerprint = compute_fingerprint(
            address.street.as_deref(),
            address.city.as_deref(),
            address.state.as_deref(),
            rec.parcel_id.as_deref(),
            rec.issue_date.as_deref(),
            rec.permit_type.as_deref(),
        );

        let is_roofing = self
            .rules
            .is_roofing(rec.permit_type.as_deref(), rec.work_description.as_deref());

        Permit {
            id: generate_permit_id(),
            source_id: source.id,
            source_name: source.name.clone(),
            platform: source.platform,
            source_record_id: rec.source_record_id,
            permit_type: rec.permit_type,
            work_description: rec.work_description,
            permit_status: rec.permit_status,
            issue_date: rec.issue_date,
            raw_address: rec.raw_address,
            address,
            parcel_id: rec.parcel_id,
            owner_name: rec.owner_name,
            contractor_name: rec.contractor_name,
            permit_value: rec.permit_value,
            lat: rec.lat,
            lon: rec.lon,
            geom_json: rec.geom_json,
            fingerprint,
            is_roofing,
            created_at: Utc::now(),
            provenance: Provenance {
                platform: source.platform.as_str().to_string(),
                url: url.to_string(),
                fetched_at: Utc::now(),
                fields_map: rec.fields_map,
                checksum: None,
                max_record_id: rec.max_record_id,
            },
            raw_blob_ref: None,
        }
    }
}

/// Probe an object for the first candidate key holding a non-empty string
/// (or stringifiable scalar). Returns the key used and the value.
pub fn probe_string(
    row: &serde_json::Value,
    candidates: &[&str],
) -> Option<(String, String)> {
    for key in candidates {
        if let Some(value) = row.get(*key) {
            if let Some(text) = scalar_to_string(value) {
                if !text.trim().is_empty() {
                    return Some((key.to_string(), text.trim().to_string()));
                }
            }
        }
    }
    None
}

/// Probe an object for the first candidate key coercible to f64.
pub fn probe_number(row: &serde_json::Value, candidates: &[&str]) -> Option<(String, f64)> {
    for key in candidates {
        if let Some(n) = row.get(*key).and_then(coerce_f64) {
            return Some((key.to_string(), n));
        }
    }
    None
}

/// Coerce a JSON value to f64. Strings are parsed; malformed numbers become
/// absent rather than errors.
pub fn coerce_f64(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Coerce a JSON value to i64, accepting integer-valued floats and strings.
pub fn coerce_i64(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        serde_json::Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn scalar_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Trim an ISO-ish timestamp to its `YYYY-MM-DD` date part.
pub fn date_part(s: &str) -> String {
    let s = s.trim();
    match s.split_once('T') {
        Some((date, _)) => date.to_string(),
        None => s.split_whitespace().next().unwrap_or(s).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn normalizer() -> Normalizer {
        Normalizer::new(Arc::new(RoofingRules::default()), None)
    }

    fn source() -> SourceRef {
        SourceRef {
            id: 1,
            name: "Sacramento Permits".to_string(),
            platform: Platform::JsonDataset,
        }
    }

    #[test]
    fn test_permit_assembly_sets_fingerprint_and_classification() {
        let rec = ExtractedRecord {
            source_record_id: "42".to_string(),
            permit_type: Some("Re-Roof".to_string()),
            raw_address: Some("700 H Street, Sacramento, CA 95814".to_string()),
            issue_date: Some("2024-10-15".to_string()),
            ..Default::default()
        };
        let permit = normalizer().permit(&source(), "https://data.example.gov/x.json", rec);

        assert!(permit.is_roofing);
        assert_eq!(permit.address.city.as_deref(), Some("Sacramento"));
        assert_eq!(permit.provenance.platform, "json-dataset");
        assert_eq!(
            permit.fingerprint,
            compute_fingerprint(
                Some("H Street"),
                Some("Sacramento"),
                Some("CA"),
                None,
                Some("2024-10-15"),
                Some("Re-Roof"),
            )
        );
    }

    #[test]
    fn test_default_state_applied_only_when_parse_has_none() {
        let n = Normalizer::new(Arc::new(RoofingRules::default()), Some("CA".to_string()));
        let rec = ExtractedRecord {
            source_record_id: "1".to_string(),
            raw_address: Some("700 H Street, Sacramento".to_string()),
            ..Default::default()
        };
        let permit = n.permit(&source(), "u", rec);
        assert_eq!(permit.address.state.as_deref(), Some("CA"));

        let rec = ExtractedRecord {
            source_record_id: "2".to_string(),
            raw_address: Some("1 Pine St, Portland, OR 97201".to_string()),
            ..Default::default()
        };
        let permit = n.permit(&source(), "u", rec);
        assert_eq!(permit.address.state.as_deref(), Some("OR"));
    }

    #[test]
    fn test_probe_string_takes_first_non_empty() {
        let row = json!({"permittype": "", "type": "Building", "permit_type": "Electrical"});
        let (field, value) = probe_string(&row, &["permit_type", "permittype", "type"]).unwrap();
        assert_eq!(field, "permit_type");
        assert_eq!(value, "Electrical");

        let row = json!({"permit_type": "  ", "type": "Building"});
        let (field, value) = probe_string(&row, &["permit_type", "permittype", "type"]).unwrap();
        assert_eq!(field, "type");
        assert_eq!(value, "Building");
    }

    #[test]
    fn test_coerce_f64_from_strings() {
        assert_eq!(coerce_f64(&json!("38.58")), Some(38.58));
        assert_eq!(coerce_f64(&json!(12000)), Some(12000.0));
        assert_eq!(coerce_f64(&json!("not a number")), None);
        assert_eq!(coerce_f64(&json!(null)), None);
    }

    #[test]
    fn test_date_part() {
        assert_eq!(date_part("2024-10-15T00:00:00.000"), "2024-10-15");
        assert_eq!(date_part("2024-10-15 08:30:00"), "2024-10-15");
        assert_eq!(date_part("2024-10-15"), "2024-10-15");
    }
}
