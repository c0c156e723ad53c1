//! Normalized permit records and fingerprint computation.
//!
//! Permits from every portal are shaped into a single schema. The SHA-256
//! fingerprint over the normalized address/parcel/date/type tuple is the only
//! deduplication key: two records with equal fingerprints are the same permit.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::Platform;

/// Parsed form of a street address. Absent pieces stay absent, never "".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedAddress {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub house_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub street: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zip: Option<String>,
}

impl ParsedAddress {
    pub fn is_empty(&self) -> bool {
        self.house_number.is_none()
            && self.street.is_none()
            && self.city.is_none()
            && self.state.is_none()
            && self.zip.is_none()
    }
}

/// Per-record audit metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provenance {
    /// Copy of the source platform tag.
    pub platform: String,
    /// The specific URL that produced this record.
    pub url: String,
    pub fetched_at: DateTime<Utc>,
    /// Normalized field name -> portal field name used.
    #[serde(default)]
    pub fields_map: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// Largest record id observed in the batch this record belonged to
    /// (feature-service only); the orchestrator advances cursors from it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_record_id: Option<i64>,
}

/// A normalized building-permit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Permit {
    /// Opaque unique id assigned at insert.
    pub id: String,
    pub source_id: i64,
    /// Source name snapshot at ingestion time.
    pub source_name: String,
    pub platform: Platform,
    /// The portal's own identifier. Unique per source, not globally.
    pub source_record_id: String,
    pub permit_type: Option<String>,
    pub work_description: Option<String>,
    pub permit_status: Option<String>,
    /// `YYYY-MM-DD`.
    pub issue_date: Option<String>,
    pub raw_address: Option<String>,
    pub address: ParsedAddress,
    pub parcel_id: Option<String>,
    pub owner_name: Option<String>,
    pub contractor_name: Option<String>,
    pub permit_value: Option<f64>,
    /// WGS84 decimal degrees when set.
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    /// Portal-native geometry JSON, preserved verbatim.
    pub geom_json: Option<serde_json::Value>,
    /// SHA-256 hex digest; unique across all permits.
    pub fingerprint: String,
    pub is_roofing: bool,
    pub created_at: DateTime<Utc>,
    pub provenance: Provenance,
    pub raw_blob_ref: Option<String>,
}

/// Compute the deduplication fingerprint.
///
/// SHA-256 over the `|`-joined sequence of lowercased street and city,
/// uppercased state and permit type, and trimmed parcel id and issue date.
/// Absent components contribute the empty string.
pub fn compute_fingerprint(
    street: Option<&str>,
    city: Option<&str>,
    state: Option<&str>,
    parcel_id: Option<&str>,
    issue_date: Option<&str>,
    permit_type: Option<&str>,
) -> String {
    let parts = [
        street.map(|s| s.trim().to_lowercase()).unwrap_or_default(),
        city.map(|s| s.trim().to_lowercase()).unwrap_or_default(),
        state.map(|s| s.trim().to_uppercase()).unwrap_or_default(),
        parcel_id.map(|s| s.trim().to_string()).unwrap_or_default(),
        issue_date.map(|s| s.trim().to_string()).unwrap_or_default(),
        permit_type
            .map(|s| s.trim().to_uppercase())
            .unwrap_or_default(),
    ];

    let mut hasher = Sha256::new();
    hasher.update(parts.join("|").as_bytes());
    hex::encode(hasher.finalize())
}

/// Generate an opaque permit id.
pub fn generate_permit_id() -> String {
    format!("p{:016x}", rand::rng().random::<u64>())
}
