//! Source models for registered permit data portals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wire protocol a source speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Platform {
    JsonDataset,
    FeatureService,
    Other,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::JsonDataset => "json-dataset",
            Self::FeatureService => "feature-service",
            Self::Other => "other",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "json-dataset" => Some(Self::JsonDataset),
            "feature-service" => Some(Self::FeatureService),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

/// A registered permit data source.
///
/// Represents one jurisdiction-and-protocol pair. Disabling a source halts
/// scheduling but preserves past records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    /// Database-assigned identifier. Immutable.
    pub id: i64,
    /// Human-readable name.
    pub name: String,
    /// Wire protocol.
    pub platform: Platform,
    /// Base URL for the portal.
    pub endpoint_url: String,
    /// Platform-specific keys (dataset_id, layer_id, app_token, default_state, ...).
    pub config: serde_json::Value,
    /// Whether the sweep loop visits this source.
    pub enabled: bool,
    /// Row budget per ingestion run.
    pub max_rows_per_run: i64,
    /// Wall-clock budget per ingestion run.
    pub max_runtime_minutes: i64,
    /// Request budget handed to the connector's rate limiter.
    pub max_requests_per_minute: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Source {
    /// Look up a string key in the platform-specific config blob.
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(|v| v.as_str())
    }
}

/// Fields for registering a new source.
#[derive(Debug, Clone, Deserialize)]
pub struct NewSource {
    pub name: String,
    pub platform: Platform,
    pub endpoint_url: String,
    #[serde(default = "default_config")]
    pub config: serde_json::Value,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_max_rows")]
    pub max_rows_per_run: i64,
    #[serde(default = "default_max_runtime")]
    pub max_runtime_minutes: i64,
    #[serde(default = "default_max_requests")]
    pub max_requests_per_minute: i64,
}

fn default_config() -> serde_json::Value {
    serde_json::json!({})
}

fn default_enabled() -> bool {
    true
}

fn default_max_rows() -> i64 {
    1000
}

fn default_max_runtime() -> i64 {
    30
}

fn default_max_requests() -> i64 {
    60
}

/// Partial update applied to an existing source. `None` leaves a field as-is.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourcePatch {
    pub name: Option<String>,
    pub platform: Option<Platform>,
    pub endpoint_url: Option<String>,
    pub config: Option<serde_json::Value>,
    pub enabled: Option<bool>,
    pub max_rows_per_run: Option<i64>,
    pub max_runtime_minutes: Option<i64>,
    pub max_requests_per_minute: Option<i64>,
}
