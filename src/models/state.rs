//! Per-source cursor state and last-run statistics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Resumable cursors and run counters, one row per source.
///
/// Cursor fields only ever move forward across successful runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceState {
    pub source_id: i64,
    /// Portal-side modification timestamp high-water mark (JSON-dataset).
    pub last_max_timestamp: Option<String>,
    /// OBJECTID high-water mark (feature-service only).
    pub last_max_record_id: Option<i64>,
    /// Issue-date high-water mark, `YYYY-MM-DD`.
    pub last_issue_date: Option<String>,
    pub etag: Option<String>,
    pub checksum: Option<String>,
    /// Rows the portal returned in the last run.
    pub rows_fetched: i64,
    /// Rows persisted in the last run.
    pub rows_upserted: i64,
    /// Per-record failures in the last run.
    pub errors: i64,
    /// Wall-clock duration of the last run.
    pub freshness_seconds: Option<i64>,
    /// Advisory flag: a run is currently in flight.
    pub is_running: bool,
    /// Human-readable progress or outcome line.
    pub status_message: Option<String>,
    pub current_page: i64,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl SourceState {
    /// Empty state for a source that has never run.
    pub fn empty(source_id: i64) -> Self {
        Self {
            source_id,
            last_max_timestamp: None,
            last_max_record_id: None,
            last_issue_date: None,
            etag: None,
            checksum: None,
            rows_fetched: 0,
            rows_upserted: 0,
            errors: 0,
            freshness_seconds: None,
            is_running: false,
            status_message: None,
            current_page: 0,
            last_sync_at: None,
            updated_at: Utc::now(),
        }
    }

    /// Apply a partial update in place. Fields absent from the patch keep
    /// their current values; `updated_at` is always bumped.
    pub fn apply(&mut self, patch: &SourceStatePatch) {
        if let Some(v) = &patch.last_max_timestamp {
            self.last_max_timestamp = Some(v.clone());
        }
        if let Some(v) = patch.last_max_record_id {
            self.last_max_record_id = Some(v);
        }
        if let Some(v) = &patch.last_issue_date {
            self.last_issue_date = Some(v.clone());
        }
        if let Some(v) = &patch.etag {
            self.etag = Some(v.clone());
        }
        if let Some(v) = &patch.checksum {
            self.checksum = Some(v.clone());
        }
        if let Some(v) = patch.rows_fetched {
            self.rows_fetched = v;
        }
        if let Some(v) = patch.rows_upserted {
            self.rows_upserted = v;
        }
        if let Some(v) = patch.errors {
            self.errors = v;
        }
        if let Some(v) = patch.freshness_seconds {
            self.freshness_seconds = Some(v);
        }
        if let Some(v) = patch.is_running {
            self.is_running = v;
        }
        if let Some(v) = &patch.status_message {
            self.status_message = Some(v.clone());
        }
        if let Some(v) = patch.current_page {
            self.current_page = v;
        }
        if let Some(v) = patch.last_sync_at {
            self.last_sync_at = Some(v);
        }
        self.updated_at = Utc::now();
    }
}

/// Partial state update. `None` fields are left untouched on merge.
#[derive(Debug, Clone, Default)]
pub struct SourceStatePatch {
    pub source_id: i64,
    pub last_max_timestamp: Option<String>,
    pub last_max_record_id: Option<i64>,
    pub last_issue_date: Option<String>,
    pub etag: Option<String>,
    pub checksum: Option<String>,
    pub rows_fetched: Option<i64>,
    pub rows_upserted: Option<i64>,
    pub errors: Option<i64>,
    pub freshness_seconds: Option<i64>,
    pub is_running: Option<bool>,
    pub status_message: Option<String>,
    pub current_page: Option<i64>,
    pub last_sync_at: Option<DateTime<Utc>>,
}

impl SourceStatePatch {
    pub fn new(source_id: i64) -> Self {
        Self {
            source_id,
            ..Default::default()
        }
    }
}
