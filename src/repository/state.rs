//! Source-state table access.
//!
//! At most one row per source. Upsert is patch-merge: fields present in the
//! patch overwrite, everything else is carried forward, and `updated_at` is
//! bumped.

use crate::models::{SourceState, SourceStatePatch};

use super::{parse_datetime, parse_datetime_opt, Store, StoreResult};

#[derive(sqlx::FromRow)]
struct StateRow {
    source_id: i64,
    last_max_timestamp: Option<String>,
    last_max_record_id: Option<i64>,
    last_issue_date: Option<String>,
    etag: Option<String>,
    checksum: Option<String>,
    rows_fetched: i64,
    rows_upserted: i64,
    errors: i64,
    freshness_seconds: Option<i64>,
    is_running: i64,
    status_message: Option<String>,
    current_page: i64,
    last_sync_at: Option<String>,
    updated_at: String,
}

impl From<StateRow> for SourceState {
    fn from(row: StateRow) -> Self {
        SourceState {
            source_id: row.source_id,
            last_max_timestamp: row.last_max_timestamp,
            last_max_record_id: row.last_max_record_id,
            last_issue_date: row.last_issue_date,
            etag: row.etag,
            checksum: row.checksum,
            rows_fetched: row.rows_fetched,
            rows_upserted: row.rows_upserted,
            errors: row.errors,
            freshness_seconds: row.freshness_seconds,
            is_running: row.is_running != 0,
            status_message: row.status_message,
            current_page: row.current_page,
            last_sync_at: parse_datetime_opt(row.last_sync_at),
            updated_at: parse_datetime(&row.updated_at),
        }
    }
}

const SELECT_COLUMNS: &str = "source_id, last_max_timestamp, last_max_record_id, \
     last_issue_date, etag, checksum, rows_fetched, rows_upserted, errors, \
     freshness_seconds, is_running, status_message, current_page, last_sync_at, updated_at";

impl Store {
    pub async fn get_source_state(&self, source_id: i64) -> StoreResult<Option<SourceState>> {
        let row = sqlx::query_as::<_, StateRow>(&format!(
            "SELECT {} FROM source_state WHERE source_id = ?1",
            SELECT_COLUMNS
        ))
        .bind(source_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(SourceState::from))
    }

    pub async fn get_all_source_states(&self) -> StoreResult<Vec<SourceState>> {
        let rows = sqlx::query_as::<_, StateRow>(&format!(
            "SELECT {} FROM source_state ORDER BY source_id",
            SELECT_COLUMNS
        ))
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(SourceState::from).collect())
    }

    /// Insert a state row if none exists for the source, else patch-merge the
    /// present fields into the existing row.
    pub async fn upsert_source_state(&self, patch: &SourceStatePatch) -> StoreResult<SourceState> {
        let mut state = self
            .get_source_state(patch.source_id)
            .await?
            .unwrap_or_else(|| SourceState::empty(patch.source_id));
        state.apply(patch);

        sqlx::query(
            r#"INSERT INTO source_state
               (source_id, last_max_timestamp, last_max_record_id, last_issue_date,
                etag, checksum, rows_fetched, rows_upserted, errors, freshness_seconds,
                is_running, status_message, current_page, last_sync_at, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
               ON CONFLICT(source_id) DO UPDATE SET
                   last_max_timestamp = excluded.last_max_timestamp,
                   last_max_record_id = excluded.last_max_record_id,
                   last_issue_date = excluded.last_issue_date,
                   etag = excluded.etag,
                   checksum = excluded.checksum,
                   rows_fetched = excluded.rows_fetched,
                   rows_upserted = excluded.rows_upserted,
                   errors = excluded.errors,
                   freshness_seconds = excluded.freshness_seconds,
                   is_running = excluded.is_running,
                   status_message = excluded.status_message,
                   current_page = excluded.current_page,
                   last_sync_at = excluded.last_sync_at,
                   updated_at = excluded.updated_at"#,
        )
        .bind(state.source_id)
        .bind(&state.last_max_timestamp)
        .bind(state.last_max_record_id)
        .bind(&state.last_issue_date)
        .bind(&state.etag)
        .bind(&state.checksum)
        .bind(state.rows_fetched)
        .bind(state.rows_upserted)
        .bind(state.errors)
        .bind(state.freshness_seconds)
        .bind(state.is_running as i64)
        .bind(&state.status_message)
        .bind(state.current_page)
        .bind(state.last_sync_at.map(|dt| dt.to_rfc3339()))
        .bind(state.updated_at.to_rfc3339())
        .execute(self.pool())
        .await?;

        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upsert_inserts_then_merges() {
        let store = Store::in_memory().await.unwrap();

        let mut patch = SourceStatePatch::new(3);
        patch.is_running = Some(true);
        patch.status_message = Some("→ Starting backfill".to_string());
        patch.last_max_record_id = Some(1000);
        store.upsert_source_state(&patch).await.unwrap();

        // A later patch leaves unmentioned fields alone.
        let mut patch = SourceStatePatch::new(3);
        patch.is_running = Some(false);
        patch.rows_fetched = Some(1000);
        patch.rows_upserted = Some(990);
        let merged = store.upsert_source_state(&patch).await.unwrap();

        assert!(!merged.is_running);
        assert_eq!(merged.last_max_record_id, Some(1000));
        assert_eq!(merged.rows_fetched, 1000);
        assert_eq!(merged.status_message.as_deref(), Some("→ Starting backfill"));

        let stored = store.get_source_state(3).await.unwrap().unwrap();
        assert_eq!(stored.last_max_record_id, Some(1000));
        assert_eq!(stored.rows_upserted, 990);
    }

    #[tokio::test]
    async fn test_single_row_per_source() {
        let store = Store::in_memory().await.unwrap();
        for _ in 0..5 {
            let mut patch = SourceStatePatch::new(7);
            patch.rows_fetched = Some(1);
            store.upsert_source_state(&patch).await.unwrap();
        }
        let all = store.get_all_source_states().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].source_id, 7);
    }

    #[tokio::test]
    async fn test_missing_state_is_none() {
        let store = Store::in_memory().await.unwrap();
        assert!(store.get_source_state(42).await.unwrap().is_none());
    }
}
