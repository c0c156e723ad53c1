//! Source table access.

use chrono::Utc;

use crate::models::{NewSource, Platform, Source, SourcePatch};

use super::{parse_datetime, Store, StoreError, StoreResult};

#[derive(sqlx::FromRow)]
struct SourceRow {
    id: i64,
    name: String,
    platform: String,
    endpoint_url: String,
    config: String,
    enabled: i64,
    max_rows_per_run: i64,
    max_runtime_minutes: i64,
    max_requests_per_minute: i64,
    created_at: String,
    updated_at: String,
}

impl From<SourceRow> for Source {
    fn from(row: SourceRow) -> Self {
        Source {
            id: row.id,
            name: row.name,
            platform: Platform::from_str(&row.platform).unwrap_or(Platform::Other),
            endpoint_url: row.endpoint_url,
            config: serde_json::from_str(&row.config).unwrap_or_default(),
            enabled: row.enabled != 0,
            max_rows_per_run: row.max_rows_per_run,
            max_runtime_minutes: row.max_runtime_minutes,
            max_requests_per_minute: row.max_requests_per_minute,
            created_at: parse_datetime(&row.created_at),
            updated_at: parse_datetime(&row.updated_at),
        }
    }
}

const SELECT_COLUMNS: &str = "id, name, platform, endpoint_url, config, enabled, \
     max_rows_per_run, max_runtime_minutes, max_requests_per_minute, created_at, updated_at";

impl Store {
    /// All registered sources, in registration order.
    pub async fn get_sources(&self) -> StoreResult<Vec<Source>> {
        let rows = sqlx::query_as::<_, SourceRow>(&format!(
            "SELECT {} FROM sources ORDER BY id",
            SELECT_COLUMNS
        ))
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(Source::from).collect())
    }

    pub async fn get_source(&self, id: i64) -> StoreResult<Option<Source>> {
        let row = sqlx::query_as::<_, SourceRow>(&format!(
            "SELECT {} FROM sources WHERE id = ?1",
            SELECT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(Source::from))
    }

    /// Register a source; returns it with its assigned id.
    pub async fn create_source(&self, new: &NewSource) -> StoreResult<Source> {
        let now = Utc::now().to_rfc3339();
        let config = serde_json::to_string(&new.config).unwrap_or_else(|_| "{}".to_string());

        let result = sqlx::query(
            r#"INSERT INTO sources
               (name, platform, endpoint_url, config, enabled,
                max_rows_per_run, max_runtime_minutes, max_requests_per_minute,
                created_at, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)"#,
        )
        .bind(&new.name)
        .bind(new.platform.as_str())
        .bind(&new.endpoint_url)
        .bind(&config)
        .bind(new.enabled as i64)
        .bind(new.max_rows_per_run)
        .bind(new.max_runtime_minutes)
        .bind(new.max_requests_per_minute)
        .bind(&now)
        .execute(self.pool())
        .await?;

        let id = result.last_insert_rowid();
        self.get_source(id)
            .await?
            .ok_or_else(|| StoreError::Other("source vanished after insert".to_string()))
    }

    /// Partial update. Fields absent from the patch keep their values; the
    /// id is immutable.
    pub async fn update_source(&self, id: i64, patch: &SourcePatch) -> StoreResult<Source> {
        let Some(mut source) = self.get_source(id).await? else {
            return Err(StoreError::NotFound(format!("source {}", id)));
        };

        if let Some(v) = &patch.name {
            source.name = v.clone();
        }
        if let Some(v) = patch.platform {
            source.platform = v;
        }
        if let Some(v) = &patch.endpoint_url {
            source.endpoint_url = v.clone();
        }
        if let Some(v) = &patch.config {
            source.config = v.clone();
        }
        if let Some(v) = patch.enabled {
            source.enabled = v;
        }
        if let Some(v) = patch.max_rows_per_run {
            source.max_rows_per_run = v;
        }
        if let Some(v) = patch.max_runtime_minutes {
            source.max_runtime_minutes = v;
        }
        if let Some(v) = patch.max_requests_per_minute {
            source.max_requests_per_minute = v;
        }

        let config = serde_json::to_string(&source.config).unwrap_or_else(|_| "{}".to_string());
        sqlx::query(
            r#"UPDATE sources SET
               name = ?1, platform = ?2, endpoint_url = ?3, config = ?4, enabled = ?5,
               max_rows_per_run = ?6, max_runtime_minutes = ?7, max_requests_per_minute = ?8,
               updated_at = ?9
               WHERE id = ?10"#,
        )
        .bind(&source.name)
        .bind(source.platform.as_str())
        .bind(&source.endpoint_url)
        .bind(&config)
        .bind(source.enabled as i64)
        .bind(source.max_rows_per_run)
        .bind(source.max_runtime_minutes)
        .bind(source.max_requests_per_minute)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(self.pool())
        .await?;

        self.get_source(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("source {}", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_source(name: &str) -> NewSource {
        NewSource {
            name: name.to_string(),
            platform: Platform::JsonDataset,
            endpoint_url: "https://data.example.gov".to_string(),
            config: serde_json::json!({"dataset_id": "abcd-1234"}),
            enabled: true,
            max_rows_per_run: 1000,
            max_runtime_minutes: 30,
            max_requests_per_minute: 60,
        }
    }

    #[tokio::test]
    async fn test_source_crud() {
        let store = Store::in_memory().await.unwrap();

        let source = store.create_source(&new_source("Sacramento")).await.unwrap();
        assert!(source.id > 0);
        assert_eq!(source.name, "Sacramento");
        assert_eq!(source.config_str("dataset_id"), Some("abcd-1234"));

        let fetched = store.get_source(source.id).await.unwrap().unwrap();
        assert_eq!(fetched.platform, Platform::JsonDataset);
        assert!(fetched.enabled);

        let all = store.get_sources().await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_update_source_patches_only_present_fields() {
        let store = Store::in_memory().await.unwrap();
        let source = store.create_source(&new_source("Davis")).await.unwrap();

        let patch = SourcePatch {
            enabled: Some(false),
            max_rows_per_run: Some(500),
            ..Default::default()
        };
        let updated = store.update_source(source.id, &patch).await.unwrap();

        assert!(!updated.enabled);
        assert_eq!(updated.max_rows_per_run, 500);
        // Untouched fields survive.
        assert_eq!(updated.name, "Davis");
        assert_eq!(updated.endpoint_url, "https://data.example.gov");
    }

    #[tokio::test]
    async fn test_update_missing_source_is_not_found() {
        let store = Store::in_memory().await.unwrap();
        let err = store
            .update_source(99, &SourcePatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_sources_listed_in_registration_order() {
        let store = Store::in_memory().await.unwrap();
        store.create_source(&new_source("first")).await.unwrap();
        store.create_source(&new_source("second")).await.unwrap();
        store.create_source(&new_source("third")).await.unwrap();

        let names: Vec<String> = store
            .get_sources()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["first", "second", "third"]);
    }
}
