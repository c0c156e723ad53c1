//! Storage adapter over SQLite.
//!
//! All access goes through [`Store`], a thin wrapper around an async
//! connection pool. The schema is created at startup with idempotent
//! `CREATE TABLE IF NOT EXISTS` batches; there is no migration machinery.

mod geocode_cache;
mod permits;
mod sources;
mod state;

pub use permits::{PermitFilters, PermitStats};

use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("{0}")]
    Other(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS sources (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        platform TEXT NOT NULL,
        endpoint_url TEXT NOT NULL,
        config TEXT NOT NULL DEFAULT '{}',
        enabled INTEGER NOT NULL DEFAULT 1,
        max_rows_per_run INTEGER NOT NULL DEFAULT 1000,
        max_runtime_minutes INTEGER NOT NULL DEFAULT 30,
        max_requests_per_minute INTEGER NOT NULL DEFAULT 60,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS source_state (
        source_id INTEGER PRIMARY KEY,
        last_max_timestamp TEXT,
        last_max_record_id INTEGER,
        last_issue_date TEXT,
        etag TEXT,
        checksum TEXT,
        rows_fetched INTEGER NOT NULL DEFAULT 0,
        rows_upserted INTEGER NOT NULL DEFAULT 0,
        errors INTEGER NOT NULL DEFAULT 0,
        freshness_seconds INTEGER,
        is_running INTEGER NOT NULL DEFAULT 0,
        status_message TEXT,
        current_page INTEGER NOT NULL DEFAULT 0,
        last_sync_at TEXT,
        updated_at TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS permits (
        id TEXT PRIMARY KEY,
        source_id INTEGER NOT NULL,
        source_name TEXT NOT NULL,
        platform TEXT NOT NULL,
        source_record_id TEXT NOT NULL,
        permit_type TEXT,
        work_description TEXT,
        permit_status TEXT,
        issue_date TEXT,
        raw_address TEXT,
        address_parsed TEXT NOT NULL DEFAULT '{}',
        parcel_id TEXT,
        owner_name TEXT,
        contractor_name TEXT,
        permit_value REAL,
        lat REAL,
        lon REAL,
        geom_json TEXT,
        fingerprint TEXT NOT NULL UNIQUE,
        is_roofing INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        provenance TEXT NOT NULL DEFAULT '{}',
        raw_blob_ref TEXT
    )"#,
    r#"CREATE INDEX IF NOT EXISTS idx_permits_coords ON permits(lat, lon)
        WHERE lat IS NOT NULL AND lon IS NOT NULL"#,
    r#"CREATE INDEX IF NOT EXISTS idx_permits_issue_date ON permits(issue_date)"#,
    r#"CREATE INDEX IF NOT EXISTS idx_permits_roofing ON permits(is_roofing)
        WHERE is_roofing = 1"#,
    r#"CREATE INDEX IF NOT EXISTS idx_permits_source ON permits(source_id)"#,
    r#"CREATE TABLE IF NOT EXISTS geocode_cache (
        address TEXT PRIMARY KEY,
        lat REAL,
        lon REAL,
        display_name TEXT,
        fetched_at TEXT NOT NULL
    )"#,
];

/// Shared database handle. Cloning shares the pool.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if missing) the database at `database_url` and ensure
    /// the schema exists.
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(sqlx::Error::from)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// In-memory database for tests.
    #[cfg(test)]
    pub async fn in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(sqlx::Error::from)?;
        // One connection so every query sees the same memory database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> StoreResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Liveness check for the health endpoint.
    pub async fn ping(&self) -> StoreResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }

    /// Graceful shutdown: let in-flight statements finish, close the pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Parse a datetime string from the database, defaulting to Unix epoch on error.
pub fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Parse an optional datetime string from the database.
pub fn parse_datetime_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}
