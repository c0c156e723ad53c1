//! Connector framework for permit data portals.
//!
//! A connector exposes a uniform streaming iterator over normalized permit
//! records regardless of the wire protocol behind it. Streams are fed by a
//! producer task through a bounded channel; they are not restartable — on
//! fault the caller discards the stream and re-enters from persisted cursors.

mod feature_service;
mod http;
mod json_dataset;
mod rate_limit;

pub use feature_service::FeatureServiceConnector;
pub use http::{HttpClient, HttpError, USER_AGENT};
pub use json_dataset::JsonDatasetConnector;
pub use rate_limit::RateLimiter;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::classify::RoofingRules;
use crate::models::{Permit, Platform, Source, SourceState};
use crate::normalize::Normalizer;

/// Rows requested per page. The outer pagination loop stops on a short page,
/// an empty page, or when the cumulative count reaches the run's row budget.
pub const PAGE_SIZE: u64 = 1000;

/// Channel capacity between a connector's producer task and its consumer.
const STREAM_BUFFER: usize = 64;

#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Required config keys absent or the endpoint failed a trivial probe.
    /// Fatal for the run.
    #[error("invalid source config: {0}")]
    Config(String),
    /// HTTP failure that survived retries, or a fatal status.
    #[error(transparent)]
    Http(#[from] HttpError),
    /// A response body that could not be interpreted.
    #[error("unexpected response: {0}")]
    Parse(String),
}

/// Connector view of the source's platform-specific configuration.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    pub endpoint_url: String,
    /// Platform-specific keys (dataset_id, layer_id, app_token, ...).
    pub params: serde_json::Value,
}

impl ConnectorConfig {
    pub fn from_source(source: &Source) -> Self {
        Self {
            endpoint_url: source.endpoint_url.trim_end_matches('/').to_string(),
            params: source.config.clone(),
        }
    }

    pub fn str_param(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_str())
    }

    /// Accepts both numeric and string-typed values for keys like `layer_id`.
    pub fn display_param(&self, key: &str) -> Option<String> {
        match self.params.get(key) {
            Some(serde_json::Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Read-only cursor snapshot a run starts from.
#[derive(Debug, Clone, Default)]
pub struct ConnectorState {
    pub last_max_timestamp: Option<String>,
    pub last_max_record_id: Option<i64>,
    pub last_issue_date: Option<String>,
    /// Max record id already persisted for this source, derived from the
    /// database. Compared against `last_max_record_id` to repair state-table
    /// drift (records ingested before the cursor column existed, or wiped
    /// state rows).
    pub db_max_record_id: Option<i64>,
}

impl ConnectorState {
    pub fn from_row(state: Option<&SourceState>, db_max_record_id: Option<i64>) -> Self {
        Self {
            last_max_timestamp: state.and_then(|s| s.last_max_timestamp.clone()),
            last_max_record_id: state.and_then(|s| s.last_max_record_id),
            last_issue_date: state.and_then(|s| s.last_issue_date.clone()),
            db_max_record_id,
        }
    }

    /// Starting OBJECTID cursor: the larger of the state-table cursor and
    /// the database-derived maximum.
    pub fn record_id_cursor(&self) -> Option<i64> {
        match (self.last_max_record_id, self.db_max_record_id) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }
}

/// Everything a streaming run needs.
#[derive(Clone)]
pub struct RunContext {
    pub source_id: i64,
    pub source_name: String,
    pub config: ConnectorConfig,
    pub state: ConnectorState,
    pub max_rows: u64,
}

/// A lazy, finite sequence of normalized permit records.
pub struct RecordStream {
    receiver: mpsc::Receiver<Result<Permit, ConnectorError>>,
}

impl RecordStream {
    pub fn new(receiver: mpsc::Receiver<Result<Permit, ConnectorError>>) -> Self {
        Self { receiver }
    }

    /// Next record, or `None` when the portal is exhausted or the row budget
    /// is spent.
    pub async fn next(&mut self) -> Option<Result<Permit, ConnectorError>> {
        self.receiver.recv().await
    }
}

/// Channel pair for a producer task feeding a [`RecordStream`].
pub fn record_channel() -> (mpsc::Sender<Result<Permit, ConnectorError>>, RecordStream) {
    let (tx, rx) = mpsc::channel(STREAM_BUFFER);
    (tx, RecordStream::new(rx))
}

/// A permit portal connector.
#[async_trait]
pub trait Connector: Send + Sync {
    fn platform(&self) -> Platform;

    /// Check required config keys and probe the endpoint.
    async fn validate(&self, config: &ConnectorConfig) -> Result<(), ConnectorError>;

    /// Stream all records from the persisted cursor forward.
    fn backfill(&self, ctx: RunContext) -> RecordStream;

    /// Stream records newer than the cursors in `ctx.state`.
    fn incremental(&self, ctx: RunContext) -> RecordStream;
}

/// Build the connector for a source's platform, carrying the per-source
/// request budget into a fresh rate limiter.
pub fn build_connector(
    source: &Source,
    rules: Arc<RoofingRules>,
) -> Result<Box<dyn Connector>, ConnectorError> {
    let limiter = Arc::new(RateLimiter::new(source.max_requests_per_minute.max(1) as usize));
    let http = Arc::new(HttpClient::new(limiter, Duration::from_secs(30)));
    let default_state = source.config_str("default_state").map(str::to_string);
    let normalizer = Arc::new(Normalizer::new(rules, default_state));

    match source.platform {
        Platform::JsonDataset => Ok(Box::new(JsonDatasetConnector::new(http, normalizer))),
        Platform::FeatureService => Ok(Box::new(FeatureServiceConnector::new(http, normalizer))),
        Platform::Other => Err(ConnectorError::Config(format!(
            "no connector for platform '{}'",
            source.platform.as_str()
        ))),
    }
}
