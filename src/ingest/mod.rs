//! Ingestion orchestrator.
//!
//! Resolves per-source cursor state, runs the platform connector, persists
//! records as they stream, keeps per-source progress current, and drives the
//! continuous sweep over all enabled sources.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::classify::RoofingRules;
use crate::connectors::{
    build_connector, Connector, ConnectorConfig, ConnectorError, ConnectorState, RunContext,
    PAGE_SIZE,
};
use crate::geocode::GeocodeClient;
use crate::models::{Platform, Source, SourceStatePatch};
use crate::repository::{Store, StoreError};

/// Status refresh cadence, in records.
const PROGRESS_EVERY: i64 = 10;
/// Pause between deep-ingestion rounds and successful sweep batches.
const BATCH_DELAY: Duration = Duration::from_secs(1);
/// Pause before retrying a failed sweep batch.
const BATCH_RETRY_DELAY: Duration = Duration::from_secs(30);
/// Pause between full sweeps.
const SWEEP_INTERVAL: Duration = Duration::from_secs(300);
/// Pause after a top-level sweep failure.
const SWEEP_RETRY_DELAY: Duration = Duration::from_secs(60);
/// Full-page batches that saved nothing before a source counts as exhausted.
const MAX_ZERO_SAVE_BATCHES: u32 = 3;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("source {0} not found")]
    SourceNotFound(i64),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Connector(#[from] ConnectorError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestMode {
    Backfill,
    Incremental,
}

impl IngestMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Backfill => "backfill",
            Self::Incremental => "incremental",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "backfill" => Some(Self::Backfill),
            "incremental" => Some(Self::Incremental),
            _ => None,
        }
    }
}

/// Counters from one ingestion run.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunReport {
    pub rows_fetched: i64,
    pub rows_upserted: i64,
    pub errors: i64,
}

/// Counters from a deep-ingestion drain.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeepReport {
    pub runs: u32,
    pub rows_fetched: i64,
    pub rows_upserted: i64,
    pub permits_added: i64,
}

pub struct Orchestrator {
    store: Store,
    rules: Arc<RoofingRules>,
    geocoder: Option<Arc<GeocodeClient>>,
}

impl Orchestrator {
    pub fn new(store: Store, rules: Arc<RoofingRules>, geocoder: Option<Arc<GeocodeClient>>) -> Self {
        Self {
            store,
            rules,
            geocoder,
        }
    }

    /// Run one ingestion for a source.
    pub async fn run_ingestion(&self, source_id: i64, mode: IngestMode) -> Result<RunReport, IngestError> {
        let source = self
            .store
            .get_source(source_id)
            .await?
            .ok_or(IngestError::SourceNotFound(source_id))?;
        let connector = build_connector(&source, self.rules.clone())?;
        self.run_with_connector(&source, connector.as_ref(), mode)
            .await
    }

    /// Check a source's required config keys and probe its endpoint.
    pub async fn validate_source(&self, source_id: i64) -> Result<(), IngestError> {
        let source = self
            .store
            .get_source(source_id)
            .await?
            .ok_or(IngestError::SourceNotFound(source_id))?;
        let connector = build_connector(&source, self.rules.clone())?;
        connector
            .validate(&ConnectorConfig::from_source(&source))
            .await?;
        Ok(())
    }

    /// The per-run sequence, with the connector supplied by the caller.
    pub(crate) async fn run_with_connector(
        &self,
        source: &Source,
        connector: &dyn Connector,
        mode: IngestMode,
    ) -> Result<RunReport, IngestError> {
        debug!(
            "running {} connector for source {}",
            connector.platform().as_str(),
            source.id
        );

        let prev_state = self.store.get_source_state(source.id).await?;
        if prev_state.as_ref().is_some_and(|s| s.is_running) {
            // Advisory only: overlapping runs stay consistent through the
            // fingerprint-unique upsert and patch-merge state writes.
            warn!(
                "source {} already has a run in flight; proceeding anyway",
                source.id
            );
        }

        // The DB-derived maximum repairs state-table drift for OBJECTID
        // cursors; only feature services key on record ids.
        let db_max_record_id = if source.platform == Platform::FeatureService {
            self.store.get_max_source_record_id(source.id).await?
        } else {
            None
        };

        let mut start_patch = SourceStatePatch::new(source.id);
        start_patch.is_running = Some(true);
        start_patch.status_message = Some(format!("→ Starting {} run", mode.as_str()));
        start_patch.current_page = Some(0);
        self.store.upsert_source_state(&start_patch).await?;

        let max_rows = if source.max_rows_per_run > 0 {
            source.max_rows_per_run as u64
        } else {
            1000
        };

        let ctx = RunContext {
            source_id: source.id,
            source_name: source.name.clone(),
            config: ConnectorConfig::from_source(source),
            state: ConnectorState::from_row(prev_state.as_ref(), db_max_record_id),
            max_rows,
        };

        let mut stream = match mode {
            IngestMode::Backfill => connector.backfill(ctx),
            IngestMode::Incremental => connector.incremental(ctx),
        };

        let started = Instant::now();
        let deadline = (source.max_runtime_minutes > 0)
            .then(|| Duration::from_secs(source.max_runtime_minutes as u64 * 60));

        let mut report = RunReport::default();
        let mut max_issue_date: Option<String> = None;
        let mut max_record_id: Option<i64> = None;

        while let Some(item) = stream.next().await {
            if deadline.is_some_and(|d| started.elapsed() >= d) {
                info!(
                    "source {} hit its {}-minute runtime budget",
                    source.id, source.max_runtime_minutes
                );
                break;
            }

            let mut permit = match item {
                Ok(permit) => permit,
                Err(e) => {
                    let mut fail_patch = SourceStatePatch::new(source.id);
                    fail_patch.is_running = Some(false);
                    fail_patch.status_message = Some(format!("✗ Failed: {}", e));
                    fail_patch.rows_fetched = Some(report.rows_fetched);
                    fail_patch.rows_upserted = Some(report.rows_upserted);
                    fail_patch.errors = Some(report.errors);
                    self.store.upsert_source_state(&fail_patch).await?;
                    return Err(e.into());
                }
            };
            report.rows_fetched += 1;

            if permit.lat.is_none() {
                if let (Some(geocoder), Some(raw)) = (&self.geocoder, permit.raw_address.clone()) {
                    if let Some((lat, lon)) = geocoder.geocode(&raw).await {
                        permit.lat = Some(lat);
                        permit.lon = Some(lon);
                    }
                }
            }

            match self.store.upsert_permit(&permit).await {
                Ok(_) => {
                    report.rows_upserted += 1;
                    if let Some(date) = &permit.issue_date {
                        if max_issue_date.as_deref() < Some(date.as_str()) {
                            max_issue_date = Some(date.clone());
                        }
                    }
                    if let Some(id) = permit.provenance.max_record_id {
                        max_record_id = Some(max_record_id.map_or(id, |m: i64| m.max(id)));
                    }
                }
                Err(e) => {
                    report.errors += 1;
                    warn!(
                        "failed to persist record {} for source {}: {}",
                        permit.source_record_id, source.id, e
                    );
                    continue;
                }
            }

            if report.rows_fetched % PROGRESS_EVERY == 0 {
                let mut progress = SourceStatePatch::new(source.id);
                progress.is_running = Some(true);
                progress.status_message = Some(format!(
                    "→ {}: {} fetched, {} saved, {} errors",
                    mode.as_str(),
                    report.rows_fetched,
                    report.rows_upserted,
                    report.errors
                ));
                progress.current_page = Some(report.rows_fetched / PAGE_SIZE as i64);
                self.store.upsert_source_state(&progress).await?;
            }
        }

        let prev = prev_state.as_ref();
        let mut done = SourceStatePatch::new(source.id);
        done.is_running = Some(false);
        done.rows_fetched = Some(report.rows_fetched);
        done.rows_upserted = Some(report.rows_upserted);
        done.errors = Some(report.errors);
        done.freshness_seconds = Some(started.elapsed().as_secs() as i64);
        done.last_sync_at = Some(chrono::Utc::now());
        done.status_message = Some(format!(
            "✓ Completed: {} fetched, {} saved, {} errors",
            report.rows_fetched, report.rows_upserted, report.errors
        ));
        // Cursors only ever move forward; untouched ones carry over from the
        // previous state through the patch-merge.
        done.last_max_record_id =
            merge_cursor(prev.and_then(|s| s.last_max_record_id), max_record_id);
        done.last_issue_date = merge_date(
            prev.and_then(|s| s.last_issue_date.clone()),
            max_issue_date,
        );
        self.store.upsert_source_state(&done).await?;

        info!(
            "source {} {} run done: {} fetched, {} saved, {} errors",
            source.id,
            mode.as_str(),
            report.rows_fetched,
            report.rows_upserted,
            report.errors
        );
        Ok(report)
    }

    /// Repeat backfills until one adds strictly fewer new permits than the
    /// row budget, sleeping briefly between rounds to stay polite upstream.
    pub async fn run_deep_ingestion(&self, source_id: i64) -> Result<DeepReport, IngestError> {
        let source = self
            .store
            .get_source(source_id)
            .await?
            .ok_or(IngestError::SourceNotFound(source_id))?;
        let max_rows = if source.max_rows_per_run > 0 {
            source.max_rows_per_run
        } else {
            1000
        };

        let mut deep = DeepReport::default();
        loop {
            let before = self.store.get_source_permit_count(source_id).await?;
            let report = self.run_ingestion(source_id, IngestMode::Backfill).await?;
            let after = self.store.get_source_permit_count(source_id).await?;
            let added = after - before;

            deep.runs += 1;
            deep.rows_fetched += report.rows_fetched;
            deep.rows_upserted += report.rows_upserted;
            deep.permits_added += added;

            if added < max_rows {
                break;
            }
            tokio::time::sleep(BATCH_DELAY).await;
        }
        Ok(deep)
    }

    /// Continuous sweep over all enabled sources. Runs until the shutdown
    /// signal flips; every sleep is interruptible.
    pub async fn run_sweep(&self, mut shutdown: watch::Receiver<bool>) {
        info!("continuous ingestion sweep started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.sweep_once(&mut shutdown).await {
                Ok(()) => {
                    if !pause(&mut shutdown, SWEEP_INTERVAL).await {
                        break;
                    }
                }
                Err(e) => {
                    error!("sweep pass failed: {}; retrying shortly", e);
                    if !pause(&mut shutdown, SWEEP_RETRY_DELAY).await {
                        break;
                    }
                }
            }
        }
        info!("continuous ingestion sweep stopped");
    }

    /// One pass: visit every enabled source in registration order and drain
    /// it to exhaustion.
    async fn sweep_once(&self, shutdown: &mut watch::Receiver<bool>) -> Result<(), IngestError> {
        let sources = self.store.get_sources().await?;
        for source in sources.into_iter().filter(|s| s.enabled) {
            if *shutdown.borrow() {
                return Ok(());
            }
            self.drain_source(&source, shutdown).await;
        }
        Ok(())
    }

    /// Backfill one source batch-by-batch until the exhaustion rule fires.
    /// Batch failures retry the same source after a pause.
    async fn drain_source(&self, source: &Source, shutdown: &mut watch::Receiver<bool>) {
        let max_rows = if source.max_rows_per_run > 0 {
            source.max_rows_per_run
        } else {
            1000
        };
        let mut consecutive_zero_save = 0u32;

        loop {
            if *shutdown.borrow() {
                return;
            }

            let before = match self.store.get_source_permit_count(source.id).await {
                Ok(n) => n,
                Err(e) => {
                    warn!("sweep: count failed for source {}: {}", source.id, e);
                    if !pause(shutdown, BATCH_RETRY_DELAY).await {
                        return;
                    }
                    continue;
                }
            };

            match self.run_ingestion(source.id, IngestMode::Backfill).await {
                Ok(_) => {
                    let after = self
                        .store
                        .get_source_permit_count(source.id)
                        .await
                        .unwrap_or(before);
                    let permits_added = after - before;
                    // The state row holds what the portal actually returned.
                    let rows_fetched = self
                        .store
                        .get_source_state(source.id)
                        .await
                        .ok()
                        .flatten()
                        .map(|s| s.rows_fetched)
                        .unwrap_or(0);

                    match sweep_decision(
                        rows_fetched,
                        permits_added,
                        max_rows,
                        &mut consecutive_zero_save,
                    ) {
                        SweepDecision::Exhausted => {
                            info!(
                                "sweep: source {} exhausted ({} fetched, {} added)",
                                source.id, rows_fetched, permits_added
                            );
                            return;
                        }
                        SweepDecision::Continue => {
                            if !pause(shutdown, BATCH_DELAY).await {
                                return;
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        "sweep: batch failed for source {}: {}; retrying in {:?}",
                        source.id, e, BATCH_RETRY_DELAY
                    );
                    if !pause(shutdown, BATCH_RETRY_DELAY).await {
                        return;
                    }
                }
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum SweepDecision {
    Exhausted,
    Continue,
}

/// Exhaustion rule for the sweep's inner loop.
///
/// A source is exhausted when the portal returned a short page, or when
/// enough consecutive full pages saved nothing new — the portal has looped
/// back to records that are all duplicates.
fn sweep_decision(
    rows_fetched: i64,
    permits_added: i64,
    max_rows: i64,
    consecutive_zero_save: &mut u32,
) -> SweepDecision {
    if rows_fetched < max_rows {
        return SweepDecision::Exhausted;
    }
    if permits_added == 0 {
        *consecutive_zero_save += 1;
        if *consecutive_zero_save >= MAX_ZERO_SAVE_BATCHES {
            return SweepDecision::Exhausted;
        }
    } else {
        *consecutive_zero_save = 0;
    }
    SweepDecision::Continue
}

/// Cursors never regress.
fn merge_cursor(previous: Option<i64>, seen: Option<i64>) -> Option<i64> {
    match (previous, seen) {
        (Some(p), Some(s)) => Some(p.max(s)),
        (p, s) => p.or(s),
    }
}

/// `YYYY-MM-DD` strings order lexicographically, so string max is date max.
fn merge_date(previous: Option<String>, seen: Option<String>) -> Option<String> {
    match (previous, seen) {
        (Some(p), Some(s)) => Some(if s > p { s } else { p }),
        (p, s) => p.or(s),
    }
}

/// Interruptible sleep. Returns false when shutdown was signalled.
async fn pause(shutdown: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = shutdown.changed() => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::{record_channel, RecordStream};
    use crate::models::{
        compute_fingerprint, generate_permit_id, NewSource, ParsedAddress, Permit, Provenance,
    };
    use async_trait::async_trait;
    use std::collections::BTreeMap;

    #[test]
    fn test_sweep_decision_short_page_is_exhausted() {
        let mut zero = 0;
        assert_eq!(
            sweep_decision(500, 500, 1000, &mut zero),
            SweepDecision::Exhausted
        );
        assert_eq!(sweep_decision(0, 0, 1000, &mut zero), SweepDecision::Exhausted);
    }

    #[test]
    fn test_sweep_decision_three_zero_save_full_pages() {
        let mut zero = 0;
        assert_eq!(
            sweep_decision(1000, 0, 1000, &mut zero),
            SweepDecision::Continue
        );
        assert_eq!(
            sweep_decision(1000, 0, 1000, &mut zero),
            SweepDecision::Continue
        );
        assert_eq!(
            sweep_decision(1000, 0, 1000, &mut zero),
            SweepDecision::Exhausted
        );
    }

    #[test]
    fn test_sweep_decision_progress_resets_the_streak() {
        let mut zero = 0;
        sweep_decision(1000, 0, 1000, &mut zero);
        sweep_decision(1000, 0, 1000, &mut zero);
        assert_eq!(
            sweep_decision(1000, 5, 1000, &mut zero),
            SweepDecision::Continue
        );
        assert_eq!(zero, 0);
    }

    #[test]
    fn test_merge_cursor_and_date_are_monotonic() {
        assert_eq!(merge_cursor(Some(1000), Some(400)), Some(1000));
        assert_eq!(merge_cursor(Some(400), Some(1000)), Some(1000));
        assert_eq!(merge_cursor(None, Some(7)), Some(7));
        assert_eq!(merge_cursor(Some(7), None), Some(7));
        assert_eq!(merge_cursor(None, None), None);

        assert_eq!(
            merge_date(Some("2024-10-01".into()), Some("2024-09-01".into())),
            Some("2024-10-01".to_string())
        );
        assert_eq!(
            merge_date(Some("2024-09-01".into()), Some("2024-10-01".into())),
            Some("2024-10-01".to_string())
        );
    }

    /// Connector that replays a fixed record list.
    struct StubConnector {
        records: Vec<Permit>,
    }

    #[async_trait]
    impl Connector for StubConnector {
        fn platform(&self) -> Platform {
            Platform::JsonDataset
        }

        async fn validate(&self, _config: &ConnectorConfig) -> Result<(), ConnectorError> {
            Ok(())
        }

        fn backfill(&self, ctx: RunContext) -> RecordStream {
            let (tx, stream) = record_channel();
            let records: Vec<Permit> = self
                .records
                .iter()
                .take(ctx.max_rows as usize)
                .cloned()
                .collect();
            tokio::spawn(async move {
                for record in records {
                    if tx.send(Ok(record)).await.is_err() {
                        return;
                    }
                }
            });
            stream
        }

        fn incremental(&self, ctx: RunContext) -> RecordStream {
            self.backfill(ctx)
        }
    }

    /// Connector whose stream fails immediately.
    struct FailingConnector;

    #[async_trait]
    impl Connector for FailingConnector {
        fn platform(&self) -> Platform {
            Platform::JsonDataset
        }

        async fn validate(&self, _config: &ConnectorConfig) -> Result<(), ConnectorError> {
            Ok(())
        }

        fn backfill(&self, _ctx: RunContext) -> RecordStream {
            let (tx, stream) = record_channel();
            tokio::spawn(async move {
                let _ = tx
                    .send(Err(ConnectorError::Config("boom".to_string())))
                    .await;
            });
            stream
        }

        fn incremental(&self, ctx: RunContext) -> RecordStream {
            self.backfill(ctx)
        }
    }

    fn test_permit(source_id: i64, record_id: &str, max_record_id: Option<i64>) -> Permit {
        Permit {
            id: generate_permit_id(),
            source_id,
            source_name: "Test".to_string(),
            platform: Platform::JsonDataset,
            source_record_id: record_id.to_string(),
            permit_type: Some("Re-Roof".to_string()),
            work_description: None,
            permit_status: None,
            issue_date: Some("2024-10-15".to_string()),
            raw_address: None,
            address: ParsedAddress {
                street: Some(format!("{} H Street", record_id)),
                ..Default::default()
            },
            parcel_id: None,
            owner_name: None,
            contractor_name: None,
            permit_value: None,
            lat: Some(38.58),
            lon: Some(-121.49),
            geom_json: None,
            fingerprint: compute_fingerprint(
                Some(&format!("{} H Street", record_id)),
                None,
                None,
                None,
                Some("2024-10-15"),
                Some("Re-Roof"),
            ),
            is_roofing: true,
            created_at: chrono::Utc::now(),
            provenance: Provenance {
                platform: "json-dataset".to_string(),
                url: "https://data.example.gov/resource/x.json".to_string(),
                fetched_at: chrono::Utc::now(),
                fields_map: BTreeMap::new(),
                checksum: None,
                max_record_id,
            },
            raw_blob_ref: None,
        }
    }

    async fn setup() -> (Orchestrator, Source) {
        let store = Store::in_memory().await.unwrap();
        let source = store
            .create_source(&NewSource {
                name: "Test".to_string(),
                platform: Platform::JsonDataset,
                endpoint_url: "https://data.example.gov".to_string(),
                config: serde_json::json!({"dataset_id": "x"}),
                enabled: true,
                max_rows_per_run: 1000,
                max_runtime_minutes: 30,
                max_requests_per_minute: 60,
            })
            .await
            .unwrap();
        let orchestrator = Orchestrator::new(store, Arc::new(RoofingRules::default()), None);
        (orchestrator, source)
    }

    #[tokio::test]
    async fn test_run_persists_records_and_finishes_clean() {
        let (orchestrator, source) = setup().await;
        let connector = StubConnector {
            records: (1..=25).map(|i| test_permit(source.id, &i.to_string(), None)).collect(),
        };

        let report = orchestrator
            .run_with_connector(&source, &connector, IngestMode::Backfill)
            .await
            .unwrap();

        assert_eq!(report.rows_fetched, 25);
        assert_eq!(report.rows_upserted, 25);
        assert_eq!(report.errors, 0);

        let state = orchestrator
            .store
            .get_source_state(source.id)
            .await
            .unwrap()
            .unwrap();
        assert!(!state.is_running);
        assert!(state.status_message.unwrap().starts_with('✓'));
        assert_eq!(state.rows_fetched, 25);
        assert_eq!(state.last_issue_date.as_deref(), Some("2024-10-15"));
        assert!(state.last_sync_at.is_some());
    }

    #[tokio::test]
    async fn test_rerun_of_same_records_does_not_grow_the_table() {
        let (orchestrator, source) = setup().await;
        let connector = StubConnector {
            records: (1..=10).map(|i| test_permit(source.id, &i.to_string(), None)).collect(),
        };

        orchestrator
            .run_with_connector(&source, &connector, IngestMode::Backfill)
            .await
            .unwrap();
        let count_after_first = orchestrator
            .store
            .get_source_permit_count(source.id)
            .await
            .unwrap();

        let report = orchestrator
            .run_with_connector(&source, &connector, IngestMode::Backfill)
            .await
            .unwrap();

        // The portal returned rows and they were all upserted, but every one
        // merged into an existing permit.
        assert_eq!(report.rows_fetched, 10);
        assert_eq!(report.rows_upserted, 10);
        assert_eq!(
            orchestrator
                .store
                .get_source_permit_count(source.id)
                .await
                .unwrap(),
            count_after_first
        );
        assert_eq!(
            orchestrator.store.get_permit_stats().await.unwrap().total,
            10
        );
    }

    #[tokio::test]
    async fn test_record_id_cursor_advances_and_never_regresses() {
        let (orchestrator, source) = setup().await;

        let connector = StubConnector {
            records: vec![test_permit(source.id, "1", Some(1000))],
        };
        orchestrator
            .run_with_connector(&source, &connector, IngestMode::Backfill)
            .await
            .unwrap();
        let state = orchestrator
            .store
            .get_source_state(source.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.last_max_record_id, Some(1000));

        // A later batch carrying a smaller hint must not move the cursor back.
        let connector = StubConnector {
            records: vec![test_permit(source.id, "2", Some(400))],
        };
        orchestrator
            .run_with_connector(&source, &connector, IngestMode::Backfill)
            .await
            .unwrap();
        let state = orchestrator
            .store
            .get_source_state(source.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.last_max_record_id, Some(1000));
    }

    #[tokio::test]
    async fn test_failed_stream_marks_state_and_rethrows() {
        let (orchestrator, source) = setup().await;

        let result = orchestrator
            .run_with_connector(&source, &FailingConnector, IngestMode::Backfill)
            .await;
        assert!(result.is_err());

        let state = orchestrator
            .store
            .get_source_state(source.id)
            .await
            .unwrap()
            .unwrap();
        assert!(!state.is_running);
        assert!(state
            .status_message
            .unwrap()
            .starts_with("✗ Failed:"));
    }

    #[tokio::test]
    async fn test_max_rows_budget_caps_the_stream() {
        let (orchestrator, mut source) = setup().await;
        source.max_rows_per_run = 5;

        let connector = StubConnector {
            records: (1..=50).map(|i| test_permit(source.id, &i.to_string(), None)).collect(),
        };
        let report = orchestrator
            .run_with_connector(&source, &connector, IngestMode::Backfill)
            .await
            .unwrap();
        assert_eq!(report.rows_fetched, 5);
    }

    #[tokio::test]
    async fn test_missing_source_is_an_error() {
        let store = Store::in_memory().await.unwrap();
        let orchestrator = Orchestrator::new(store, Arc::new(RoofingRules::default()), None);
        let err = orchestrator
            .run_ingestion(404, IngestMode::Backfill)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::SourceNotFound(404)));
    }
}
