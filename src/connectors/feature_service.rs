//! Connector for ArcGIS-style Feature Service layers.
//!
//! Queries `{endpoint}/FeatureServer/{layer_id}/query` ordered by OBJECTID so
//! pagination is deterministic, requests `outSR=4326` to force WGS84, and
//! carries the per-batch maximum OBJECTID in each record's provenance so the
//! orchestrator can advance the cursor. No server-side roofing filter is
//! applied — portal schemas vary too much for source-side filters to be
//! trusted, so every row is fetched and classified downstream.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::models::Platform;
use crate::normalize::{
    coerce_f64, coerce_i64, date_part, probe_number, probe_string, ExtractedRecord, Normalizer,
    SourceRef,
};

use super::{
    record_channel, Connector, ConnectorConfig, ConnectorError, HttpClient, RecordStream,
    RunContext, PAGE_SIZE,
};

const ID_FIELDS: &[&str] = &["OBJECTID", "ObjectId", "objectid", "ESRI_OID"];
const PERMIT_TYPE_FIELDS: &[&str] = &[
    "PermitType",
    "PERMIT_TYPE",
    "permit_type",
    "PermitTypeDesc",
    "ActiveBuilding_ExcelToTable_PermitType",
    "Type",
];
const DESCRIPTION_FIELDS: &[&str] = &[
    "Description",
    "WorkDescription",
    "PermitDescription",
    "ProjectDescription",
    "ActiveBuilding_ExcelToTable_Description",
    "WORK_DESC",
];
const STATUS_FIELDS: &[&str] = &[
    "Status",
    "PermitStatus",
    "STATUS",
    "ActiveBuilding_ExcelToTable_Status",
];
const ISSUE_DATE_FIELDS: &[&str] = &[
    "IssueDate",
    "ISSUE_DATE",
    "IssuedDate",
    "DateIssued",
    "ActiveBuilding_ExcelToTable_IssueDate",
];
const ADDRESS_FIELDS: &[&str] = &[
    "Address",
    "SiteAddress",
    "FullAddress",
    "ADDRESS",
    "OriginalAddress1",
    "ActiveBuilding_ExcelToTable_Address",
];
const PARCEL_FIELDS: &[&str] = &["ParcelNumber", "APN", "PARCEL_ID", "Parcel"];
const OWNER_FIELDS: &[&str] = &["OwnerName", "Owner"];
const CONTRACTOR_FIELDS: &[&str] = &["ContractorName", "Contractor"];
const VALUE_FIELDS: &[&str] = &["Valuation", "PermitValue", "JobValue", "EstProjectCost"];

pub struct FeatureServiceConnector {
    http: Arc<HttpClient>,
    normalizer: Arc<Normalizer>,
}

impl FeatureServiceConnector {
    pub fn new(http: Arc<HttpClient>, normalizer: Arc<Normalizer>) -> Self {
        Self { http, normalizer }
    }

    fn stream(&self, ctx: RunContext, where_clause: String) -> RecordStream {
        let (tx, stream) = record_channel();
        let http = self.http.clone();
        let normalizer = self.normalizer.clone();

        tokio::spawn(async move {
            let source = SourceRef {
                id: ctx.source_id,
                name: ctx.source_name.clone(),
                platform: Platform::FeatureService,
            };

            let Some(layer_id) = ctx.config.display_param("layer_id") else {
                let _ = tx
                    .send(Err(ConnectorError::Config(
                        "layer_id is required".to_string(),
                    )))
                    .await;
                return;
            };

            let base = format!(
                "{}/FeatureServer/{}/query",
                ctx.config.endpoint_url, layer_id
            );

            let mut offset: u64 = 0;
            let mut produced: u64 = 0;

            loop {
                let page_size = PAGE_SIZE.min(ctx.max_rows - produced);
                if page_size == 0 {
                    break;
                }

                let url = format!(
                    "{}?outFields=*&f=json&outSR=4326&orderByFields=OBJECTID&resultOffset={}&resultRecordCount={}&where={}",
                    base,
                    offset,
                    page_size,
                    urlencoding::encode(&where_clause)
                );

                debug!("fetching {}", url);
                let body = match http.get_json(&url, &[]).await {
                    Ok(v) => v,
                    Err(e) => {
                        let _ = tx.send(Err(ConnectorError::Http(e))).await;
                        return;
                    }
                };

                // Feature services report failures in a 200 body.
                if let Some(err) = body.get("error") {
                    let _ = tx
                        .send(Err(ConnectorError::Parse(format!(
                            "feature service error: {}",
                            err
                        ))))
                        .await;
                    return;
                }

                let Some(features) = body.get("features").and_then(|f| f.as_array()) else {
                    let _ = tx
                        .send(Err(ConnectorError::Parse(
                            "response missing features array".to_string(),
                        )))
                        .await;
                    return;
                };

                if features.is_empty() {
                    info!("layer {} exhausted at offset {}", layer_id, offset);
                    break;
                }

                // The whole batch shares one cursor hint: its max OBJECTID.
                let batch_max = features
                    .iter()
                    .filter_map(|f| {
                        f.get("attributes")
                            .and_then(|a| object_id(a))
                    })
                    .max();

                for feature in features {
                    let record = extract_feature(feature, batch_max);
                    let permit = normalizer.permit(&source, &url, record);
                    if tx.send(Ok(permit)).await.is_err() {
                        return;
                    }
                    produced += 1;
                    if produced >= ctx.max_rows {
                        return;
                    }
                }

                if (features.len() as u64) < page_size {
                    break;
                }
                offset += features.len() as u64;
            }
        });

        stream
    }
}

#[async_trait]
impl Connector for FeatureServiceConnector {
    fn platform(&self) -> Platform {
        Platform::FeatureService
    }

    async fn validate(&self, config: &ConnectorConfig) -> Result<(), ConnectorError> {
        url::Url::parse(&config.endpoint_url)
            .map_err(|e| ConnectorError::Config(format!("invalid endpoint_url: {}", e)))?;
        let layer_id = config
            .display_param("layer_id")
            .ok_or_else(|| ConnectorError::Config("layer_id is required".to_string()))?;

        let probe_url = format!(
            "{}/FeatureServer/{}/query?where=1%3D1&resultRecordCount=1&f=json",
            config.endpoint_url, layer_id
        );
        self.http.probe(&probe_url).await?;
        Ok(())
    }

    fn backfill(&self, ctx: RunContext) -> RecordStream {
        let clause = backfill_where(&ctx);
        self.stream(ctx, clause)
    }

    fn incremental(&self, ctx: RunContext) -> RecordStream {
        let clause = incremental_where(&ctx);
        self.stream(ctx, clause)
    }
}

/// Backfill resumes from the larger of the state-table cursor and the
/// database-derived maximum record id.
fn backfill_where(ctx: &RunContext) -> String {
    match ctx.state.record_id_cursor() {
        Some(cursor) => format!("OBJECTID > {}", cursor),
        None => "1=1".to_string(),
    }
}

/// Incremental prefers the OBJECTID cursor; without one it falls back to the
/// portal's edit timestamp.
fn incremental_where(ctx: &RunContext) -> String {
    if let Some(cursor) = ctx.state.record_id_cursor() {
        return format!("OBJECTID > {}", cursor);
    }
    match &ctx.state.last_max_timestamp {
        Some(ts) => format!("lastEditDate > '{}'", ts),
        None => "1=1".to_string(),
    }
}

fn object_id(attributes: &serde_json::Value) -> Option<i64> {
    for field in ID_FIELDS {
        if let Some(id) = attributes.get(*field).and_then(coerce_i64) {
            return Some(id);
        }
    }
    None
}

/// Extract normalized fields from one feature.
fn extract_feature(feature: &serde_json::Value, batch_max: Option<i64>) -> ExtractedRecord {
    let mut rec = ExtractedRecord::default();
    rec.max_record_id = batch_max;

    let empty = serde_json::json!({});
    let attributes = feature.get("attributes").unwrap_or(&empty);

    rec.source_record_id = match probe_string(attributes, ID_FIELDS) {
        Some((field, value)) => {
            rec.fields_map.insert("source_record_id".to_string(), field);
            value
        }
        None => String::new(),
    };

    for (name, candidates) in [
        ("permit_type", PERMIT_TYPE_FIELDS),
        ("work_description", DESCRIPTION_FIELDS),
        ("permit_status", STATUS_FIELDS),
        ("raw_address", ADDRESS_FIELDS),
        ("parcel_id", PARCEL_FIELDS),
        ("owner_name", OWNER_FIELDS),
        ("contractor_name", CONTRACTOR_FIELDS),
    ] {
        if let Some((field, value)) = probe_string(attributes, candidates) {
            rec.fields_map.insert(name.to_string(), field);
            match name {
                "permit_type" => rec.permit_type = Some(value),
                "work_description" => rec.work_description = Some(value),
                "permit_status" => rec.permit_status = Some(value),
                "raw_address" => rec.raw_address = Some(value),
                "parcel_id" => rec.parcel_id = Some(value),
                "owner_name" => rec.owner_name = Some(value),
                "contractor_name" => rec.contractor_name = Some(value),
                _ => unreachable!(),
            }
        }
    }

    for field in ISSUE_DATE_FIELDS {
        if let Some(value) = attributes.get(*field) {
            if let Some(date) = feature_date(value) {
                rec.fields_map
                    .insert("issue_date".to_string(), field.to_string());
                rec.issue_date = Some(date);
                break;
            }
        }
    }

    if let Some((field, value)) = probe_number(attributes, VALUE_FIELDS) {
        rec.fields_map.insert("permit_value".to_string(), field);
        rec.permit_value = Some(value);
    }

    if let Some(geometry) = feature.get("geometry") {
        if !geometry.is_null() {
            let (lat, lon) = geometry_point(geometry);
            rec.lat = lat;
            rec.lon = lon;
            rec.geom_json = Some(geometry.clone());
        }
    }

    rec
}

/// Feature-service dates are milliseconds since epoch when numeric; strings
/// pass through with their date part kept.
fn feature_date(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Number(n) => {
            let millis = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            chrono::DateTime::from_timestamp_millis(millis).map(|dt| dt.format("%Y-%m-%d").to_string())
        }
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(date_part(s)),
        _ => None,
    }
}

/// A point arrives either as `{x, y}` or as `{coordinates: [lon, lat]}`.
fn geometry_point(geometry: &serde_json::Value) -> (Option<f64>, Option<f64>) {
    let x = geometry.get("x").and_then(coerce_f64);
    let y = geometry.get("y").and_then(coerce_f64);
    if let (Some(x), Some(y)) = (x, y) {
        return (Some(y), Some(x));
    }

    if let Some(coords) = geometry.get("coordinates").and_then(|c| c.as_array()) {
        if coords.len() >= 2 {
            let lon = coerce_f64(&coords[0]);
            let lat = coerce_f64(&coords[1]);
            return (lat, lon);
        }
    }

    (None, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use super::super::{ConnectorState, RunContext};

    fn ctx_with_state(state: ConnectorState) -> RunContext {
        RunContext {
            source_id: 2,
            source_name: "County GIS".to_string(),
            config: ConnectorConfig {
                endpoint_url: "https://gis.example.gov/arcgis/rest/services/Permits".to_string(),
                params: json!({"layer_id": 0}),
            },
            state,
            max_rows: 1000,
        }
    }

    #[test]
    fn test_backfill_where_uses_merged_cursor() {
        let ctx = ctx_with_state(ConnectorState {
            last_max_record_id: Some(1000),
            ..Default::default()
        });
        assert_eq!(backfill_where(&ctx), "OBJECTID > 1000");

        let ctx = ctx_with_state(ConnectorState {
            last_max_record_id: Some(400),
            db_max_record_id: Some(950),
            ..Default::default()
        });
        assert_eq!(backfill_where(&ctx), "OBJECTID > 950");

        let ctx = ctx_with_state(ConnectorState::default());
        assert_eq!(backfill_where(&ctx), "1=1");
    }

    #[test]
    fn test_incremental_where_falls_back_to_edit_timestamp() {
        let ctx = ctx_with_state(ConnectorState {
            last_max_timestamp: Some("2024-10-01".to_string()),
            ..Default::default()
        });
        assert_eq!(incremental_where(&ctx), "lastEditDate > '2024-10-01'");

        let ctx = ctx_with_state(ConnectorState {
            last_max_record_id: Some(250),
            last_max_timestamp: Some("2024-10-01".to_string()),
            ..Default::default()
        });
        assert_eq!(incremental_where(&ctx), "OBJECTID > 250");
    }

    #[test]
    fn test_extract_feature_with_point_geometry() {
        let feature = json!({
            "attributes": {
                "OBJECTID": 123,
                "PermitType": "Re-Roof",
                "Description": "Remove and replace shingles",
                "Address": "700 H Street, Sacramento, CA 95814",
                "IssueDate": 1728950400000i64
            },
            "geometry": {"x": -121.4944, "y": 38.5816}
        });
        let rec = extract_feature(&feature, Some(980));
        assert_eq!(rec.source_record_id, "123");
        assert_eq!(rec.issue_date.as_deref(), Some("2024-10-15"));
        assert_eq!(rec.lat, Some(38.5816));
        assert_eq!(rec.lon, Some(-121.4944));
        assert_eq!(rec.max_record_id, Some(980));
        assert!(rec.geom_json.is_some());
    }

    #[test]
    fn test_extract_feature_with_coordinates_geometry() {
        let feature = json!({
            "attributes": {"objectid": "9"},
            "geometry": {"coordinates": [-121.5, 38.6]}
        });
        let rec = extract_feature(&feature, None);
        assert_eq!(rec.lat, Some(38.6));
        assert_eq!(rec.lon, Some(-121.5));
    }

    #[test]
    fn test_feature_date_forms() {
        assert_eq!(
            feature_date(&json!(1728950400000i64)).as_deref(),
            Some("2024-10-15")
        );
        assert_eq!(
            feature_date(&json!("2024-10-15T08:00:00")).as_deref(),
            Some("2024-10-15")
        );
        assert_eq!(feature_date(&json!(null)), None);
    }

    #[test]
    fn test_batch_max_object_id() {
        let features = vec![
            json!({"attributes": {"OBJECTID": 5}}),
            json!({"attributes": {"OBJECTID": 17}}),
            json!({"attributes": {"OBJECTID": 9}}),
        ];
        let max = features
            .iter()
            .filter_map(|f| f.get("attributes").and_then(object_id))
            .max();
        assert_eq!(max, Some(17));
    }
}
