//! Connector for Socrata-style JSON dataset APIs.
//!
//! URL shape: `{endpoint}/resource/{dataset_id}.json?$limit=&$offset=&$where=`.
//! An `X-App-Token` header is sent when a token is configured. Incremental
//! mode filters on `data_loaded_at` when a timestamp cursor exists, else on
//! `issue_date`.

use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, info};

use crate::models::Platform;
use crate::normalize::{
    coerce_f64, date_part, probe_number, probe_string, ExtractedRecord, Normalizer, SourceRef,
};

use super::{
    record_channel, Connector, ConnectorConfig, ConnectorError, HttpClient, RecordStream,
    RunContext, PAGE_SIZE,
};

// Ordered field-name alternates probed per normalized field.
const ID_FIELDS: &[&str] = &["id", "_id"];
const PERMIT_TYPE_FIELDS: &[&str] = &["permit_type", "permittype", "type", "permit_type_desc"];
const DESCRIPTION_FIELDS: &[&str] = &[
    "description",
    "work_description",
    "workdescription",
    "scope_of_work",
    "work_desc",
];
const STATUS_FIELDS: &[&str] = &["status", "permit_status", "statuscurrent"];
const ISSUE_DATE_FIELDS: &[&str] = &["issue_date", "issued_date", "issuedate", "issued"];
const ADDRESS_FIELDS: &[&str] = &[
    "address",
    "original_address1",
    "location_address",
    "full_address",
    "site_address",
    "location",
];
const PARCEL_FIELDS: &[&str] = &["parcel_number", "parcel_id", "apn", "parcelnumber"];
const OWNER_FIELDS: &[&str] = &["owner_name", "owner"];
const CONTRACTOR_FIELDS: &[&str] = &["contractor_name", "contractor"];
const VALUE_FIELDS: &[&str] = &["valuation", "permit_value", "estprojectcost", "job_value"];
const LAT_FIELDS: &[&str] = &["latitude", "lat"];
const LON_FIELDS: &[&str] = &["longitude", "lon", "lng"];

pub struct JsonDatasetConnector {
    http: Arc<HttpClient>,
    normalizer: Arc<Normalizer>,
}

impl JsonDatasetConnector {
    pub fn new(http: Arc<HttpClient>, normalizer: Arc<Normalizer>) -> Self {
        Self { http, normalizer }
    }

    fn stream(&self, ctx: RunContext, where_clause: Option<String>) -> RecordStream {
        let (tx, stream) = record_channel();
        let http = self.http.clone();
        let normalizer = self.normalizer.clone();

        tokio::spawn(async move {
            let source = SourceRef {
                id: ctx.source_id,
                name: ctx.source_name.clone(),
                platform: Platform::JsonDataset,
            };

            let Some(dataset_id) = ctx.config.str_param("dataset_id").map(str::to_string) else {
                let _ = tx
                    .send(Err(ConnectorError::Config(
                        "dataset_id is required".to_string(),
                    )))
                    .await;
                return;
            };
            let app_token = ctx.config.str_param("app_token").map(str::to_string);

            let base = format!("{}/resource/{}.json", ctx.config.endpoint_url, dataset_id);
            let mut headers: Vec<(&str, String)> = Vec::new();
            if let Some(token) = app_token {
                headers.push(("X-App-Token", token));
            }

            let mut offset: u64 = 0;
            let mut produced: u64 = 0;

            loop {
                let page_size = PAGE_SIZE.min(ctx.max_rows - produced);
                if page_size == 0 {
                    break;
                }

                let mut url = format!("{}?$limit={}&$offset={}", base, page_size, offset);
                if let Some(clause) = &where_clause {
                    url.push_str("&$where=");
                    url.push_str(&urlencoding::encode(clause));
                }

                debug!("fetching {}", url);
                let body = match http.get_json(&url, &headers).await {
                    Ok(v) => v,
                    Err(e) => {
                        let _ = tx.send(Err(ConnectorError::Http(e))).await;
                        return;
                    }
                };

                let Some(rows) = body.as_array() else {
                    let _ = tx
                        .send(Err(ConnectorError::Parse(
                            "expected a JSON array of rows".to_string(),
                        )))
                        .await;
                    return;
                };

                if rows.is_empty() {
                    info!("dataset {} exhausted at offset {}", dataset_id, offset);
                    break;
                }

                for row in rows {
                    let record = extract_record(row);
                    let permit = normalizer.permit(&source, &url, record);
                    if tx.send(Ok(permit)).await.is_err() {
                        return; // consumer dropped the stream
                    }
                    produced += 1;
                    if produced >= ctx.max_rows {
                        return;
                    }
                }

                if (rows.len() as u64) < page_size {
                    break;
                }
                offset += rows.len() as u64;
            }
        });

        stream
    }
}

#[async_trait]
impl Connector for JsonDatasetConnector {
    fn platform(&self) -> Platform {
        Platform::JsonDataset
    }

    async fn validate(&self, config: &ConnectorConfig) -> Result<(), ConnectorError> {
        url::Url::parse(&config.endpoint_url)
            .map_err(|e| ConnectorError::Config(format!("invalid endpoint_url: {}", e)))?;
        let dataset_id = config
            .str_param("dataset_id")
            .ok_or_else(|| ConnectorError::Config("dataset_id is required".to_string()))?;

        let probe_url = format!(
            "{}/resource/{}.json?$limit=1",
            config.endpoint_url, dataset_id
        );
        self.http.probe(&probe_url).await?;
        Ok(())
    }

    fn backfill(&self, ctx: RunContext) -> RecordStream {
        self.stream(ctx, None)
    }

    fn incremental(&self, ctx: RunContext) -> RecordStream {
        let clause = incremental_where(&ctx);
        self.stream(ctx, clause)
    }
}

/// Build the incremental `$where` filter from the cursor snapshot.
fn incremental_where(ctx: &RunContext) -> Option<String> {
    if let Some(ts) = &ctx.state.last_max_timestamp {
        Some(format!("data_loaded_at > '{}'", ts))
    } else {
        ctx.state
            .last_issue_date
            .as_ref()
            .map(|d| format!("issue_date > '{}'", d))
    }
}

/// Extract normalized fields from one dataset row.
fn extract_record(row: &serde_json::Value) -> ExtractedRecord {
    let mut rec = ExtractedRecord::default();

    rec.source_record_id = match probe_string(row, ID_FIELDS) {
        Some((field, value)) => {
            rec.fields_map.insert("source_record_id".to_string(), field);
            value
        }
        // A synthetic id keeps the record flowing; fingerprint-based dedup
        // still applies downstream.
        None => format!("gen-{:012x}", rand::rng().random::<u64>() & 0xffff_ffff_ffff),
    };

    for (name, candidates) in [
        ("permit_type", PERMIT_TYPE_FIELDS),
        ("work_description", DESCRIPTION_FIELDS),
        ("permit_status", STATUS_FIELDS),
        ("parcel_id", PARCEL_FIELDS),
        ("owner_name", OWNER_FIELDS),
        ("contractor_name", CONTRACTOR_FIELDS),
    ] {
        if let Some((field, value)) = probe_string(row, candidates) {
            rec.fields_map.insert(name.to_string(), field);
            match name {
                "permit_type" => rec.permit_type = Some(value),
                "work_description" => rec.work_description = Some(value),
                "permit_status" => rec.permit_status = Some(value),
                "parcel_id" => rec.parcel_id = Some(value),
                "owner_name" => rec.owner_name = Some(value),
                "contractor_name" => rec.contractor_name = Some(value),
                _ => unreachable!(),
            }
        }
    }

    if let Some((field, value)) = probe_string(row, ISSUE_DATE_FIELDS) {
        rec.fields_map.insert("issue_date".to_string(), field);
        rec.issue_date = Some(date_part(&value));
    }

    if let Some((field, value)) = probe_number(row, VALUE_FIELDS) {
        rec.fields_map.insert("permit_value".to_string(), field);
        rec.permit_value = Some(value);
    }

    // Address arrives as a string, an object with human_address, or a JSON
    // string; lat/lon may hide inside the address object or sit at top level.
    for field in ADDRESS_FIELDS {
        if let Some(value) = row.get(*field) {
            let (raw, lat, lon) = extract_address(value);
            if raw.is_some() || lat.is_some() {
                rec.fields_map
                    .insert("address".to_string(), field.to_string());
                rec.raw_address = raw;
                rec.lat = lat;
                rec.lon = lon;
                break;
            }
        }
    }

    if rec.lat.is_none() {
        if let Some((field, lat)) = probe_number(row, LAT_FIELDS) {
            rec.fields_map.insert("lat".to_string(), field);
            rec.lat = Some(lat);
        }
        if let Some((field, lon)) = probe_number(row, LON_FIELDS) {
            rec.fields_map.insert("lon".to_string(), field);
            rec.lon = Some(lon);
        }
    }

    rec
}

/// Pull a raw address string and embedded coordinates out of the portal's
/// address value, whatever shape it took.
fn extract_address(value: &serde_json::Value) -> (Option<String>, Option<f64>, Option<f64>) {
    match value {
        serde_json::Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return (None, None, None);
            }
            // Some portals JSON-encode the whole address object as a string.
            if s.starts_with('{') {
                if let Ok(inner) = serde_json::from_str::<serde_json::Value>(s) {
                    return extract_address(&inner);
                }
            }
            (Some(s.to_string()), None, None)
        }
        serde_json::Value::Object(obj) => {
            let lat = obj.get("latitude").and_then(coerce_f64);
            let lon = obj.get("longitude").and_then(coerce_f64);

            let raw = match obj.get("human_address") {
                Some(serde_json::Value::String(s)) => {
                    match serde_json::from_str::<serde_json::Value>(s) {
                        Ok(inner) => compose_human_address(&inner),
                        Err(_) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
                    }
                }
                Some(inner @ serde_json::Value::Object(_)) => compose_human_address(inner),
                _ => compose_human_address(value),
            };

            (raw, lat, lon)
        }
        _ => (None, None, None),
    }
}

/// Join the `address`/`city`/`state`/`zip` keys of a human_address object
/// back into one comma-separated line the address parser understands.
fn compose_human_address(value: &serde_json::Value) -> Option<String> {
    let street = value.get("address").and_then(|v| v.as_str()).unwrap_or("");
    let city = value.get("city").and_then(|v| v.as_str()).unwrap_or("");
    let state = value.get("state").and_then(|v| v.as_str()).unwrap_or("");
    let zip = value.get("zip").and_then(|v| v.as_str()).unwrap_or("");

    let tail = format!("{} {}", state, zip).trim().to_string();
    let mut parts = Vec::new();
    for piece in [street, city, &tail] {
        let piece = piece.trim();
        if !piece.is_empty() {
            parts.push(piece);
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(", "))
    }
}
