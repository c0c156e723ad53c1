//! API endpoint handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use tracing::{error, info};

use crate::ingest::IngestMode;
use crate::models::{NewSource, SourcePatch};
use crate::repository::PermitFilters;

use super::AppState;

fn internal_error(e: impl std::fmt::Display) -> (StatusCode, Json<serde_json::Value>) {
    error!("request failed: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({"error": e.to_string()})),
    )
}

/// Liveness; reflects database reachability.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({"status": "ok", "database": true})),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"status": "degraded", "database": false, "error": e.to_string()})),
        ),
    }
}

pub async fn list_sources(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.get_sources().await {
        Ok(sources) => Json(sources).into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

pub async fn create_source(
    State(state): State<AppState>,
    Json(new): Json<NewSource>,
) -> impl IntoResponse {
    match state.store.create_source(&new).await {
        Ok(source) => (StatusCode::CREATED, Json(source)).into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

/// Partial update; operators flip `enabled` or adjust budgets here.
pub async fn patch_source(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(patch): Json<SourcePatch>,
) -> impl IntoResponse {
    match state.store.update_source(id, &patch).await {
        Ok(source) => Json(source).into_response(),
        Err(crate::repository::StoreError::NotFound(_)) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": format!("source {} not found", id)})),
        )
            .into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct IngestParams {
    pub mode: Option<String>,
}

/// Kick off a background ingestion run; returns 202 immediately.
pub async fn trigger_ingest(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(params): Query<IngestParams>,
) -> impl IntoResponse {
    let mode = params.mode.as_deref().unwrap_or("backfill");

    match state.store.get_source(id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({"error": format!("source {} not found", id)})),
            )
                .into_response();
        }
        Err(e) => return internal_error(e).into_response(),
    }

    let orchestrator = state.orchestrator.clone();
    match mode {
        "deep" => {
            tokio::spawn(async move {
                if let Err(e) = orchestrator.run_deep_ingestion(id).await {
                    error!("deep ingestion for source {} failed: {}", id, e);
                }
            });
        }
        other => {
            let Some(ingest_mode) = IngestMode::from_str(other) else {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({
                        "error": format!("unknown mode '{}': expected backfill, incremental or deep", other)
                    })),
                )
                    .into_response();
            };
            tokio::spawn(async move {
                if let Err(e) = orchestrator.run_ingestion(id, ingest_mode).await {
                    error!("ingestion for source {} failed: {}", id, e);
                }
            });
        }
    }

    info!("queued {} ingestion for source {}", mode, id);
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({"status": "accepted", "source_id": id, "mode": mode})),
    )
        .into_response()
}

/// All state rows, for progress UIs.
pub async fn all_source_states(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.get_all_source_states().await {
        Ok(states) => Json(states).into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct PermitParams {
    /// `west,south,east,north` in decimal degrees.
    pub bbox: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    #[serde(rename = "type")]
    pub permit_type: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub roofing_only: Option<bool>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

fn parse_bbox(raw: &str) -> Option<(f64, f64, f64, f64)> {
    let parts: Vec<f64> = raw
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .ok()?;
    match parts.as_slice() {
        [west, south, east, north] => Some((*west, *south, *east, *north)),
        _ => None,
    }
}

pub async fn list_permits(
    State(state): State<AppState>,
    Query(params): Query<PermitParams>,
) -> impl IntoResponse {
    let bbox = match params.bbox.as_deref() {
        Some(raw) => match parse_bbox(raw) {
            Some(bbox) => Some(bbox),
            None => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({
                        "error": "bbox must be 'west,south,east,north' decimal degrees"
                    })),
                )
                    .into_response();
            }
        },
        None => None,
    };

    let filters = PermitFilters {
        bbox,
        city: params.city,
        state: params.state,
        permit_type: params.permit_type,
        date_from: params.date_from,
        date_to: params.date_to,
        roofing_only: params.roofing_only.unwrap_or(false),
        limit: params.limit,
        offset: params.offset,
    };

    match state.store.get_permits(&filters).await {
        Ok((permits, total)) => Json(serde_json::json!({
            "permits": permits,
            "total": total,
            "limit": filters.limit.unwrap_or(100),
            "offset": filters.offset.unwrap_or(0),
        }))
        .into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

pub async fn get_permit(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.get_permit(&id).await {
        Ok(Some(permit)) => Json(permit).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": format!("permit {} not found", id)})),
        )
            .into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

pub async fn permit_stats(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.get_permit_stats().await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}
