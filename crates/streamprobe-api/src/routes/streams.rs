use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use streamprobe_core::{SegmentMetrics, StreamConfig, StreamHealth, StreamStatus};

use crate::error::ApiError;
use crate::routes::range_to_duration;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateStreamRequest {
    pub id: Option<String>,
    pub name: String,
    pub manifest_url: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Serialize)]
pub struct StreamDetails {
    pub id: String,
    pub name: String,
    pub status: StreamStatus,
    pub start_time: DateTime<Utc>,
    pub manifest_url: String,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_metrics: Option<SegmentMetrics>,
    pub health: StreamHealth,
}

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub range: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    100
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub event_type: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    #[serde(default = "default_logs_limit")]
    pub limit: usize,
}

fn default_logs_limit() -> usize {
    500
}

#[derive(Debug, Deserialize)]
pub struct AlertsQuery {
    #[serde(default)]
    pub include_resolved: bool,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/streams", get(list_streams).post(create_stream))
        .route("/api/streams/{id}", get(get_stream).delete(delete_stream))
        .route("/api/streams/{id}/metrics", get(get_metrics))
        .route("/api/streams/{id}/segments", get(get_segments))
        .route("/api/streams/{id}/health", get(get_health))
        .route("/api/streams/{id}/audio-metrics", get(get_audio_metrics))
        .route("/api/streams/{id}/video-metrics", get(get_video_metrics))
        .route("/api/streams/{id}/events", get(get_events))
        .route("/api/streams/{id}/logs", get(get_logs))
        .route("/api/streams/{id}/sprites", get(get_sprites))
        .route("/api/streams/{id}/thumbnail", get(get_thumbnail))
        .route("/api/streams/{id}/thumbnail/file", get(get_thumbnail_file))
        .route("/api/streams/{id}/scte35-events", get(get_scte35_events))
        .route("/api/streams/{id}/alerts", get(get_alerts))
        .route(
            "/api/streams/{id}/alerts/{alert_id}/acknowledge",
            post(acknowledge_alert),
        )
}

fn require_stream(state: &AppState, id: &str) -> Result<StreamConfig, ApiError> {
    state
        .engine
        .stream_config(id)
        .ok_or_else(|| ApiError::NotFound("Stream not found".into()))
}

fn is_valid_url(s: &str) -> bool {
    url::Url::parse(s)
        .map(|u| u.scheme() == "http" || u.scheme() == "https")
        .unwrap_or(false)
}

fn details(state: &AppState, config: StreamConfig) -> StreamDetails {
    let health = state
        .engine
        .get_health(&config.id)
        .unwrap_or_else(|| StreamHealth::new(StreamStatus::Offline));
    StreamDetails {
        status: health.status,
        current_metrics: state.engine.current_metrics(&config.id),
        id: config.id,
        name: config.name,
        start_time: config.created_at,
        manifest_url: config.manifest_url,
        tags: config.tags,
        health,
    }
}

/// GET /api/streams
async fn list_streams(State(state): State<AppState>) -> Json<Vec<StreamDetails>> {
    let streams = state
        .engine
        .list_streams()
        .into_iter()
        .map(|config| details(&state, config))
        .collect();
    Json(streams)
}

/// POST /api/streams
async fn create_stream(
    State(state): State<AppState>,
    Json(body): Json<CreateStreamRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if !is_valid_url(&body.manifest_url) {
        return Err(ApiError::BadRequest(format!(
            "Invalid manifest URL: {}",
            body.manifest_url
        )));
    }

    let id = body
        .id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    if state.engine.contains_stream(&id) {
        return Err(ApiError::Conflict(format!(
            "Stream '{id}' is already being monitored"
        )));
    }

    let config = StreamConfig {
        id,
        name: body.name,
        manifest_url: body.manifest_url,
        enabled: body.enabled,
        tags: body.tags,
        created_at: Utc::now(),
    };
    state.engine.add_stream(config.clone());
    state.persist_streams();

    Ok((StatusCode::CREATED, Json(details(&state, config))))
}

/// GET /api/streams/{id}
async fn get_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StreamDetails>, ApiError> {
    let config = require_stream(&state, &id)?;
    Ok(Json(details(&state, config)))
}

/// DELETE /api/streams/{id}
async fn delete_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !state.engine.remove_stream(&id) {
        return Err(ApiError::NotFound("Stream not found".into()));
    }
    state.persist_streams();
    Ok(Json(
        serde_json::json!({ "status": "deleted", "stream_id": id }),
    ))
}

/// GET /api/streams/{id}/metrics?range=3min|30min|3h|8h|2d|4d
async fn get_metrics(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<RangeQuery>,
) -> Result<Json<Vec<SegmentMetrics>>, ApiError> {
    require_stream(&state, &id)?;
    let window = range_to_duration(query.range.as_deref().unwrap_or("3min"));
    let threshold = Utc::now() - window;
    Ok(Json(state.engine.metrics_since(&id, threshold)))
}

/// GET /api/streams/{id}/segments?limit&offset — newest first.
async fn get_segments(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<SegmentMetrics>>, ApiError> {
    require_stream(&state, &id)?;
    let mut all = state.engine.get_metrics_history(&id, usize::MAX);
    all.reverse();
    let limit = page.limit.min(1000);
    let slice = all
        .into_iter()
        .skip(page.offset)
        .take(limit)
        .collect();
    Ok(Json(slice))
}

/// GET /api/streams/{id}/health
async fn get_health(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StreamHealth>, ApiError> {
    state
        .engine
        .get_health(&id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Stream not found".into()))
}

/// GET /api/streams/{id}/audio-metrics?range
async fn get_audio_metrics(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<RangeQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_stream(&state, &id)?;
    let threshold = Utc::now() - range_to_duration(query.range.as_deref().unwrap_or("3min"));
    let history: Vec<_> = state
        .engine
        .loudness_history(&id)
        .into_iter()
        .filter(|l| l.timestamp >= threshold)
        .collect();
    let current = history.last().cloned();
    let count = history.len();
    Ok(Json(serde_json::json!({
        "history": history,
        "current": current,
        "count": count,
    })))
}

/// GET /api/streams/{id}/video-metrics
async fn get_video_metrics(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_stream(&state, &id)?;
    let history: Vec<serde_json::Value> = state
        .engine
        .get_metrics_history(&id, 200)
        .iter()
        .map(|m| {
            serde_json::json!({
                "timestamp": m.timestamp,
                "bitrate_mbps": m.actual_bitrate,
                "download_speed_mbps": m.download_speed,
                "ttfb_ms": m.ttfb,
                "download_time_ms": m.download_time,
                "segment_duration_s": m.segment_duration,
                "segment_size_mb": m.segment_size_mb,
                "resolution": m.resolution,
            })
        })
        .collect();
    let (_, scte35_count) = state.engine.scte35_events(&id);
    Ok(Json(serde_json::json!({
        "history": history,
        "scte35_count": scte35_count,
        "scte35_detected": scte35_count > 0,
    })))
}

/// GET /api/streams/{id}/events
async fn get_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_stream(&state, &id)?;
    let end = query.end_date.unwrap_or_else(Utc::now);
    let start = query
        .start_date
        .unwrap_or_else(|| end - chrono::Duration::hours(24));
    let events = state
        .engine
        .logs()
        .read_events(
            start,
            end,
            Some(&id),
            query.event_type.as_deref(),
            query.limit.min(1000),
        )
        .await;
    let count = events.len();
    Ok(Json(serde_json::json!({ "events": events, "count": count })))
}

/// GET /api/streams/{id}/logs
async fn get_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_stream(&state, &id)?;
    let logs = state
        .engine
        .logs()
        .read_stream_logs(&id, query.limit.min(1000))
        .await;
    let count = logs.len();
    Ok(Json(serde_json::json!({
        "logs": logs,
        "count": count,
        "stream_id": id,
    })))
}

/// GET /api/streams/{id}/sprites
async fn get_sprites(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_stream(&state, &id)?;
    let sprites = state.engine.sprites().list_maps(Some(&id));
    Ok(Json(serde_json::json!({ "sprites": sprites })))
}

/// GET /api/streams/{id}/thumbnail
async fn get_thumbnail(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_stream(&state, &id)?;
    let info = state
        .engine
        .thumbnails()
        .latest_info(&id)
        .ok_or_else(|| ApiError::NotFound("No thumbnail available".into()))?;
    let name = info
        .path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    Ok(Json(serde_json::json!({
        "thumbnail_url": format!("/data/thumbnails/{name}"),
        "sequence_number": info.sequence_number,
        "is_fresh": info.is_fresh,
        "expires_in": info.expires_in.as_secs_f64(),
    })))
}

/// GET /api/streams/{id}/thumbnail/file
async fn get_thumbnail_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    require_stream(&state, &id)?;
    let info = state
        .engine
        .thumbnails()
        .latest_info(&id)
        .ok_or_else(|| ApiError::NotFound("No thumbnail available".into()))?;
    let bytes = tokio::fs::read(&info.path)
        .await
        .map_err(|_| ApiError::NotFound("No thumbnail available".into()))?;
    Ok((
        [
            ("content-type", "image/jpeg".to_string()),
            ("cache-control", "public, max-age=30".to_string()),
            ("x-sequence", info.sequence_number.to_string()),
        ],
        bytes,
    ))
}

/// GET /api/streams/{id}/scte35-events
async fn get_scte35_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_stream(&state, &id)?;
    let (events, total) = state.engine.scte35_events(&id);
    Ok(Json(serde_json::json!({
        "events": events,
        "total_count": total,
        "stream_id": id,
    })))
}

/// GET /api/streams/{id}/alerts?include_resolved
async fn get_alerts(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<AlertsQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_stream(&state, &id)?;
    let alerts = if query.include_resolved {
        state.engine.alerts().alert_history(Some(&id), 100, true)
    } else {
        state.engine.alerts().active_alerts(&id)
    };
    let active_count = alerts.iter().filter(|a| !a.resolved).count();
    let total_count = alerts.len();
    Ok(Json(serde_json::json!({
        "alerts": alerts,
        "active_count": active_count,
        "total_count": total_count,
    })))
}

/// POST /api/streams/{id}/alerts/{alert_id}/acknowledge
async fn acknowledge_alert(
    State(state): State<AppState>,
    Path((id, alert_id)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_stream(&state, &id)?;
    if !state.engine.alerts().acknowledge_alert(&id, &alert_id) {
        return Err(ApiError::NotFound("Alert not found".into()));
    }
    Ok(Json(
        serde_json::json!({ "status": "acknowledged", "alert_id": alert_id }),
    ))
}
