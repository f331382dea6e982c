//! CSV export endpoints for metrics, alerts, SCTE-35 markers and loudness.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use chrono::Utc;

use crate::error::ApiError;
use crate::routes::range_to_duration;
use crate::routes::streams::RangeQuery;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/export/{id}/metrics.csv", get(export_metrics))
        .route("/api/export/{id}/alerts.csv", get(export_alerts))
        .route("/api/export/{id}/scte35.csv", get(export_scte35))
        .route("/api/export/{id}/loudness.csv", get(export_loudness))
}

/// RFC 4180 quoting for fields that need it.
fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn csv_row(fields: &[String]) -> String {
    fields
        .iter()
        .map(|f| csv_escape(f))
        .collect::<Vec<_>>()
        .join(",")
}

fn opt<T: ToString>(value: &Option<T>) -> String {
    value.as_ref().map(|v| v.to_string()).unwrap_or_default()
}

fn csv_response(stream_name: &str, kind: &str, body: String) -> impl IntoResponse {
    let filename = format!(
        "{}_{}_{}.csv",
        stream_name,
        kind,
        Utc::now().format("%Y%m%d_%H%M%S")
    );
    (
        [
            ("content-type", "text/csv".to_string()),
            (
                "content-disposition",
                format!("attachment; filename={filename}"),
            ),
        ],
        body,
    )
}

/// GET /api/export/{id}/metrics.csv?range=3h
async fn export_metrics(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<RangeQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let config = state
        .engine
        .stream_config(&id)
        .ok_or_else(|| ApiError::NotFound("Stream not found".into()))?;

    let threshold = Utc::now() - range_to_duration(query.range.as_deref().unwrap_or("3h"));
    let metrics = state.engine.metrics_since(&id, threshold);
    if metrics.is_empty() {
        return Err(ApiError::NotFound("No metrics data available".into()));
    }

    let mut out = String::from(
        "timestamp,sequence_number,segment_duration,segment_size_mb,actual_bitrate,declared_bitrate,download_time,download_speed,ttfb,resolution,filename\n",
    );
    for m in &metrics {
        out.push_str(&csv_row(&[
            m.timestamp.to_rfc3339(),
            m.sequence_number.to_string(),
            m.segment_duration.to_string(),
            m.segment_size_mb.to_string(),
            m.actual_bitrate.to_string(),
            opt(&m.bandwidth),
            m.download_time.to_string(),
            m.download_speed.to_string(),
            m.ttfb.to_string(),
            m.resolution.clone().unwrap_or_default(),
            m.filename.clone(),
        ]));
        out.push('\n');
    }

    Ok(csv_response(&config.name, "metrics", out))
}

/// GET /api/export/{id}/alerts.csv
async fn export_alerts(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let config = state
        .engine
        .stream_config(&id)
        .ok_or_else(|| ApiError::NotFound("Stream not found".into()))?;

    let alerts = state.engine.alerts().alert_history(Some(&id), 1000, true);
    if alerts.is_empty() {
        return Err(ApiError::NotFound("No alerts data available".into()));
    }

    let meta_str = |alert: &streamprobe_core::Alert, key: &str| {
        alert
            .metadata
            .get(key)
            .map(|v| v.to_string())
            .unwrap_or_default()
    };

    let mut out = String::from(
        "id,timestamp,alert_type,severity,message,threshold_value,actual_value,resolved,resolved_at,acknowledged\n",
    );
    for a in &alerts {
        out.push_str(&csv_row(&[
            a.alert_id.clone(),
            a.timestamp.to_rfc3339(),
            a.alert_type.to_string(),
            a.severity.to_string(),
            a.message.clone(),
            meta_str(a, "threshold_value"),
            meta_str(a, "actual_value"),
            a.resolved.to_string(),
            a.resolved_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
            a.acknowledged.to_string(),
        ]));
        out.push('\n');
    }

    Ok(csv_response(&config.name, "alerts", out))
}

/// GET /api/export/{id}/scte35.csv
async fn export_scte35(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let config = state
        .engine
        .stream_config(&id)
        .ok_or_else(|| ApiError::NotFound("Stream not found".into()))?;

    let (events, _) = state.engine.scte35_events(&id);
    if events.is_empty() {
        return Err(ApiError::NotFound("No SCTE-35 events detected".into()));
    }

    let mut out =
        String::from("timestamp,event_type,segment_sequence,duration,splice_command_type\n");
    for e in &events {
        out.push_str(&csv_row(&[
            e.timestamp.to_rfc3339(),
            e.event_type.clone(),
            e.segment_sequence.to_string(),
            String::new(),
            e.splice_command_type.clone().unwrap_or_default(),
        ]));
        out.push('\n');
    }

    Ok(csv_response(&config.name, "scte35", out))
}

/// GET /api/export/{id}/loudness.csv
async fn export_loudness(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let config = state
        .engine
        .stream_config(&id)
        .ok_or_else(|| ApiError::NotFound("Stream not found".into()))?;

    let history = state.engine.loudness_history(&id);
    if history.is_empty() {
        return Err(ApiError::NotFound("No loudness data available".into()));
    }

    let mut out = String::from(
        "timestamp,momentary_lufs,shortterm_lufs,integrated_lufs,rms_db,is_approximation\n",
    );
    for l in &history {
        out.push_str(&csv_row(&[
            l.timestamp.to_rfc3339(),
            opt(&l.momentary_lufs),
            opt(&l.shortterm_lufs),
            opt(&l.integrated_lufs),
            opt(&l.rms_db),
            l.is_approximation.to_string(),
        ]));
        out.push('\n');
    }

    Ok(csv_response(&config.name, "loudness", out))
}
