use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use streamprobe_core::webhook::{WebhookConfig, WebhookUpdate};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateWebhookRequest {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub secret: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/webhooks", get(list_webhooks).post(create_webhook))
        .route(
            "/api/webhooks/{id}",
            get(get_webhook).put(update_webhook).delete(delete_webhook),
        )
        .route("/api/webhooks/{id}/test", post(test_webhook))
}

fn is_valid_url(s: &str) -> bool {
    url::Url::parse(s)
        .map(|u| u.scheme() == "http" || u.scheme() == "https")
        .unwrap_or(false)
}

/// GET /api/webhooks
async fn list_webhooks(State(state): State<AppState>) -> Json<serde_json::Value> {
    let webhooks = state.webhooks.list();
    Json(serde_json::json!({ "webhooks": webhooks }))
}

/// POST /api/webhooks
async fn create_webhook(
    State(state): State<AppState>,
    Json(body): Json<CreateWebhookRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if !is_valid_url(&body.url) {
        return Err(ApiError::BadRequest(format!("Invalid URL: {}", body.url)));
    }

    let mut config = WebhookConfig::new(body.name, body.url);
    config.events = body.events;
    config.headers = body.headers;
    config.secret = body.secret;
    config.enabled = body.enabled;

    let created = state.webhooks.add(config);
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /api/webhooks/{id}
async fn get_webhook(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<WebhookConfig>, ApiError> {
    state
        .webhooks
        .get(&id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Webhook not found".into()))
}

/// PUT /api/webhooks/{id}
async fn update_webhook(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(update): Json<WebhookUpdate>,
) -> Result<Json<WebhookConfig>, ApiError> {
    if let Some(ref url) = update.url {
        if !is_valid_url(url) {
            return Err(ApiError::BadRequest(format!("Invalid URL: {url}")));
        }
    }
    state
        .webhooks
        .update(&id, update)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Webhook not found".into()))
}

/// DELETE /api/webhooks/{id}
async fn delete_webhook(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !state.webhooks.delete(&id) {
        return Err(ApiError::NotFound("Webhook not found".into()));
    }
    Ok(Json(
        serde_json::json!({ "status": "deleted", "webhook_id": id }),
    ))
}

/// POST /api/webhooks/{id}/test
async fn test_webhook(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    match state.webhooks.send_test(&id).await {
        Ok(()) => Ok(Json(serde_json::json!({ "status": "delivered" }))),
        Err(e) if e == "Webhook not found" => Err(ApiError::NotFound(e)),
        Err(e) => Err(ApiError::Internal(format!("Test delivery failed: {e}"))),
    }
}
