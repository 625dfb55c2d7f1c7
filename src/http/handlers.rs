//! Request handlers. Heavy work is never done on the request path; commands
//! are enqueued into the orchestrator and answered with a ticket.

use crate::error::ShuttleError;
use crate::orchestrator::Orchestrator;
use crate::types::{DescriptorParams, Infohash};
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

/// JSON error body with the right status code.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<ShuttleError> for ApiError {
    fn from(err: ShuttleError) -> Self {
        let status = if err.is_validation() {
            StatusCode::BAD_REQUEST
        } else if matches!(err, ShuttleError::ShuttingDown) {
            StatusCode::SERVICE_UNAVAILABLE
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({"error": self.message})),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// =========================================================================
// Liveness and status
// =========================================================================

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok", "service": "torrent-shuttle"}))
}

pub async fn status(State(orchestrator): State<Arc<Orchestrator>>) -> Response {
    Json(orchestrator.status()).into_response()
}

// =========================================================================
// Notifications
// =========================================================================

#[derive(Debug, Deserialize)]
pub struct NotifyRequest {
    hash: String,
    #[serde(default)]
    params: Option<DescriptorParams>,
    #[serde(default)]
    priority: Option<i64>,
}

pub async fn notify_finished(
    State(orchestrator): State<Arc<Orchestrator>>,
    body: Bytes,
) -> ApiResult<Json<serde_json::Value>> {
    let body: NotifyRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("invalid JSON body: {e}")))?;
    let hash: Infohash = body
        .hash
        .parse()
        .map_err(|e: ShuttleError| ApiError::bad_request(e.to_string()))?;
    let queue_id = orchestrator.enqueue_torrent(hash, body.params, body.priority.unwrap_or(0))?;
    Ok(Json(serde_json::json!({"queue_id": queue_id})))
}

// =========================================================================
// Commands
// =========================================================================

pub async fn trigger_space(
    State(orchestrator): State<Arc<Orchestrator>>,
) -> ApiResult<Json<serde_json::Value>> {
    if orchestrator.is_shutting_down() {
        return Err(ShuttleError::ShuttingDown.into());
    }
    let scheduled = orchestrator.schedule_space_run();
    Ok(Json(serde_json::json!({"ok": true, "scheduled": scheduled})))
}

pub async fn clear_queue(
    State(orchestrator): State<Arc<Orchestrator>>,
) -> Json<serde_json::Value> {
    let cleared = orchestrator.clear_queue();
    Json(serde_json::json!({"cleared_count": cleared}))
}

pub async fn save_state(
    State(orchestrator): State<Arc<Orchestrator>>,
) -> ApiResult<Json<serde_json::Value>> {
    orchestrator.save_checkpoint()?;
    Ok(Json(serde_json::json!({"ok": true})))
}

// =========================================================================
// Tagging
// =========================================================================

#[derive(Debug, Default, Deserialize)]
pub struct ReconcileRequest {
    #[serde(default)]
    dry_run: bool,
}

pub async fn reconcile_tags(
    State(orchestrator): State<Arc<Orchestrator>>,
    body: Bytes,
) -> ApiResult<Json<serde_json::Value>> {
    // The body is optional; an empty one means a live reconcile.
    let request: ReconcileRequest = if body.is_empty() {
        ReconcileRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::bad_request(format!("invalid JSON body: {e}")))?
    };
    let (report, batch_id) = orchestrator.reconcile_tags(request.dry_run).await?;
    let mut response = serde_json::json!({
        "dry_run": report.dry_run,
        "examined": report.examined,
        "cache_tags_added": report.cache_tags_added,
        "bulk_tags_added": report.bulk_tags_added,
        "copies_needed": report.copies_needed.len(),
        "untaggable": report.untaggable,
    });
    if let Some(batch_id) = batch_id {
        response["copy_batch_id"] = serde_json::json!(batch_id);
    }
    Ok(Json(response))
}

pub async fn tag_summary(
    State(orchestrator): State<Arc<Orchestrator>>,
) -> ApiResult<Json<crate::tags::TagSummary>> {
    Ok(Json(orchestrator.tag_summary().await?))
}

// =========================================================================
// Copy operations
// =========================================================================

#[derive(Debug, Default, Deserialize)]
pub struct CopyStatusQuery {
    #[serde(default)]
    batch_id: Option<String>,
}

pub async fn copy_status(
    State(orchestrator): State<Arc<Orchestrator>>,
    Query(query): Query<CopyStatusQuery>,
) -> ApiResult<Response> {
    let batch_id = match query.batch_id {
        Some(raw) => Some(
            Uuid::parse_str(&raw)
                .map_err(|_| ApiError::bad_request(format!("invalid batch_id: {raw}")))?,
        ),
        None => None,
    };
    Ok(Json(orchestrator.copy_status(batch_id)).into_response())
}
