//! Shared-secret authentication middleware.

use crate::orchestrator::Orchestrator;
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;

pub const HEADER_API_KEY: &str = "x-api-key";
pub const QUERY_API_KEY: &str = "api_key";

/// Every request behind this middleware must present the configured shared
/// secret, either as an `X-API-Key` header or an `api_key` query parameter.
/// An empty configured key disables the check (the surface binds to
/// loopback by default).
pub async fn require_api_key(
    State(orchestrator): State<Arc<Orchestrator>>,
    request: Request,
    next: Next,
) -> Response {
    let expected = &orchestrator.config().http.api_key;
    if !expected.is_empty() {
        let provided = header_key(&request).or_else(|| query_key(&request));
        if provided.as_deref() != Some(expected.as_str()) {
            return (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({"error": "missing or invalid API key"})),
            )
                .into_response();
        }
    }
    orchestrator.stats().record_api_request();
    next.run(request).await
}

fn header_key(request: &Request) -> Option<String> {
    request
        .headers()
        .get(HEADER_API_KEY)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn query_key(request: &Request) -> Option<String> {
    let query = request.uri().query()?;
    for pair in query.split('&') {
        if let Some((key, value)) = pair.split_once('=') {
            if key == QUERY_API_KEY {
                return Some(value.to_string());
            }
        }
    }
    None
}
