//! The daemon's own HTTP surface: auth-gated command and notification
//! endpoints feeding the orchestrator, plus status reporting.

pub mod auth;
pub mod handlers;

use crate::orchestrator::Orchestrator;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Build the router: one public liveness route, everything else behind the
/// shared-secret middleware.
pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    if orchestrator.config().http.api_key.is_empty() {
        warn!("http.api_key is empty; API authentication is disabled");
    }

    let protected = Router::new()
        .route("/status", get(handlers::status))
        .route("/notify/torrent-finished", post(handlers::notify_finished))
        .route("/space-management/trigger", post(handlers::trigger_space))
        .route("/queue/clear", post(handlers::clear_queue))
        .route("/tags/existing", post(handlers::reconcile_tags))
        .route("/tags/summary", get(handlers::tag_summary))
        .route("/state/save", post(handlers::save_state))
        .route("/copy-operations/status", get(handlers::copy_status))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&orchestrator),
            auth::require_api_key,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .merge(protected)
        .with_state(orchestrator)
}

/// Serve the API until the shutdown future resolves.
pub async fn serve(
    orchestrator: Arc<Orchestrator>,
    listener: TcpListener,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    info!(addr = %addr, "http surface listening");
    axum::serve(listener, router(orchestrator))
        .with_graceful_shutdown(shutdown)
        .await
}
