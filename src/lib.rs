//! # torrent-shuttle
//!
//! A long-running daemon that mediates between qBittorrent, a fast "cache"
//! storage tier (SSD), and a slower "bulk" storage tier (HDD), plus the
//! downstream media indexers (Sonarr/Radarr) and a streaming-activity
//! oracle (Tautulli).
//!
//! ## Overview
//!
//! When a torrent finishes on the cache tier, the daemon copies its content
//! to the bulk tier with verification, tags the torrent with its locations,
//! and notifies the matching indexer. When cache free space falls below a
//! threshold, it relocates the oldest dual-located torrents off the cache.
//! In import-script mode it additionally refuses to evict content that is
//! currently being streamed and transparently replaces media-library
//! symlinks with hardlinks to the bulk copy before deleting the cache copy.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     HTTP surface (axum)                      │
//! │  /notify/torrent-finished  /space-management/trigger  ...    │
//! └──────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Orchestrator                          │
//! │  priority queues · bounded pools · checkpoint/restore        │
//! └──────────────────────────────────────────────────────────────┘
//!            │                  │                    │
//!            ▼                  ▼                    ▼
//!       ┌─────────┐       ┌───────────┐       ┌─────────────┐
//!       │Finisher │       │ Relocator │       │TaggingEngine│
//!       └─────────┘       └───────────┘       └─────────────┘
//!            │                  │                    │
//!            ▼                  ▼                    ▼
//!   Copy Engine · Link Resolver · qBittorrent · Tautulli · indexers
//! ```
//!
//! Control flow is single-direction: the HTTP surface feeds the
//! orchestrator, which drives the pipelines, which call the external
//! services. Nothing downstream ever calls back into the orchestrator.
//!
//! ## Modules
//!
//! - [`config`] - Configuration via config files, env vars and CLI
//! - [`copy`] - Verified copies with retry and cleanup
//! - [`finish`] - The on-completion pipeline
//! - [`http`] - The auth-gated HTTP surface
//! - [`indexer`] - Sonarr/Radarr command API clients
//! - [`links`] - Media-library symlink/hardlink discovery and rewriting
//! - [`orchestrator`] - Queues, pools, statistics, checkpointing
//! - [`pathmap`] - Daemon-local to oracle-visible path translation
//! - [`qbit`] - qBittorrent WebUI API client and session pool
//! - [`relocate`] - The cache-to-bulk relocation protocol
//! - [`tags`] - Location tagging and reconciliation
//! - [`tautulli`] - Streaming-activity oracle client
//!
//! ## Safety invariant
//!
//! No delete on the cache tier may occur unless (a) the bulk destination
//! verifies against the cache source, and (b) the resolved real path of the
//! cache source is strictly inside the configured cache root. The
//! [`relocate::Relocator`] enforces both; a violation fails that operation
//! and, during space reclamation, stops the whole pass.
//!
//! ## Shutdown and recovery
//!
//! SIGTERM/SIGINT trigger a graceful shutdown: new work is refused, the
//! queue and running set are checkpointed atomically, the pools get up to
//! 30 seconds to drain, and the qBittorrent session is logged out. On the
//! next start a valid checkpoint is restored with previously-running items
//! re-enqueued ahead of fresh work.

pub mod config;
pub mod copy;
pub mod error;
pub mod finish;
pub mod http;
pub mod indexer;
pub mod links;
pub mod orchestrator;
pub mod pathmap;
pub mod qbit;
pub mod relocate;
pub mod stats;
pub mod tags;
pub mod tautulli;
pub mod types;

pub use config::{CliArgs, Config};
pub use error::{ShuttleError, ShuttleResult, SkipReason};
pub use orchestrator::Orchestrator;
pub use types::{Infohash, TorrentDescriptor};

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

/// Run the daemon until a shutdown signal arrives.
///
/// Builds the orchestrator, restores any checkpoint from a previous run,
/// then serves the HTTP surface. SIGTERM and SIGINT trigger the graceful
/// shutdown path before the server exits.
pub async fn run(config: Config) -> Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "torrent-shuttle starting");
    if config.processing.dry_run {
        warn!("===== DRY RUN MODE - NO CHANGES WILL BE MADE =====");
    }
    config.log_summary();

    let http_config = config.http.clone();
    let orchestrator = Orchestrator::new(Arc::new(config)).context("failed to build orchestrator")?;

    let restored = orchestrator
        .restore_checkpoint()
        .context("failed to restore checkpoint")?;
    if restored > 0 {
        info!(restored, "resumed work from checkpoint");
    }

    let listener = tokio::net::TcpListener::bind((http_config.host.as_str(), http_config.port))
        .await
        .with_context(|| format!("failed to bind {}:{}", http_config.host, http_config.port))?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let signal_orchestrator = Arc::clone(&orchestrator);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received");
        signal_orchestrator.shutdown().await;
        let _ = shutdown_tx.send(());
    });

    http::serve(orchestrator, listener, async {
        let _ = shutdown_rx.await;
    })
    .await
    .context("http server error")?;

    info!("torrent-shuttle stopped");
    Ok(())
}

async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "cannot install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = tokio::signal::ctrl_c() => {}
    }
}
