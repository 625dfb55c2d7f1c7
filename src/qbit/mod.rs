//! qBittorrent WebUI API client and shared session pool.

pub mod client;
pub mod types;

pub use client::QbitClient;
pub use types::{InfoQuery, Torrent, TorrentFile, RUNNING_STATES};

use crate::config::QbitConfig;
use crate::error::ShuttleResult;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Lazily-initialized shared qBittorrent session.
///
/// Workers check the session out for every batch of calls; each checkout
/// performs a cheap liveness probe and recreates the session (with a fresh
/// login) when the probe fails.
pub struct QbitPool {
    config: QbitConfig,
    inner: Mutex<Option<Arc<QbitClient>>>,
}

impl QbitPool {
    pub fn new(config: QbitConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(None),
        }
    }

    /// Check out a live session, creating or recreating it as needed.
    pub async fn get(&self) -> ShuttleResult<Arc<QbitClient>> {
        let mut guard = self.inner.lock().await;

        if let Some(client) = guard.as_ref() {
            match client.version().await {
                Ok(_) => return Ok(Arc::clone(client)),
                Err(e) => {
                    warn!(error = %e, "qBittorrent session stale, recreating");
                    *guard = None;
                }
            }
        }

        debug!(url = %self.config.base_url(), "creating qBittorrent session");
        let client = Arc::new(QbitClient::new(&self.config)?);
        client.login().await?;
        info!(url = %self.config.base_url(), "qBittorrent session established");
        *guard = Some(Arc::clone(&client));
        Ok(client)
    }

    /// Log out and drop the session, if one exists.
    pub async fn close(&self) {
        let mut guard = self.inner.lock().await;
        if let Some(client) = guard.take() {
            if let Err(e) = client.logout().await {
                debug!(error = %e, "qBittorrent logout failed");
            }
        }
    }
}
