//! Downstream media-indexer notifications (Sonarr and Radarr).
//!
//! After a completed torrent is copied to the bulk tier, the matching
//! indexer is told to scan it via its command API. Notification is
//! best-effort: a failure is logged and never fails the torrent.

use crate::config::{IndexerConfig, IndexersConfig};
use crate::error::{ShuttleError, ShuttleResult};
use crate::types::Infohash;
use reqwest::Client;
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Which indexer a client talks to; selects the scan command name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum IndexerKind {
    Sonarr,
    Radarr,
}

impl IndexerKind {
    fn command_name(self) -> &'static str {
        match self {
            IndexerKind::Sonarr => "DownloadedEpisodesScan",
            IndexerKind::Radarr => "DownloadedMoviesScan",
        }
    }
}

#[derive(Debug, Serialize)]
struct ScanCommand<'a> {
    name: &'a str,
    #[serde(rename = "downloadClientId")]
    download_client_id: &'a str,
    path: &'a str,
}

/// Client for one indexer's `/api/v3/command` endpoint.
pub struct IndexerClient {
    client: Client,
    kind: IndexerKind,
    base_url: String,
    api_key: String,
    category_tag: String,
}

impl IndexerClient {
    pub fn new(kind: IndexerKind, config: &IndexerConfig) -> ShuttleResult<Self> {
        let _ = reqwest::Url::parse(&config.url)
            .map_err(|e| ShuttleError::ClientInitializationError(format!("Invalid URL: {}", e)))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ShuttleError::ClientInitializationError(e.to_string()))?;

        Ok(Self {
            client,
            kind,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            category_tag: config.category_tag.clone(),
        })
    }

    /// Case-insensitive match of a torrent category against this indexer's
    /// configured category tag.
    pub fn matches_category(&self, category: &str) -> bool {
        !self.category_tag.is_empty() && self.category_tag.eq_ignore_ascii_case(category)
    }

    pub fn kind(&self) -> IndexerKind {
        self.kind
    }

    /// Issue the downloaded-content scan command for one completed torrent.
    pub async fn notify(&self, hash: &Infohash, path: &Path) -> ShuttleResult<()> {
        let url = format!("{}/api/v3/command", self.base_url);
        let path_str = path.to_string_lossy();
        let body = ScanCommand {
            name: self.kind.command_name(),
            download_client_id: hash.as_str(),
            path: &path_str,
        };

        let response = self
            .client
            .post(&url)
            .header("X-Api-Key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            info!(indexer = %self.kind, hash = %hash, path = %path_str, "indexer notified");
            Ok(())
        } else {
            Err(ShuttleError::ApiError {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            })
        }
    }
}

/// The configured set of indexers, resolved once at startup.
pub struct Indexers {
    enabled: bool,
    clients: Vec<IndexerClient>,
}

impl Indexers {
    pub fn from_config(config: &IndexersConfig) -> ShuttleResult<Self> {
        let mut clients = Vec::new();
        if config.sonarr.is_configured() {
            clients.push(IndexerClient::new(IndexerKind::Sonarr, &config.sonarr)?);
        }
        if config.radarr.is_configured() {
            clients.push(IndexerClient::new(IndexerKind::Radarr, &config.radarr)?);
        }
        Ok(Self {
            enabled: config.notify_enabled,
            clients,
        })
    }

    /// Notify the indexer whose category tag matches, if any. Best-effort.
    pub async fn notify_for_category(&self, category: &str, hash: &Infohash, path: &Path) {
        if !self.enabled {
            return;
        }
        let Some(client) = self.clients.iter().find(|c| c.matches_category(category)) else {
            return;
        };
        if let Err(e) = client.notify(hash, path).await {
            warn!(
                indexer = %client.kind(),
                hash = %hash,
                error = %e,
                "indexer notification failed, continuing"
            );
        }
    }
}
