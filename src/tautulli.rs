//! Streaming-activity oracle client (Tautulli).
//!
//! Eviction must not yank a file out from under an active Plex stream. This
//! client asks Tautulli for the current session list and reports the file
//! paths that are actively playing. The paths are in the oracle's view of
//! the filesystem; callers map them through [`crate::pathmap::PathMapper`].

use crate::config::TautulliConfig;
use crate::error::{ShuttleError, ShuttleResult};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, warn};

/// Session states that count as an active stream.
const ACTIVE_STATES: &[&str] = &["playing", "paused", "buffering"];

#[derive(Debug, Deserialize)]
struct ActivityEnvelope {
    response: ActivityResponse,
}

#[derive(Debug, Deserialize)]
struct ActivityResponse {
    #[serde(default)]
    data: ActivityData,
}

#[derive(Debug, Default, Deserialize)]
struct ActivityData {
    #[serde(default)]
    sessions: Vec<Session>,
}

#[derive(Debug, Deserialize)]
struct Session {
    #[serde(default)]
    state: String,
    #[serde(default)]
    file: String,
}

/// Client for Tautulli's `get_activity` API.
pub struct TautulliClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl TautulliClient {
    pub fn new(config: &TautulliConfig) -> ShuttleResult<Self> {
        let _ = reqwest::Url::parse(&config.url)
            .map_err(|e| ShuttleError::ClientInitializationError(format!("Invalid URL: {}", e)))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ShuttleError::ClientInitializationError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    /// File paths with an active stream, as the oracle sees them.
    ///
    /// Degrades to the empty set on any failure: the files being evicted are
    /// preserved on the bulk tier before deletion, so fail-open costs at
    /// worst one interrupted stream, not data.
    pub async fn active_files(&self) -> HashSet<String> {
        match self.fetch_activity().await {
            Ok(files) => files,
            Err(e) => {
                warn!(error = %e, "streaming oracle unavailable, treating as no active streams");
                HashSet::new()
            }
        }
    }

    async fn fetch_activity(&self) -> ShuttleResult<HashSet<String>> {
        let url = format!("{}/api/v2", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("apikey", self.api_key.as_str()), ("cmd", "get_activity")])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ShuttleError::ApiError {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let envelope: ActivityEnvelope = response.json().await?;
        let files: HashSet<String> = envelope
            .response
            .data
            .sessions
            .into_iter()
            .filter(|s| ACTIVE_STATES.contains(&s.state.as_str()) && !s.file.is_empty())
            .map(|s| s.file)
            .collect();
        debug!(active = files.len(), "fetched streaming activity");
        Ok(files)
    }
}
