use crate::types::{Infohash, TorrentDescriptor};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// States in which a torrent is considered actively running and must be
/// paused (and later resumed) around a relocation.
pub const RUNNING_STATES: &[&str] = &[
    "downloading",
    "uploading",
    "stalledDL",
    "stalledUP",
    "queuedDL",
    "queuedUP",
    "checkingDL",
    "checkingUP",
    "forcedDL",
    "forcedUP",
];

/// One torrent as returned by `torrents/info`.
///
/// Only the attributes this daemon consumes; the WebUI API returns many
/// more and serde ignores them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Torrent {
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub infohash_v2: Option<String>,
    #[serde(default)]
    pub name: String,
    /// Absolute path of torrent content (root path for multifile torrents,
    /// absolute file path for singlefile torrents)
    #[serde(default)]
    pub content_path: String,
    /// Path where this torrent's data is stored
    #[serde(default)]
    pub save_path: String,
    /// Total size (bytes) of files selected for download
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub category: String,
    /// Comma-concatenated tag list of the torrent
    #[serde(default)]
    pub tags: String,
    #[serde(default)]
    pub state: String,
    /// Time (Unix Epoch) when the torrent completed
    #[serde(default)]
    pub completion_on: Option<i64>,
    /// Last time (Unix Epoch) when a chunk was downloaded/uploaded
    #[serde(default)]
    pub last_activity: Option<i64>,
    /// The first tracker with working status; empty if none
    #[serde(default)]
    pub tracker: String,
    #[serde(default)]
    pub added_on: Option<i64>,
    #[serde(default)]
    pub progress: Option<f64>,
}

impl Torrent {
    pub fn is_running(&self) -> bool {
        RUNNING_STATES.contains(&self.state.as_str())
    }

    pub fn tag_list(&self) -> Vec<&str> {
        self.tags
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect()
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tag_list().iter().any(|t| *t == tag)
    }

    /// Best-effort completion instant for eviction ordering: completion time,
    /// falling back to last activity, falling back to the caller's `now`.
    pub fn completion_timestamp(&self, now: i64) -> i64 {
        match self.completion_on {
            Some(t) if t > 0 => t,
            _ => match self.last_activity {
                Some(t) if t > 0 => t,
                _ => now,
            },
        }
    }

    /// Build a descriptor from the wire object. `file_count` comes from a
    /// separate `torrents/files` call and is supplied by the caller.
    pub fn to_descriptor(&self, file_count: u64) -> Result<TorrentDescriptor, crate::error::ShuttleError> {
        let hash: Infohash = self.hash.parse()?;
        Ok(TorrentDescriptor {
            hash,
            hash_v2: self.infohash_v2.clone(),
            name: self.name.clone(),
            content_path: PathBuf::from(&self.content_path),
            save_path: PathBuf::from(&self.save_path),
            size: self.size,
            file_count,
            category: self.category.clone(),
            tags: self.tags.clone(),
            tracker: self.tracker.clone(),
            client_id: None,
        })
    }
}

/// One file entry as returned by `torrents/files`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TorrentFile {
    pub name: String,
    pub size: i64,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub priority: Option<i64>,
}

/// Query parameters for `torrents/info`.
#[derive(Debug, Clone, Default)]
pub struct InfoQuery {
    pub hashes: Option<String>,
    pub filter: Option<String>,
    pub tag: Option<String>,
    pub category: Option<String>,
}

impl InfoQuery {
    pub fn by_hash(hash: &Infohash) -> Self {
        Self {
            hashes: Some(hash.to_string()),
            ..Default::default()
        }
    }

    pub fn completed_with_tag(tag: &str) -> Self {
        Self {
            filter: Some("completed".to_string()),
            tag: Some(tag.to_string()),
            ..Default::default()
        }
    }

    pub fn completed() -> Self {
        Self {
            filter: Some("completed".to_string()),
            ..Default::default()
        }
    }

    pub(crate) fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(hashes) = &self.hashes {
            params.push(("hashes", hashes.clone()));
        }
        if let Some(filter) = &self.filter {
            params.push(("filter", filter.clone()));
        }
        if let Some(tag) = &self.tag {
            params.push(("tag", tag.clone()));
        }
        if let Some(category) = &self.category {
            params.push(("category", category.clone()));
        }
        params
    }
}
