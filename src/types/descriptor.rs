use super::hash::Infohash;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Completion parameters as delivered by the torrent client's run-on-finish
/// hook (or the `params` object of a notify request).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DescriptorParams {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub content_path: String,
    #[serde(default)]
    pub save_path: String,
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub num_files: u64,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub tags: String,
    #[serde(default)]
    pub tracker: String,
    #[serde(default)]
    pub infohash_v2: Option<String>,
}

/// Full description of one torrent, mirroring the client's completion
/// parameters.
///
/// A descriptor is *complete* when name, content path and size are all
/// populated; otherwise it is *minimal* (hash-only) and must be hydrated
/// from the torrent client before work begins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TorrentDescriptor {
    pub hash: Infohash,
    #[serde(default)]
    pub hash_v2: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub content_path: PathBuf,
    #[serde(default)]
    pub save_path: PathBuf,
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub file_count: u64,
    #[serde(default)]
    pub category: String,
    /// Comma-joined user tags, verbatim from the client.
    #[serde(default)]
    pub tags: String,
    #[serde(default)]
    pub tracker: String,
    #[serde(default)]
    pub client_id: Option<i64>,
}

impl TorrentDescriptor {
    /// Minimal descriptor: hash only, to be hydrated before processing.
    pub fn minimal(hash: Infohash) -> Self {
        Self {
            hash,
            hash_v2: None,
            name: String::new(),
            content_path: PathBuf::new(),
            save_path: PathBuf::new(),
            size: 0,
            file_count: 0,
            category: String::new(),
            tags: String::new(),
            tracker: String::new(),
            client_id: None,
        }
    }

    pub fn from_params(hash: Infohash, params: DescriptorParams) -> Self {
        Self {
            hash,
            hash_v2: params.infohash_v2,
            name: params.name,
            content_path: PathBuf::from(params.content_path),
            save_path: PathBuf::from(params.save_path),
            size: params.size,
            file_count: params.num_files,
            category: params.category,
            tags: params.tags,
            tracker: params.tracker,
            client_id: None,
        }
    }

    /// A descriptor is complete when enough is known to process it without
    /// asking the torrent client.
    pub fn is_complete(&self) -> bool {
        !self.name.is_empty() && !self.content_path.as_os_str().is_empty() && self.size > 0
    }

    pub fn is_multi_file(&self) -> bool {
        self.file_count > 1
    }

    /// Parent directory of the content path.
    pub fn directory(&self) -> Option<&Path> {
        self.content_path.parent()
    }

    /// Tag list split out of the comma-joined form.
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
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash() -> Infohash {
        "a".repeat(40).parse().unwrap()
    }

    #[test]
    fn test_minimal_is_not_complete() {
        let d = TorrentDescriptor::minimal(hash());
        assert!(!d.is_complete());
        assert!(!d.is_multi_file());
    }

    #[test]
    fn test_from_params_complete() {
        let d = TorrentDescriptor::from_params(
            hash(),
            DescriptorParams {
                name: "m.mkv".into(),
                content_path: "/cache/downloads/radarr/m.mkv".into(),
                save_path: "/cache/downloads".into(),
                size: 1_073_741_824,
                num_files: 1,
                category: "radarr".into(),
                ..Default::default()
            },
        );
        assert!(d.is_complete());
        assert!(!d.is_multi_file());
        assert_eq!(
            d.directory(),
            Some(Path::new("/cache/downloads/radarr"))
        );
    }

    #[test]
    fn test_multi_file() {
        let mut d = TorrentDescriptor::minimal(hash());
        d.file_count = 12;
        assert!(d.is_multi_file());
    }

    #[test]
    fn test_tag_list() {
        let mut d = TorrentDescriptor::minimal(hash());
        d.tags = "ssd, hdd,  keep".to_string();
        assert_eq!(d.tag_list(), vec!["ssd", "hdd", "keep"]);
        assert!(d.has_tag("ssd"));
        assert!(d.has_tag("keep"));
        assert!(!d.has_tag("sd"));
    }

    #[test]
    fn test_empty_tags() {
        let d = TorrentDescriptor::minimal(hash());
        assert!(d.tag_list().is_empty());
    }
}
