//! The on-completion pipeline: verified copy to bulk, tag, notify indexer.

use crate::config::Config;
use crate::copy::CopyEngine;
use crate::error::{ShuttleError, ShuttleResult};
use crate::indexer::Indexers;
use crate::qbit::QbitClient;
use crate::tags::TaggingEngine;
use crate::types::{Infohash, TorrentDescriptor};
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// How many times a hydration fetch is attempted before giving up.
const HYDRATE_ATTEMPTS: u32 = 3;

/// Runs the completion pipeline for one torrent.
pub struct Finisher {
    bulk_root: PathBuf,
    retry_attempts: u32,
    copy: CopyEngine,
    tagging: TaggingEngine,
    indexers: Indexers,
    /// Settle delay before fetching file listings for a fresh completion
    stability_delay: Duration,
    /// Base for the exponential backoff between hydration attempts
    backoff_base: Duration,
    /// Deadline applied to each torrent-info fetch
    fetch_guard: Duration,
}

impl Finisher {
    pub fn from_config(config: &Config) -> ShuttleResult<Self> {
        Ok(Self {
            bulk_root: config.paths.bulk_root.clone(),
            retry_attempts: config.processing.copy_retry_attempts.max(1),
            copy: CopyEngine::from_config(&config.processing),
            tagging: TaggingEngine::from_config(config),
            indexers: Indexers::from_config(&config.indexers)?,
            stability_delay: Duration::from_secs(3),
            backoff_base: Duration::from_secs(1),
            fetch_guard: Duration::from_secs(30),
        })
    }

    /// Shrink the delays; for tests.
    #[doc(hidden)]
    pub fn with_delays(mut self, stability: Duration, backoff: Duration) -> Self {
        self.stability_delay = stability;
        self.backoff_base = backoff;
        self
    }

    /// Process one completed torrent end to end. Returns the bulk-tier data
    /// path on success.
    pub async fn finish(
        &self,
        qbit: &QbitClient,
        descriptor: &TorrentDescriptor,
    ) -> ShuttleResult<PathBuf> {
        let descriptor = if descriptor.is_complete() {
            descriptor.clone()
        } else {
            info!(hash = %descriptor.hash, "minimal descriptor, hydrating from client");
            self.hydrate(qbit, &descriptor.hash).await?
        };

        self.tagging.auto_tag(qbit, &descriptor).await?;

        let hdd_data = self
            .bulk_root
            .join(&descriptor.category)
            .join(descriptor.name.trim());
        let is_multi = descriptor.is_multi_file();

        let mut need_copy = true;
        if hdd_data.exists() {
            if self
                .copy
                .verify(&descriptor.content_path, &hdd_data, is_multi)
                .await
            {
                info!(hash = %descriptor.hash, dst = %hdd_data.display(), "destination already verified, skipping copy");
                need_copy = false;
            } else {
                warn!(hash = %descriptor.hash, dst = %hdd_data.display(), "stale destination failed verification, cleaning");
                self.copy.cleanup(&hdd_data).await?;
            }
        }

        if need_copy {
            self.copy
                .copy_verified(
                    &descriptor.content_path,
                    &hdd_data,
                    is_multi,
                    self.retry_attempts,
                )
                .await?;
        }

        if self.copy.dry_run() {
            info!(hash = %descriptor.hash, "dry run: skipping bulk tag and indexer notification");
            return Ok(hdd_data);
        }

        qbit.add_tags(&descriptor.hash, self.tagging.bulk_tag())
            .await?;

        self.indexers
            .notify_for_category(&descriptor.category, &descriptor.hash, &hdd_data)
            .await;

        info!(
            hash = %descriptor.hash,
            name = %descriptor.name,
            dst = %hdd_data.display(),
            "completion pipeline finished"
        );
        Ok(hdd_data)
    }

    /// Fetch a full descriptor for a hash-only completion. Waits for the
    /// client to settle, then fetches info and the file listing with a
    /// deadline per call and exponential backoff between attempts.
    async fn hydrate(
        &self,
        qbit: &QbitClient,
        hash: &Infohash,
    ) -> ShuttleResult<TorrentDescriptor> {
        sleep(self.stability_delay).await;

        let mut last_err = ShuttleError::TorrentNotFound(hash.to_string());
        for attempt in 0..HYDRATE_ATTEMPTS {
            if attempt > 0 {
                let backoff = self.backoff_base * 2u32.pow(attempt - 1);
                debug!(hash = %hash, attempt, backoff_ms = backoff.as_millis() as u64, "hydration retry");
                sleep(backoff).await;
            }
            match self.try_hydrate(qbit, hash).await {
                Ok(descriptor) => return Ok(descriptor),
                Err(e) if e.is_transient() => {
                    warn!(hash = %hash, attempt, error = %e, "hydration attempt failed");
                    last_err = e;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err)
    }

    async fn try_hydrate(
        &self,
        qbit: &QbitClient,
        hash: &Infohash,
    ) -> ShuttleResult<TorrentDescriptor> {
        let torrent = timeout(self.fetch_guard, qbit.torrent_by_hash(hash))
            .await
            .map_err(|_| ShuttleError::ReadTimeout)??
            .ok_or_else(|| ShuttleError::TorrentNotFound(hash.to_string()))?;

        let files = timeout(self.fetch_guard, qbit.torrents_files(hash))
            .await
            .map_err(|_| ShuttleError::ReadTimeout)??;

        torrent.to_descriptor(files.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexerConfig;
    use crate::types::DescriptorParams;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;
    use wiremock::matchers::{body_json, body_string_contains, header, method, path as url_path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const HASH: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";

    struct Fixture {
        _tmp: TempDir,
        config: Config,
        cache_file: PathBuf,
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.paths.cache_root = tmp.path().join("cache");
        config.paths.bulk_root = tmp.path().join("bulk");
        let cache_file = config.paths.cache_root.join("radarr/m.mkv");
        fs::create_dir_all(cache_file.parent().unwrap()).unwrap();
        fs::write(&cache_file, b"movie data").unwrap();
        Fixture {
            _tmp: tmp,
            config,
            cache_file,
        }
    }

    fn finisher(config: &Config) -> Finisher {
        Finisher::from_config(config)
            .unwrap()
            .with_delays(Duration::from_millis(1), Duration::from_millis(1))
    }

    fn descriptor(fx: &Fixture) -> TorrentDescriptor {
        TorrentDescriptor::from_params(
            HASH.parse().unwrap(),
            DescriptorParams {
                name: "m.mkv".into(),
                content_path: fx.cache_file.to_string_lossy().to_string(),
                save_path: fx
                    .cache_file
                    .parent()
                    .unwrap()
                    .to_string_lossy()
                    .to_string(),
                size: 10,
                num_files: 1,
                category: "radarr".into(),
                ..Default::default()
            },
        )
    }

    async fn qbit_for(server: &MockServer) -> QbitClient {
        QbitClient::with_base_url(&Default::default(), server.uri()).unwrap()
    }

    async fn mount_tag_endpoints(server: &MockServer) {
        Mock::given(method("POST"))
            .and(url_path("/api/v2/torrents/addTags"))
            .respond_with(ResponseTemplate::new(200))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_happy_path_copies_tags_and_notifies() {
        let fx = fixture();
        let qbit_server = MockServer::start().await;
        let radarr = MockServer::start().await;
        mount_tag_endpoints(&qbit_server).await;

        let mut config = fx.config.clone();
        config.indexers.radarr = IndexerConfig {
            url: radarr.uri(),
            api_key: "rk".to_string(),
            category_tag: "radarr".to_string(),
        };

        let expected_path = config.paths.bulk_root.join("radarr/m.mkv");
        Mock::given(method("POST"))
            .and(url_path("/api/v3/command"))
            .and(header("X-Api-Key", "rk"))
            .and(body_json(serde_json::json!({
                "name": "DownloadedMoviesScan",
                "downloadClientId": HASH,
                "path": expected_path.to_str().unwrap()
            })))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&radarr)
            .await;

        let result = finisher(&config)
            .finish(&qbit_for(&qbit_server).await, &descriptor(&fx))
            .await
            .unwrap();

        assert_eq!(result, expected_path);
        assert_eq!(fs::read(&expected_path).unwrap(), b"movie data");
        radarr.verify().await;
    }

    #[tokio::test]
    async fn test_adds_bulk_tag() {
        let fx = fixture();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(url_path("/api/v2/torrents/addTags"))
            .and(body_string_contains("tags=hdd"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        // auto_tag adds the cache tag first.
        Mock::given(method("POST"))
            .and(url_path("/api/v2/torrents/addTags"))
            .and(body_string_contains("tags=ssd"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        finisher(&fx.config)
            .finish(&qbit_for(&server).await, &descriptor(&fx))
            .await
            .unwrap();
        server.verify().await;
    }

    #[tokio::test]
    async fn test_existing_verified_destination_skips_copy() {
        let fx = fixture();
        let server = MockServer::start().await;
        mount_tag_endpoints(&server).await;

        let dst = fx.config.paths.bulk_root.join("radarr/m.mkv");
        fs::create_dir_all(dst.parent().unwrap()).unwrap();
        fs::write(&dst, b"movie data").unwrap();
        let mtime_before = fs::metadata(&dst).unwrap().modified().unwrap();

        finisher(&fx.config)
            .finish(&qbit_for(&server).await, &descriptor(&fx))
            .await
            .unwrap();

        // Unchanged: same mtime means no re-copy happened.
        assert_eq!(fs::metadata(&dst).unwrap().modified().unwrap(), mtime_before);
    }

    #[tokio::test]
    async fn test_stale_destination_is_replaced() {
        let fx = fixture();
        let server = MockServer::start().await;
        mount_tag_endpoints(&server).await;

        let dst = fx.config.paths.bulk_root.join("radarr/m.mkv");
        fs::create_dir_all(dst.parent().unwrap()).unwrap();
        fs::write(&dst, b"partial").unwrap();

        finisher(&fx.config)
            .finish(&qbit_for(&server).await, &descriptor(&fx))
            .await
            .unwrap();

        assert_eq!(fs::read(&dst).unwrap(), b"movie data");
    }

    #[tokio::test]
    async fn test_hydrates_minimal_descriptor() {
        let fx = fixture();
        let server = MockServer::start().await;
        mount_tag_endpoints(&server).await;

        Mock::given(method("GET"))
            .and(url_path("/api/v2/torrents/info"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{
                "hash": HASH,
                "name": "m.mkv",
                "content_path": fx.cache_file.to_str().unwrap(),
                "save_path": fx.cache_file.parent().unwrap().to_str().unwrap(),
                "size": 10,
                "category": "radarr",
                "tags": "",
                "state": "uploading"
            }])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(url_path("/api/v2/torrents/files"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"name": "m.mkv", "size": 10}
            ])))
            .mount(&server)
            .await;

        let minimal = TorrentDescriptor::minimal(HASH.parse().unwrap());
        let result = finisher(&fx.config)
            .finish(&qbit_for(&server).await, &minimal)
            .await
            .unwrap();
        assert_eq!(result, fx.config.paths.bulk_root.join("radarr/m.mkv"));
        assert!(result.exists());
    }

    #[tokio::test]
    async fn test_hydrate_unknown_hash_fails() {
        let fx = fixture();
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(url_path("/api/v2/torrents/info"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        let minimal = TorrentDescriptor::minimal(HASH.parse().unwrap());
        let err = finisher(&fx.config)
            .finish(&qbit_for(&server).await, &minimal)
            .await
            .unwrap_err();
        assert!(matches!(err, ShuttleError::TorrentNotFound(_)));
    }

    #[tokio::test]
    async fn test_indexer_failure_does_not_fail_torrent() {
        let fx = fixture();
        let qbit_server = MockServer::start().await;
        let radarr = MockServer::start().await;
        mount_tag_endpoints(&qbit_server).await;
        Mock::given(method("POST"))
            .and(url_path("/api/v3/command"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&radarr)
            .await;

        let mut config = fx.config.clone();
        config.indexers.radarr = IndexerConfig {
            url: radarr.uri(),
            api_key: "rk".to_string(),
            category_tag: "radarr".to_string(),
        };

        finisher(&config)
            .finish(&qbit_for(&qbit_server).await, &descriptor(&fx))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_copy_failure_propagates() {
        let fx = fixture();
        let server = MockServer::start().await;
        mount_tag_endpoints(&server).await;

        let mut d = descriptor(&fx);
        d.content_path = Path::new("/no/such/source.mkv").to_path_buf();

        let err = finisher(&fx.config)
            .finish(&qbit_for(&server).await, &d)
            .await
            .unwrap_err();
        assert!(matches!(err, ShuttleError::VerificationFailed { .. }));
    }

    #[tokio::test]
    async fn test_dry_run_skips_mutations() {
        let fx = fixture();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(url_path("/api/v2/torrents/addTags"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let mut config = fx.config.clone();
        config.processing.dry_run = true;

        finisher(&config)
            .finish(&qbit_for(&server).await, &descriptor(&fx))
            .await
            .unwrap();
        assert!(!config.paths.bulk_root.join("radarr/m.mkv").exists());
        server.verify().await;
    }
}
