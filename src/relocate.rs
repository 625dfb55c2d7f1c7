//! Relocation: moving a torrent's canonical location from cache to bulk.
//!
//! The plain protocol pauses the torrent, points the client at the bulk
//! tier, makes sure a verified bulk copy exists, then deletes the cache
//! copy and drops the cache tag. Nothing on the cache tier is ever deleted
//! unless the bulk destination verified against it and the resolved cache
//! path is strictly inside the configured cache root.
//!
//! The stream-aware variant runs first in import-script mode: it refuses to
//! evict content that is currently streaming and transparently rewrites
//! media-library symlinks to hardlinks against the bulk copy before the
//! cache copy disappears.

use crate::config::Config;
use crate::copy::CopyEngine;
use crate::error::{ShuttleError, ShuttleResult, SkipReason};
use crate::links::LinkResolver;
use crate::pathmap::PathMapper;
use crate::qbit::{QbitClient, Torrent};
use crate::tautulli::TautulliClient;
use crate::types::Infohash;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Everything the stream-aware variant needs beyond the plain protocol.
pub struct ImportContext {
    pub oracle: TautulliClient,
    pub mapper: PathMapper,
    pub resolver: LinkResolver,
}

/// Executes the relocation protocol for one torrent at a time.
pub struct Relocator {
    cache_root: PathBuf,
    bulk_root: PathBuf,
    cache_tag: String,
    copy: CopyEngine,
    copy_retry_attempts: u32,
    dry_run: bool,
    pause_settle: Duration,
    location_settle: Duration,
}

impl Relocator {
    pub fn from_config(config: &Config) -> Self {
        Self {
            cache_root: config.paths.cache_root.clone(),
            bulk_root: config.paths.bulk_root.clone(),
            cache_tag: config.tags.cache_tag.clone(),
            copy: CopyEngine::from_config(&config.processing),
            copy_retry_attempts: config.processing.copy_retry_attempts,
            dry_run: config.processing.dry_run,
            pause_settle: Duration::from_secs(1),
            location_settle: Duration::from_millis(500),
        }
    }

    /// Shrink the settle delays; for tests.
    #[doc(hidden)]
    pub fn with_settle_durations(mut self, pause: Duration, location: Duration) -> Self {
        self.pause_settle = pause;
        self.location_settle = location;
        self
    }

    fn expected_bulk_path(&self, torrent: &Torrent) -> PathBuf {
        self.bulk_root
            .join(&torrent.category)
            .join(torrent.name.trim())
    }

    /// The plain relocation protocol.
    pub async fn relocate(&self, qbit: &QbitClient, hash: &Infohash) -> ShuttleResult<()> {
        let torrent = self.fetch(qbit, hash).await?;
        self.run_protocol(qbit, hash, &torrent).await
    }

    /// The stream-aware variant, executed before the plain protocol in
    /// import-script mode.
    ///
    /// Skip outcomes (`streaming`, `no_links`, `no_hdd_copy`) mean "leave
    /// this torrent alone and move on"; the caller must not fall back to the
    /// plain protocol for them.
    pub async fn relocate_stream_aware(
        &self,
        qbit: &QbitClient,
        hash: &Infohash,
        ctx: &ImportContext,
    ) -> ShuttleResult<()> {
        let torrent = self.fetch(qbit, hash).await?;
        let cache_data = PathBuf::from(&torrent.content_path);

        // Streaming guard: any active session under the cache data path.
        let active = ctx.oracle.active_files().await;
        for file in &active {
            if ctx.mapper.same_file(&cache_data, Path::new(file)) {
                info!(hash = %hash, file = %file, "cache copy is streaming, skipping");
                return Err(ShuttleError::Skip(SkipReason::Streaming));
            }
        }

        let expected_bulk = self.expected_bulk_path(&torrent);
        let links = ctx.resolver.discover(&cache_data, &expected_bulk).await?;
        if links.total() == 0 {
            debug!(hash = %hash, "no library links reference the cache copy, skipping");
            return Err(ShuttleError::Skip(SkipReason::NoLinks));
        }

        let is_multi = cache_data.is_dir();
        if !expected_bulk.exists()
            || !self.copy.verify(&cache_data, &expected_bulk, is_multi).await
        {
            debug!(hash = %hash, dst = %expected_bulk.display(), "bulk copy missing or unverified, skipping");
            return Err(ShuttleError::Skip(SkipReason::NoHddCopy));
        }

        if !links.symlinks.is_empty() {
            if self.dry_run {
                info!(
                    hash = %hash,
                    count = links.symlinks.len(),
                    "dry run: would rewrite library symlinks to hardlinks"
                );
            } else {
                let rewritten = ctx
                    .resolver
                    .rewrite_symlinks(links.symlinks, &cache_data, &expected_bulk)
                    .await?;
                info!(hash = %hash, rewritten, "library symlinks rewritten to hardlinks");
            }
        }

        self.run_protocol(qbit, hash, &torrent).await
    }

    async fn fetch(&self, qbit: &QbitClient, hash: &Infohash) -> ShuttleResult<Torrent> {
        qbit.torrent_by_hash(hash)
            .await?
            .ok_or_else(|| ShuttleError::TorrentNotFound(hash.to_string()))
    }

    /// Steps 2-8 of the protocol, with best-effort resume on any failure
    /// after the pause.
    async fn run_protocol(
        &self,
        qbit: &QbitClient,
        hash: &Infohash,
        torrent: &Torrent,
    ) -> ShuttleResult<()> {
        if self.dry_run {
            info!(
                hash = %hash,
                name = %torrent.name,
                dst = %self.expected_bulk_path(torrent).display(),
                "dry run: would relocate cache copy to bulk"
            );
            return Ok(());
        }

        let was_running = torrent.is_running();
        if was_running {
            info!(hash = %hash, state = %torrent.state, "pausing torrent for relocation");
            qbit.pause(hash).await?;
            sleep(self.pause_settle).await;
        }

        let result = self.run_protocol_paused(qbit, hash, torrent).await;

        if was_running {
            if let Err(e) = qbit.resume(hash).await {
                warn!(hash = %hash, error = %e, "failed to resume torrent after relocation");
            }
        }
        result
    }

    async fn run_protocol_paused(
        &self,
        qbit: &QbitClient,
        hash: &Infohash,
        torrent: &Torrent,
    ) -> ShuttleResult<()> {
        let new_location = self.bulk_root.join(&torrent.category);
        qbit.set_location(hash, &new_location.to_string_lossy())
            .await?;
        sleep(self.location_settle).await;

        let cache_data = PathBuf::from(&torrent.content_path);
        let expected_bulk = self.expected_bulk_path(torrent);
        let is_multi = cache_data.is_dir();

        if !cache_data.exists() && expected_bulk.exists() {
            // Already-gone source: nothing to verify and nothing to delete.
            debug!(hash = %hash, "cache data already gone, bulk copy present");
        } else {
            // The bulk destination must verify against the cache source
            // immediately before any delete on the cache tier.
            let verified = expected_bulk.exists()
                && self.copy.verify(&cache_data, &expected_bulk, is_multi).await;
            if !verified {
                if expected_bulk.exists() {
                    warn!(
                        hash = %hash,
                        dst = %expected_bulk.display(),
                        "existing bulk copy failed verification, recreating"
                    );
                    self.copy.cleanup(&expected_bulk).await?;
                } else {
                    info!(
                        hash = %hash,
                        src = %cache_data.display(),
                        dst = %expected_bulk.display(),
                        "bulk copy absent, creating"
                    );
                }
                self.copy
                    .copy_verified(&cache_data, &expected_bulk, is_multi, self.copy_retry_attempts)
                    .await?;
            }
        }

        self.delete_cache_data(hash, &cache_data).await?;

        qbit.remove_tags(hash, &self.cache_tag).await?;
        info!(hash = %hash, name = %torrent.name, "relocation complete");
        Ok(())
    }

    /// Safety-checked removal of the cache copy. A missing source counts as
    /// already deleted.
    async fn delete_cache_data(&self, hash: &Infohash, cache_data: &Path) -> ShuttleResult<()> {
        let real = match cache_data.canonicalize() {
            Ok(p) => p,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Missing (or dangling-symlink) source: nothing to delete.
                debug!(hash = %hash, path = %cache_data.display(), "cache data already gone");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let real_root = self.cache_root.canonicalize().map_err(|e| {
            ShuttleError::IoError(format!(
                "cannot resolve cache root {}: {e}",
                self.cache_root.display()
            ))
        })?;

        if !real.starts_with(&real_root) || real == real_root {
            return Err(ShuttleError::SafetyViolation {
                path: real.display().to_string(),
                root: real_root.display().to_string(),
            });
        }

        let real_clone = real.clone();
        tokio::task::spawn_blocking(move || {
            let meta = match std::fs::symlink_metadata(&real_clone) {
                Ok(m) => m,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
                Err(e) => return Err(e),
            };
            if meta.is_dir() {
                std::fs::remove_dir_all(&real_clone)
            } else {
                std::fs::remove_file(&real_clone)
            }
        })
        .await
        .map_err(|e| ShuttleError::IoError(format!("delete task panicked: {e}")))??;

        info!(hash = %hash, path = %real.display(), "cache copy deleted");
        Ok(())
    }
}
