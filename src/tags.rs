//! Location tagging: classification, reconciliation and auto-tagging.
//!
//! Two reserved user tags record where a torrent's data lives: the cache
//! tag and the bulk tag. A torrent carrying both ("dual") is eligible for
//! eviction from the cache tier.

use crate::config::Config;
use crate::copy::CopyEngine;
use crate::error::ShuttleResult;
use crate::qbit::{InfoQuery, QbitClient, Torrent};
use crate::types::{Infohash, TorrentDescriptor};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Where a torrent sits according to its location tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationClass {
    CacheOnly,
    BulkOnly,
    Dual,
    Untagged,
}

pub fn classify(has_cache_tag: bool, has_bulk_tag: bool) -> LocationClass {
    match (has_cache_tag, has_bulk_tag) {
        (true, true) => LocationClass::Dual,
        (true, false) => LocationClass::CacheOnly,
        (false, true) => LocationClass::BulkOnly,
        (false, false) => LocationClass::Untagged,
    }
}

/// Tag counts over the whole client, exposed on `/tags/summary`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TagSummary {
    pub total: usize,
    pub cache_only: usize,
    pub bulk_only: usize,
    pub dual: usize,
    pub untagged: usize,
}

/// A verified copy the reconciler wants performed; on success the copy
/// worker adds the bulk tag.
#[derive(Debug, Clone)]
pub struct CopyRequest {
    pub hash: Infohash,
    pub name: String,
    pub src: PathBuf,
    pub dst: PathBuf,
    pub size: i64,
    pub is_multi_file: bool,
}

/// One torrent the reconciler could not tag, with the reason.
#[derive(Debug, Clone, Serialize)]
pub struct Untaggable {
    pub hash: String,
    pub name: String,
    pub reason: String,
}

/// Outcome of a reconcile pass. In dry-run mode the counts describe the
/// plan; nothing was changed.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub dry_run: bool,
    pub examined: usize,
    pub cache_tags_added: usize,
    pub bulk_tags_added: usize,
    pub copies_needed: Vec<CopyRequest>,
    pub untaggable: Vec<Untaggable>,
}

/// Computes and applies location tags.
pub struct TaggingEngine {
    cache_root: PathBuf,
    bulk_root: PathBuf,
    cache_tag: String,
    bulk_tag: String,
    auto_tag_new: bool,
    dry_run: bool,
    copy: CopyEngine,
}

impl TaggingEngine {
    pub fn from_config(config: &Config) -> Self {
        Self {
            cache_root: config.paths.cache_root.clone(),
            bulk_root: config.paths.bulk_root.clone(),
            cache_tag: config.tags.cache_tag.clone(),
            bulk_tag: config.tags.bulk_tag.clone(),
            auto_tag_new: config.tags.auto_tag_new,
            dry_run: config.processing.dry_run,
            copy: CopyEngine::from_config(&config.processing),
        }
    }

    pub fn cache_tag(&self) -> &str {
        &self.cache_tag
    }

    pub fn bulk_tag(&self) -> &str {
        &self.bulk_tag
    }

    /// Expected bulk-tier location for a torrent: `bulk_root / category /
    /// trimmed name`.
    pub fn expected_bulk_path(&self, category: &str, name: &str) -> PathBuf {
        self.bulk_root.join(category).join(name.trim())
    }

    /// Classify every torrent in the client by its location-tag pair.
    pub async fn summary(&self, qbit: &QbitClient) -> ShuttleResult<TagSummary> {
        let torrents = qbit.torrents_info(&InfoQuery::default()).await?;
        let mut summary = TagSummary {
            total: torrents.len(),
            ..Default::default()
        };
        for t in &torrents {
            match classify(t.has_tag(&self.cache_tag), t.has_tag(&self.bulk_tag)) {
                LocationClass::CacheOnly => summary.cache_only += 1,
                LocationClass::BulkOnly => summary.bulk_only += 1,
                LocationClass::Dual => summary.dual += 1,
                LocationClass::Untagged => summary.untagged += 1,
            }
        }
        Ok(summary)
    }

    /// Bring every torrent's tags in line with where its data actually is.
    ///
    /// Cache-resident torrents get the cache tag; if their expected bulk copy
    /// already exists and verifies they also get the bulk tag, otherwise a
    /// copy request is emitted for the caller to enqueue. Bulk-resident
    /// torrents get the bulk tag. In dry-run mode only the plan is produced.
    pub async fn reconcile_existing(
        &self,
        qbit: &QbitClient,
        dry_run: bool,
    ) -> ShuttleResult<ReconcileReport> {
        let torrents = qbit.torrents_info(&InfoQuery::default()).await?;
        let mut report = ReconcileReport {
            dry_run,
            examined: torrents.len(),
            ..Default::default()
        };

        for t in &torrents {
            let content_path = PathBuf::from(&t.content_path);
            if content_path.as_os_str().is_empty() {
                continue;
            }
            let hash: Infohash = match t.hash.parse() {
                Ok(h) => h,
                Err(e) => {
                    warn!(hash = %t.hash, error = %e, "skipping torrent with malformed hash");
                    continue;
                }
            };

            if content_path.starts_with(&self.cache_root) {
                self.reconcile_cache_resident(qbit, t, &hash, &content_path, dry_run, &mut report)
                    .await?;
            } else if content_path.starts_with(&self.bulk_root) {
                if !t.has_tag(&self.bulk_tag) {
                    report.bulk_tags_added += 1;
                    if !dry_run {
                        qbit.add_tags(&hash, &self.bulk_tag).await?;
                    }
                }
            }
        }

        info!(
            examined = report.examined,
            cache_tags = report.cache_tags_added,
            bulk_tags = report.bulk_tags_added,
            copies = report.copies_needed.len(),
            untaggable = report.untaggable.len(),
            dry_run,
            "tag reconciliation"
        );
        Ok(report)
    }

    async fn reconcile_cache_resident(
        &self,
        qbit: &QbitClient,
        t: &Torrent,
        hash: &Infohash,
        content_path: &Path,
        dry_run: bool,
        report: &mut ReconcileReport,
    ) -> ShuttleResult<()> {
        if !t.has_tag(&self.cache_tag) {
            report.cache_tags_added += 1;
            if !dry_run {
                qbit.add_tags(hash, &self.cache_tag).await?;
            }
        }

        if t.category.is_empty() {
            report.untaggable.push(Untaggable {
                hash: t.hash.clone(),
                name: t.name.clone(),
                reason: "no category; cannot derive bulk path".to_string(),
            });
            return Ok(());
        }

        let expected = self.expected_bulk_path(&t.category, &t.name);
        let is_multi = content_path.is_dir();
        if expected.exists() && self.copy.verify(content_path, &expected, is_multi).await {
            if !t.has_tag(&self.bulk_tag) {
                report.bulk_tags_added += 1;
                if !dry_run {
                    qbit.add_tags(hash, &self.bulk_tag).await?;
                }
            }
        } else if !t.has_tag(&self.bulk_tag) {
            debug!(hash = %t.hash, dst = %expected.display(), "bulk copy missing, requesting copy");
            report.copies_needed.push(CopyRequest {
                hash: hash.clone(),
                name: t.name.clone(),
                src: content_path.to_path_buf(),
                dst: expected,
                size: t.size,
                is_multi_file: is_multi,
            });
        }
        Ok(())
    }

    /// Tag a freshly completed torrent by where its content lives. Called by
    /// the completion pipeline when auto-tagging is enabled.
    pub async fn auto_tag(
        &self,
        qbit: &QbitClient,
        descriptor: &TorrentDescriptor,
    ) -> ShuttleResult<()> {
        if !self.auto_tag_new {
            return Ok(());
        }
        if self.dry_run {
            debug!(hash = %descriptor.hash, "dry run: skipping auto-tag");
            return Ok(());
        }
        if descriptor.content_path.starts_with(&self.cache_root)
            && !descriptor.has_tag(&self.cache_tag)
        {
            qbit.add_tags(&descriptor.hash, &self.cache_tag).await?;
        } else if descriptor.content_path.starts_with(&self.bulk_root)
            && !descriptor.has_tag(&self.bulk_tag)
        {
            qbit.add_tags(&descriptor.hash, &self.bulk_tag).await?;
        }
        Ok(())
    }
}
