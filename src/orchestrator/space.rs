//! Cache-space reclamation: evict the oldest dual-located torrents until
//! enough cache space is free.

use super::Orchestrator;
use crate::copy::available_space_gib;
use crate::error::ShuttleResult;
use crate::qbit::{InfoQuery, QbitClient, Torrent};
use crate::types::{unix_now, Infohash};
use tracing::{debug, error, info, warn};

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Eviction order: ascending completion timestamp, oldest first. Torrents
/// without a positive timestamp are rejected.
pub fn plan_evictions(torrents: Vec<Torrent>, now: i64) -> Vec<Torrent> {
    let mut candidates: Vec<(i64, Torrent)> = torrents
        .into_iter()
        .filter_map(|t| {
            let ts = t.completion_timestamp(now);
            if ts > 0 {
                Some((ts, t))
            } else {
                warn!(hash = %t.hash, "candidate has no usable completion timestamp, rejecting");
                None
            }
        })
        .collect();
    candidates.sort_by_key(|(ts, _)| *ts);
    candidates.into_iter().map(|(_, t)| t).collect()
}

impl Orchestrator {
    /// One full reclamation pass. Failures are logged, never propagated: the
    /// next queue drain or manual trigger schedules a fresh pass.
    pub(crate) async fn run_space_reclamation(self: &std::sync::Arc<Self>) {
        self.stats().record_space_run();
        info!("space reclamation pass starting");
        match self.space_pass().await {
            Ok(freed) => info!(freed_gib = format!("{freed:.1}"), "space reclamation pass finished"),
            Err(e) => error!(error = %e, "space reclamation pass aborted"),
        }
    }

    async fn space_pass(&self) -> ShuttleResult<f64> {
        let config = self.config();
        let threshold = config.processing.disk_space_threshold_gib;
        let available = available_space_gib(&config.paths.cache_root)?;
        if available >= threshold {
            debug!(
                available_gib = format!("{available:.1}"),
                threshold_gib = threshold,
                "cache tier has enough free space"
            );
            return Ok(0.0);
        }
        let needed = threshold - available;
        info!(
            available_gib = format!("{available:.1}"),
            threshold_gib = threshold,
            needed_gib = format!("{needed:.1}"),
            "cache tier below threshold"
        );
        self.reclaim_needed(needed).await
    }

    /// Relocate oldest-first until `needed` GiB have been freed or the
    /// candidates run out. Returns the freed amount.
    #[doc(hidden)]
    pub async fn reclaim_needed(&self, needed: f64) -> ShuttleResult<f64> {
        let qbit = self.qbit_pool().get().await?;
        let candidates = self.eviction_candidates(&qbit).await?;
        let ordered = plan_evictions(candidates, unix_now() as i64);
        info!(candidates = ordered.len(), "eviction candidates ordered oldest-first");

        let import_enabled = self.config().import_mode.enabled;
        let mut freed = 0.0f64;
        for torrent in ordered {
            if freed >= needed {
                break;
            }
            let hash: Infohash = match torrent.hash.parse() {
                Ok(h) => h,
                Err(e) => {
                    warn!(hash = %torrent.hash, error = %e, "skipping candidate with bad hash");
                    continue;
                }
            };
            let size_gib = torrent.size.max(0) as f64 / GIB;

            if import_enabled {
                match self.import_context() {
                    None => {
                        warn!(hash = %hash, "import mode misconfigured, skipping candidate");
                        continue;
                    }
                    Some(ctx) => {
                        match self.relocator().relocate_stream_aware(&qbit, &hash, ctx).await {
                            Ok(()) => {
                                freed += size_gib;
                                continue;
                            }
                            Err(e) if e.is_skip() => {
                                debug!(hash = %hash, reason = %e, "candidate skipped");
                                continue;
                            }
                            Err(e) => {
                                warn!(hash = %hash, error = %e, "stream-aware relocation failed, falling back to plain");
                            }
                        }
                    }
                }
            }

            match self.relocator().relocate(&qbit, &hash).await {
                Ok(()) => freed += size_gib,
                Err(e) => {
                    // One fatal relocation stops the whole pass so a
                    // systemic fault cannot cascade across the tier.
                    error!(hash = %hash, error = %e, "relocation failed, stopping pass");
                    return Err(e);
                }
            }
        }
        Ok(freed)
    }

    /// Candidate set: with location tagging, completed torrents carrying
    /// both tags (cache tag filtered server-side); otherwise completed
    /// torrents whose content path lies under the cache root.
    async fn eviction_candidates(&self, qbit: &QbitClient) -> ShuttleResult<Vec<Torrent>> {
        let config = self.config();
        if config.tags.location_tagging_enabled {
            let mut torrents = qbit
                .torrents_info(&InfoQuery::completed_with_tag(&config.tags.cache_tag))
                .await?;
            torrents.retain(|t| t.has_tag(&config.tags.bulk_tag));
            Ok(torrents)
        } else {
            let mut torrents = qbit.torrents_info(&InfoQuery::completed()).await?;
            let cache_root = config.paths.cache_root.clone();
            torrents.retain(|t| std::path::Path::new(&t.content_path).starts_with(&cache_root));
            Ok(torrents)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn torrent(hash_byte: char, completion_on: Option<i64>, last_activity: Option<i64>) -> Torrent {
        Torrent {
            hash: hash_byte.to_string().repeat(40),
            completion_on,
            last_activity,
            ..Default::default()
        }
    }

    #[test]
    fn test_plan_orders_oldest_first() {
        let ordered = plan_evictions(
            vec![
                torrent('a', Some(300), None),
                torrent('b', Some(100), None),
                torrent('c', Some(200), None),
            ],
            1000,
        );
        let hashes: Vec<char> = ordered.iter().map(|t| t.hash.chars().next().unwrap()).collect();
        assert_eq!(hashes, vec!['b', 'c', 'a']);
    }

    #[test]
    fn test_plan_falls_back_to_last_activity_then_now() {
        let ordered = plan_evictions(
            vec![
                torrent('a', None, Some(50)),
                torrent('b', Some(10), None),
                torrent('c', None, None), // lands at `now`, sorts last
            ],
            1000,
        );
        let hashes: Vec<char> = ordered.iter().map(|t| t.hash.chars().next().unwrap()).collect();
        assert_eq!(hashes, vec!['b', 'a', 'c']);
    }

    #[test]
    fn test_plan_rejects_nonpositive_timestamps() {
        // A torrent can only end up non-positive when `now` itself is bad.
        let ordered = plan_evictions(vec![torrent('a', None, None)], 0);
        assert!(ordered.is_empty());
    }

    #[test]
    fn test_plan_is_stable_for_equal_timestamps() {
        let ordered = plan_evictions(
            vec![torrent('a', Some(100), None), torrent('b', Some(100), None)],
            1000,
        );
        let hashes: Vec<char> = ordered.iter().map(|t| t.hash.chars().next().unwrap()).collect();
        assert_eq!(hashes, vec!['a', 'b']);
    }
}
