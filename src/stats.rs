use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::unix_now;

/// Macro to generate simple counter recording methods.
macro_rules! record_op {
    ($method:ident, $field:ident) => {
        pub fn $method(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }
    };
}

/// Service-lifetime counters exposed verbatim on `/status` and persisted in
/// the checkpoint. Counters never decrease within a process lifetime.
#[derive(Debug)]
pub struct ServiceStats {
    /// Unix time the service started
    pub service_start_time: f64,
    pub torrents_processed: AtomicU64,
    pub space_management_runs: AtomicU64,
    pub api_requests: AtomicU64,
    /// Unix time of the most recent dispatch or completion, in whole seconds
    pub last_activity: AtomicU64,
    pub copies_completed: AtomicU64,
    pub copies_failed: AtomicU64,
}

/// Plain snapshot of the counters, serialized into status responses and
/// checkpoints.
#[derive(Debug, Clone, Serialize, serde::Deserialize, Default)]
pub struct StatsSnapshot {
    pub service_start_time: f64,
    pub torrents_processed: u64,
    pub space_management_runs: u64,
    pub api_requests: u64,
    pub last_activity: u64,
    pub copies_completed: u64,
    pub copies_failed: u64,
}

impl ServiceStats {
    pub fn new() -> Self {
        Self {
            service_start_time: unix_now(),
            torrents_processed: AtomicU64::new(0),
            space_management_runs: AtomicU64::new(0),
            api_requests: AtomicU64::new(0),
            last_activity: AtomicU64::new(unix_now() as u64),
            copies_completed: AtomicU64::new(0),
            copies_failed: AtomicU64::new(0),
        }
    }

    record_op!(record_torrent_processed, torrents_processed);
    record_op!(record_space_run, space_management_runs);
    record_op!(record_api_request, api_requests);
    record_op!(record_copy_completed, copies_completed);
    record_op!(record_copy_failed, copies_failed);

    pub fn touch_activity(&self) {
        self.last_activity
            .store(unix_now() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            service_start_time: self.service_start_time,
            torrents_processed: self.torrents_processed.load(Ordering::Relaxed),
            space_management_runs: self.space_management_runs.load(Ordering::Relaxed),
            api_requests: self.api_requests.load(Ordering::Relaxed),
            last_activity: self.last_activity.load(Ordering::Relaxed),
            copies_completed: self.copies_completed.load(Ordering::Relaxed),
            copies_failed: self.copies_failed.load(Ordering::Relaxed),
        }
    }

    /// Restore monotonic counters from a persisted snapshot. Time-based
    /// fields are intentionally left at their fresh-process values.
    pub fn restore_counters(&self, snapshot: &StatsSnapshot) {
        self.torrents_processed
            .store(snapshot.torrents_processed, Ordering::Relaxed);
        self.space_management_runs
            .store(snapshot.space_management_runs, Ordering::Relaxed);
        self.api_requests
            .store(snapshot.api_requests, Ordering::Relaxed);
        self.copies_completed
            .store(snapshot.copies_completed, Ordering::Relaxed);
        self.copies_failed
            .store(snapshot.copies_failed, Ordering::Relaxed);
    }
}

impl Default for ServiceStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_increment() {
        let stats = ServiceStats::new();
        stats.record_torrent_processed();
        stats.record_torrent_processed();
        stats.record_space_run();
        stats.record_api_request();
        stats.record_copy_completed();
        stats.record_copy_failed();

        let snap = stats.snapshot();
        assert_eq!(snap.torrents_processed, 2);
        assert_eq!(snap.space_management_runs, 1);
        assert_eq!(snap.api_requests, 1);
        assert_eq!(snap.copies_completed, 1);
        assert_eq!(snap.copies_failed, 1);
    }

    #[test]
    fn test_restore_counters_skips_time_fields() {
        let stats = ServiceStats::new();
        let start = stats.service_start_time;
        let persisted = StatsSnapshot {
            service_start_time: 1.0,
            torrents_processed: 7,
            space_management_runs: 3,
            api_requests: 99,
            last_activity: 5,
            copies_completed: 4,
            copies_failed: 2,
        };
        stats.restore_counters(&persisted);

        let snap = stats.snapshot();
        assert_eq!(snap.torrents_processed, 7);
        assert_eq!(snap.api_requests, 99);
        assert_eq!(snap.copies_completed, 4);
        // Time-based fields stay fresh.
        assert_eq!(snap.service_start_time, start);
        assert_ne!(snap.last_activity, 5);
    }
}
