//! Core data types: infohashes, torrent descriptors, queue and process records.

pub mod descriptor;
pub mod hash;
pub mod record;

pub use descriptor::{DescriptorParams, TorrentDescriptor};
pub use hash::Infohash;
pub use record::{
    CopyOperation, CopyState, ProcessRecord, ProcessState, QueueItem, RESTORED_PRIORITY,
};

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time as fractional unix seconds.
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
