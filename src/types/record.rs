use super::descriptor::TorrentDescriptor;
use super::unix_now;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::PathBuf;
use uuid::Uuid;

/// Priority assigned to items restored from a checkpoint; they run before
/// any freshly enqueued work.
pub const RESTORED_PRIORITY: i64 = 10;

/// One pending entry in the torrent work queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: Uuid,
    pub descriptor: TorrentDescriptor,
    pub enqueue_time: f64,
    pub priority: i64,
}

impl QueueItem {
    pub fn new(descriptor: TorrentDescriptor, priority: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            descriptor,
            enqueue_time: unix_now(),
            priority,
        }
    }

    /// Strict queue order: highest priority first, then FIFO, ties on id.
    pub fn cmp_order(&self, other: &Self) -> Ordering {
        (-self.priority)
            .cmp(&-other.priority)
            .then(self.enqueue_time.total_cmp(&other.enqueue_time))
            .then(self.id.cmp(&other.id))
    }
}

/// Lifecycle state of a dispatched process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ProcessState {
    Running,
    Completed,
    Failed,
}

/// Record of one torrent-processing dispatch.
///
/// Created RUNNING when the worker is submitted; transitions exactly once
/// to COMPLETED or FAILED when the worker returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub id: Uuid,
    pub hash: String,
    pub start_time: f64,
    pub state: ProcessState,
    #[serde(default)]
    pub end_time: Option<f64>,
    #[serde(default)]
    pub result: Option<String>,
}

impl ProcessRecord {
    pub fn running(id: Uuid, hash: &str) -> Self {
        Self {
            id,
            hash: hash.to_string(),
            start_time: unix_now(),
            state: ProcessState::Running,
            end_time: None,
            result: None,
        }
    }

    pub fn finish(&mut self, success: bool, result: Option<String>) {
        self.state = if success {
            ProcessState::Completed
        } else {
            ProcessState::Failed
        };
        self.end_time = Some(unix_now());
        self.result = result;
    }
}

/// Lifecycle state of a queued copy operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CopyState {
    Queued,
    Running,
    Completed,
    Failed,
}

/// One verified-copy job, grouped into caller-visible batches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyOperation {
    pub id: Uuid,
    pub batch_id: Uuid,
    pub hash: String,
    pub name: String,
    pub src: PathBuf,
    pub dst: PathBuf,
    pub size: i64,
    pub is_multi_file: bool,
    pub enqueue_time: f64,
    pub state: CopyState,
    #[serde(default)]
    pub start_time: Option<f64>,
    #[serde(default)]
    pub end_time: Option<f64>,
    #[serde(default)]
    pub result: Option<String>,
}

impl CopyOperation {
    #[allow(clippy::too_many_arguments)]
    pub fn queued(
        batch_id: Uuid,
        hash: &str,
        name: &str,
        src: PathBuf,
        dst: PathBuf,
        size: i64,
        is_multi_file: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            batch_id,
            hash: hash.to_string(),
            name: name.to_string(),
            src,
            dst,
            size,
            is_multi_file,
            enqueue_time: unix_now(),
            state: CopyState::Queued,
            start_time: None,
            end_time: None,
            result: None,
        }
    }

    pub fn start(&mut self) {
        self.state = CopyState::Running;
        self.start_time = Some(unix_now());
    }

    pub fn finish(&mut self, success: bool, result: Option<String>) {
        self.state = if success {
            CopyState::Completed
        } else {
            CopyState::Failed
        };
        self.end_time = Some(unix_now());
        self.result = result;
    }
}
