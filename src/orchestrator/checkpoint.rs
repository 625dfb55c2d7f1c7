//! Checkpoint persistence for the orchestrator.
//!
//! On graceful shutdown the pending queue and the set of running processes
//! are serialized to `{state_dir}/state/orchestrator_state.json` so a
//! restart loses no work. Writes go through a temp file plus rename;
//! loads reject version mismatches and stale checkpoints.

use crate::error::{ShuttleError, ShuttleResult};
use crate::stats::StatsSnapshot;
use crate::types::{unix_now, ProcessState, TorrentDescriptor};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

/// Schema version; loads with any other value are rejected.
pub const CHECKPOINT_VERSION: &str = "1.0";

/// A checkpoint older than this is considered stale and rejected.
const MAX_AGE_SECS: f64 = 24.0 * 60.0 * 60.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointQueueItem {
    pub id: Uuid,
    pub torrent_data: TorrentDescriptor,
    pub queued_time: f64,
    pub priority: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointProcess {
    pub id: Uuid,
    pub torrent_hash: String,
    pub start_time: f64,
    pub status: ProcessState,
    #[serde(default)]
    pub result: Option<String>,
}

/// Serialized form of the orchestrator state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: String,
    pub shutdown_time: f64,
    pub queue_items: Vec<CheckpointQueueItem>,
    pub running_processes: Vec<CheckpointProcess>,
    pub statistics: StatsSnapshot,
}

impl Checkpoint {
    pub fn new(
        queue_items: Vec<CheckpointQueueItem>,
        running_processes: Vec<CheckpointProcess>,
        statistics: StatsSnapshot,
    ) -> Self {
        Self {
            version: CHECKPOINT_VERSION.to_string(),
            shutdown_time: unix_now(),
            queue_items,
            running_processes,
            statistics,
        }
    }
}

/// Location of the checkpoint file under a state directory.
pub fn checkpoint_path(state_dir: &Path) -> PathBuf {
    state_dir.join("state").join("orchestrator_state.json")
}

/// Atomically persist a checkpoint: write temp, fsync, rename.
pub fn save(state_dir: &Path, checkpoint: &Checkpoint) -> ShuttleResult<PathBuf> {
    let path = checkpoint_path(state_dir);
    let parent = path
        .parent()
        .ok_or_else(|| ShuttleError::IoError("checkpoint path has no parent".to_string()))?;
    fs::create_dir_all(parent)?;

    let tmp = parent.join("orchestrator_state.tmp");
    let body = serde_json::to_vec_pretty(checkpoint)?;
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&body)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, &path)?;
    info!(
        path = %path.display(),
        queued = checkpoint.queue_items.len(),
        running = checkpoint.running_processes.len(),
        "checkpoint saved"
    );
    Ok(path)
}

/// Load and validate a checkpoint. `Ok(None)` when no checkpoint exists.
pub fn load(state_dir: &Path) -> ShuttleResult<Option<Checkpoint>> {
    let path = checkpoint_path(state_dir);
    let content = match fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let checkpoint: Checkpoint = serde_json::from_str(&content)
        .map_err(|e| ShuttleError::CheckpointRejected(format!("unparseable: {e}")))?;

    if checkpoint.version != CHECKPOINT_VERSION {
        return Err(ShuttleError::CheckpointRejected(format!(
            "version mismatch: found {}, expected {}",
            checkpoint.version, CHECKPOINT_VERSION
        )));
    }
    let age = unix_now() - checkpoint.shutdown_time;
    if age > MAX_AGE_SECS {
        return Err(ShuttleError::CheckpointRejected(format!(
            "stale: saved {:.0} seconds ago",
            age
        )));
    }

    debug!(path = %path.display(), "checkpoint loaded");
    Ok(Some(checkpoint))
}

/// Remove the checkpoint file; missing is success.
pub fn delete(state_dir: &Path) -> ShuttleResult<()> {
    let path = checkpoint_path(state_dir);
    match fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Infohash;
    use tempfile::TempDir;

    fn sample() -> Checkpoint {
        let hash: Infohash = "a".repeat(40).parse().unwrap();
        Checkpoint::new(
            vec![CheckpointQueueItem {
                id: Uuid::new_v4(),
                torrent_data: TorrentDescriptor::minimal(hash),
                queued_time: unix_now(),
                priority: 0,
            }],
            vec![CheckpointProcess {
                id: Uuid::new_v4(),
                torrent_hash: "b".repeat(40),
                start_time: unix_now(),
                status: ProcessState::Running,
                result: None,
            }],
            StatsSnapshot {
                torrents_processed: 12,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_round_trip() {
        let tmp = TempDir::new().unwrap();
        let original = sample();
        save(tmp.path(), &original).unwrap();

        let loaded = load(tmp.path()).unwrap().unwrap();
        assert_eq!(loaded.version, CHECKPOINT_VERSION);
        assert_eq!(loaded.queue_items.len(), 1);
        assert_eq!(loaded.running_processes.len(), 1);
        assert_eq!(loaded.statistics.torrents_processed, 12);
        assert_eq!(
            loaded.queue_items[0].torrent_data.hash,
            original.queue_items[0].torrent_data.hash
        );
    }

    #[test]
    fn test_missing_is_none() {
        let tmp = TempDir::new().unwrap();
        assert!(load(tmp.path()).unwrap().is_none());
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let tmp = TempDir::new().unwrap();
        save(tmp.path(), &sample()).unwrap();
        assert!(!tmp.path().join("state/orchestrator_state.tmp").exists());
        assert!(checkpoint_path(tmp.path()).exists());
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let tmp = TempDir::new().unwrap();
        let mut checkpoint = sample();
        checkpoint.version = "0.9".to_string();
        save(tmp.path(), &checkpoint).unwrap();

        let err = load(tmp.path()).unwrap_err();
        assert!(matches!(err, ShuttleError::CheckpointRejected(_)));
    }

    #[test]
    fn test_stale_checkpoint_rejected() {
        let tmp = TempDir::new().unwrap();
        let mut checkpoint = sample();
        checkpoint.shutdown_time = unix_now() - 25.0 * 3600.0;
        save(tmp.path(), &checkpoint).unwrap();

        let err = load(tmp.path()).unwrap_err();
        assert!(matches!(err, ShuttleError::CheckpointRejected(_)));
    }

    #[test]
    fn test_garbage_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = checkpoint_path(tmp.path());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"{ not json").unwrap();

        let err = load(tmp.path()).unwrap_err();
        assert!(matches!(err, ShuttleError::CheckpointRejected(_)));
    }

    #[test]
    fn test_delete_missing_is_success() {
        let tmp = TempDir::new().unwrap();
        delete(tmp.path()).unwrap();

        save(tmp.path(), &sample()).unwrap();
        delete(tmp.path()).unwrap();
        assert!(load(tmp.path()).unwrap().is_none());
    }
}
