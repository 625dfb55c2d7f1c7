//! Verified file and tree copies between the storage tiers.
//!
//! A copy is only trusted after verification: equal size for single files,
//! equal size sum plus file count for trees. No cryptographic hashing; the
//! copies happen on one machine and the failure mode being guarded is a
//! partial or interrupted copy, not tampering.

use crate::config::ProcessingConfig;
use crate::error::{ShuttleError, ShuttleResult};
use filetime::FileTime;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tokio::task;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Performs verified copies with retry and destination cleanup.
#[derive(Debug, Clone)]
pub struct CopyEngine {
    dry_run: bool,
    verification_enabled: bool,
}

impl CopyEngine {
    pub fn new(dry_run: bool, verification_enabled: bool) -> Self {
        Self {
            dry_run,
            verification_enabled,
        }
    }

    pub fn from_config(config: &ProcessingConfig) -> Self {
        Self::new(config.dry_run, config.verification_enabled)
    }

    /// Copy `src` to `dst` and verify, retrying up to `attempts` times.
    ///
    /// Each failed attempt removes the destination before the next try.
    /// Dry-run mode short-circuits to success without touching disk.
    pub async fn copy_verified(
        &self,
        src: &Path,
        dst: &Path,
        is_multi_file: bool,
        attempts: u32,
    ) -> ShuttleResult<()> {
        if self.dry_run {
            info!(src = %src.display(), dst = %dst.display(), "dry run: skipping copy");
            return Ok(());
        }

        let src = src.to_path_buf();
        let dst = dst.to_path_buf();
        let verification_enabled = self.verification_enabled;

        task::spawn_blocking(move || {
            for attempt in 1..=attempts.max(1) {
                match copy_once(&src, &dst, is_multi_file) {
                    Ok(()) => {
                        if !verification_enabled || verify_paths(&src, &dst, is_multi_file) {
                            debug!(
                                src = %src.display(),
                                dst = %dst.display(),
                                attempt,
                                "copy verified"
                            );
                            return Ok(());
                        }
                        warn!(
                            src = %src.display(),
                            dst = %dst.display(),
                            attempt,
                            "copy verification failed, removing destination"
                        );
                    }
                    Err(e) => {
                        warn!(
                            src = %src.display(),
                            dst = %dst.display(),
                            attempt,
                            error = %e,
                            "copy failed, removing destination"
                        );
                    }
                }
                let _ = remove_dest(&dst);
            }
            Err(ShuttleError::VerificationFailed {
                src: src.display().to_string(),
                dst: dst.display().to_string(),
            })
        })
        .await
        .map_err(|e| ShuttleError::IoError(format!("copy task panicked: {e}")))?
    }

    /// Verify an existing destination against the source. True when
    /// verification is disabled by configuration.
    pub async fn verify(&self, src: &Path, dst: &Path, is_multi_file: bool) -> bool {
        if !self.verification_enabled {
            return true;
        }
        let src = src.to_path_buf();
        let dst = dst.to_path_buf();
        task::spawn_blocking(move || verify_paths(&src, &dst, is_multi_file))
            .await
            .unwrap_or(false)
    }

    /// Remove a partial destination. Missing is success.
    pub async fn cleanup(&self, dst: &Path) -> ShuttleResult<()> {
        if self.dry_run {
            info!(dst = %dst.display(), "dry run: skipping cleanup");
            return Ok(());
        }
        let dst = dst.to_path_buf();
        task::spawn_blocking(move || remove_dest(&dst))
            .await
            .map_err(|e| ShuttleError::IoError(format!("cleanup task panicked: {e}")))?
            .map_err(ShuttleError::from)
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }
}

/// Free gibibytes on the filesystem containing `path`.
pub fn available_space_gib(path: &Path) -> ShuttleResult<f64> {
    let bytes = fs2::available_space(path)?;
    Ok(bytes as f64 / (1024.0 * 1024.0 * 1024.0))
}

fn copy_once(src: &Path, dst: &Path, is_multi_file: bool) -> io::Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    if is_multi_file || src.is_dir() {
        copy_tree(src, dst)
    } else {
        copy_file_preserving(src, dst)
    }
}

/// Copy one file, carrying over permissions (std::fs::copy) and mtime.
fn copy_file_preserving(src: &Path, dst: &Path) -> io::Result<()> {
    fs::copy(src, dst)?;
    let meta = fs::metadata(src)?;
    filetime::set_file_mtime(dst, FileTime::from_last_modification_time(&meta))?;
    Ok(())
}

/// Recursive copy with existing-destination-ok semantics. Symlinks inside
/// the tree are neither followed nor copied.
fn copy_tree(src: &Path, dst: &Path) -> io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(io::Error::other)?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(io::Error::other)?;
        if rel.as_os_str().is_empty() {
            continue;
        }
        let target = dst.join(rel);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            copy_file_preserving(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Size for single files; (size sum, file count) for trees, walked without
/// following symlinks.
fn tree_stats(path: &Path) -> io::Result<(u64, u64)> {
    let mut total = 0u64;
    let mut count = 0u64;
    for entry in WalkDir::new(path).follow_links(false) {
        let entry = entry.map_err(io::Error::other)?;
        if entry.file_type().is_file() {
            total += entry.metadata().map_err(io::Error::other)?.len();
            count += 1;
        }
    }
    Ok((total, count))
}

fn verify_paths(src: &Path, dst: &Path, is_multi_file: bool) -> bool {
    if !dst.exists() {
        return false;
    }
    if is_multi_file || src.is_dir() {
        match (tree_stats(src), tree_stats(dst)) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    } else {
        match (fs::metadata(src), fs::metadata(dst)) {
            (Ok(a), Ok(b)) => a.len() == b.len(),
            _ => false,
        }
    }
}

fn remove_dest(dst: &Path) -> io::Result<()> {
    match fs::symlink_metadata(dst) {
        Ok(meta) => {
            if meta.is_dir() {
                fs::remove_dir_all(dst)
            } else {
                fs::remove_file(dst)
            }
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
