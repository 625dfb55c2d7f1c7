//! Discovery and rewriting of media-library links into the cache tier.
//!
//! In import-script mode the indexer populates the media library with
//! symlinks into the cache copy (and, historically, hardlinks against the
//! bulk copy). Before the cache copy can be deleted, every library symlink
//! must be repointed at the bulk copy — as a hardlink, so the library entry
//! survives future relocations too.

use crate::error::{ShuttleError, ShuttleResult};
use crate::pathmap::normalize;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use tokio::task;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

/// The two disjoint link populations found in the library roots.
#[derive(Debug, Clone, Default)]
pub struct LinkSet {
    /// Symlinks whose target lies under the cache data path
    pub symlinks: Vec<PathBuf>,
    /// Regular files sharing (device, inode) with a file under the bulk copy
    pub hardlinks: Vec<PathBuf>,
}

impl LinkSet {
    pub fn total(&self) -> usize {
        self.symlinks.len() + self.hardlinks.len()
    }
}

/// Finds and rewrites library links that reference a given cache path.
#[derive(Debug, Clone)]
pub struct LinkResolver {
    roots: Vec<PathBuf>,
}

impl LinkResolver {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    pub fn has_roots(&self) -> bool {
        !self.roots.is_empty()
    }

    /// Walk every library root and collect symlinks into the cache copy and
    /// legacy hardlinks against the bulk copy.
    pub async fn discover(&self, cache_path: &Path, bulk_path: &Path) -> ShuttleResult<LinkSet> {
        let roots = self.roots.clone();
        let cache_path = normalize(cache_path);
        let bulk_path = bulk_path.to_path_buf();
        task::spawn_blocking(move || discover_blocking(&roots, &cache_path, &bulk_path))
            .await
            .map_err(|e| ShuttleError::IoError(format!("discovery task panicked: {e}")))?
    }

    /// Replace every symlink with a hardlink (or hardlink tree) against the
    /// bulk copy. Atomic per link; the first failure aborts.
    pub async fn rewrite_symlinks(
        &self,
        symlinks: Vec<PathBuf>,
        cache_path: &Path,
        bulk_path: &Path,
    ) -> ShuttleResult<usize> {
        let cache_path = normalize(cache_path);
        let bulk_path = bulk_path.to_path_buf();
        task::spawn_blocking(move || {
            let mut rewritten = 0;
            for link in &symlinks {
                rewrite_one(link, &cache_path, &bulk_path).map_err(|e| {
                    ShuttleError::LinkRewriteFailed(format!("{}: {e}", link.display()))
                })?;
                rewritten += 1;
            }
            Ok(rewritten)
        })
        .await
        .map_err(|e| ShuttleError::IoError(format!("rewrite task panicked: {e}")))?
    }
}

fn discover_blocking(
    roots: &[PathBuf],
    cache_path: &Path,
    bulk_path: &Path,
) -> ShuttleResult<LinkSet> {
    let bulk_identities = file_identities(bulk_path);

    let mut set = LinkSet::default();
    for root in roots {
        if !root.exists() {
            debug!(root = %root.display(), "library root missing, skipping");
            continue;
        }
        for entry in WalkDir::new(root).follow_links(false) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!(root = %root.display(), error = %e, "walk error, skipping entry");
                    continue;
                }
            };
            let file_type = entry.file_type();
            if file_type.is_symlink() {
                if let Some(target) = resolved_link_target(entry.path()) {
                    if target.starts_with(cache_path) {
                        set.symlinks.push(entry.path().to_path_buf());
                    }
                }
            } else if file_type.is_file() && !bulk_identities.is_empty() {
                if let Ok(meta) = entry.metadata() {
                    if meta.nlink() > 1 && bulk_identities.contains(&(meta.dev(), meta.ino())) {
                        set.hardlinks.push(entry.path().to_path_buf());
                    }
                }
            }
        }
    }
    info!(
        symlinks = set.symlinks.len(),
        hardlinks = set.hardlinks.len(),
        cache_path = %cache_path.display(),
        "library link discovery"
    );
    Ok(set)
}

/// (device, inode) pairs of every regular file under `path`.
fn file_identities(path: &Path) -> HashSet<(u64, u64)> {
    let mut identities = HashSet::new();
    if !path.exists() {
        return identities;
    }
    for entry in WalkDir::new(path).follow_links(false).into_iter().flatten() {
        if entry.file_type().is_file() {
            if let Ok(meta) = entry.metadata() {
                identities.insert((meta.dev(), meta.ino()));
            }
        }
    }
    identities
}

/// Readlink resolved to an absolute, lexically normalized path.
fn resolved_link_target(link: &Path) -> Option<PathBuf> {
    let target = fs::read_link(link).ok()?;
    let absolute = if target.is_absolute() {
        target
    } else {
        link.parent()?.join(target)
    };
    Some(normalize(&absolute))
}

fn rewrite_one(link: &Path, cache_path: &Path, bulk_path: &Path) -> io::Result<()> {
    let target = resolved_link_target(link)
        .ok_or_else(|| io::Error::other("cannot resolve symlink target"))?;
    let rel = target
        .strip_prefix(cache_path)
        .map_err(|_| io::Error::other("symlink target escaped the cache path"))?;
    let bulk_target = if rel.as_os_str().is_empty() {
        bulk_path.to_path_buf()
    } else {
        bulk_path.join(rel)
    };

    if bulk_target.is_file() {
        // Sibling hardlink under a temporary name, then rename over the
        // symlink so readers never observe a missing path.
        let file_name = link
            .file_name()
            .ok_or_else(|| io::Error::other("symlink has no file name"))?
            .to_string_lossy()
            .to_string();
        let parent = link
            .parent()
            .ok_or_else(|| io::Error::other("symlink has no parent"))?;
        let tmp = parent.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));
        fs::hard_link(&bulk_target, &tmp)?;
        match fs::rename(&tmp, link) {
            Ok(()) => {
                debug!(link = %link.display(), target = %bulk_target.display(), "symlink replaced with hardlink");
                Ok(())
            }
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                Err(e)
            }
        }
    } else if bulk_target.is_dir() {
        // A directory symlink cannot be renamed over; unlink it and rebuild
        // the subtree in place out of hardlinks.
        fs::remove_file(link)?;
        rebuild_dir_as_hardlinks(&bulk_target, link)?;
        debug!(link = %link.display(), target = %bulk_target.display(), "directory symlink rebuilt as hardlink tree");
        Ok(())
    } else {
        Err(io::Error::other(format!(
            "bulk target missing: {}",
            bulk_target.display()
        )))
    }
}

fn rebuild_dir_as_hardlinks(bulk_dir: &Path, dst: &Path) -> io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in WalkDir::new(bulk_dir).follow_links(false) {
        let entry = entry.map_err(io::Error::other)?;
        let rel = entry
            .path()
            .strip_prefix(bulk_dir)
            .map_err(io::Error::other)?;
        if rel.as_os_str().is_empty() {
            continue;
        }
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::hard_link(entry.path(), &target)?;
        }
    }
    Ok(())
}
