//! Translation between daemon-local paths and streaming-oracle-visible paths.
//!
//! The oracle (Plex, surfaced through Tautulli) usually sees media under
//! container mount points that differ from the daemon's view of the same
//! filesystem. A small longest-prefix table bridges the two. Pure string
//! work on normalized absolute paths; no I/O.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

/// Longest-prefix table of (local prefix -> remote prefix) pairs.
#[derive(Debug, Clone, Default)]
pub struct PathMapper {
    /// Sorted longest-local-prefix first so the first ancestor match wins.
    entries: Vec<(PathBuf, PathBuf)>,
}

/// Lexically normalize an absolute path: drop `.`, resolve `..` against the
/// stack, collapse separators. No filesystem access.
pub(crate) fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn is_ancestor(ancestor: &Path, path: &Path) -> bool {
    path.starts_with(ancestor)
}

impl PathMapper {
    pub fn new(mappings: &BTreeMap<String, String>) -> Self {
        let mut entries: Vec<(PathBuf, PathBuf)> = mappings
            .iter()
            .map(|(local, remote)| {
                (
                    normalize(Path::new(local)),
                    normalize(Path::new(remote)),
                )
            })
            .collect();
        entries.sort_by_key(|(local, _)| std::cmp::Reverse(local.components().count()));
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Translate a daemon-local path into the oracle's view.
    ///
    /// Picks the longest local prefix that is an ancestor of the input and
    /// substitutes it. Returns the normalized input unchanged when no prefix
    /// matches, so already-remote paths pass through.
    pub fn translate_to_remote(&self, local: &Path) -> PathBuf {
        let local = normalize(local);
        for (local_prefix, remote_prefix) in &self.entries {
            if is_ancestor(local_prefix, &local) {
                let rest = local
                    .strip_prefix(local_prefix)
                    .expect("ancestor check guarantees prefix");
                return remote_prefix.join(rest);
            }
        }
        local
    }

    /// True when a local path and a remote path refer to the same file: after
    /// translating the local side, either one is an ancestor of the other.
    pub fn same_file(&self, local: &Path, remote: &Path) -> bool {
        let local = self.translate_to_remote(local);
        let remote = normalize(remote);
        is_ancestor(&local, &remote) || is_ancestor(&remote, &local)
    }
}
