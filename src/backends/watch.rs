//! Watch backend - File system watches for used files
//!
//! Every manifest entry gets a logical watch. Directories are watched
//! directly; files are watched through their parent directory so that
//! replace-by-rename saves are seen. Several logical watches may share one
//! OS watch, which is reference counted.

use notify::event::EventKind;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::cache::meta::UsedFile;
use crate::protocol::Fingerprint;

/// Handle of a logical watch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchId(pub u64);

#[derive(Debug, Clone)]
struct WatchEntry {
    fingerprint: Fingerprint,
    os_path: PathBuf,
}

/// Bookkeeping of logical watches and the OS watches backing them
#[derive(Debug, Default)]
pub struct WatchTable {
    next_id: u64,
    entries: HashMap<WatchId, WatchEntry>,
    os_refs: HashMap<PathBuf, usize>,
}

impl WatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Path that has to be watched at the OS level for an entry
    pub fn os_path(entry: &UsedFile) -> Option<PathBuf> {
        if entry.is_dir() {
            Some(entry.path().to_path_buf())
        } else {
            entry.path().parent().map(Path::to_path_buf)
        }
    }

    /// Add a logical watch. Also returns the OS path when it was not watched yet.
    pub fn add(&mut self, fingerprint: Fingerprint, entry: &UsedFile) -> Option<(WatchId, Option<PathBuf>)> {
        let os_path = Self::os_path(entry)?;
        self.next_id += 1;
        let id = WatchId(self.next_id);

        let refs = self.os_refs.entry(os_path.clone()).or_insert(0);
        *refs += 1;
        let new_os_watch = (*refs == 1).then(|| os_path.clone());

        self.entries.insert(
            id,
            WatchEntry {
                fingerprint,
                os_path,
            },
        );
        Some((id, new_os_watch))
    }

    /// Remove a logical watch. Returns the OS path when nothing uses it anymore.
    pub fn remove(&mut self, id: WatchId) -> Option<PathBuf> {
        let entry = self.entries.remove(&id)?;
        let refs = self.os_refs.get_mut(&entry.os_path)?;
        *refs -= 1;
        if *refs == 0 {
            self.os_refs.remove(&entry.os_path);
            Some(entry.os_path)
        } else {
            None
        }
    }

    /// Logical watches that may be interested in a change of `path`
    pub fn route(&self, path: &Path) -> Vec<(WatchId, Fingerprint)> {
        let mut hits: Vec<_> = self
            .entries
            .iter()
            .filter(|(_, entry)| {
                entry.os_path == path || path.parent() == Some(entry.os_path.as_path())
            })
            .map(|(id, entry)| (*id, entry.fingerprint.clone()))
            .collect();
        hits.sort();
        hits
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of OS level watches in use
    pub fn os_watch_count(&self) -> usize {
        self.os_refs.len()
    }
}

/// A routed change: which logical watch saw which path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchHit {
    pub watch: WatchId,
    pub fingerprint: Fingerprint,
    pub path: PathBuf,
}

/// notify-backed watcher
pub struct FsWatcher {
    watcher: RecommendedWatcher,
    table: WatchTable,
}

impl FsWatcher {
    /// Create a watcher delivering raw events to `handler`
    pub fn new<H: notify::EventHandler>(handler: H) -> notify::Result<Self> {
        let watcher = notify::recommended_watcher(handler)?;
        Ok(Self {
            watcher,
            table: WatchTable::new(),
        })
    }

    /// Start watching a manifest entry on behalf of a cache
    pub fn add(&mut self, fingerprint: Fingerprint, entry: &UsedFile) -> Option<WatchId> {
        let (id, new_os_path) = self.table.add(fingerprint, entry)?;
        if let Some(path) = new_os_path {
            if let Err(e) = self.watcher.watch(&path, RecursiveMode::NonRecursive) {
                tracing::warn!(path = %path.display(), error = %e, "cannot watch");
                self.table.remove(id);
                return None;
            }
            tracing::debug!(path = %path.display(), "watching");
        }
        Some(id)
    }

    pub fn remove(&mut self, id: WatchId) {
        if let Some(path) = self.table.remove(id) {
            // The path may already be gone, which drops the OS watch by itself
            if let Err(e) = self.watcher.unwatch(&path) {
                tracing::debug!(path = %path.display(), error = %e, "unwatch failed");
            }
        }
    }

    /// Logical watches hit by an event. Pure access events are ignored.
    pub fn route(&self, event: &notify::Event) -> Vec<WatchHit> {
        if matches!(event.kind, EventKind::Access(_)) {
            return Vec::new();
        }
        event
            .paths
            .iter()
            .flat_map(|path| {
                self.table
                    .route(path)
                    .into_iter()
                    .map(move |(watch, fingerprint)| WatchHit {
                        watch,
                        fingerprint,
                        path: path.clone(),
                    })
            })
            .collect()
    }

    pub fn table(&self) -> &WatchTable {
        &self.table
    }
}
