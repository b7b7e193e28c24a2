//! Guest path resolution: normalize, then search mod overlays, the update
//! directory, the installed game directory, and loaded archive indices,
//! in that priority order, first match wins.

use crate::archive::Archive;
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use xenon_core::{Error, Result};

/// Where a resolved path's bytes actually live.
#[derive(Clone)]
pub enum Resolved {
    Host(PathBuf),
    Archive { archive: Arc<dyn Archive>, name: String },
}

pub struct VfsResolver {
    /// Mod overlay directories, highest priority first.
    overlay_dirs: Vec<PathBuf>,
    update_dir: Option<PathBuf>,
    game_dir: Option<PathBuf>,
    archives: RwLock<Vec<Arc<dyn Archive>>>,
    generation: AtomicU64,
}

thread_local! {
    static RESOLUTION_CACHE: RefCell<(u64, HashMap<String, Result<Resolved>>)> = RefCell::new((0, HashMap::new()));
}

impl VfsResolver {
    pub fn new(overlay_dirs: Vec<PathBuf>, update_dir: Option<PathBuf>, game_dir: Option<PathBuf>) -> Self {
        Self { overlay_dirs, update_dir, game_dir, archives: RwLock::new(Vec::new()), generation: AtomicU64::new(0) }
    }

    pub fn add_archive(&self, archive: Arc<dyn Archive>) {
        self.archives.write().expect("archive list poisoned").push(archive);
        self.rescan();
    }

    /// Invalidates every thread's resolution cache, e.g. after overlay
    /// files were added or removed on disk.
    pub fn rescan(&self) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(generation, "vfs resolution cache invalidated");
    }

    /// Where a new file should land when a caller opens a path for writing
    /// that doesn't resolve to an existing one: the update directory if one
    /// is configured, else the game directory.
    pub fn write_target_dir(&self) -> Option<&Path> {
        self.update_dir.as_deref().or(self.game_dir.as_deref())
    }

    /// The host directories searched by [`Self::resolve`], in priority
    /// order. Used for directory enumeration, which has no archive
    /// equivalent — archives expose a flat logical path list, not a real
    /// directory tree.
    pub fn host_roots(&self) -> impl Iterator<Item = &Path> {
        self.overlay_dirs.iter().map(PathBuf::as_path).chain(self.update_dir.as_deref()).chain(self.game_dir.as_deref())
    }

    /// Lowercases, turns backslashes into forward slashes, and strips a
    /// leading slash. Idempotent: `normalize(normalize(p)) == normalize(p)`.
    pub fn normalize(path: &str) -> String {
        let lower = path.to_ascii_lowercase().replace('\\', "/");
        lower.strip_prefix('/').map(str::to_string).unwrap_or(lower)
    }

    pub fn resolve(&self, path: &str) -> Result<Resolved> {
        let normalized = Self::normalize(path);
        let generation = self.generation.load(Ordering::Relaxed);

        if let Some(cached) = RESOLUTION_CACHE.with(|cache| {
            let cache = cache.borrow();
            if cache.0 == generation {
                cache.1.get(&normalized).cloned()
            } else {
                None
            }
        }) {
            return cached;
        }

        let result = self.resolve_uncached(&normalized);

        RESOLUTION_CACHE.with(|cache| {
            let mut cache = cache.borrow_mut();
            if cache.0 != generation {
                *cache = (generation, HashMap::new());
            }
            cache.1.insert(normalized, result.clone());
        });

        result
    }

    fn resolve_uncached(&self, normalized: &str) -> Result<Resolved> {
        for dir in &self.overlay_dirs {
            if let Some(found) = host_lookup(dir, normalized) {
                return Ok(Resolved::Host(found));
            }
        }
        if let Some(dir) = &self.update_dir {
            if let Some(found) = host_lookup(dir, normalized) {
                return Ok(Resolved::Host(found));
            }
        }
        if let Some(dir) = &self.game_dir {
            if let Some(found) = host_lookup(dir, normalized) {
                return Ok(Resolved::Host(found));
            }
        }
        for archive in self.archives.read().expect("archive list poisoned").iter() {
            if archive.contains(normalized) {
                return Ok(Resolved::Archive { archive: archive.clone(), name: normalized.to_string() });
            }
        }
        tracing::debug!(path = normalized, "vfs resolution failed");
        Err(Error::not_found(normalized))
    }
}

fn host_lookup(root: &Path, normalized: &str) -> Option<PathBuf> {
    let candidate = root.join(normalized);
    candidate.is_file().then_some(candidate)
}
