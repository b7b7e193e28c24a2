//! Virtual archive produced by merging a directory of loose replacement
//! files over a real archive's entry list — same read interface, entries
//! materialized lazily so an unreferenced override never gets read.

use super::{Archive, ArchiveEntry};
use crate::cache::ExtractionCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use xenon_core::{Error, Result};

pub struct OverlayArchive {
    base: Arc<dyn Archive>,
    entries: Vec<ArchiveEntry>,
    /// Entry name -> replacement file path. Entries absent here fall back
    /// to the base archive.
    overrides: Mutex<HashMap<String, PathBuf>>,
    cache: ExtractionCache,
}

impl OverlayArchive {
    /// `replacements` maps an entry name (case-insensitive match against
    /// the base archive) to a replacement file on disk. Names not present
    /// in the base archive are appended as new entries.
    pub fn new(base: Arc<dyn Archive>, replacement_dir: &std::path::Path, max_cached_bytes: u64) -> Result<Self> {
        let mut by_lower: HashMap<String, usize> = HashMap::new();
        for (index, entry) in base.entries().iter().enumerate() {
            by_lower.insert(entry.name.to_ascii_lowercase(), index);
        }

        let mut entries: Vec<ArchiveEntry> = base.entries().to_vec();
        let mut overrides: HashMap<String, PathBuf> = HashMap::new();

        if replacement_dir.is_dir() {
            for replacement in walk_files(replacement_dir)? {
                let relative = replacement
                    .strip_prefix(replacement_dir)
                    .expect("walked path is under replacement_dir")
                    .to_string_lossy()
                    .replace('\\', "/");
                let size = fs::metadata(&replacement).map(|m| m.len()).unwrap_or(0);
                let lower = relative.to_ascii_lowercase();
                match by_lower.get(&lower) {
                    Some(&index) => {
                        entries[index].size = size;
                        overrides.insert(entries[index].name.clone(), replacement);
                    }
                    None => {
                        entries.push(ArchiveEntry { name: relative.clone(), size });
                        overrides.insert(relative, replacement);
                    }
                }
            }
        }

        Ok(Self { base, entries, overrides: Mutex::new(overrides), cache: ExtractionCache::new(max_cached_bytes) })
    }
}

fn walk_files(root: &std::path::Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let read = fs::read_dir(&dir).map_err(|e| Error::format_error("overlay::walk_files", e.to_string()))?;
        for entry in read {
            let entry = entry.map_err(|e| Error::format_error("overlay::walk_files", e.to_string()))?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                out.push(path);
            }
        }
    }
    Ok(out)
}

impl Archive for OverlayArchive {
    fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    fn extract(&self, name: &str) -> Result<Arc<Vec<u8>>> {
        if let Some(entry) = self.cache.get(name) {
            return match entry {
                crate::cache::CacheEntry::Hit(bytes) => Ok(bytes),
                crate::cache::CacheEntry::Miss => Err(Error::not_found(name)),
            };
        }

        let override_path = self.overrides.lock().get(name).cloned();

        let result = match override_path {
            Some(path) => fs::read(&path).map_err(|e| Error::format_error("overlay::extract", e.to_string())),
            None => self.base.extract(name).map(|bytes| (*bytes).clone()),
        };

        match result {
            Ok(bytes) => {
                let bytes = Arc::new(bytes);
                self.cache.insert_hit(name.to_string(), bytes.clone());
                Ok(bytes)
            }
            Err(err) => {
                self.cache.insert_miss(name.to_string());
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    struct FakeArchive {
        entries: Vec<ArchiveEntry>,
        bodies: HashMap<String, Vec<u8>>,
    }

    impl Archive for FakeArchive {
        fn entries(&self) -> &[ArchiveEntry] {
            &self.entries
        }

        fn extract(&self, name: &str) -> Result<Arc<Vec<u8>>> {
            self.bodies.get(name).cloned().map(Arc::new).ok_or_else(|| Error::not_found(name))
        }
    }

    #[test]
    fn override_file_wins_over_base_entry() {
        let mut bodies = HashMap::new();
        bodies.insert("common/data/handling.dat".to_string(), b"base-bytes".to_vec());
        let base = Arc::new(FakeArchive {
            entries: vec![ArchiveEntry { name: "common/data/handling.dat".into(), size: 10 }],
            bodies,
        });

        let overlay_dir = tempfile::tempdir().unwrap();
        let nested = overlay_dir.path().join("common/data");
        fs::create_dir_all(&nested).unwrap();
        let mut file = fs::File::create(nested.join("handling.dat")).unwrap();
        file.write_all(b"overlay-bytes").unwrap();

        let merged = OverlayArchive::new(base, overlay_dir.path(), 1024 * 1024).unwrap();
        let bytes = merged.extract("common/data/handling.dat").unwrap();
        assert_eq!(&bytes[..], b"overlay-bytes");
    }

    #[test]
    fn new_file_not_in_base_is_appended() {
        let base = Arc::new(FakeArchive { entries: vec![], bodies: HashMap::new() });
        let overlay_dir = tempfile::tempdir().unwrap();
        let mut file = fs::File::create(overlay_dir.path().join("new.dat")).unwrap();
        file.write_all(b"fresh").unwrap();

        let merged = OverlayArchive::new(base, overlay_dir.path(), 1024).unwrap();
        assert!(merged.entries().iter().any(|e| e.name == "new.dat"));
        assert_eq!(&merged.extract("new.dat").unwrap()[..], b"fresh");
    }
}
