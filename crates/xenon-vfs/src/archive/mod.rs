//! Read-only archive readers: IMG v3 and RPF v0/v2/v3, plus the overlay
//! merger that wraps either behind the same interface.

pub mod img;
pub mod overlay;
pub mod rpf;

use crate::cache::{CacheEntry, ExtractionCache};
use crate::crypto::AES_KEY_LEN;
use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;
use tempfile::NamedTempFile;
use xenon_core::{Error, Result};

/// A named, fixed-size entry in an archive's table of contents.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub name: String,
    pub size: u64,
}

/// The behavior shared by every archive kind: resolve a name to bytes, or
/// to a host file handle for consumers that need one (e.g. `mmap`-style
/// loaders in translated code). Implementors own their own extraction
/// cache so repeated extraction of the same path is cheap even across
/// different call sites.
pub trait Archive: Send + Sync {
    fn entries(&self) -> &[ArchiveEntry];

    fn contains(&self, name: &str) -> bool {
        self.entries().iter().any(|e| e.name == name)
    }

    /// Extracts the named entry's bytes, consulting and updating the
    /// cache. Negative results (`NotFound`) are cached too.
    fn extract(&self, name: &str) -> Result<Arc<Vec<u8>>>;

    /// Extracts into a fresh temp file and returns it, for callers that
    /// need a real host file descriptor rather than an in-memory buffer.
    fn extract_to_tempfile(&self, name: &str) -> Result<NamedTempFile> {
        let bytes = self.extract(name)?;
        let mut file = NamedTempFile::new()
            .map_err(|e| xenon_core::Error::fatal(format!("creating extraction tempfile: {e}")))?;
        file.write_all(&bytes).map_err(|e| xenon_core::Error::fatal(format!("writing extraction tempfile: {e}")))?;
        Ok(file)
    }
}

/// Shared extract-with-cache logic: implementors supply only the raw
/// decode step (`decode`), this handles the cache lookup/insert/negative
/// caching dance identically for every archive kind.
pub(crate) fn extract_with_cache(
    cache: &ExtractionCache,
    name: &str,
    decode: impl FnOnce() -> Result<Vec<u8>>,
) -> Result<Arc<Vec<u8>>> {
    if let Some(entry) = cache.get(name) {
        return match entry {
            CacheEntry::Hit(bytes) => Ok(bytes),
            CacheEntry::Miss => Err(xenon_core::Error::not_found(name)),
        };
    }
    match decode() {
        Ok(bytes) => {
            let bytes = Arc::new(bytes);
            cache.insert_hit(name.to_string(), bytes.clone());
            Ok(bytes)
        }
        Err(err @ xenon_core::Error::NotFound { .. }) => {
            cache.insert_miss(name.to_string());
            Err(err)
        }
        Err(err) => Err(err),
    }
}

/// Opens an archive file, dispatching to the IMG or RPF reader by file
/// extension — an encrypted archive's magic is exactly what fails to
/// match, so sniffing plaintext bytes can't reliably tell the formats
/// apart once encryption is in play, but the installed layout always
/// carries the conventional `.img`/`.rpf` extension either way.
pub fn open_archive(path: &Path, key: Option<&[u8; AES_KEY_LEN]>, max_cached_bytes: u64) -> Result<Arc<dyn Archive>> {
    match path.extension().and_then(|ext| ext.to_str()).map(str::to_ascii_lowercase).as_deref() {
        Some("img") => Ok(Arc::new(img::ImgArchive::open(path, key, max_cached_bytes)?)),
        Some("rpf") => Ok(Arc::new(rpf::RpfArchive::open(path, key, max_cached_bytes)?)),
        _ => Err(Error::format_error("archive::open_archive", format!("{}: unrecognized archive extension", path.display()))),
    }
}
