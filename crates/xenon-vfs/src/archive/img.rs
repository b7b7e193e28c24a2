//! IMG v3 archive reader.
//!
//! Layout: a 16-byte header, a table of fixed 16-byte entries, then a
//! sequence of nul-terminated names (one per entry, in table order).
//! Entry bodies are never encrypted; only the header and table may be.

use super::{extract_with_cache, Archive, ArchiveEntry};
use crate::cache::ExtractionCache;
use crate::crypto::{decrypt_16_pass, AES_KEY_LEN};
use crate::cursor::Cursor;
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::{Arc, Mutex};
use xenon_core::{Error, Result};

const MAGIC: [u8; 4] = *b"SIMG";
const HEADER_LEN: usize = 16;
const ENTRY_LEN: usize = 16;
const BLOCK_SIZE: u64 = 2048;
const RESOURCE_FLAG_MASK: u32 = 0xC000_0000;

struct RawEntry {
    flags: u32,
    resource_type: u8,
    start_block: u32,
    used_blocks: u16,
    padding: u16,
}

impl RawEntry {
    fn is_resource(&self) -> bool {
        self.flags & RESOURCE_FLAG_MASK == RESOURCE_FLAG_MASK
    }

    fn size(&self) -> u64 {
        if self.is_resource() {
            (self.used_blocks as u64 * BLOCK_SIZE).saturating_sub(self.padding as u64)
        } else {
            (self.flags & !RESOURCE_FLAG_MASK) as u64
        }
    }

    fn offset(&self) -> u64 {
        self.start_block as u64 * BLOCK_SIZE
    }
}

struct Header {
    entry_count: u32,
    name_table_size: u32,
}

fn parse_header(buf: &[u8]) -> Result<Header> {
    let mut cursor = Cursor::new(buf);
    let magic: [u8; 4] = cursor.read_bytes(4)?.try_into().unwrap();
    if magic != MAGIC {
        return Err(Error::format_error("img::parse_header", "magic mismatch"));
    }
    let entry_count = cursor.read_u32()?;
    let name_table_size = cursor.read_u32()?;
    let _reserved = cursor.read_u32()?;
    Ok(Header { entry_count, name_table_size })
}

pub struct ImgArchive {
    file: Mutex<File>,
    entries: Vec<ArchiveEntry>,
    raw: Vec<RawEntry>,
    by_name: HashMap<String, usize>,
    cache: ExtractionCache,
}

impl ImgArchive {
    pub fn open(path: &Path, key: Option<&[u8; AES_KEY_LEN]>, max_cached_bytes: u64) -> Result<Self> {
        let mut file = File::open(path).map_err(|e| Error::not_found(format!("{}: {e}", path.display())))?;
        let mut prefix = vec![0u8; HEADER_LEN];
        file.read_exact(&mut prefix).map_err(|e| Error::format_error("img::open", e.to_string()))?;

        let (header, encrypted) = match parse_header(&prefix) {
            Ok(header) => (header, false),
            Err(_) => {
                let key = key.ok_or_else(|| Error::DecryptionError {
                    reason: "archive header does not match and no decryption key is configured".into(),
                })?;
                decrypt_16_pass(key, &mut prefix)?;
                let header = parse_header(&prefix)
                    .map_err(|_| Error::DecryptionError { reason: "header still invalid after decryption".into() })?;
                (header, true)
            }
        };

        let toc_len = header.entry_count as usize * ENTRY_LEN + header.name_table_size as usize;
        let toc_len = (toc_len + 15) & !15;
        let mut toc = vec![0u8; toc_len];
        file.read_exact(&mut toc).map_err(|e| Error::format_error("img::open", e.to_string()))?;
        if encrypted {
            let key = key.expect("presence already checked above");
            decrypt_16_pass(key, &mut toc)?;
        }

        let mut cursor = Cursor::new(&toc);
        let mut raw = Vec::with_capacity(header.entry_count as usize);
        for _ in 0..header.entry_count {
            let flags = cursor.read_u32()?;
            let resource_type = cursor.read_u8()?;
            let _reserved: [u8; 3] = cursor.read_bytes(3)?.try_into().unwrap();
            let start_block = cursor.read_u32()?;
            let used_blocks = cursor.read_u16()?;
            let padding = cursor.read_u16()?;
            raw.push(RawEntry { flags, resource_type, start_block, used_blocks, padding });
        }

        let mut entries = Vec::with_capacity(raw.len());
        let mut by_name = HashMap::with_capacity(raw.len());
        for (index, entry) in raw.iter().enumerate() {
            let name = cursor.read_cstr()?;
            by_name.insert(name.clone(), index);
            entries.push(ArchiveEntry { name, size: entry.size() });
        }

        tracing::debug!(path = %path.display(), entries = raw.len(), encrypted, "opened img archive");
        Ok(Self { file: Mutex::new(file), entries, raw, by_name, cache: ExtractionCache::new(max_cached_bytes) })
    }

    fn read_body(&self, index: usize) -> Result<Vec<u8>> {
        let entry = &self.raw[index];
        let size = entry.size() as usize;
        let mut buf = vec![0u8; size];
        let mut file = self.file.lock().expect("img file mutex poisoned");
        file.seek(SeekFrom::Start(entry.offset())).map_err(|e| Error::format_error("img::read_body", e.to_string()))?;
        file.read_exact(&mut buf).map_err(|e| Error::format_error("img::read_body", e.to_string()))?;
        let _ = entry.resource_type;
        Ok(buf)
    }
}

impl Archive for ImgArchive {
    fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    fn extract(&self, name: &str) -> Result<Arc<Vec<u8>>> {
        let index = self.by_name.get(name).copied();
        extract_with_cache(&self.cache, name, || match index {
            Some(index) => self.read_body(index),
            None => Err(Error::not_found(name)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn build_archive(names_and_bodies: &[(&str, &[u8])]) -> Vec<u8> {
        let name_table: Vec<u8> =
            names_and_bodies.iter().flat_map(|(name, _)| name.bytes().chain(std::iter::once(0))).collect();

        let mut header = Vec::new();
        header.extend_from_slice(&MAGIC);
        header.extend_from_slice(&(names_and_bodies.len() as u32).to_le_bytes());
        header.extend_from_slice(&(name_table.len() as u32).to_le_bytes());
        header.extend_from_slice(&0u32.to_le_bytes());
        assert_eq!(header.len(), HEADER_LEN);

        let toc_entries_len = names_and_bodies.len() * ENTRY_LEN;
        let toc_len = toc_entries_len + name_table.len();
        let toc_len_padded = (toc_len + 15) & !15;

        let body_region_start_block = ((HEADER_LEN + toc_len_padded) as u64 + BLOCK_SIZE - 1) / BLOCK_SIZE;
        let mut start_block = body_region_start_block as u32;
        let mut toc = Vec::new();
        let mut bodies = Vec::new();
        for (_, body) in names_and_bodies {
            toc.extend_from_slice(&(body.len() as u32).to_le_bytes()); // flags word == raw size, non-resource
            toc.push(0); // resource_type
            toc.extend_from_slice(&[0u8; 3]);
            toc.extend_from_slice(&start_block.to_le_bytes());
            toc.extend_from_slice(&0u16.to_le_bytes()); // used_blocks (unused for non-resource)
            toc.extend_from_slice(&0u16.to_le_bytes()); // padding

            let blocks = ((body.len() as u64 + BLOCK_SIZE - 1) / BLOCK_SIZE).max(1) as u32;
            start_block += blocks;
            let mut padded = body.to_vec();
            padded.resize(blocks as usize * BLOCK_SIZE as usize, 0);
            bodies.push(padded);
        }
        toc.extend_from_slice(&name_table);
        toc.resize(toc_len_padded, 0);

        let mut file = header;
        file.extend_from_slice(&toc);
        file.resize(body_region_start_block as usize * BLOCK_SIZE as usize, 0);
        for body in bodies {
            file.extend_from_slice(&body);
        }
        file
    }

    #[test]
    fn extracts_entry_bytes_by_name() {
        let data = build_archive(&[("common/data/handling.dat", b"handling-bytes")]);
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&data).unwrap();
        let archive = ImgArchive::open(tmp.path(), None, 1024 * 1024).unwrap();
        let bytes = archive.extract("common/data/handling.dat").unwrap();
        assert_eq!(&bytes[..14], b"handling-bytes");
    }

    #[test]
    fn missing_entry_is_not_found_and_cached() {
        let data = build_archive(&[("a.txt", b"hi")]);
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&data).unwrap();
        let archive = ImgArchive::open(tmp.path(), None, 1024 * 1024).unwrap();
        assert!(archive.extract("missing.txt").is_err());
        assert!(archive.extract("missing.txt").is_err());
    }

    #[test]
    fn unmatched_magic_without_key_is_decryption_error() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&[0xFFu8; 64]).unwrap();
        let err = ImgArchive::open(tmp.path(), None, 1024).unwrap_err();
        assert!(matches!(err, Error::DecryptionError { .. }));
    }
}
