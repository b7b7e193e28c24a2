//! RPF v0/v2/v3 archive reader.
//!
//! The table of contents is always at byte offset 2048, sized by the
//! header's `toc_size` field, and is the only region the AES-256-ECB
//! scheme ever covers; entry bodies (compressed or not) are plain.
//!
//! Name addressing differs by version: v0 and v2 entries carry an offset
//! into a name-table blob appended after the entry table; v3 entries
//! carry a Jenkins one-at-a-time hash instead, so a v3 archive's entries
//! are looked up by hashing the query path rather than by string name —
//! `entries()` exposes a `"#{hash:08x}"` placeholder name for these since
//! the original string cannot be recovered from the hash alone.

use super::{extract_with_cache, Archive, ArchiveEntry};
use crate::cache::ExtractionCache;
use crate::crypto::{decrypt_16_pass, AES_KEY_LEN};
use crate::cursor::Cursor;
use crate::hash::jenkins_one_at_a_time;
use flate2::read::DeflateDecoder;
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::{Arc, Mutex};
use xenon_core::{Error, Result};

const TOC_OFFSET: u64 = 2048;
const ENTRY_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpfVersion {
    V0,
    V2,
    V3,
}

impl RpfVersion {
    fn from_magic(magic: &[u8; 4]) -> Option<Self> {
        match magic {
            b"RPF0" => Some(RpfVersion::V0),
            b"RPF2" => Some(RpfVersion::V2),
            b"RPF3" => Some(RpfVersion::V3),
            _ => None,
        }
    }

    fn header_len(self) -> usize {
        match self {
            RpfVersion::V0 => 12,
            RpfVersion::V2 | RpfVersion::V3 => 20,
        }
    }
}

struct Header {
    version: RpfVersion,
    toc_size: u32,
    entry_count: u32,
    encrypted: bool,
}

fn parse_header(buf: &[u8]) -> Result<Header> {
    let mut cursor = Cursor::new(buf);
    let magic: [u8; 4] = cursor.read_bytes(4)?.try_into().unwrap();
    let version = RpfVersion::from_magic(&magic).ok_or_else(|| Error::format_error("rpf::parse_header", "magic mismatch"))?;
    let toc_size = cursor.read_u32()?;
    let entry_count = cursor.read_u32()?;
    let encrypted = match version {
        RpfVersion::V0 => false,
        RpfVersion::V2 | RpfVersion::V3 => cursor.read_u32()? != 0,
    };
    Ok(Header { version, toc_size, entry_count, encrypted })
}

struct RawEntry {
    version: RpfVersion,
    word0: u32,
    word1: u32,
    word2: u32,
    word3: u32,
}

impl RawEntry {
    fn is_directory(&self) -> bool {
        self.version == RpfVersion::V0 && self.word0 & 0x8000_0000 != 0
    }

    fn is_resource(&self) -> bool {
        match self.version {
            RpfVersion::V0 => false,
            RpfVersion::V2 => self.word3 & 0xC000_0000 == 0xC000_0000,
            RpfVersion::V3 => self.word3 & 0x4000_0000 != 0,
        }
    }

    fn is_compressed(&self) -> bool {
        match self.version {
            RpfVersion::V0 => false,
            RpfVersion::V2 => self.word3 & 0x2000_0000 != 0,
            RpfVersion::V3 => self.word3 & 0x8000_0000 != 0,
        }
    }

    fn offset(&self) -> u64 {
        if self.version == RpfVersion::V2 && self.is_resource() {
            (self.word1 & 0x00FF_FFFF) as u64
        } else {
            self.word1 as u64
        }
    }

    fn decompressed_size(&self) -> u64 {
        self.word2 as u64
    }

    fn name_offset(&self) -> Option<u32> {
        match self.version {
            RpfVersion::V0 => Some(self.word0 & 0x7FFF_FFFF),
            RpfVersion::V2 => Some(self.word0),
            RpfVersion::V3 => None,
        }
    }

    fn name_hash(&self) -> Option<u32> {
        match self.version {
            RpfVersion::V3 => Some(self.word0),
            _ => None,
        }
    }
}

pub struct RpfArchive {
    file: Mutex<File>,
    version: RpfVersion,
    entries: Vec<ArchiveEntry>,
    raw: Vec<RawEntry>,
    by_name: HashMap<String, usize>,
    by_hash: HashMap<u32, usize>,
    cache: ExtractionCache,
}

impl RpfArchive {
    pub fn open(path: &Path, key: Option<&[u8; AES_KEY_LEN]>, max_cached_bytes: u64) -> Result<Self> {
        let mut file = File::open(path).map_err(|e| Error::not_found(format!("{}: {e}", path.display())))?;
        let mut probe = vec![0u8; 20];
        file.read_exact(&mut probe).map_err(|e| Error::format_error("rpf::open", e.to_string()))?;
        let magic: [u8; 4] = probe[0..4].try_into().unwrap();
        let version = RpfVersion::from_magic(&magic).ok_or_else(|| Error::format_error("rpf::open", "unrecognized RPF magic"))?;
        let header = parse_header(&probe[..version.header_len()])?;

        let mut toc = vec![0u8; header.toc_size as usize];
        file.seek(SeekFrom::Start(TOC_OFFSET)).map_err(|e| Error::format_error("rpf::open", e.to_string()))?;
        file.read_exact(&mut toc).map_err(|e| Error::format_error("rpf::open", e.to_string()))?;
        if header.encrypted {
            let key = key.ok_or_else(|| Error::DecryptionError { reason: "archive is encrypted and no key is configured".into() })?;
            decrypt_16_pass(key, &mut toc)?;
        }

        let mut cursor = Cursor::new(&toc);
        let mut raw = Vec::with_capacity(header.entry_count as usize);
        for _ in 0..header.entry_count {
            let word0 = cursor.read_u32()?;
            let word1 = cursor.read_u32()?;
            let word2 = cursor.read_u32()?;
            let word3 = cursor.read_u32()?;
            raw.push(RawEntry { version, word0, word1, word2, word3 });
        }

        let name_table = &toc[header.entry_count as usize * ENTRY_LEN..];
        let mut entries = Vec::with_capacity(raw.len());
        let mut by_name = HashMap::new();
        let mut by_hash = HashMap::new();
        for (index, entry) in raw.iter().enumerate() {
            if entry.is_directory() {
                continue;
            }
            let name = match entry.name_offset() {
                Some(offset) => read_name_at(name_table, offset as usize)?,
                None => format!("#{:08x}", entry.name_hash().expect("v3 entries carry a name hash")),
            };
            if let Some(hash) = entry.name_hash() {
                by_hash.insert(hash, index);
            }
            by_name.insert(name.clone(), index);
            entries.push(ArchiveEntry { name, size: entry.decompressed_size() });
        }

        tracing::debug!(path = %path.display(), ?version, entries = raw.len(), encrypted = header.encrypted, "opened rpf archive");
        Ok(Self { file: Mutex::new(file), version, entries, raw, by_name, by_hash, cache: ExtractionCache::new(max_cached_bytes) })
    }

    fn read_body(&self, index: usize) -> Result<Vec<u8>> {
        let entry = &self.raw[index];
        let mut file = self.file.lock().expect("rpf file mutex poisoned");
        file.seek(SeekFrom::Start(entry.offset())).map_err(|e| Error::format_error("rpf::read_body", e.to_string()))?;
        if entry.is_compressed() {
            let mut decoder = DeflateDecoder::new(&mut *file);
            let mut out = Vec::with_capacity(entry.decompressed_size() as usize);
            decoder.read_to_end(&mut out).map_err(|e| Error::DecompressionError { reason: e.to_string() })?;
            if out.len() as u64 != entry.decompressed_size() {
                return Err(Error::DecompressionError {
                    reason: format!("decompressed to {} bytes, expected {}", out.len(), entry.decompressed_size()),
                });
            }
            Ok(out)
        } else {
            let mut out = vec![0u8; entry.decompressed_size() as usize];
            file.read_exact(&mut out).map_err(|e| Error::format_error("rpf::read_body", e.to_string()))?;
            Ok(out)
        }
    }

    fn resolve_index(&self, name: &str) -> Option<usize> {
        if self.version == RpfVersion::V3 {
            let hash = jenkins_one_at_a_time(name.as_bytes());
            if let Some(&index) = self.by_hash.get(&hash) {
                return Some(index);
            }
        }
        self.by_name.get(name).copied()
    }
}

fn read_name_at(name_table: &[u8], offset: usize) -> Result<String> {
    if offset > name_table.len() {
        return Err(Error::format_error("rpf::read_name_at", "name offset out of bounds"));
    }
    let end = name_table[offset..].iter().position(|&b| b == 0).unwrap_or(name_table.len() - offset);
    Ok(String::from_utf8_lossy(&name_table[offset..offset + end]).into_owned())
}

impl Archive for RpfArchive {
    fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    fn extract(&self, name: &str) -> Result<Arc<Vec<u8>>> {
        let index = self.resolve_index(name);
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

    fn build_v2_archive(names_and_bodies: &[(&str, &[u8])]) -> Vec<u8> {
        let mut name_table = Vec::new();
        let mut name_offsets = Vec::new();
        for (name, _) in names_and_bodies {
            name_offsets.push(name_table.len() as u32);
            name_table.extend_from_slice(name.as_bytes());
            name_table.push(0);
        }

        let mut entries = Vec::new();
        let mut body_offset = 2048u64 + 20 /* header */;
        let header_and_entries_len = 20 + names_and_bodies.len() * ENTRY_LEN;
        let toc_size = header_and_entries_len - 20 + name_table.len();
        body_offset += toc_size as u64;
        let body_start = (body_offset + 2047) / 2048 * 2048;
        let mut offset_cursor = body_start;
        let mut bodies = Vec::new();
        for (i, (_, body)) in names_and_bodies.iter().enumerate() {
            entries.extend_from_slice(&name_offsets[i].to_le_bytes());
            entries.extend_from_slice(&(offset_cursor as u32).to_le_bytes());
            entries.extend_from_slice(&(body.len() as u32).to_le_bytes());
            entries.extend_from_slice(&0u32.to_le_bytes());
            bodies.push((offset_cursor, *body));
            offset_cursor += body.len() as u64;
        }

        let mut toc = entries;
        toc.extend_from_slice(&name_table);

        let mut header = Vec::new();
        header.extend_from_slice(b"RPF2");
        header.extend_from_slice(&(toc.len() as u32).to_le_bytes());
        header.extend_from_slice(&(names_and_bodies.len() as u32).to_le_bytes());
        header.extend_from_slice(&0u32.to_le_bytes()); // not encrypted
        header.extend_from_slice(&0u32.to_le_bytes()); // reserved

        let mut file = header;
        file.resize(2048, 0);
        file.extend_from_slice(&toc);
        file.resize(body_start as usize, 0);
        for (offset, body) in bodies {
            assert_eq!(file.len() as u64, offset);
            file.extend_from_slice(body);
        }
        file
    }

    #[test]
    fn v2_extracts_entry_by_name() {
        let data = build_v2_archive(&[("common/data/handling.dat", b"override-bytes")]);
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&data).unwrap();
        let archive = RpfArchive::open(tmp.path(), None, 1024 * 1024).unwrap();
        let bytes = archive.extract("common/data/handling.dat").unwrap();
        assert_eq!(&bytes[..], b"override-bytes");
    }

    #[test]
    fn empty_toc_reports_not_found_for_any_path() {
        let data = build_v2_archive(&[]);
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&data).unwrap();
        let archive = RpfArchive::open(tmp.path(), None, 1024).unwrap();
        assert!(archive.entries().is_empty());
        assert!(archive.extract("anything").is_err());
    }
}
