//! Localization text-table loader: 4-byte header, a `TKEY` sub-table of
//! {data-offset, hash} pairs, and a `TDAT` sub-table of nul-terminated
//! UTF-16 strings. Multiple files are merged in load order, later files
//! overriding earlier entries for the same hash.

use crate::cursor::Cursor;
use std::collections::HashMap;
use std::path::Path;
use xenon_core::{Error, Result};

const EXPECTED_VERSION: u16 = 4;
const EXPECTED_BITS: u16 = 16;

pub struct LocalizationTable {
    strings: HashMap<u32, String>,
}

impl LocalizationTable {
    pub fn new() -> Self {
        Self { strings: HashMap::new() }
    }

    pub fn lookup(&self, hash: u32) -> Option<&str> {
        self.strings.get(&hash).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    /// Loads every file in `paths`, in order, merging into this table;
    /// later files' entries override earlier ones with the same hash.
    pub fn load_all(&mut self, paths: &[impl AsRef<Path>]) -> Result<()> {
        for path in paths {
            let bytes = std::fs::read(path.as_ref())
                .map_err(|e| Error::format_error("localization::load_all", format!("{}: {e}", path.as_ref().display())))?;
            self.merge_file(&bytes)?;
            tracing::debug!(path = %path.as_ref().display(), total_strings = self.strings.len(), "merged localization file");
        }
        Ok(())
    }

    fn merge_file(&mut self, data: &[u8]) -> Result<()> {
        let mut cursor = Cursor::new(data);
        let version = cursor.read_u16()?;
        let bits = cursor.read_u16()?;
        if version != EXPECTED_VERSION || bits != EXPECTED_BITS {
            return Err(Error::format_error("localization::merge_file", format!("unsupported header (version {version}, bits {bits})")));
        }

        let mut keys: Option<Vec<(u32, u32)>> = None;
        let mut data_table: Option<&[u8]> = None;

        while cursor.remaining() >= 8 {
            let tag = cursor.read_bytes(4)?;
            let size = cursor.read_u32()? as usize;
            let body = cursor.read_bytes(size)?;
            if tag == b"TKEY" {
                keys = Some(parse_tkey(body)?);
            } else if tag == b"TDAT" {
                data_table = Some(body);
            }
        }

        let keys = keys.ok_or_else(|| Error::format_error("localization::merge_file", "missing TKEY sub-table"))?;
        let data_table = data_table.ok_or_else(|| Error::format_error("localization::merge_file", "missing TDAT sub-table"))?;

        for (data_offset, hash) in keys {
            let text = read_wide_cstr(data_table, data_offset as usize)?;
            self.strings.insert(hash, text);
        }
        Ok(())
    }
}

impl Default for LocalizationTable {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_tkey(body: &[u8]) -> Result<Vec<(u32, u32)>> {
    let mut cursor = Cursor::new(body);
    let mut pairs = Vec::with_capacity(body.len() / 8);
    while cursor.remaining() >= 8 {
        let data_offset = cursor.read_u32()?;
        let hash = cursor.read_u32()?;
        pairs.push((data_offset, hash));
    }
    Ok(pairs)
}

fn read_wide_cstr(data: &[u8], offset: usize) -> Result<String> {
    if offset > data.len() || offset % 2 != 0 {
        return Err(Error::format_error("localization::read_wide_cstr", "data offset out of bounds or misaligned"));
    }
    let mut units = Vec::new();
    let mut pos = offset;
    while pos + 2 <= data.len() {
        let unit = u16::from_le_bytes([data[pos], data[pos + 1]]);
        pos += 2;
        if unit == 0 {
            break;
        }
        units.push(unit);
    }
    String::from_utf16(&units).map_err(|e| Error::format_error("localization::read_wide_cstr", e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn build_table(entries: &[(u32, &str)]) -> Vec<u8> {
        let mut data_table = Vec::new();
        let mut key_pairs = Vec::new();
        for (hash, text) in entries {
            let offset = data_table.len() as u32;
            for unit in text.encode_utf16() {
                data_table.extend_from_slice(&unit.to_le_bytes());
            }
            data_table.extend_from_slice(&0u16.to_le_bytes());
            key_pairs.push((offset, *hash));
        }

        let mut tkey_body = Vec::new();
        for (offset, hash) in &key_pairs {
            tkey_body.extend_from_slice(&offset.to_le_bytes());
            tkey_body.extend_from_slice(&hash.to_le_bytes());
        }

        let mut file = Vec::new();
        file.extend_from_slice(&EXPECTED_VERSION.to_le_bytes());
        file.extend_from_slice(&EXPECTED_BITS.to_le_bytes());
        file.extend_from_slice(b"TKEY");
        file.extend_from_slice(&(tkey_body.len() as u32).to_le_bytes());
        file.extend_from_slice(&tkey_body);
        file.extend_from_slice(b"TDAT");
        file.extend_from_slice(&(data_table.len() as u32).to_le_bytes());
        file.extend_from_slice(&data_table);
        file
    }

    #[test]
    fn looks_up_string_by_hash() {
        let bytes = build_table(&[(1, "Hello"), (2, "World")]);
        let mut table = LocalizationTable::new();
        table.merge_file(&bytes).unwrap();
        assert_eq!(table.lookup(1), Some("Hello"));
        assert_eq!(table.lookup(2), Some("World"));
        assert_eq!(table.lookup(99), None);
    }

    #[test]
    fn later_file_overrides_earlier_entry_for_same_hash() {
        let first = build_table(&[(1, "Old")]);
        let second = build_table(&[(1, "New")]);
        let dir = tempfile::tempdir().unwrap();
        let p1 = dir.path().join("a.txt");
        let p2 = dir.path().join("b.txt");
        std::fs::File::create(&p1).unwrap().write_all(&first).unwrap();
        std::fs::File::create(&p2).unwrap().write_all(&second).unwrap();

        let mut table = LocalizationTable::new();
        table.load_all(&[p1, p2]).unwrap();
        assert_eq!(table.lookup(1), Some("New"));
    }

    #[test]
    fn rejects_unsupported_version() {
        let mut bytes = build_table(&[(1, "x")]);
        bytes[0] = 9;
        let mut table = LocalizationTable::new();
        assert!(table.merge_file(&bytes).is_err());
    }
}
