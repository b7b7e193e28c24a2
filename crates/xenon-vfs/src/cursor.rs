//! A minimal cursor over an in-memory byte slice for parsing archive
//! headers and tables. Archive formats here are little-endian throughout.

use xenon_core::{Error, Result};

#[derive(Debug, Clone, Copy)]
pub struct Cursor<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    pub fn position(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.offset)
    }

    pub fn seek(&mut self, position: usize) -> Result<()> {
        if position > self.data.len() {
            return Err(eof("seek"));
        }
        self.offset = position;
        Ok(())
    }

    fn take(&mut self, size: usize) -> Result<&'a [u8]> {
        if self.offset + size > self.data.len() {
            return Err(eof("read"));
        }
        let slice = &self.data[self.offset..self.offset + size];
        self.offset += size;
        Ok(slice)
    }

    pub fn read_bytes(&mut self, size: usize) -> Result<&'a [u8]> {
        self.take(size)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    /// Reads a fixed-width, nul-terminated name from the table region,
    /// stopping at the first `\0` or the field width, whichever comes
    /// first.
    pub fn read_fixed_str(&mut self, width: usize) -> Result<String> {
        let bytes = self.take(width)?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }

    /// Reads a nul-terminated name starting at the cursor's current
    /// position, of unbounded length (used for the IMG name table, which
    /// is not fixed-width).
    pub fn read_cstr(&mut self) -> Result<String> {
        let start = self.offset;
        let end = self.data[start..].iter().position(|&b| b == 0).ok_or_else(|| eof("cstr"))?;
        let bytes = &self.data[start..start + end];
        self.offset = start + end + 1;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}

fn eof(context: &str) -> Error {
    Error::format_error(context, "unexpected end of archive data")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_little_endian_primitives_in_sequence() {
        let data = [0x01, 0x00, 0x02, 0x00, 0x00, 0x00, 0xAA];
        let mut cursor = Cursor::new(&data);
        assert_eq!(cursor.read_u16().unwrap(), 1);
        assert_eq!(cursor.read_u32().unwrap(), 2);
        assert_eq!(cursor.read_u8().unwrap(), 0xAA);
    }

    #[test]
    fn read_past_end_is_format_error() {
        let data = [0u8; 2];
        let mut cursor = Cursor::new(&data);
        assert!(cursor.read_u32().is_err());
    }

    #[test]
    fn fixed_str_stops_at_nul() {
        let data = b"name\0\0\0\0";
        let mut cursor = Cursor::new(data);
        assert_eq!(cursor.read_fixed_str(8).unwrap(), "name");
    }

    #[test]
    fn cstr_reads_up_to_terminator_and_advances_past_it() {
        let data = b"alpha\0beta\0";
        let mut cursor = Cursor::new(data);
        assert_eq!(cursor.read_cstr().unwrap(), "alpha");
        assert_eq!(cursor.read_cstr().unwrap(), "beta");
    }
}
