//! Big-endian load/store primitives over a [`GuestMemory`] region.
//!
//! Every load or store a recompiled function performs against guest memory
//! goes through one of these, so the host's native byte order never leaks
//! into guest-visible state.

use crate::region::GuestMemory;
use byteorder::{BigEndian, ByteOrder};
use std::slice;

impl GuestMemory {
    /// Returns the `len`-byte guest slice starting at `addr`.
    pub fn slice(&self, addr: u32, len: usize) -> &[u8] {
        let ptr = self.to_host(addr);
        // SAFETY: `to_host` already validated `addr` is within the region;
        // callers are responsible for `len` not running past its end, the
        // same contract recompiled loads rely on for the original console.
        unsafe { slice::from_raw_parts(ptr, len) }
    }

    pub fn slice_mut(&self, addr: u32, len: usize) -> &mut [u8] {
        let ptr = self.to_host(addr);
        // SAFETY: see `slice`.
        unsafe { slice::from_raw_parts_mut(ptr, len) }
    }

    pub fn read_u8(&self, addr: u32) -> u8 {
        self.slice(addr, 1)[0]
    }

    pub fn read_i8(&self, addr: u32) -> i8 {
        self.read_u8(addr) as i8
    }

    pub fn read_u16(&self, addr: u32) -> u16 {
        BigEndian::read_u16(self.slice(addr, 2))
    }

    pub fn read_i16(&self, addr: u32) -> i16 {
        BigEndian::read_i16(self.slice(addr, 2))
    }

    pub fn read_u32(&self, addr: u32) -> u32 {
        BigEndian::read_u32(self.slice(addr, 4))
    }

    pub fn read_i32(&self, addr: u32) -> i32 {
        BigEndian::read_i32(self.slice(addr, 4))
    }

    pub fn read_u64(&self, addr: u32) -> u64 {
        BigEndian::read_u64(self.slice(addr, 8))
    }

    pub fn read_i64(&self, addr: u32) -> i64 {
        BigEndian::read_i64(self.slice(addr, 8))
    }

    pub fn read_f32(&self, addr: u32) -> f32 {
        BigEndian::read_f32(self.slice(addr, 4))
    }

    pub fn read_f64(&self, addr: u32) -> f64 {
        BigEndian::read_f64(self.slice(addr, 8))
    }

    pub fn write_u8(&self, addr: u32, value: u8) {
        self.slice_mut(addr, 1)[0] = value;
    }

    pub fn write_i8(&self, addr: u32, value: i8) {
        self.write_u8(addr, value as u8);
    }

    pub fn write_u16(&self, addr: u32, value: u16) {
        BigEndian::write_u16(self.slice_mut(addr, 2), value);
    }

    pub fn write_i16(&self, addr: u32, value: i16) {
        BigEndian::write_i16(self.slice_mut(addr, 2), value);
    }

    pub fn write_u32(&self, addr: u32, value: u32) {
        BigEndian::write_u32(self.slice_mut(addr, 4), value);
    }

    pub fn write_i32(&self, addr: u32, value: i32) {
        BigEndian::write_i32(self.slice_mut(addr, 4), value);
    }

    pub fn write_u64(&self, addr: u32, value: u64) {
        BigEndian::write_u64(self.slice_mut(addr, 8), value);
    }

    pub fn write_i64(&self, addr: u32, value: i64) {
        BigEndian::write_i64(self.slice_mut(addr, 8), value);
    }

    pub fn write_f32(&self, addr: u32, value: f32) {
        BigEndian::write_f32(self.slice_mut(addr, 4), value);
    }

    pub fn write_f64(&self, addr: u32, value: f64) {
        BigEndian::write_f64(self.slice_mut(addr, 8), value);
    }

    /// Copies `data` into guest memory starting at `addr`.
    pub fn write_bytes(&self, addr: u32, data: &[u8]) {
        self.slice_mut(addr, data.len()).copy_from_slice(data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u32_round_trips_through_store_and_load() {
        let mem = GuestMemory::reserve().unwrap();
        for value in [0u32, 1, 0xdead_beef, u32::MAX] {
            mem.write_u32(0x2000, value);
            assert_eq!(mem.read_u32(0x2000), value);
        }
    }

    #[test]
    fn store_is_big_endian_on_the_wire() {
        let mem = GuestMemory::reserve().unwrap();
        mem.write_u32(0x3000, 0x0102_0304);
        assert_eq!(mem.slice(0x3000, 4), &[0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn f64_round_trips() {
        let mem = GuestMemory::reserve().unwrap();
        mem.write_f64(0x4000, std::f64::consts::PI);
        assert_eq!(mem.read_f64(0x4000), std::f64::consts::PI);
    }
}
