//! The single contiguous guest address space and its big-endian accessors.
//!
//! Recompiled code never touches host memory directly; every load and
//! store it performs goes through [`GuestMemory`], which reserves one fixed
//! 512 MiB region at startup and exposes guest/host pointer translation
//! plus endian-aware accessors over it.

mod accessors;
mod region;

pub use region::{GuestMemory, GUEST_ADDRESS_SPACE_SIZE};
