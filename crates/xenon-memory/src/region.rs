//! Reservation of the single contiguous guest address space.

use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{info, warn};
use xenon_core::{Error, Result};

/// Size of the guest address space: a fixed 512 MiB, matching the console's
/// usable main-memory window.
pub const GUEST_ADDRESS_SPACE_SIZE: usize = 512 * 1024 * 1024;

/// Host virtual address the reservation is attempted at first. Recompiled
/// code embeds guest addresses as host-relative offsets in a handful of
/// places, so a fixed, low, 32-bit-reachable base keeps those offsets small;
/// if the OS refuses it the reservation falls back to any address the
/// allocator chooses and `to_host`/`to_guest` still work correctly.
const PREFERRED_BASE: usize = 0x1_0000_0000;

/// A single contiguous block of host memory backing the entire guest
/// address space. Reserved once at startup and never resized.
///
/// Shared without locking between guest threads, exactly as physical RAM is
/// shared on the original console: concurrent access correctness is the
/// guest program's responsibility, not this type's.
pub struct GuestMemory {
    base: *mut u8,
    size: usize,
    /// Bump-pointer cursor for [`alloc`](GuestMemory::alloc); starts above a
    /// guard region so address 0 is never handed out as a valid allocation.
    cursor: AtomicUsize,
}

/// Low guard region `alloc` never hands out, keeping guest address 0 (and
/// nearby low addresses recompiled code sometimes treats as "null") out of
/// the allocatable range.
const ALLOC_GUARD_SIZE: usize = 0x1_0000;

// SAFETY: guest memory is intentionally shared across threads without
// internal synchronization; this mirrors real hardware and the guest
// program is responsible for any ordering it needs.
unsafe impl Send for GuestMemory {}
unsafe impl Sync for GuestMemory {}

impl GuestMemory {
    /// Reserves the guest address space. Fatal on failure: recompiled code
    /// has no fallback path if there is nowhere to put guest memory.
    pub fn reserve() -> Result<Self> {
        let base = platform::reserve(PREFERRED_BASE, GUEST_ADDRESS_SPACE_SIZE).map_err(|reason| {
            Error::fatal(format!("failed to reserve {GUEST_ADDRESS_SPACE_SIZE} byte guest address space: {reason}"))
        })?;

        info!(
            base = format_args!("{:#x}", base as usize),
            size = GUEST_ADDRESS_SPACE_SIZE,
            "reserved guest address space"
        );

        Ok(Self { base, size: GUEST_ADDRESS_SPACE_SIZE, cursor: AtomicUsize::new(ALLOC_GUARD_SIZE) })
    }

    /// Bump-allocates `size` bytes of guest address space aligned to
    /// `align`, used for guest thread stacks and the virtual-memory-allocate
    /// import. There is no corresponding free list: guest allocations live
    /// for the process lifetime, matching the console's flat memory model
    /// closely enough for a single-title runtime.
    pub fn alloc(&self, size: usize, align: usize) -> Result<u32> {
        let align = align.max(1);
        loop {
            let current = self.cursor.load(Ordering::Relaxed);
            let aligned = (current + align - 1) & !(align - 1);
            let next = aligned
                .checked_add(size)
                .ok_or_else(|| Error::OutOfMemory { reason: "guest address space exhausted".into() })?;
            if next > self.size {
                return Err(Error::OutOfMemory {
                    reason: format!("requested {size} bytes exceeds remaining guest address space"),
                });
            }
            if self.cursor.compare_exchange(current, next, Ordering::Relaxed, Ordering::Relaxed).is_ok() {
                return Ok(aligned as u32);
            }
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn base_ptr(&self) -> *mut u8 {
        self.base
    }

    /// Translates a guest address into a host pointer. Panics on an
    /// out-of-range address: recompiled code never constructs one itself,
    /// so an out-of-range value indicates a bug in the translation, not a
    /// condition the runtime can recover from at this layer.
    pub fn to_host(&self, guest_addr: u32) -> *mut u8 {
        self.try_to_host(guest_addr)
            .unwrap_or_else(|| panic!("guest address {guest_addr:#010x} is outside the reserved region"))
    }

    /// Non-panicking translation, used by import shims that must validate
    /// addresses coming from less-trusted call sites (e.g. virtual-memory
    /// query imports).
    pub fn try_to_host(&self, guest_addr: u32) -> Option<*mut u8> {
        let offset = guest_addr as usize;
        if offset >= self.size {
            return None;
        }
        // SAFETY: offset is bounds-checked against the reserved region above.
        Some(unsafe { self.base.add(offset) })
    }

    /// Translates a host pointer previously obtained from [`to_host`] back
    /// into its guest address.
    pub fn to_guest(&self, host_ptr: *const u8) -> u32 {
        let base = self.base as usize;
        let ptr = host_ptr as usize;
        debug_assert!(ptr >= base && ptr < base + self.size, "pointer is not within the guest region");
        (ptr - base) as u32
    }
}

impl Drop for GuestMemory {
    fn drop(&mut self) {
        if let Err(reason) = platform::release(self.base, self.size) {
            warn!(reason = %reason, "failed to release guest address space");
        }
    }
}

/// Process-wide count of live `GuestMemory` reservations; the runtime only
/// ever constructs one, but tests construct and drop several in sequence,
/// so this exists purely to catch a double-reservation bug early.
static LIVE_RESERVATIONS: AtomicUsize = AtomicUsize::new(0);

#[cfg(unix)]
mod platform {
    use super::LIVE_RESERVATIONS;
    use std::ffi::c_void;
    use std::sync::atomic::Ordering;

    pub fn reserve(preferred_base: usize, size: usize) -> Result<*mut u8, String> {
        // SAFETY: mmap is called with a fixed-size anonymous mapping; the
        // returned pointer is only ever dereferenced within [ptr, ptr+size).
        let ptr = unsafe {
            libc::mmap(
                preferred_base as *mut c_void,
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        let ptr = if ptr == libc::MAP_FAILED {
            // Preferred base was unavailable; let the OS choose one instead.
            // SAFETY: same invariants as above, without a hinted address.
            unsafe {
                libc::mmap(
                    std::ptr::null_mut(),
                    size,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                    -1,
                    0,
                )
            }
        } else {
            ptr
        };

        if ptr == libc::MAP_FAILED {
            return Err(std::io::Error::last_os_error().to_string());
        }

        LIVE_RESERVATIONS.fetch_add(1, Ordering::SeqCst);
        Ok(ptr as *mut u8)
    }

    pub fn release(base: *mut u8, size: usize) -> Result<(), String> {
        // SAFETY: base/size were returned by a prior successful `reserve`
        // call of the same size and have not been unmapped since.
        let result = unsafe { libc::munmap(base as *mut c_void, size) };
        LIVE_RESERVATIONS.fetch_sub(1, Ordering::SeqCst);
        if result != 0 {
            return Err(std::io::Error::last_os_error().to_string());
        }
        Ok(())
    }
}

#[cfg(windows)]
mod platform {
    use super::LIVE_RESERVATIONS;
    use std::sync::atomic::Ordering;
    use winapi::um::memoryapi::{VirtualAlloc, VirtualFree};
    use winapi::um::winnt::{MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_READWRITE};

    pub fn reserve(preferred_base: usize, size: usize) -> Result<*mut u8, String> {
        // SAFETY: VirtualAlloc is called with a fixed size and standard
        // read/write protection; the returned pointer is only dereferenced
        // within [ptr, ptr+size).
        let mut ptr = unsafe {
            VirtualAlloc(preferred_base as *mut _, size, MEM_RESERVE | MEM_COMMIT, PAGE_READWRITE)
        };

        if ptr.is_null() {
            // SAFETY: same invariants as above, without a hinted address.
            ptr = unsafe { VirtualAlloc(std::ptr::null_mut(), size, MEM_RESERVE | MEM_COMMIT, PAGE_READWRITE) };
        }

        if ptr.is_null() {
            return Err(format!("VirtualAlloc failed with error {}", unsafe {
                winapi::um::errhandlingapi::GetLastError()
            }));
        }

        LIVE_RESERVATIONS.fetch_add(1, Ordering::SeqCst);
        Ok(ptr as *mut u8)
    }

    pub fn release(base: *mut u8, _size: usize) -> Result<(), String> {
        // SAFETY: base was returned by a prior successful `reserve` call and
        // has not been freed since; MEM_RELEASE requires size 0.
        let ok = unsafe { VirtualFree(base as *mut _, 0, MEM_RELEASE) };
        LIVE_RESERVATIONS.fetch_sub(1, Ordering::SeqCst);
        if ok == 0 {
            return Err(format!("VirtualFree failed with error {}", unsafe {
                winapi::um::errhandlingapi::GetLastError()
            }));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_round_trips_pointers() {
        let mem = GuestMemory::reserve().expect("reservation should succeed");
        let host = mem.to_host(0x1000);
        assert_eq!(mem.to_guest(host), 0x1000);
    }

    #[test]
    fn out_of_range_address_is_rejected() {
        let mem = GuestMemory::reserve().expect("reservation should succeed");
        assert!(mem.try_to_host(GUEST_ADDRESS_SPACE_SIZE as u32).is_none());
        assert!(mem.try_to_host(0).is_some());
    }
}
