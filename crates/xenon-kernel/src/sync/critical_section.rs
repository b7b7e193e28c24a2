//! User-mode-like critical section: an uncontended acquire is a single
//! compare-exchange, with fallback to blocking on contention.
//!
//! Unlike [`super::mutant`], a critical section is not a kernel object —
//! it is never placed in the handle table, never waited on by
//! `wait_single`/`wait_multiple`, and owns no FIFO queue. It exists purely
//! as cheap in-process mutual exclusion for translated code that used
//! `RtlEnterCriticalSection` on the original console.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU32, Ordering};

const UNOWNED: u32 = 0;

/// A recursive, non-fair lock keyed by owning thread id.
pub struct CriticalSection {
    owner: AtomicU32,
    recursion: AtomicU32,
    contended: Mutex<()>,
    parked: Condvar,
}

impl Default for CriticalSection {
    fn default() -> Self {
        Self::new()
    }
}

impl CriticalSection {
    pub fn new() -> Self {
        Self {
            owner: AtomicU32::new(UNOWNED),
            recursion: AtomicU32::new(0),
            contended: Mutex::new(()),
            parked: Condvar::new(),
        }
    }

    /// Blocks until `thread_id` owns the section (acquiring it if unowned,
    /// or re-entering if `thread_id` already owns it).
    ///
    /// On contention this parks on a futex-equivalent condition variable
    /// rather than spinning with a bound and forcing acquisition — a
    /// bounded spin that gives up and steals ownership would corrupt the
    /// owner field out from under the actual holder.
    pub fn enter(&self, thread_id: u32) {
        loop {
            if self.owner.load(Ordering::Acquire) == thread_id {
                self.recursion.fetch_add(1, Ordering::Relaxed);
                return;
            }
            if self
                .owner
                .compare_exchange(UNOWNED, thread_id, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.recursion.store(1, Ordering::Relaxed);
                return;
            }

            let mut guard = self.contended.lock();
            // Re-check under the lock: the owner may have released between
            // the failed compare-exchange above and taking this lock.
            if self.owner.load(Ordering::Acquire) != UNOWNED {
                self.parked.wait(&mut guard);
            }
        }
    }

    /// Attempts to enter without blocking.
    pub fn try_enter(&self, thread_id: u32) -> bool {
        if self.owner.load(Ordering::Acquire) == thread_id {
            self.recursion.fetch_add(1, Ordering::Relaxed);
            return true;
        }
        if self
            .owner
            .compare_exchange(UNOWNED, thread_id, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.recursion.store(1, Ordering::Relaxed);
            return true;
        }
        false
    }

    pub fn leave(&self, thread_id: u32) {
        debug_assert_eq!(self.owner.load(Ordering::Acquire), thread_id, "leave() by non-owner");
        let remaining = self.recursion.fetch_sub(1, Ordering::Relaxed) - 1;
        if remaining == 0 {
            self.owner.store(UNOWNED, Ordering::Release);
            let _guard = self.contended.lock();
            self.parked.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn recursive_enter_from_same_thread() {
        let cs = CriticalSection::new();
        cs.enter(1);
        cs.enter(1);
        cs.leave(1);
        cs.leave(1);
        assert!(cs.try_enter(2));
    }

    #[test]
    fn contended_enter_blocks_until_released() {
        let cs = Arc::new(CriticalSection::new());
        cs.enter(1);
        let cs2 = Arc::clone(&cs);
        let handle = thread::spawn(move || {
            cs2.enter(2);
            cs2.leave(2);
        });
        thread::sleep(Duration::from_millis(20));
        cs.leave(1);
        handle.join().unwrap();
    }
}
