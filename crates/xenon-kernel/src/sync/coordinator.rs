//! The single coordinator lock every wait and signal operation funnels
//! through.
//!
//! Per the design note on "wait all" semantics: rather than letting each
//! kernel object guard its own state independently (which invites a
//! lost-wakeup between a waiter's "not satisfied yet" check and a
//! signaler's update), every signal and every wait acquires this one
//! process-wide lock before touching any object's state. A signal holds it
//! only long enough to mutate state and broadcast; a wait holds it only
//! long enough to check-and-maybe-consume before sleeping on the paired
//! condition variable. This keeps cross-object "wait all" atomic for free:
//! there is never a window where two different objects' state is observed
//! from two different points in real time.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

static COORD_LOCK: Mutex<()> = Mutex::new(());
static COORD_CONDVAR: Condvar = Condvar::new();

/// Acquires the coordinator lock. Held across a state check-and-mutate,
/// never across a blocking sleep.
pub(crate) fn lock() -> MutexGuard<'static, ()> {
    COORD_LOCK.lock()
}

/// Wakes every thread parked in [`park`]. Called while still holding the
/// guard returned by [`lock`], so no waiter can miss the update.
pub(crate) fn notify_all() {
    COORD_CONDVAR.notify_all();
}

/// Parks the calling thread on the coordinator condition variable until
/// notified or `deadline` passes. Returns `true` if the wait should be
/// retried (woken, possibly spuriously), `false` if the deadline passed.
pub(crate) fn park(guard: &mut MutexGuard<'static, ()>, deadline: Option<Instant>) -> bool {
    match deadline {
        None => {
            COORD_CONDVAR.wait(guard);
            true
        }
        Some(deadline) => {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let remaining = deadline - now;
            // Cap the sleep so a cancellation flag set concurrently is
            // noticed with bounded latency even under an "infinite" caller
            // timeout that was already converted to a concrete deadline.
            let slice = remaining.min(Duration::from_millis(50));
            let timed_out = COORD_CONDVAR.wait_for(guard, slice).timed_out();
            !(timed_out && Instant::now() >= deadline)
        }
    }
}
