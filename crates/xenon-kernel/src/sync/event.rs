//! Manual- and auto-reset events.

use super::coordinator;
use super::queue::{next_ticket, WaiterQueue};
use super::{ConsumeOutcome, Waitable};
use parking_lot::Mutex;
use std::thread;
use std::time::Duration;

/// Whether an event clears itself after releasing one waiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetMode {
    Manual,
    Auto,
}

struct EventState {
    reset_mode: ResetMode,
    signaled: bool,
    waiters: WaiterQueue,
}

/// A Win32-style event: a boolean flag with manual- or auto-reset release
/// semantics, backed by the process-wide [`coordinator`].
pub struct EventObject {
    state: Mutex<EventState>,
}

impl EventObject {
    pub fn new(reset_mode: ResetMode, initial_signaled: bool) -> Self {
        Self {
            state: Mutex::new(EventState {
                reset_mode,
                signaled: initial_signaled,
                waiters: WaiterQueue::default(),
            }),
        }
    }

    pub fn reset_mode(&self) -> ResetMode {
        self.state.lock().reset_mode
    }

    pub fn is_signaled(&self) -> bool {
        self.state.lock().signaled
    }

    /// Transitions to signaled. Stays signaled until a waiter consumes it
    /// (auto-reset) or `clear` is called (manual-reset).
    pub fn set(&self) {
        let _coord = coordinator::lock();
        self.state.lock().signaled = true;
        coordinator::notify_all();
    }

    pub fn clear(&self) {
        let _coord = coordinator::lock();
        self.state.lock().signaled = false;
        coordinator::notify_all();
    }

    /// Momentarily signals the event to release whichever threads are
    /// *currently* parked on it, then clears it again, without leaving it
    /// signaled for a thread that waits afterward.
    ///
    /// This mirrors Win32's `PulseEvent`, including its well-documented
    /// unreliability: a waiter that has not yet reached the point of
    /// checking the event's state when the pulse fires can still miss it.
    /// The brief yield below gives already-parked waiters a window to
    /// notice the signal before it is withdrawn, but does not make the
    /// operation race-free for a waiter that arrives concurrently.
    pub fn pulse(&self) {
        {
            let _coord = coordinator::lock();
            self.state.lock().signaled = true;
            coordinator::notify_all();
        }
        thread::yield_now();
        thread::sleep(Duration::from_micros(50));
        let _coord = coordinator::lock();
        self.state.lock().signaled = false;
    }
}

impl Waitable for EventObject {
    fn join_waiters(&self, ticket: u64) {
        self.state.lock().waiters.join(ticket);
    }

    fn leave_waiters(&self, ticket: u64) {
        self.state.lock().waiters.leave(ticket);
    }

    fn is_ready(&self, ticket: u64, _thread_id: u32) -> bool {
        let state = self.state.lock();
        match state.reset_mode {
            ResetMode::Manual => state.signaled,
            ResetMode::Auto => state.signaled && state.waiters.is_front(ticket),
        }
    }

    fn try_consume(&self, ticket: u64, _thread_id: u32) -> ConsumeOutcome {
        let mut state = self.state.lock();
        if !state.signaled {
            return ConsumeOutcome::NotReady;
        }
        match state.reset_mode {
            // Manual-reset events release every current and future waiter;
            // FIFO ordering is meaningless when nobody is exclusive.
            ResetMode::Manual => ConsumeOutcome::Consumed,
            // Auto-reset releases exactly one waiter — the one at the head
            // of this object's FIFO queue — and clears atomically with it.
            ResetMode::Auto => {
                if state.waiters.is_front(ticket) {
                    state.signaled = false;
                    ConsumeOutcome::Consumed
                } else {
                    ConsumeOutcome::NotReady
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::wait::wait_single;
    use std::sync::Arc;
    use xenon_core::{WaitResult, WaitTimeout};

    #[test]
    fn auto_reset_releases_one_waiter_and_clears() {
        let event = Arc::new(EventObject::new(ResetMode::Auto, false));
        event.set();
        assert_eq!(wait_single(&*event, WaitTimeout::zero(), 1), WaitResult::Signaled(0));
        assert!(!event.is_signaled());
        assert_eq!(wait_single(&*event, WaitTimeout::zero(), 1), WaitResult::Timeout);
    }

    #[test]
    fn manual_reset_stays_signaled_until_cleared() {
        let event = Arc::new(EventObject::new(ResetMode::Manual, false));
        event.set();
        assert_eq!(wait_single(&*event, WaitTimeout::zero(), 1), WaitResult::Signaled(0));
        assert!(event.is_signaled());
        event.clear();
        assert_eq!(wait_single(&*event, WaitTimeout::zero(), 1), WaitResult::Timeout);
    }

    #[test]
    fn producer_consumer_round_trip() {
        let event = Arc::new(EventObject::new(ResetMode::Auto, false));
        let waiter = {
            let event = Arc::clone(&event);
            thread::spawn(move || wait_single(&*event, WaitTimeout::from_millis(500), 1))
        };
        thread::sleep(Duration::from_millis(20));
        event.set();
        assert_eq!(waiter.join().unwrap(), WaitResult::Signaled(0));
    }
}
