//! Counting semaphore.

use super::coordinator;
use super::queue::WaiterQueue;
use super::{ConsumeOutcome, Waitable};
use parking_lot::Mutex;
use xenon_core::{Error, Result};

struct SemaphoreState {
    count: u32,
    maximum: u32,
    waiters: WaiterQueue,
}

pub struct SemaphoreObject {
    state: Mutex<SemaphoreState>,
}

impl SemaphoreObject {
    pub fn new(initial: u32, maximum: u32) -> Result<Self> {
        if maximum == 0 || initial > maximum {
            return Err(Error::FormatError {
                context: "CreateSemaphore".into(),
                reason: format!("initial count {initial} must be within 0..={maximum}"),
            });
        }
        Ok(Self {
            state: Mutex::new(SemaphoreState { count: initial, maximum, waiters: WaiterQueue::default() }),
        })
    }

    pub fn count(&self) -> u32 {
        self.state.lock().count
    }

    pub fn maximum(&self) -> u32 {
        self.state.lock().maximum
    }

    /// Adds `delta` to the count without exceeding the maximum, waking as
    /// many waiters as the new count allows. Returns the count *before*
    /// this release, matching `ReleaseSemaphore`'s `lpPreviousCount`.
    pub fn release(&self, delta: u32) -> Result<u32> {
        let _coord = coordinator::lock();
        let mut state = self.state.lock();
        let previous = state.count;
        let new_count = previous
            .checked_add(delta)
            .filter(|&c| c <= state.maximum)
            .ok_or(Error::LimitExceeded { current: previous, delta, maximum: state.maximum })?;
        state.count = new_count;
        drop(state);
        coordinator::notify_all();
        Ok(previous)
    }
}

impl Waitable for SemaphoreObject {
    fn join_waiters(&self, ticket: u64) {
        self.state.lock().waiters.join(ticket);
    }

    fn leave_waiters(&self, ticket: u64) {
        self.state.lock().waiters.leave(ticket);
    }

    fn is_ready(&self, ticket: u64, _thread_id: u32) -> bool {
        let state = self.state.lock();
        state.count > 0 && state.waiters.is_front(ticket)
    }

    fn try_consume(&self, ticket: u64, _thread_id: u32) -> ConsumeOutcome {
        let mut state = self.state.lock();
        if state.count > 0 && state.waiters.is_front(ticket) {
            state.count -= 1;
            ConsumeOutcome::Consumed
        } else {
            ConsumeOutcome::NotReady
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::wait::wait_single;
    use std::sync::Arc;
    use xenon_core::WaitTimeout;

    #[test]
    fn rejects_initial_count_above_maximum() {
        assert!(SemaphoreObject::new(3, 2).is_err());
    }

    #[test]
    fn release_past_maximum_is_rejected() {
        let sem = SemaphoreObject::new(1, 2).unwrap();
        assert!(sem.release(1).is_ok());
        assert!(matches!(sem.release(1), Err(Error::LimitExceeded { .. })));
    }

    #[test]
    fn zero_count_wait_times_out_immediately() {
        let sem = Arc::new(SemaphoreObject::new(0, 1).unwrap());
        assert_eq!(wait_single(&*sem, WaitTimeout::zero(), 1).is_success(), false);
    }

    #[test]
    fn acquire_decrements_and_release_restores() {
        let sem = Arc::new(SemaphoreObject::new(1, 1).unwrap());
        assert!(wait_single(&*sem, WaitTimeout::zero(), 1).is_success());
        assert_eq!(sem.count(), 0);
        sem.release(1).unwrap();
        assert_eq!(sem.count(), 1);
    }
}
