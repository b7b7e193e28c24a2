//! Recursively-acquirable mutual-exclusion object that tracks its owner by
//! thread id (never by a pointer back to the `Thread` object, so ownership
//! never creates a reference cycle).

use super::coordinator;
use super::queue::WaiterQueue;
use super::{ConsumeOutcome, Waitable};
use parking_lot::Mutex;
use xenon_core::{Error, Result};

struct MutantState {
    owner: Option<u32>,
    recursion: u32,
    /// Set when the owning thread terminated without releasing; cleared
    /// the moment the next waiter acquires it.
    abandoned: bool,
    waiters: WaiterQueue,
}

pub struct MutantObject {
    state: Mutex<MutantState>,
}

impl MutantObject {
    pub fn new(owner: Option<u32>) -> Self {
        let (owner, recursion) = match owner {
            Some(thread) => (Some(thread), 1),
            None => (None, 0),
        };
        Self {
            state: Mutex::new(MutantState { owner, recursion, abandoned: false, waiters: WaiterQueue::default() }),
        }
    }

    pub fn owner(&self) -> Option<u32> {
        self.state.lock().owner
    }

    pub fn recursion(&self) -> u32 {
        self.state.lock().recursion
    }

    /// Releases one level of recursive ownership. A full release (the last
    /// one) wakes one waiter. Fails with `NotOwner` if `thread_id` does not
    /// currently own the mutant.
    pub fn release(&self, thread_id: u32) -> Result<()> {
        let _coord = coordinator::lock();
        let mut state = self.state.lock();
        if state.owner != Some(thread_id) {
            return Err(Error::NotOwner { thread: thread_id });
        }
        state.recursion -= 1;
        if state.recursion == 0 {
            state.owner = None;
        }
        drop(state);
        coordinator::notify_all();
        Ok(())
    }

    /// Marks the mutant abandoned because `thread_id`, its owner, died
    /// without releasing it. The next successful acquire observes
    /// `WaitResult::Abandoned`.
    pub fn abandon(&self, thread_id: u32) {
        let _coord = coordinator::lock();
        let mut state = self.state.lock();
        if state.owner == Some(thread_id) {
            state.owner = None;
            state.recursion = 0;
            state.abandoned = true;
        }
        drop(state);
        coordinator::notify_all();
    }
}

impl Waitable for MutantObject {
    fn join_waiters(&self, ticket: u64) {
        self.state.lock().waiters.join(ticket);
    }

    fn leave_waiters(&self, ticket: u64) {
        self.state.lock().waiters.leave(ticket);
    }

    fn is_ready(&self, ticket: u64, thread_id: u32) -> bool {
        let state = self.state.lock();
        state.owner == Some(thread_id) || (state.owner.is_none() && state.waiters.is_front(ticket))
    }

    fn try_consume(&self, ticket: u64, thread_id: u32) -> ConsumeOutcome {
        let mut state = self.state.lock();

        // A thread that already owns the mutant may re-enter regardless of
        // queue position — recursion is not subject to FIFO fairness.
        if state.owner == Some(thread_id) {
            state.recursion += 1;
            return ConsumeOutcome::Consumed;
        }

        if state.owner.is_some() || !state.waiters.is_front(ticket) {
            return ConsumeOutcome::NotReady;
        }

        let was_abandoned = state.abandoned;
        state.owner = Some(thread_id);
        state.recursion = 1;
        state.abandoned = false;

        if was_abandoned {
            ConsumeOutcome::Abandoned
        } else {
            ConsumeOutcome::Consumed
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
    fn recursive_acquire_and_release() {
        let mutant = Arc::new(MutantObject::new(None));
        assert_eq!(wait_single(&*mutant, WaitTimeout::zero(), 1), WaitResult::Signaled(0));
        assert_eq!(wait_single(&*mutant, WaitTimeout::zero(), 1), WaitResult::Signaled(0));
        assert_eq!(mutant.recursion(), 2);
        mutant.release(1).unwrap();
        mutant.release(1).unwrap();
        assert_eq!(mutant.owner(), None);
        assert_eq!(wait_single(&*mutant, WaitTimeout::zero(), 2), WaitResult::Signaled(0));
        assert_eq!(mutant.owner(), Some(2));
    }

    #[test]
    fn release_by_non_owner_fails() {
        let mutant = Arc::new(MutantObject::new(Some(1)));
        assert_eq!(mutant.release(2), Err(Error::NotOwner { thread: 2 }));
    }

    #[test]
    fn abandoned_mutant_is_observed_by_next_acquirer() {
        let mutant = Arc::new(MutantObject::new(Some(1)));
        mutant.abandon(1);
        assert_eq!(wait_single(&*mutant, WaitTimeout::zero(), 2), WaitResult::Abandoned(0));
        assert_eq!(mutant.owner(), Some(2));
    }
}
