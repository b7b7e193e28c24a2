//! Host-backed synchronization primitives: events, semaphores, mutants,
//! critical sections, and the single/multi-object wait operations that tie
//! them together.

mod coordinator;
mod queue;

pub mod critical_section;
pub mod event;
pub mod mutant;
pub mod semaphore;
pub mod wait;

pub use critical_section::CriticalSection;
pub use event::{EventObject, ResetMode};
pub use mutant::MutantObject;
pub use semaphore::SemaphoreObject;
pub use wait::{wait_multiple, wait_single};

/// Outcome of a non-blocking attempt to consume an object's signaled state
/// for one waiter's ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConsumeOutcome {
    /// The object was satisfiable and has been consumed on the caller's
    /// behalf (auto-reset cleared, semaphore decremented, mutant acquired).
    Consumed,
    /// The object was satisfiable, but because its owning thread died
    /// while holding it, the waiter has acquired an abandoned mutant.
    Abandoned,
    NotReady,
}

/// Capability every waitable kernel object exposes to the generic
/// single/multi-object wait implementation in [`wait`].
pub(crate) trait Waitable {
    fn join_waiters(&self, ticket: u64);
    fn leave_waiters(&self, ticket: u64);
    /// Pure readiness check: would `try_consume` succeed right now? Used by
    /// `wait_all` to probe an entire object set before committing to any
    /// of them, so an unsatisfiable set never partially consumes the
    /// objects that happened to be ready.
    fn is_ready(&self, ticket: u64, thread_id: u32) -> bool;
    /// `thread_id` is only meaningful for mutants, which must know who is
    /// asking in order to allow recursive acquisition by the owner.
    fn try_consume(&self, ticket: u64, thread_id: u32) -> ConsumeOutcome;
}
