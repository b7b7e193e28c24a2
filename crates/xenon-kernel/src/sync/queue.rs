//! FIFO waiter bookkeeping shared by events, semaphores, and mutants.
//!
//! Each object keeps the tickets of threads currently parked on it, in
//! arrival order. A thread may only consume the object's state once its
//! ticket reaches the front, giving the "waiters are released in FIFO
//! order per object" guarantee even though actual wakeups are a broadcast.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_TICKET: AtomicU64 = AtomicU64::new(1);

/// Allocates a ticket unique for the process lifetime.
pub(crate) fn next_ticket() -> u64 {
    NEXT_TICKET.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Default)]
pub(crate) struct WaiterQueue {
    order: VecDeque<u64>,
}

impl WaiterQueue {
    pub(crate) fn join(&mut self, ticket: u64) {
        if !self.order.contains(&ticket) {
            self.order.push_back(ticket);
        }
    }

    pub(crate) fn leave(&mut self, ticket: u64) {
        self.order.retain(|&t| t != ticket);
    }

    pub(crate) fn is_front(&self, ticket: u64) -> bool {
        self.order.front().copied() == Some(ticket)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
