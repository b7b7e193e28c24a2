//! Single- and multi-object wait, the operation every blocking kernel
//! primitive reduces to.

use super::queue::next_ticket;
use super::{coordinator, ConsumeOutcome, Waitable};
use std::time::Instant;
use xenon_core::{WaitResult, WaitTimeout};

/// Waits on one object. Equivalent to `wait_multiple` with a single-element
/// slice and `wait_all = false`, but avoids the slice/Vec bookkeeping.
pub fn wait_single<T: Waitable>(object: &T, timeout: WaitTimeout, thread_id: u32) -> WaitResult {
    wait_multiple(&[object], false, timeout, thread_id, || false)
}

/// Waits on a set of objects, either for any one of them (`wait_all =
/// false`) or for all of them simultaneously (`wait_all = true`).
///
/// `is_cancelled` is polled once per wake-up; when it reports `true` the
/// wait returns `WaitResult::Cancelled` without consuming any object.
///
/// All state checks and consumption happen under the single process-wide
/// coordinator lock (see [`coordinator`]), so a `wait_all` over several
/// objects either consumes all of them atomically or none of them — no
/// other thread can observe a partially-satisfied set.
pub fn wait_multiple<T: Waitable>(
    objects: &[&T],
    wait_all: bool,
    timeout: WaitTimeout,
    thread_id: u32,
    mut is_cancelled: impl FnMut() -> bool,
) -> WaitResult {
    if objects.is_empty() {
        return WaitResult::Timeout;
    }

    let ticket = next_ticket();
    for object in objects {
        object.join_waiters(ticket);
    }

    let deadline = timeout.to_duration().map(|d| Instant::now() + d);
    let result = loop {
        if is_cancelled() {
            break WaitResult::Cancelled;
        }

        let mut coord = coordinator::lock();

        if wait_all {
            match try_consume_all(objects, ticket, thread_id) {
                Some(outcome) => break outcome,
                None => {}
            }
        } else if let Some((index, outcome)) = try_consume_any(objects, ticket, thread_id) {
            break match outcome {
                ConsumeOutcome::Consumed => WaitResult::Signaled(index),
                ConsumeOutcome::Abandoned => WaitResult::Abandoned(index),
                ConsumeOutcome::NotReady => unreachable!(),
            };
        }

        if timeout.is_zero() {
            break WaitResult::Timeout;
        }

        if !coordinator::park(&mut coord, deadline) {
            break WaitResult::Timeout;
        }
    };

    for object in objects {
        object.leave_waiters(ticket);
    }
    result
}

/// Attempts to satisfy a wait-any: the first object (in caller order) whose
/// state is consumable right now wins.
fn try_consume_any<T: Waitable>(objects: &[&T], ticket: u64, thread_id: u32) -> Option<(usize, ConsumeOutcome)> {
    for (index, object) in objects.iter().enumerate() {
        match object.try_consume(ticket, thread_id) {
            ConsumeOutcome::NotReady => continue,
            outcome => return Some((index, outcome)),
        }
    }
    None
}

/// Attempts to satisfy a wait-all: every object must independently report
/// ready (pure `is_ready` probe) before any of them is committed via
/// `try_consume`. Because the probe, the commit, and the coordinator lock
/// guarding both are never released in between, there is no interleaving
/// in which some objects end up consumed and others do not.
fn try_consume_all<T: Waitable>(objects: &[&T], ticket: u64, thread_id: u32) -> Option<WaitResult> {
    let all_ready = objects.iter().all(|object| object.is_ready(ticket, thread_id));
    if !all_ready {
        return None;
    }

    let mut last = ConsumeOutcome::Consumed;
    for object in objects {
        let outcome = object.try_consume(ticket, thread_id);
        debug_assert!(!matches!(outcome, ConsumeOutcome::NotReady));
        last = outcome;
    }

    Some(match last {
        ConsumeOutcome::Abandoned => WaitResult::Abandoned(objects.len() - 1),
        _ => WaitResult::Signaled(objects.len() - 1),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::{EventObject, ResetMode};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn wait_all_over_two_events_consumes_both_atomically_and_wakes_once() {
        let a = Arc::new(EventObject::new(ResetMode::Auto, false));
        let b = Arc::new(EventObject::new(ResetMode::Auto, false));

        let waiter = {
            let a = Arc::clone(&a);
            let b = Arc::clone(&b);
            thread::spawn(move || wait_multiple(&[&*a, &*b], true, WaitTimeout::from_millis(500), 1, || false))
        };

        thread::sleep(Duration::from_millis(20));
        a.set();
        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished(), "wait-all must not wake while `b` is still unsignaled");

        b.set();
        assert_eq!(waiter.join().unwrap(), WaitResult::Signaled(1));
        assert!(!a.is_signaled(), "wait-all must consume every object in the set, not just the last one");
        assert!(!b.is_signaled());
    }
}
