//! Handle allocation and lookup over [`KernelObject`]s.
//!
//! Linearizable with respect to `close`: every operation holds the same
//! mutex, so once a `close` call returns, no concurrent `lookup` for that
//! handle can observe the object again unless the integer value has since
//! been reissued.

use crate::object::{KernelObject, ObjectKind};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::debug;
use xenon_core::{Error, Handle, Result};

/// First handle value ever issued. Low values are reserved the way the
/// console kernel reserves them: zero is always invalid, and the top of the
/// range is carved out for pseudo-handles.
const FIRST_HANDLE: u32 = 4;
const RESERVED_RANGE_START: u32 = 0xffff_fff0;

struct Table {
    objects: HashMap<u32, KernelObject>,
    /// Every handle value ever inserted, including ones since closed — lets
    /// `close` distinguish "never issued" from "already closed".
    issued: HashSet<u32>,
}

pub struct HandleTable {
    table: Mutex<Table>,
    next: AtomicU32,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(Table { objects: HashMap::new(), issued: HashSet::new() }),
            next: AtomicU32::new(FIRST_HANDLE),
        }
    }

    /// Inserts a new object and returns the handle it was assigned. Handle
    /// values are issued low-to-high in steps of 4 (mirroring the console
    /// convention) and never collide with a still-live handle.
    pub fn insert(&self, object: KernelObject) -> Handle {
        let kind = object.kind();
        loop {
            let raw = self.next.fetch_add(4, Ordering::Relaxed);
            if raw == 0 || raw >= RESERVED_RANGE_START {
                // Wrapped into the reserved pseudo-handle range; the counter
                // keeps climbing but every value in range is skipped.
                continue;
            }

            let mut table = self.table.lock();
            if table.objects.contains_key(&raw) {
                continue;
            }
            table.issued.insert(raw);
            table.objects.insert(raw, object);
            debug!(handle = format_args!("{raw:#010x}"), kind = kind.name(), "inserted kernel object");
            return Handle(raw);
        }
    }

    /// Resolves `handle` to its object, failing if it is invalid, closed, or
    /// not of `expected` kind.
    pub fn lookup(&self, handle: Handle, expected: ObjectKind) -> Result<KernelObject> {
        if !handle.is_valid() {
            return Err(Error::InvalidHandle { handle: handle.raw() });
        }
        let table = self.table.lock();
        let object = table.objects.get(&handle.raw()).ok_or(Error::InvalidHandle { handle: handle.raw() })?;
        if object.kind() != expected {
            return Err(Error::WrongType { handle: handle.raw(), expected: expected.name() });
        }
        Ok(object.clone())
    }

    /// Resolves `handle` without a type check, for call sites that dispatch
    /// on the resulting `KernelObject::kind()` themselves (e.g. generic
    /// wait-multiple over mixed handle kinds).
    pub fn lookup_any(&self, handle: Handle) -> Result<KernelObject> {
        if !handle.is_valid() {
            return Err(Error::InvalidHandle { handle: handle.raw() });
        }
        let table = self.table.lock();
        table.objects.get(&handle.raw()).cloned().ok_or(Error::InvalidHandle { handle: handle.raw() })
    }

    /// Drops this handle's reference to its object. Returns `AlreadyClosed`
    /// if `handle` was issued but is no longer live, `InvalidHandle` if it
    /// was never issued at all.
    pub fn close(&self, handle: Handle) -> Result<()> {
        if !handle.is_valid() {
            return Err(Error::InvalidHandle { handle: handle.raw() });
        }
        let mut table = self.table.lock();
        if table.objects.remove(&handle.raw()).is_some() {
            debug!(handle = format_args!("{:#010x}", handle.raw()), "closed kernel object");
            Ok(())
        } else if table.issued.contains(&handle.raw()) {
            Err(Error::AlreadyClosed { handle: handle.raw() })
        } else {
            Err(Error::InvalidHandle { handle: handle.raw() })
        }
    }

    pub fn len(&self) -> usize {
        self.table.lock().objects.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::EventObject;
    use std::sync::Arc;

    fn event_object() -> KernelObject {
        KernelObject::Event(Arc::new(EventObject::new(crate::sync::ResetMode::Manual, false)))
    }

    #[test]
    fn insert_then_lookup_returns_same_object() {
        let table = HandleTable::new();
        let handle = table.insert(event_object());
        assert!(table.lookup(handle, ObjectKind::Event).is_ok());
    }

    #[test]
    fn lookup_after_close_is_invalid() {
        let table = HandleTable::new();
        let handle = table.insert(event_object());
        table.close(handle).unwrap();
        assert_eq!(table.lookup(handle, ObjectKind::Event).unwrap_err(), Error::InvalidHandle { handle: handle.raw() });
    }

    #[test]
    fn double_close_is_reported_distinctly_from_never_issued() {
        let table = HandleTable::new();
        let handle = table.insert(event_object());
        table.close(handle).unwrap();
        assert_eq!(table.close(handle).unwrap_err(), Error::AlreadyClosed { handle: handle.raw() });
        assert_eq!(table.close(Handle(0xdead_beef)).unwrap_err(), Error::InvalidHandle { handle: 0xdead_beef });
    }

    #[test]
    fn wrong_type_lookup_fails() {
        let table = HandleTable::new();
        let handle = table.insert(event_object());
        assert!(matches!(table.lookup(handle, ObjectKind::Semaphore), Err(Error::WrongType { .. })));
    }

    #[test]
    fn zero_handle_is_always_invalid() {
        let table = HandleTable::new();
        assert_eq!(table.lookup(Handle::INVALID, ObjectKind::Event).unwrap_err(), Error::InvalidHandle { handle: 0 });
    }
}
