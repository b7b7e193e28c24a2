//! Handle table, kernel object variants, host-backed synchronization
//! primitives, guest threads, and the kernel import dispatch table —
//! everything translated code needs to behave as if it were still running
//! under the original console kernel.

pub mod dispatch;
pub mod handle_table;
pub mod object;
pub mod sync;
pub mod thread;

pub use dispatch::{dispatch, ImportCall, KernelContext};
pub use handle_table::HandleTable;
pub use object::{DirEntrySnapshot, DirEnumObject, FileObject, KernelObject, ObjectKind};
pub use thread::{current_guest_thread, current_thread_id, resolve_thread_id, tls_alloc, tls_free, EntryFn, GuestThread, PpcContext};
