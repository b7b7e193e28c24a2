//! Guest threads and the PPC register context translated code runs against.

use crate::sync::{EventObject, ResetMode};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::cell::{Cell, RefCell};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};
use xenon_core::{Error, Handle, Result, WaitResult, WaitTimeout};
use xenon_memory::GuestMemory;

/// Number of thread-local-storage slots available per guest thread, matching
/// the console kernel's small fixed allocation rather than the host's
/// effectively unbounded TLS.
pub const TLS_SLOT_COUNT: usize = 64;

struct TlsIndexPool {
    next: u32,
    freed: Vec<u32>,
}

impl TlsIndexPool {
    const fn new() -> Self {
        Self { next: 0, freed: Vec::new() }
    }

    fn alloc(&mut self) -> Option<u32> {
        if let Some(index) = self.freed.pop() {
            return Some(index);
        }
        if (self.next as usize) < TLS_SLOT_COUNT {
            let index = self.next;
            self.next += 1;
            Some(index)
        } else {
            None
        }
    }

    fn free(&mut self, index: u32) {
        self.freed.push(index);
    }
}

static TLS_INDEX_POOL: Lazy<Mutex<TlsIndexPool>> = Lazy::new(|| Mutex::new(TlsIndexPool::new()));

/// Allocates a process-wide TLS slot index. `None` if all `TLS_SLOT_COUNT`
/// slots are already in use.
pub fn tls_alloc() -> Option<u32> {
    TLS_INDEX_POOL.lock().alloc()
}

pub fn tls_free(index: u32) {
    TLS_INDEX_POOL.lock().free(index);
}

/// The per-thread PowerPC register file translated functions read and write
/// directly, plus the small amount of bookkeeping the kernel layer needs to
/// marshal import-call arguments.
pub struct PpcContext {
    pub gpr: [u64; 32],
    pub fpr: [f64; 32],
    pub cr: u32,
    pub lr: u64,
    pub ctr: u64,
    pub xer: u32,
    pub entry_addr: u32,
}

impl PpcContext {
    pub fn new(entry_addr: u32, initial_stack_pointer: u32) -> Self {
        let mut gpr = [0u64; 32];
        gpr[1] = initial_stack_pointer as u64;
        Self { gpr, fpr: [0.0; 32], cr: 0, lr: 0, ctr: 0, xer: 0, entry_addr }
    }
}

thread_local! {
    /// Points at the `PpcContext` owned by the current guest thread's host
    /// thread body for the duration of the entry call; null on any other
    /// thread (including the process's own main thread).
    static CURRENT_CONTEXT: Cell<*mut PpcContext> = Cell::new(std::ptr::null_mut());

    /// The `GuestThread` owning the host thread currently executing, so
    /// import dispatch can reach TLS storage and suspend/resume state for
    /// "the calling thread" without the dispatch layer threading an extra
    /// parameter through every handler.
    static CURRENT_GUEST_THREAD: RefCell<Option<Arc<GuestThread>>> = RefCell::new(None);
}

/// The `GuestThread` backing the calling host thread, or `None` on a host
/// thread that is not running guest code (the runtime's own startup thread).
pub fn current_guest_thread() -> Option<Arc<GuestThread>> {
    CURRENT_GUEST_THREAD.with(|cell| cell.borrow().clone())
}

/// Runs `f` with mutable access to the calling host thread's installed
/// guest context. Panics if called from a thread that is not currently
/// running a guest entry function — the same programming error as
/// dereferencing a null context pointer on the original console.
pub fn with_current_context<R>(f: impl FnOnce(&mut PpcContext) -> R) -> R {
    CURRENT_CONTEXT.with(|cell| {
        let ptr = cell.get();
        assert!(!ptr.is_null(), "no guest PPC context installed on this host thread");
        // SAFETY: non-null only while the owning guest thread's body (see
        // `GuestThread::spawn`) is executing and holds the context on its
        // own stack for the same duration.
        f(unsafe { &mut *ptr })
    })
}

/// The translated entry function a guest thread begins at, supplied by the
/// runtime binary in lieu of generated recompilation output.
pub type EntryFn = Box<dyn FnOnce(&mut PpcContext) + Send + 'static>;

/// A guest thread: one host thread running translated code against a
/// guest-memory-resident stack and a thread-local PPC context.
pub struct GuestThread {
    id: u32,
    entry_addr: u32,
    stack_base: u32,
    stack_size: u32,
    priority: AtomicI32,
    suspend_count: AtomicU32,
    tls: Mutex<[u64; TLS_SLOT_COUNT]>,
    /// Signaled (manual-reset, never cleared) when the entry function
    /// returns. Every subsequent wait on the thread handle observes it.
    exit_event: EventObject,
    exit_code: AtomicU32,
    cancel_requested: AtomicBool,
    /// Manual-reset, signaled means "may run". Cleared by `suspend`, set by
    /// `resume`; the thread body blocks on it once per back-edge check.
    run_gate: EventObject,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl GuestThread {
    /// Allocates a stack in `memory`, spawns the host thread, and installs
    /// the thread-local context pointer before invoking `entry`.
    pub fn spawn(
        id: u32,
        memory: Arc<GuestMemory>,
        entry_addr: u32,
        stack_size: u32,
        priority: i32,
        entry: EntryFn,
    ) -> Result<Arc<Self>> {
        let stack_base = memory.alloc(stack_size as usize, 16)?;

        let thread = Arc::new(GuestThread {
            id,
            entry_addr,
            stack_base,
            stack_size,
            priority: AtomicI32::new(priority),
            suspend_count: AtomicU32::new(0),
            tls: Mutex::new([0u64; TLS_SLOT_COUNT]),
            exit_event: EventObject::new(ResetMode::Manual, false),
            exit_code: AtomicU32::new(0),
            cancel_requested: AtomicBool::new(false),
            run_gate: EventObject::new(ResetMode::Manual, true),
            join: Mutex::new(None),
        });

        let body_thread = Arc::clone(&thread);
        let builder = thread::Builder::new().name(format!("guest-{id}"));
        let handle = builder
            .spawn(move || {
                let mut context = PpcContext::new(entry_addr, stack_base.wrapping_add(stack_size));
                CURRENT_CONTEXT.with(|cell| cell.set(&mut context as *mut PpcContext));
                CURRENT_GUEST_THREAD.with(|cell| *cell.borrow_mut() = Some(Arc::clone(&body_thread)));

                body_thread.block_while_suspended();
                if !body_thread.is_cancelled() {
                    entry(&mut context);
                }

                CURRENT_CONTEXT.with(|cell| cell.set(std::ptr::null_mut()));
                CURRENT_GUEST_THREAD.with(|cell| *cell.borrow_mut() = None);
                body_thread.finish(context.gpr[3] as u32);
            })
            .map_err(|e| Error::fatal(format!("failed to spawn guest thread {id}: {e}")))?;

        *thread.join.lock() = Some(handle);
        info!(id, entry_addr = format_args!("{entry_addr:#010x}"), stack_base = format_args!("{stack_base:#010x}"), "spawned guest thread");
        Ok(thread)
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn entry_addr(&self) -> u32 {
        self.entry_addr
    }

    pub fn stack_region(&self) -> (u32, u32) {
        (self.stack_base, self.stack_size)
    }

    pub fn priority(&self) -> i32 {
        self.priority.load(Ordering::Relaxed)
    }

    pub fn set_priority(&self, priority: i32) {
        self.priority.store(priority, Ordering::Relaxed);
    }

    pub fn tls_get(&self, index: u32) -> Result<u64> {
        self.tls
            .lock()
            .get(index as usize)
            .copied()
            .ok_or_else(|| Error::format_error("TlsGetValue", format!("slot {index} out of range")))
    }

    pub fn tls_set(&self, index: u32, value: u64) -> Result<()> {
        let mut slots = self.tls.lock();
        let slot = slots
            .get_mut(index as usize)
            .ok_or_else(|| Error::format_error("TlsSetValue", format!("slot {index} out of range")))?;
        *slot = value;
        Ok(())
    }

    /// Clears the run gate, so the thread parks the next time it reaches a
    /// back-edge cancellation/suspend check. Latency is bounded, not
    /// instantaneous — this is a cooperative suspend, not preemption.
    pub fn suspend(&self) -> u32 {
        let previous = self.suspend_count.fetch_add(1, Ordering::SeqCst);
        self.run_gate.clear();
        previous
    }

    pub fn resume(&self) -> u32 {
        let previous = self.suspend_count.load(Ordering::SeqCst);
        if previous > 0 {
            let new_count = self.suspend_count.fetch_sub(1, Ordering::SeqCst) - 1;
            if new_count == 0 {
                self.run_gate.set();
            }
        }
        previous
    }

    fn block_while_suspended(&self) {
        while self.suspend_count.load(Ordering::SeqCst) > 0 {
            let _ = crate::sync::wait_single(&self.run_gate, WaitTimeout::Infinite, self.id);
        }
    }

    /// Requests cooperative termination. The thread observes this at its
    /// next wait or back-edge check and unwinds by returning rather than
    /// being forcibly killed mid-instruction.
    pub fn cancel(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
        self.run_gate.set();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_requested.load(Ordering::Relaxed)
    }

    pub fn exit_code(&self) -> u32 {
        self.exit_code.load(Ordering::Acquire)
    }

    pub fn has_exited(&self) -> bool {
        self.exit_event.is_signaled()
    }

    pub(crate) fn exit_event(&self) -> &EventObject {
        &self.exit_event
    }

    pub fn wait_exit(&self, timeout: WaitTimeout, thread_id: u32) -> WaitResult {
        crate::sync::wait_single(&self.exit_event, timeout, thread_id)
    }

    fn finish(&self, exit_code: u32) {
        self.exit_code.store(exit_code, Ordering::Release);
        self.exit_event.set();
        debug!(id = self.id, exit_code, "guest thread exited");
        if let Some(handle) = self.join.lock().take() {
            // Detach: the host thread has already finished its body by the
            // time `finish` runs, so this join is non-blocking bookkeeping,
            // not a synchronization point translated code depends on.
            if handle.join().is_err() {
                warn!(id = self.id, "guest thread host body panicked");
            }
        }
    }
}

/// Identifies the calling host thread for the purposes of mutant ownership
/// and wait-queue bookkeeping. Guest threads use their assigned id; any
/// other host thread (the runtime's own startup thread, a test) gets a
/// stable id derived from `std::thread::current()`'s name-free identity.
pub fn current_thread_id() -> u32 {
    thread_local! {
        static ID: u32 = {
            use std::collections::hash_map::DefaultHasher;
            use std::hash::{Hash, Hasher};
            let mut hasher = DefaultHasher::new();
            thread::current().id().hash(&mut hasher);
            (hasher.finish() as u32) | 0x8000_0000
        };
    }
    ID.with(|id| *id)
}

/// Resolves a pseudo-handle-or-real-handle thread reference to a thread id,
/// used by imports that accept `Handle::CURRENT_THREAD`.
pub fn resolve_thread_id(handle: Handle) -> u32 {
    if handle == Handle::CURRENT_THREAD {
        current_thread_id()
    } else {
        handle.raw()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_runs_entry_and_signals_exit() {
        let memory = Arc::new(GuestMemory::reserve().unwrap());
        let thread = GuestThread::spawn(
            1,
            memory,
            0x1000,
            0x4000,
            0,
            Box::new(|ctx| {
                ctx.gpr[3] = 42;
            }),
        )
        .unwrap();

        let result = thread.wait_exit(WaitTimeout::from_millis(500), 99);
        assert_eq!(result, WaitResult::Signaled(0));
        assert_eq!(thread.exit_code(), 42);
    }

    #[test]
    fn suspend_blocks_entry_until_resumed() {
        let memory = Arc::new(GuestMemory::reserve().unwrap());
        let thread = GuestThread::spawn(2, memory, 0x2000, 0x4000, 0, Box::new(|_ctx| {})).unwrap();
        thread.suspend();
        assert_eq!(thread.wait_exit(WaitTimeout::from_millis(50), 99), WaitResult::Timeout);
        thread.resume();
        assert_eq!(thread.wait_exit(WaitTimeout::from_millis(500), 99), WaitResult::Signaled(0));
    }

    #[test]
    fn tls_slots_round_trip() {
        let memory = Arc::new(GuestMemory::reserve().unwrap());
        let thread = GuestThread::spawn(3, memory, 0x3000, 0x4000, 0, Box::new(|_ctx| {})).unwrap();
        let index = tls_alloc().unwrap();
        thread.tls_set(index, 0xdead_beef).unwrap();
        assert_eq!(thread.tls_get(index).unwrap(), 0xdead_beef);
        tls_free(index);
        let _ = thread.wait_exit(WaitTimeout::from_millis(500), 99);
    }
}
