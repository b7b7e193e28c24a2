//! Kernel import dispatch: translated code issues calls against imported
//! symbol names; this routes each to a host function that reads its
//! arguments from, and writes its result into, the calling thread's PPC
//! context.

use crate::handle_table::HandleTable;
use crate::object::{DirEnumObject, DirEntrySnapshot, FileObject, KernelObject, ObjectKind};
use crate::sync::{wait_multiple, CriticalSection, EventObject, MutantObject, ResetMode, SemaphoreObject};
use crate::thread::{self, PpcContext};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fs::OpenOptions;
use std::sync::Arc;
use tracing::warn;
use xenon_core::{Error, Handle, Result, WaitResult, WaitTimeout};
use xenon_memory::GuestMemory;
use xenon_vfs::{Resolved, VfsResolver};

/// PowerPC calling-convention status codes a handful of imports return,
/// mirroring the subset of `NTSTATUS` values translated code branches on.
mod status {
    pub const SUCCESS: u64 = 0;
    pub const TIMEOUT: u64 = 0x102;
    pub const ABANDONED_WAIT_0: u64 = 0x80;
    pub const ALERTED: u64 = 0x101;
    pub const UNSUCCESSFUL: u64 = 0xC000_0001;
    pub const OBJECT_NAME_NOT_FOUND: u64 = 0xC000_0034;
    pub const ACCESS_DENIED: u64 = 0xC000_0022;
    pub const NO_MORE_FILES: u64 = 0x8000_001A;
}

/// `DesiredAccess` bit this kernel actually inspects: every other access
/// right translated code requests is granted implicitly once a handle
/// exists.
const GENERIC_WRITE: u64 = 0x4000_0000;

/// Everything an import handler needs: the calling thread's register file
/// and its kernel-assigned thread id (for mutant ownership and wait-queue
/// FIFO bookkeeping).
pub struct ImportCall<'a> {
    pub context: &'a mut PpcContext,
    pub thread_id: u32,
}

impl<'a> ImportCall<'a> {
    pub fn new(context: &'a mut PpcContext, thread_id: u32) -> Self {
        Self { context, thread_id }
    }

    /// Reads integer argument `index` from the PPC calling convention's
    /// first eight argument registers (r3..r10, i.e. `gpr[3 + index]`).
    pub fn arg(&self, index: usize) -> u64 {
        self.context.gpr[3 + index]
    }

    pub fn set_return(&mut self, value: u64) {
        self.context.gpr[3] = value;
    }
}

/// Process-wide kernel state an import handler may touch: the handle
/// table, guest memory, and the lazily-populated table of critical
/// sections keyed by their guest address (critical sections are
/// user-mode-resident structures, never placed in the handle table).
pub struct KernelContext {
    pub handles: HandleTable,
    pub memory: Arc<GuestMemory>,
    pub vfs: Option<Arc<VfsResolver>>,
    critical_sections: Mutex<HashMap<u32, Arc<CriticalSection>>>,
    /// Incremented by the video-swap stub; translated code polls this to
    /// pace itself against (a simulated) display refresh.
    frame_counter: std::sync::atomic::AtomicU64,
}

impl KernelContext {
    pub fn new(memory: Arc<GuestMemory>) -> Self {
        Self {
            handles: HandleTable::new(),
            memory,
            vfs: None,
            critical_sections: Mutex::new(HashMap::new()),
            frame_counter: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Same as [`KernelContext::new`], but with file-import handlers
    /// (`NtCreateFile` and friends) backed by `vfs` instead of always
    /// failing with "no filesystem configured".
    pub fn with_vfs(memory: Arc<GuestMemory>, vfs: Arc<VfsResolver>) -> Self {
        Self {
            handles: HandleTable::new(),
            memory,
            vfs: Some(vfs),
            critical_sections: Mutex::new(HashMap::new()),
            frame_counter: std::sync::atomic::AtomicU64::new(0),
        }
    }

    fn critical_section_at(&self, guest_addr: u32) -> Arc<CriticalSection> {
        Arc::clone(
            self.critical_sections
                .lock()
                .entry(guest_addr)
                .or_insert_with(|| Arc::new(CriticalSection::new())),
        )
    }
}

type ImportFn = fn(&mut ImportCall, &KernelContext) -> Result<()>;

static UNIMPLEMENTED_LOGGED: Lazy<Mutex<HashSet<&'static str>>> = Lazy::new(|| Mutex::new(HashSet::new()));

/// Looks up `name` and invokes its handler. Unimplemented imports are
/// logged once (not once per call — translated boot code can call the same
/// missing import thousands of times) and return success-with-zero so boot
/// progress is not halted on a stub the illustrative entry point never
/// actually depends on.
pub fn dispatch(name: &'static str, call: &mut ImportCall, ctx: &KernelContext) -> Result<()> {
    match lookup(name) {
        Some(handler) => handler(call, ctx),
        None => {
            if UNIMPLEMENTED_LOGGED.lock().insert(name) {
                warn!(import = name, "unimplemented kernel import, returning success-with-zero");
            }
            call.set_return(status::SUCCESS);
            Ok(())
        }
    }
}

fn lookup(name: &str) -> Option<ImportFn> {
    Some(match name {
        "NtCreateEvent" => nt_create_event,
        "KeSetEvent" => ke_set_event,
        "KeClearEvent" => ke_clear_event,
        "KePulseEvent" => ke_pulse_event,
        "NtCreateSemaphore" => nt_create_semaphore,
        "KeReleaseSemaphore" => ke_release_semaphore,
        "NtCreateMutant" => nt_create_mutant,
        "NtReleaseMutant" => nt_release_mutant,
        "NtWaitForSingleObjectEx" => nt_wait_for_single_object_ex,
        "NtWaitForMultipleObjectsEx" => nt_wait_for_multiple_objects_ex,
        "NtClose" => nt_close,
        "RtlInitializeCriticalSection" => rtl_initialize_critical_section,
        "RtlEnterCriticalSection" => rtl_enter_critical_section,
        "RtlTryEnterCriticalSection" => rtl_try_enter_critical_section,
        "RtlLeaveCriticalSection" => rtl_leave_critical_section,
        "KeTlsAlloc" => ke_tls_alloc,
        "KeTlsFree" => ke_tls_free,
        "KeTlsGetValue" => ke_tls_get_value,
        "KeTlsSetValue" => ke_tls_set_value,
        "KeQuerySystemTime" => ke_query_system_time,
        "NtCreateFile" => nt_create_file,
        "NtReadFile" => nt_read_file,
        "NtWriteFile" => nt_write_file,
        "NtSetInformationFile" => nt_set_information_file,
        "NtQueryInformationFile" => nt_query_information_file,
        "NtQueryDirectoryFile" => nt_query_directory_file,
        "NtAllocateVirtualMemory" => nt_allocate_virtual_memory,
        "NtFreeVirtualMemory" => nt_free_virtual_memory,
        "NtProtectVirtualMemory" => nt_protect_virtual_memory,
        "KeDelayExecutionThread" => ke_delay_execution_thread,
        "VdSwap" => vd_swap,
        _ => return None,
    })
}

/// Reads a nul-terminated ANSI string out of guest memory. Guest path
/// arguments are always short (a few hundred bytes at most), so a
/// byte-at-a-time walk is simpler than adding a bulk-scan accessor for a
/// single caller.
fn read_guest_cstr(memory: &GuestMemory, addr: u32) -> String {
    if addr == 0 {
        return String::new();
    }
    let mut bytes = Vec::new();
    let mut cursor = addr;
    loop {
        let byte = memory.read_u8(cursor);
        if byte == 0 {
            break;
        }
        bytes.push(byte);
        cursor = cursor.wrapping_add(1);
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

fn as_file(object: KernelObject, handle: Handle) -> Result<Arc<FileObject>> {
    match object {
        KernelObject::File(file) => Ok(file),
        _ => Err(Error::WrongType { handle: handle.raw(), expected: ObjectKind::File.name() }),
    }
}

fn as_dir_enum(object: KernelObject, handle: Handle) -> Result<Arc<DirEnumObject>> {
    match object {
        KernelObject::DirEnum(dir) => Ok(dir),
        _ => Err(Error::WrongType { handle: handle.raw(), expected: ObjectKind::DirEnum.name() }),
    }
}

/// Opens a guest path, resolving it through the VFS in priority order
/// (overlay, update, game directory, then loaded archives). A path that
/// resolves to a directory is opened as a [`DirEnumObject`] snapshot
/// instead of a [`FileObject`]; translated code distinguishes the two by
/// the handle's object kind at use time, exactly like the original kernel
/// distinguishes file and directory handles by the `FILE_DIRECTORY_FILE`
/// create option.
///
/// `gpr[3+0]`: out handle ptr, `gpr[3+1]`: guest path ptr, `gpr[3+2]`:
/// desired access, `gpr[3+3]`: nonzero requests directory enumeration.
fn nt_create_file(call: &mut ImportCall, ctx: &KernelContext) -> Result<()> {
    let out_handle_ptr = call.arg(0) as u32;
    let path = read_guest_cstr(&ctx.memory, call.arg(1) as u32);
    let writable = call.arg(2) & GENERIC_WRITE != 0;
    let as_directory = call.arg(3) != 0;

    let vfs = match &ctx.vfs {
        Some(vfs) => vfs,
        None => {
            call.set_return(status::ACCESS_DENIED);
            return Ok(());
        }
    };

    if as_directory {
        return open_directory(call, ctx, vfs, &path, out_handle_ptr);
    }

    match vfs.resolve(&path) {
        Ok(Resolved::Host(host_path)) => {
            let file = OpenOptions::new()
                .read(true)
                .write(writable)
                .open(&host_path)
                .map_err(|e| Error::format_error("NtCreateFile", format!("{}: {e}", host_path.display())))?;
            let object = FileObject::from_host(path, file, writable);
            let handle = ctx.handles.insert(KernelObject::File(Arc::new(object)));
            ctx.memory.write_u32(out_handle_ptr, handle.raw());
            call.set_return(status::SUCCESS);
        }
        Ok(Resolved::Archive { archive, name }) => {
            if writable {
                call.set_return(status::ACCESS_DENIED);
                return Ok(());
            }
            let bytes = archive.extract(&name)?;
            let object = FileObject::from_memory(path, bytes);
            let handle = ctx.handles.insert(KernelObject::File(Arc::new(object)));
            ctx.memory.write_u32(out_handle_ptr, handle.raw());
            call.set_return(status::SUCCESS);
        }
        Err(Error::NotFound { .. }) if writable => create_new_host_file(call, ctx, vfs, &path, out_handle_ptr),
        Err(Error::NotFound { .. }) => call.set_return(status::OBJECT_NAME_NOT_FOUND),
        Err(other) => return Err(other),
    }
    Ok(())
}

/// Creates a file under the update directory (or the game directory if no
/// update directory is configured) when a write-mode open doesn't resolve
/// to anything that already exists — the path a save-game write takes.
fn create_new_host_file(call: &mut ImportCall, ctx: &KernelContext, vfs: &VfsResolver, path: &str, out_handle_ptr: u32) {
    let normalized = VfsResolver::normalize(path);
    let target_dir = match vfs.write_target_dir() {
        Some(dir) => dir,
        None => {
            call.set_return(status::ACCESS_DENIED);
            return;
        }
    };
    let host_path = target_dir.join(&normalized);
    if let Some(parent) = host_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    match OpenOptions::new().read(true).write(true).create(true).truncate(true).open(&host_path) {
        Ok(file) => {
            let object = FileObject::from_host(path.to_string(), file, true);
            let handle = ctx.handles.insert(KernelObject::File(Arc::new(object)));
            ctx.memory.write_u32(out_handle_ptr, handle.raw());
            call.set_return(status::SUCCESS);
        }
        Err(_) => call.set_return(status::ACCESS_DENIED),
    }
}

fn open_directory(call: &mut ImportCall, ctx: &KernelContext, vfs: &VfsResolver, path: &str, out_handle_ptr: u32) -> Result<()> {
    let normalized = VfsResolver::normalize(path);
    let mut found_dir = None;
    for candidate in vfs.host_roots() {
        let joined = candidate.join(&normalized);
        if joined.is_dir() {
            found_dir = Some(joined);
            break;
        }
    }
    let dir_path = match found_dir {
        Some(dir) => dir,
        None => {
            call.set_return(status::OBJECT_NAME_NOT_FOUND);
            return Ok(());
        }
    };

    let mut entries = Vec::new();
    for entry in std::fs::read_dir(&dir_path).map_err(|e| Error::format_error("NtCreateFile", e.to_string()))? {
        let entry = entry.map_err(|e| Error::format_error("NtCreateFile", e.to_string()))?;
        let metadata = entry.metadata().map_err(|e| Error::format_error("NtCreateFile", e.to_string()))?;
        entries.push(DirEntrySnapshot {
            name: entry.file_name().to_string_lossy().into_owned(),
            is_directory: metadata.is_dir(),
            size: metadata.len(),
        });
    }

    let object = DirEnumObject::new(entries);
    let handle = ctx.handles.insert(KernelObject::DirEnum(Arc::new(object)));
    ctx.memory.write_u32(out_handle_ptr, handle.raw());
    call.set_return(status::SUCCESS);
    Ok(())
}

fn nt_read_file(call: &mut ImportCall, ctx: &KernelContext) -> Result<()> {
    let handle = Handle(call.arg(0) as u32);
    let buffer_ptr = call.arg(1) as u32;
    let length = call.arg(2) as usize;
    let out_bytes_read_ptr = call.arg(3) as u32;

    let file = as_file(ctx.handles.lookup(handle, ObjectKind::File)?, handle)?;
    let mut buf = vec![0u8; length];
    let read = file.read(&mut buf)?;
    ctx.memory.write_bytes(buffer_ptr, &buf[..read]);
    if out_bytes_read_ptr != 0 {
        ctx.memory.write_u32(out_bytes_read_ptr, read as u32);
    }
    call.set_return(status::SUCCESS);
    Ok(())
}

fn nt_write_file(call: &mut ImportCall, ctx: &KernelContext) -> Result<()> {
    let handle = Handle(call.arg(0) as u32);
    let buffer_ptr = call.arg(1) as u32;
    let length = call.arg(2) as usize;
    let out_bytes_written_ptr = call.arg(3) as u32;

    let file = as_file(ctx.handles.lookup(handle, ObjectKind::File)?, handle)?;
    let data = ctx.memory.slice(buffer_ptr, length).to_vec();
    match file.write(&data) {
        Ok(written) => {
            if out_bytes_written_ptr != 0 {
                ctx.memory.write_u32(out_bytes_written_ptr, written as u32);
            }
            call.set_return(status::SUCCESS);
        }
        Err(Error::PermissionDenied { .. }) => call.set_return(status::ACCESS_DENIED),
        Err(other) => return Err(other),
    }
    Ok(())
}

/// Sets the file pointer (the only "information class" this kernel
/// implements — `FilePositionInformation`). `gpr[3+1]` is a guest pointer
/// to a signed 64-bit absolute byte offset.
fn nt_set_information_file(call: &mut ImportCall, ctx: &KernelContext) -> Result<()> {
    let handle = Handle(call.arg(0) as u32);
    let position_ptr = call.arg(1) as u32;
    let file = as_file(ctx.handles.lookup(handle, ObjectKind::File)?, handle)?;
    let position = ctx.memory.read_i64(position_ptr);
    file.seek(position.max(0) as u64)?;
    call.set_return(status::SUCCESS);
    Ok(())
}

/// Queries the file's total length (`FileStandardInformation`'s end-of-file
/// field, the only information class this kernel implements).
/// `gpr[3+1]` is a guest pointer to an unsigned 64-bit field to fill.
fn nt_query_information_file(call: &mut ImportCall, ctx: &KernelContext) -> Result<()> {
    let handle = Handle(call.arg(0) as u32);
    let out_size_ptr = call.arg(1) as u32;
    let file = as_file(ctx.handles.lookup(handle, ObjectKind::File)?, handle)?;
    let len = file.len()?;
    ctx.memory.write_u64(out_size_ptr, len);
    call.set_return(status::SUCCESS);
    Ok(())
}

/// Advances a directory-enumeration handle by one entry. `gpr[3+1]` is a
/// guest pointer to a fixed 260-byte ANSI name buffer, `gpr[3+2]` a guest
/// pointer to a `u32` filled with 1 for directories, `gpr[3+3]` a guest
/// pointer to a `u64` filled with the entry's size.
fn nt_query_directory_file(call: &mut ImportCall, ctx: &KernelContext) -> Result<()> {
    const NAME_BUFFER_LEN: usize = 260;
    let handle = Handle(call.arg(0) as u32);
    let out_name_ptr = call.arg(1) as u32;
    let out_is_directory_ptr = call.arg(2) as u32;
    let out_size_ptr = call.arg(3) as u32;

    let dir = as_dir_enum(ctx.handles.lookup(handle, ObjectKind::DirEnum)?, handle)?;
    match dir.next() {
        Some(entry) => {
            let mut name_bytes = entry.name.into_bytes();
            name_bytes.truncate(NAME_BUFFER_LEN - 1);
            name_bytes.push(0);
            ctx.memory.write_bytes(out_name_ptr, &name_bytes);
            ctx.memory.write_u32(out_is_directory_ptr, entry.is_directory as u32);
            ctx.memory.write_u64(out_size_ptr, entry.size);
            call.set_return(status::SUCCESS);
        }
        None => call.set_return(status::NO_MORE_FILES),
    }
    Ok(())
}

fn nt_create_event(call: &mut ImportCall, ctx: &KernelContext) -> Result<()> {
    let out_handle_ptr = call.arg(0) as u32;
    let reset_mode = if call.arg(1) == 0 { ResetMode::Manual } else { ResetMode::Auto };
    let initial_signaled = call.arg(2) != 0;

    let event = EventObject::new(reset_mode, initial_signaled);
    let handle = ctx.handles.insert(KernelObject::Event(Arc::new(event)));
    ctx.memory.write_u32(out_handle_ptr, handle.raw());
    call.set_return(status::SUCCESS);
    Ok(())
}

fn as_event(object: KernelObject, handle: Handle) -> Result<Arc<EventObject>> {
    match object {
        KernelObject::Event(event) => Ok(event),
        _ => Err(Error::WrongType { handle: handle.raw(), expected: ObjectKind::Event.name() }),
    }
}

fn ke_set_event(call: &mut ImportCall, ctx: &KernelContext) -> Result<()> {
    let handle = Handle(call.arg(0) as u32);
    let event = as_event(ctx.handles.lookup(handle, ObjectKind::Event)?, handle)?;
    event.set();
    call.set_return(status::SUCCESS);
    Ok(())
}

fn ke_clear_event(call: &mut ImportCall, ctx: &KernelContext) -> Result<()> {
    let handle = Handle(call.arg(0) as u32);
    let event = as_event(ctx.handles.lookup(handle, ObjectKind::Event)?, handle)?;
    event.clear();
    call.set_return(status::SUCCESS);
    Ok(())
}

fn ke_pulse_event(call: &mut ImportCall, ctx: &KernelContext) -> Result<()> {
    let handle = Handle(call.arg(0) as u32);
    let event = as_event(ctx.handles.lookup(handle, ObjectKind::Event)?, handle)?;
    event.pulse();
    call.set_return(status::SUCCESS);
    Ok(())
}

fn nt_create_semaphore(call: &mut ImportCall, ctx: &KernelContext) -> Result<()> {
    let out_handle_ptr = call.arg(0) as u32;
    let initial = call.arg(1) as u32;
    let maximum = call.arg(2) as u32;

    let semaphore = SemaphoreObject::new(initial, maximum)?;
    let handle = ctx.handles.insert(KernelObject::Semaphore(Arc::new(semaphore)));
    ctx.memory.write_u32(out_handle_ptr, handle.raw());
    call.set_return(status::SUCCESS);
    Ok(())
}

fn as_semaphore(object: KernelObject, handle: Handle) -> Result<Arc<SemaphoreObject>> {
    match object {
        KernelObject::Semaphore(semaphore) => Ok(semaphore),
        _ => Err(Error::WrongType { handle: handle.raw(), expected: ObjectKind::Semaphore.name() }),
    }
}

fn ke_release_semaphore(call: &mut ImportCall, ctx: &KernelContext) -> Result<()> {
    let handle = Handle(call.arg(0) as u32);
    let delta = call.arg(1) as u32;
    let out_previous_ptr = call.arg(2) as u32;

    let semaphore = as_semaphore(ctx.handles.lookup(handle, ObjectKind::Semaphore)?, handle)?;
    match semaphore.release(delta) {
        Ok(previous) => {
            if out_previous_ptr != 0 {
                ctx.memory.write_u32(out_previous_ptr, previous);
            }
            call.set_return(status::SUCCESS);
        }
        Err(Error::LimitExceeded { .. }) => call.set_return(status::UNSUCCESSFUL),
        Err(other) => return Err(other),
    }
    Ok(())
}

fn nt_create_mutant(call: &mut ImportCall, ctx: &KernelContext) -> Result<()> {
    let out_handle_ptr = call.arg(0) as u32;
    let initial_owner = call.arg(1) != 0;

    let mutant = MutantObject::new(initial_owner.then_some(call.thread_id));
    let handle = ctx.handles.insert(KernelObject::Mutant(Arc::new(mutant)));
    ctx.memory.write_u32(out_handle_ptr, handle.raw());
    call.set_return(status::SUCCESS);
    Ok(())
}

fn as_mutant(object: KernelObject, handle: Handle) -> Result<Arc<MutantObject>> {
    match object {
        KernelObject::Mutant(mutant) => Ok(mutant),
        _ => Err(Error::WrongType { handle: handle.raw(), expected: ObjectKind::Mutant.name() }),
    }
}

fn nt_release_mutant(call: &mut ImportCall, ctx: &KernelContext) -> Result<()> {
    let handle = Handle(call.arg(0) as u32);
    let mutant = as_mutant(ctx.handles.lookup(handle, ObjectKind::Mutant)?, handle)?;
    match mutant.release(call.thread_id) {
        Ok(()) => call.set_return(status::SUCCESS),
        Err(Error::NotOwner { .. }) => call.set_return(status::UNSUCCESSFUL),
        Err(other) => return Err(other),
    }
    Ok(())
}

/// Reads a 100-ns relative timeout from a guest pointer, matching
/// `NtWaitForSingleObjectEx`'s `PLARGE_INTEGER` argument: null means
/// infinite, otherwise a signed 64-bit count of 100-ns units (negative is
/// relative to now, which is this kernel's only supported form).
fn read_timeout(memory: &GuestMemory, ptr: u32) -> WaitTimeout {
    if ptr == 0 {
        return WaitTimeout::Infinite;
    }
    let raw = memory.read_i64(ptr);
    WaitTimeout::Relative(raw.unsigned_abs())
}

fn nt_wait_for_single_object_ex(call: &mut ImportCall, ctx: &KernelContext) -> Result<()> {
    let handle = Handle(call.arg(0) as u32);
    let timeout_ptr = call.arg(1) as u32;
    let timeout = read_timeout(&ctx.memory, timeout_ptr);

    let object = ctx.handles.lookup_any(handle)?;
    if !object.is_waitable() {
        return Err(Error::WrongType { handle: handle.raw(), expected: "waitable object" });
    }
    let result = object.wait(timeout, call.thread_id).expect("checked is_waitable above");
    call.set_return(match result {
        WaitResult::Signaled(_) => status::SUCCESS,
        WaitResult::Abandoned(_) => status::ABANDONED_WAIT_0,
        WaitResult::Timeout => status::TIMEOUT,
        WaitResult::Alerted => status::ALERTED,
        WaitResult::Cancelled => status::UNSUCCESSFUL,
    });
    Ok(())
}

/// `gpr[3+0]`: handle count, `gpr[3+1]`: pointer to a guest array of `u32`
/// handles, `gpr[3+2]`: nonzero requests a wait-all over the whole set
/// (`WaitType = WaitAll`), `gpr[3+3]`: same `PLARGE_INTEGER` timeout
/// pointer `NtWaitForSingleObjectEx` takes. Index `i` in the result status
/// (`WAIT_OBJECT_0 + i` / `WAIT_ABANDONED_0 + i`) refers to the object at
/// that position in the handle array.
fn nt_wait_for_multiple_objects_ex(call: &mut ImportCall, ctx: &KernelContext) -> Result<()> {
    let count = call.arg(0) as u32;
    let handles_ptr = call.arg(1) as u32;
    let wait_all = call.arg(2) != 0;
    let timeout_ptr = call.arg(3) as u32;
    let timeout = read_timeout(&ctx.memory, timeout_ptr);

    let mut objects = Vec::with_capacity(count as usize);
    for i in 0..count {
        let handle = Handle(ctx.memory.read_u32(handles_ptr + i * 4));
        let object = ctx.handles.lookup_any(handle)?;
        if !object.is_waitable() {
            return Err(Error::WrongType { handle: handle.raw(), expected: "waitable object" });
        }
        objects.push(object);
    }
    let refs: Vec<&KernelObject> = objects.iter().collect();

    let result = wait_multiple(&refs, wait_all, timeout, call.thread_id, || false);
    call.set_return(match result {
        WaitResult::Signaled(i) => status::SUCCESS + i as u64,
        WaitResult::Abandoned(i) => status::ABANDONED_WAIT_0 + i as u64,
        WaitResult::Timeout => status::TIMEOUT,
        WaitResult::Alerted => status::ALERTED,
        WaitResult::Cancelled => status::UNSUCCESSFUL,
    });
    Ok(())
}

fn nt_close(call: &mut ImportCall, ctx: &KernelContext) -> Result<()> {
    let handle = Handle(call.arg(0) as u32);
    match ctx.handles.close(handle) {
        Ok(()) => call.set_return(status::SUCCESS),
        Err(_) => call.set_return(status::UNSUCCESSFUL),
    }
    Ok(())
}

fn rtl_initialize_critical_section(call: &mut ImportCall, ctx: &KernelContext) -> Result<()> {
    let guest_addr = call.arg(0) as u32;
    ctx.critical_section_at(guest_addr);
    call.set_return(status::SUCCESS);
    Ok(())
}

fn rtl_enter_critical_section(call: &mut ImportCall, ctx: &KernelContext) -> Result<()> {
    let guest_addr = call.arg(0) as u32;
    ctx.critical_section_at(guest_addr).enter(call.thread_id);
    call.set_return(status::SUCCESS);
    Ok(())
}

fn rtl_try_enter_critical_section(call: &mut ImportCall, ctx: &KernelContext) -> Result<()> {
    let guest_addr = call.arg(0) as u32;
    let acquired = ctx.critical_section_at(guest_addr).try_enter(call.thread_id);
    call.set_return(acquired as u64);
    Ok(())
}

fn rtl_leave_critical_section(call: &mut ImportCall, ctx: &KernelContext) -> Result<()> {
    let guest_addr = call.arg(0) as u32;
    ctx.critical_section_at(guest_addr).leave(call.thread_id);
    call.set_return(status::SUCCESS);
    Ok(())
}

fn ke_tls_alloc(call: &mut ImportCall, _ctx: &KernelContext) -> Result<()> {
    const TLS_OUT_OF_INDEXES: u64 = 0xffff_ffff;
    call.set_return(thread::tls_alloc().map(u64::from).unwrap_or(TLS_OUT_OF_INDEXES));
    Ok(())
}

fn ke_tls_free(call: &mut ImportCall, _ctx: &KernelContext) -> Result<()> {
    thread::tls_free(call.arg(0) as u32);
    call.set_return(1);
    Ok(())
}

fn ke_tls_get_value(call: &mut ImportCall, _ctx: &KernelContext) -> Result<()> {
    let index = call.arg(0) as u32;
    let value = match thread::current_guest_thread() {
        Some(guest_thread) => guest_thread.tls_get(index)?,
        None => 0,
    };
    call.set_return(value);
    Ok(())
}

fn ke_tls_set_value(call: &mut ImportCall, _ctx: &KernelContext) -> Result<()> {
    let index = call.arg(0) as u32;
    let value = call.arg(1);
    if let Some(guest_thread) = thread::current_guest_thread() {
        guest_thread.tls_set(index, value)?;
    }
    call.set_return(1);
    Ok(())
}

/// Stands in for the console's high-resolution system clock; translated
/// boot code typically only uses this to seed timers, not to drive real
/// scheduling decisions.
fn ke_query_system_time(call: &mut ImportCall, ctx: &KernelContext) -> Result<()> {
    let out_ptr = call.arg(0) as u32;
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let hundred_ns_units = now.as_nanos() as u64 / 100;
    ctx.memory.write_u64(out_ptr, hundred_ns_units);
    call.set_return(status::SUCCESS);
    Ok(())
}

/// Backs translated code's virtual-memory allocation calls with a plain
/// bump allocation out of the guest address space; there is no virtual
/// protection or reservation-vs-commit distinction to model since the
/// whole space is reserved and committed up front.
///
/// `gpr[3+0]`: out base-address ptr, `gpr[3+1]`: out size ptr (read as the
/// requested size, written back unchanged), `gpr[3+2]`: requested size.
fn nt_allocate_virtual_memory(call: &mut ImportCall, ctx: &KernelContext) -> Result<()> {
    let out_base_ptr = call.arg(0) as u32;
    let out_size_ptr = call.arg(1) as u32;
    let size = call.arg(2) as usize;

    match ctx.memory.alloc(size.max(1), 4096) {
        Ok(addr) => {
            ctx.memory.write_u32(out_base_ptr, addr);
            if out_size_ptr != 0 {
                ctx.memory.write_u32(out_size_ptr, size as u32);
            }
            call.set_return(status::SUCCESS);
        }
        Err(err) => {
            warn!(error = %err, size, "NtAllocateVirtualMemory: out of guest address space");
            call.set_return(status::ACCESS_DENIED);
        }
    }
    Ok(())
}

/// The allocator backing [`nt_allocate_virtual_memory`] has no free list —
/// guest allocations live for the process lifetime — so this is a no-op
/// that reports success, matching how callers only ever check the return
/// status and never actually expect the range to become reusable here.
fn nt_free_virtual_memory(call: &mut ImportCall, _ctx: &KernelContext) -> Result<()> {
    call.set_return(status::SUCCESS);
    Ok(())
}

/// Guest memory is reserved fully committed and read/write up front, so
/// there is no page-protection table to update; this just reports success
/// for whatever protection flags translated code asks for.
fn nt_protect_virtual_memory(call: &mut ImportCall, _ctx: &KernelContext) -> Result<()> {
    call.set_return(status::SUCCESS);
    Ok(())
}

/// `gpr[3+0]`: alertable flag (ignored, no APC queue exists to interrupt
/// the sleep), `gpr[3+1]`: pointer to a 100ns-unit interval, negative
/// (relative) or positive (absolute since boot) per the usual convention;
/// both are treated as a relative delay here since this runtime has no
/// absolute "since boot" clock to measure against.
fn ke_delay_execution_thread(call: &mut ImportCall, ctx: &KernelContext) -> Result<()> {
    let interval_ptr = call.arg(1) as u32;
    let hundred_ns_units = ctx.memory.read_u64(interval_ptr) as i64;
    let nanos = hundred_ns_units.unsigned_abs().saturating_mul(100);
    std::thread::sleep(std::time::Duration::from_nanos(nanos));
    call.set_return(status::SUCCESS);
    Ok(())
}

/// Stub for the video subsystem's frame presentation call: translated
/// render loops call this once per frame to pace themselves, so it only
/// needs to advance a counter, not actually draw anything.
fn vd_swap(call: &mut ImportCall, ctx: &KernelContext) -> Result<()> {
    let frame = ctx.frame_counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    call.set_return(frame);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> KernelContext {
        KernelContext::new(Arc::new(GuestMemory::reserve().unwrap()))
    }

    fn call<'a>(ctx: &'a mut PpcContext, args: &[u64]) -> ImportCall<'a> {
        for (i, arg) in args.iter().enumerate() {
            ctx.gpr[3 + i] = *arg;
        }
        ImportCall::new(ctx, 1)
    }

    #[test]
    fn unimplemented_import_falls_back_to_success_with_zero() {
        let ctx = context();
        let mut ppc = PpcContext::new(0, 0);
        let mut import = call(&mut ppc, &[]);
        dispatch("NtTotallyUnknownImport", &mut import, &ctx).unwrap();
        assert_eq!(import.context.gpr[3], status::SUCCESS);
    }

    #[test]
    fn event_create_set_and_wait_round_trip() {
        let ctx = context();
        let mut ppc = PpcContext::new(0, 0);

        let handle_ptr = 0x2000u32;
        {
            let mut import = call(&mut ppc, &[handle_ptr as u64, 1, 0]);
            dispatch("NtCreateEvent", &mut import, &ctx).unwrap();
            assert_eq!(import.context.gpr[3], status::SUCCESS);
        }
        let handle = ctx.memory.read_u32(handle_ptr);

        {
            let mut import = call(&mut ppc, &[handle as u64]);
            dispatch("KeSetEvent", &mut import, &ctx).unwrap();
        }
        {
            let mut import = call(&mut ppc, &[handle as u64, 0]);
            dispatch("NtWaitForSingleObjectEx", &mut import, &ctx).unwrap();
            assert_eq!(import.context.gpr[3], status::SUCCESS);
        }
    }

    #[test]
    fn wait_for_multiple_objects_wait_all_succeeds_once_every_handle_is_signaled() {
        let ctx = context();
        let mut ppc = PpcContext::new(0, 0);

        let handle_a_ptr = 0x2000u32;
        let handle_b_ptr = 0x2100u32;
        let mut import = call(&mut ppc, &[handle_a_ptr as u64, 1, 0]);
        dispatch("NtCreateEvent", &mut import, &ctx).unwrap();
        let mut import = call(&mut ppc, &[handle_b_ptr as u64, 1, 0]);
        dispatch("NtCreateEvent", &mut import, &ctx).unwrap();
        let handle_a = ctx.memory.read_u32(handle_a_ptr);
        let handle_b = ctx.memory.read_u32(handle_b_ptr);

        let handles_ptr = 0x2200u32;
        ctx.memory.write_u32(handles_ptr, handle_a);
        ctx.memory.write_u32(handles_ptr + 4, handle_b);

        let mut import = call(&mut ppc, &[handle_a as u64]);
        dispatch("KeSetEvent", &mut import, &ctx).unwrap();
        let mut import = call(&mut ppc, &[handle_b as u64]);
        dispatch("KeSetEvent", &mut import, &ctx).unwrap();

        let mut import = call(&mut ppc, &[2, handles_ptr as u64, 1, 0]);
        dispatch("NtWaitForMultipleObjectsEx", &mut import, &ctx).unwrap();
        assert_eq!(import.context.gpr[3], status::SUCCESS + 1);
    }

    #[test]
    fn critical_section_enter_and_leave_round_trip() {
        let ctx = context();
        let mut ppc = PpcContext::new(0, 0);
        let cs_addr = 0x3000u64;

        let mut import = call(&mut ppc, &[cs_addr]);
        dispatch("RtlEnterCriticalSection", &mut import, &ctx).unwrap();
        dispatch("RtlLeaveCriticalSection", &mut import, &ctx).unwrap();
    }

    fn write_guest_cstr(mem: &GuestMemory, addr: u32, text: &str) {
        let mut bytes = text.as_bytes().to_vec();
        bytes.push(0);
        mem.write_bytes(addr, &bytes);
    }

    fn context_with_vfs(game_dir: &std::path::Path) -> KernelContext {
        let vfs = Arc::new(VfsResolver::new(vec![], None, Some(game_dir.to_path_buf())));
        KernelContext::with_vfs(Arc::new(GuestMemory::reserve().unwrap()), vfs)
    }

    #[test]
    fn create_file_reads_bytes_from_the_game_directory() {
        let game_dir = tempfile::tempdir().unwrap();
        std::fs::write(game_dir.path().join("save.dat"), b"checkpoint-bytes").unwrap();
        let ctx = context_with_vfs(game_dir.path());
        let mut ppc = PpcContext::new(0, 0);

        let path_ptr = 0x1000u32;
        let handle_ptr = 0x2000u32;
        write_guest_cstr(&ctx.memory, path_ptr, "save.dat");

        let mut import = call(&mut ppc, &[handle_ptr as u64, path_ptr as u64, 0, 0]);
        dispatch("NtCreateFile", &mut import, &ctx).unwrap();
        assert_eq!(import.context.gpr[3], status::SUCCESS);
        let handle = ctx.memory.read_u32(handle_ptr);

        let buffer_ptr = 0x3000u32;
        let bytes_read_ptr = 0x3100u32;
        let mut import = call(&mut ppc, &[handle as u64, buffer_ptr as u64, 16, bytes_read_ptr as u64]);
        dispatch("NtReadFile", &mut import, &ctx).unwrap();
        assert_eq!(import.context.gpr[3], status::SUCCESS);
        assert_eq!(ctx.memory.read_u32(bytes_read_ptr), 16);
        assert_eq!(ctx.memory.slice(buffer_ptr, 16), b"checkpoint-bytes");
    }

    #[test]
    fn create_file_missing_path_reports_object_name_not_found() {
        let game_dir = tempfile::tempdir().unwrap();
        let ctx = context_with_vfs(game_dir.path());
        let mut ppc = PpcContext::new(0, 0);

        let path_ptr = 0x1000u32;
        write_guest_cstr(&ctx.memory, path_ptr, "missing.dat");
        let mut import = call(&mut ppc, &[0x2000, path_ptr as u64, 0, 0]);
        dispatch("NtCreateFile", &mut import, &ctx).unwrap();
        assert_eq!(import.context.gpr[3], status::OBJECT_NAME_NOT_FOUND);
    }

    #[test]
    fn create_file_for_write_creates_a_new_file_under_the_game_directory() {
        let game_dir = tempfile::tempdir().unwrap();
        let ctx = context_with_vfs(game_dir.path());
        let mut ppc = PpcContext::new(0, 0);

        let path_ptr = 0x1000u32;
        let handle_ptr = 0x2000u32;
        write_guest_cstr(&ctx.memory, path_ptr, "newsave.dat");
        let mut import = call(&mut ppc, &[handle_ptr as u64, path_ptr as u64, GENERIC_WRITE, 0]);
        dispatch("NtCreateFile", &mut import, &ctx).unwrap();
        assert_eq!(import.context.gpr[3], status::SUCCESS);

        let handle = ctx.memory.read_u32(handle_ptr);
        let data_ptr = 0x3000u32;
        ctx.memory.write_bytes(data_ptr, b"fresh-save");
        let mut import = call(&mut ppc, &[handle as u64, data_ptr as u64, 10, 0]);
        dispatch("NtWriteFile", &mut import, &ctx).unwrap();
        assert_eq!(import.context.gpr[3], status::SUCCESS);
        assert_eq!(std::fs::read(game_dir.path().join("newsave.dat")).unwrap(), b"fresh-save");
    }

    #[test]
    fn query_directory_file_enumerates_then_reports_no_more_files() {
        let game_dir = tempfile::tempdir().unwrap();
        std::fs::write(game_dir.path().join("a.dat"), b"x").unwrap();
        let ctx = context_with_vfs(game_dir.path());
        let mut ppc = PpcContext::new(0, 0);

        let path_ptr = 0x1000u32;
        let handle_ptr = 0x2000u32;
        write_guest_cstr(&ctx.memory, path_ptr, "");
        let mut import = call(&mut ppc, &[handle_ptr as u64, path_ptr as u64, 0, 1]);
        dispatch("NtCreateFile", &mut import, &ctx).unwrap();
        assert_eq!(import.context.gpr[3], status::SUCCESS);
        let handle = ctx.memory.read_u32(handle_ptr);

        let name_ptr = 0x3000u32;
        let is_dir_ptr = 0x3200u32;
        let size_ptr = 0x3300u32;
        let mut import = call(&mut ppc, &[handle as u64, name_ptr as u64, is_dir_ptr as u64, size_ptr as u64]);
        dispatch("NtQueryDirectoryFile", &mut import, &ctx).unwrap();
        assert_eq!(import.context.gpr[3], status::SUCCESS);
        assert_eq!(ctx.memory.read_u64(size_ptr), 1);

        let mut import = call(&mut ppc, &[handle as u64, name_ptr as u64, is_dir_ptr as u64, size_ptr as u64]);
        dispatch("NtQueryDirectoryFile", &mut import, &ctx).unwrap();
        assert_eq!(import.context.gpr[3], status::NO_MORE_FILES);
    }

    #[test]
    fn allocate_virtual_memory_returns_a_usable_address() {
        let ctx = context();
        let mut ppc = PpcContext::new(0, 0);

        let base_ptr = 0x1000u32;
        let size_ptr = 0x1100u32;
        let mut import = call(&mut ppc, &[base_ptr as u64, size_ptr as u64, 256]);
        dispatch("NtAllocateVirtualMemory", &mut import, &ctx).unwrap();
        assert_eq!(import.context.gpr[3], status::SUCCESS);
        assert_eq!(ctx.memory.read_u32(size_ptr), 256);

        let allocated = ctx.memory.read_u32(base_ptr);
        assert_ne!(allocated, 0);
        ctx.memory.write_bytes(allocated, &[0xabu8; 256]);
        assert_eq!(ctx.memory.slice(allocated, 256), &[0xabu8; 256][..]);
    }

    #[test]
    fn free_virtual_memory_reports_success() {
        let ctx = context();
        let mut ppc = PpcContext::new(0, 0);
        let mut import = call(&mut ppc, &[0, 0]);
        dispatch("NtFreeVirtualMemory", &mut import, &ctx).unwrap();
        assert_eq!(import.context.gpr[3], status::SUCCESS);
    }

    #[test]
    fn protect_virtual_memory_reports_success() {
        let ctx = context();
        let mut ppc = PpcContext::new(0, 0);
        let mut import = call(&mut ppc, &[0, 0, 0]);
        dispatch("NtProtectVirtualMemory", &mut import, &ctx).unwrap();
        assert_eq!(import.context.gpr[3], status::SUCCESS);
    }

    #[test]
    fn delay_execution_thread_sleeps_for_the_requested_interval() {
        let ctx = context();
        let mut ppc = PpcContext::new(0, 0);
        let interval_ptr = 0x4000u32;
        ctx.memory.write_u64(interval_ptr, 50_000);

        let mut import = call(&mut ppc, &[0, interval_ptr as u64]);
        let started = std::time::Instant::now();
        dispatch("KeDelayExecutionThread", &mut import, &ctx).unwrap();
        assert_eq!(import.context.gpr[3], status::SUCCESS);
        assert!(started.elapsed() >= std::time::Duration::from_micros(4500));
    }

    #[test]
    fn vd_swap_advances_the_frame_counter_each_call() {
        let ctx = context();
        let mut ppc = PpcContext::new(0, 0);

        let mut import = call(&mut ppc, &[]);
        dispatch("VdSwap", &mut import, &ctx).unwrap();
        assert_eq!(import.context.gpr[3], 0);

        let mut import = call(&mut ppc, &[]);
        dispatch("VdSwap", &mut import, &ctx).unwrap();
        assert_eq!(import.context.gpr[3], 1);
    }
}
