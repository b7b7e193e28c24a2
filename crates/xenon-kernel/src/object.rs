//! Tagged-variant kernel object: the capability set {identify, wait, close}
//! shared by every concrete kind, without a trait-object hierarchy.
//!
//! The set of kinds is closed and finite, so a single enum with per-variant
//! payload is a better fit than deep inheritance — there is no expectation
//! of new kinds appearing, only new operations on the existing ones.

use crate::sync::{wait_single, ConsumeOutcome, EventObject, MutantObject, SemaphoreObject, Waitable};
use crate::thread::GuestThread;
use std::fs::File as HostFile;
use std::io::{Read, Seek, SeekFrom, Write as _};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use xenon_core::{Error, Result, WaitResult, WaitTimeout};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Event,
    Semaphore,
    Mutant,
    Thread,
    File,
    DirEnum,
}

impl ObjectKind {
    pub const fn name(self) -> &'static str {
        match self {
            ObjectKind::Event => "Event",
            ObjectKind::Semaphore => "Semaphore",
            ObjectKind::Mutant => "Mutant",
            ObjectKind::Thread => "Thread",
            ObjectKind::File => "File",
            ObjectKind::DirEnum => "DirEnum",
        }
    }
}

/// Where a [`FileObject`]'s bytes come from: a real host file for
/// game-directory and overlay reads, or a shared in-memory buffer for
/// archive-extracted content (never written back).
enum FileBacking {
    Host(Mutex<HostFile>),
    Memory(Arc<Vec<u8>>),
}

pub struct FileObject {
    pub path: String,
    pub writable: bool,
    backing: FileBacking,
    position: AtomicU64,
}

impl FileObject {
    pub fn from_host(path: impl Into<String>, file: HostFile, writable: bool) -> Self {
        Self { path: path.into(), writable, backing: FileBacking::Host(Mutex::new(file)), position: AtomicU64::new(0) }
    }

    /// Wraps a buffer already extracted from an archive. Read-only: the
    /// archive readers never support writes.
    pub fn from_memory(path: impl Into<String>, bytes: Arc<Vec<u8>>) -> Self {
        Self { path: path.into(), writable: false, backing: FileBacking::Memory(bytes), position: AtomicU64::new(0) }
    }

    fn denied(&self) -> Error {
        Error::PermissionDenied { path: self.path.clone() }
    }

    pub fn len(&self) -> Result<u64> {
        match &self.backing {
            FileBacking::Host(file) => {
                let file = file.lock().expect("file mutex poisoned");
                file.metadata().map(|m| m.len()).map_err(|_| self.denied())
            }
            FileBacking::Memory(bytes) => Ok(bytes.len() as u64),
        }
    }

    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Relaxed)
    }

    pub fn seek(&self, pos: u64) -> Result<()> {
        if let FileBacking::Host(file) = &self.backing {
            file.lock().expect("file mutex poisoned").seek(SeekFrom::Start(pos)).map_err(|_| self.denied())?;
        }
        self.position.store(pos, Ordering::Relaxed);
        Ok(())
    }

    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        match &self.backing {
            FileBacking::Host(file) => {
                let mut file = file.lock().expect("file mutex poisoned");
                let pos = self.position.load(Ordering::Relaxed);
                file.seek(SeekFrom::Start(pos)).map_err(|_| self.denied())?;
                let read = file.read(buf).map_err(|_| self.denied())?;
                self.position.fetch_add(read as u64, Ordering::Relaxed);
                Ok(read)
            }
            FileBacking::Memory(bytes) => {
                let pos = self.position.load(Ordering::Relaxed) as usize;
                let available = bytes.len().saturating_sub(pos);
                let count = buf.len().min(available);
                buf[..count].copy_from_slice(&bytes[pos..pos + count]);
                self.position.fetch_add(count as u64, Ordering::Relaxed);
                Ok(count)
            }
        }
    }

    /// Writes are supported only for host-backed files; archive-extracted
    /// content is always read-only.
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        if !self.writable {
            return Err(self.denied());
        }
        match &self.backing {
            FileBacking::Host(file) => {
                let mut file = file.lock().expect("file mutex poisoned");
                let pos = self.position.load(Ordering::Relaxed);
                file.seek(SeekFrom::Start(pos)).map_err(|_| self.denied())?;
                let written = file.write(data).map_err(|_| self.denied())?;
                self.position.fetch_add(written as u64, Ordering::Relaxed);
                Ok(written)
            }
            FileBacking::Memory(_) => Err(self.denied()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DirEntrySnapshot {
    pub name: String,
    pub is_directory: bool,
    pub size: u64,
}

/// An ordered snapshot of a directory's entries taken at open time, with a
/// cursor for sequential enumeration. The snapshot is never refreshed; a
/// rescan requires opening a new handle.
pub struct DirEnumObject {
    entries: Vec<DirEntrySnapshot>,
    cursor: AtomicU64,
}

impl DirEnumObject {
    pub fn new(entries: Vec<DirEntrySnapshot>) -> Self {
        Self { entries, cursor: AtomicU64::new(0) }
    }

    pub fn next(&self) -> Option<DirEntrySnapshot> {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) as usize;
        self.entries.get(index).cloned()
    }

    pub fn reset(&self) {
        self.cursor.store(0, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// The tagged union of every concrete kernel object kind. Cloning a
/// `KernelObject` clones the `Arc`, not the underlying object — the handle
/// table, wait lists, and thread-held references all share one instance.
#[derive(Clone)]
pub enum KernelObject {
    Event(Arc<EventObject>),
    Semaphore(Arc<SemaphoreObject>),
    Mutant(Arc<MutantObject>),
    Thread(Arc<GuestThread>),
    File(Arc<FileObject>),
    DirEnum(Arc<DirEnumObject>),
}

impl KernelObject {
    pub fn kind(&self) -> ObjectKind {
        match self {
            KernelObject::Event(_) => ObjectKind::Event,
            KernelObject::Semaphore(_) => ObjectKind::Semaphore,
            KernelObject::Mutant(_) => ObjectKind::Mutant,
            KernelObject::Thread(_) => ObjectKind::Thread,
            KernelObject::File(_) => ObjectKind::File,
            KernelObject::DirEnum(_) => ObjectKind::DirEnum,
        }
    }

    /// Waits on this object alone. `None` for kinds that never signal
    /// (`File`, `DirEnum`) — callers reject those before reaching a wait
    /// primitive rather than treating them as permanently unsatisfiable.
    pub fn wait(&self, timeout: WaitTimeout, thread_id: u32) -> Option<WaitResult> {
        match self {
            KernelObject::Event(event) => Some(wait_single(&**event, timeout, thread_id)),
            KernelObject::Semaphore(sem) => Some(wait_single(&**sem, timeout, thread_id)),
            KernelObject::Mutant(mutant) => Some(wait_single(&**mutant, timeout, thread_id)),
            KernelObject::Thread(thread) => Some(thread.wait_exit(timeout, thread_id)),
            KernelObject::File(_) | KernelObject::DirEnum(_) => None,
        }
    }

    pub fn is_waitable(&self) -> bool {
        !matches!(self, KernelObject::File(_) | KernelObject::DirEnum(_))
    }
}

/// Lets heterogeneous `KernelObject`s (e.g. an `Event` and a `Mutant`
/// together) pass through the generic `wait_multiple` unchanged, by
/// delegating to whichever concrete primitive backs this variant. Callers
/// must reject non-waitable kinds before building the wait set — a
/// `File`/`DirEnum` here behaves as permanently not-ready rather than
/// rejecting the wait itself.
impl Waitable for KernelObject {
    fn join_waiters(&self, ticket: u64) {
        match self {
            KernelObject::Event(event) => event.join_waiters(ticket),
            KernelObject::Semaphore(sem) => sem.join_waiters(ticket),
            KernelObject::Mutant(mutant) => mutant.join_waiters(ticket),
            KernelObject::Thread(thread) => thread.exit_event().join_waiters(ticket),
            KernelObject::File(_) | KernelObject::DirEnum(_) => {}
        }
    }

    fn leave_waiters(&self, ticket: u64) {
        match self {
            KernelObject::Event(event) => event.leave_waiters(ticket),
            KernelObject::Semaphore(sem) => sem.leave_waiters(ticket),
            KernelObject::Mutant(mutant) => mutant.leave_waiters(ticket),
            KernelObject::Thread(thread) => thread.exit_event().leave_waiters(ticket),
            KernelObject::File(_) | KernelObject::DirEnum(_) => {}
        }
    }

    fn is_ready(&self, ticket: u64, thread_id: u32) -> bool {
        match self {
            KernelObject::Event(event) => event.is_ready(ticket, thread_id),
            KernelObject::Semaphore(sem) => sem.is_ready(ticket, thread_id),
            KernelObject::Mutant(mutant) => mutant.is_ready(ticket, thread_id),
            KernelObject::Thread(thread) => thread.exit_event().is_ready(ticket, thread_id),
            KernelObject::File(_) | KernelObject::DirEnum(_) => false,
        }
    }

    fn try_consume(&self, ticket: u64, thread_id: u32) -> ConsumeOutcome {
        match self {
            KernelObject::Event(event) => event.try_consume(ticket, thread_id),
            KernelObject::Semaphore(sem) => sem.try_consume(ticket, thread_id),
            KernelObject::Mutant(mutant) => mutant.try_consume(ticket, thread_id),
            KernelObject::Thread(thread) => thread.exit_event().try_consume(ticket, thread_id),
            KernelObject::File(_) | KernelObject::DirEnum(_) => ConsumeOutcome::NotReady,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn memory_backed_file_reads_and_seeks() {
        let bytes = Arc::new(b"hello world".to_vec());
        let file = FileObject::from_memory("mem://hello", bytes);
        let mut buf = [0u8; 5];
        assert_eq!(file.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf, b"hello");
        assert!(file.write(b"x").is_err());
        file.seek(6).unwrap();
        let mut rest = [0u8; 5];
        assert_eq!(file.read(&mut rest).unwrap(), 5);
        assert_eq!(&rest, b"world");
    }

    #[test]
    fn host_backed_file_is_writable() {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(b"abc").unwrap();
        let path = tmp.path().to_path_buf();
        let handle = std::fs::OpenOptions::new().read(true).write(true).open(&path).unwrap();
        let file = FileObject::from_host(path.to_string_lossy().to_string(), handle, true);
        assert_eq!(file.len().unwrap(), 3);
        file.seek(3).unwrap();
        assert_eq!(file.write(b"def").unwrap(), 3);
    }

    #[test]
    fn dir_enum_advances_and_resets() {
        let dir = DirEnumObject::new(vec![
            DirEntrySnapshot { name: "a".into(), is_directory: false, size: 1 },
            DirEntrySnapshot { name: "b".into(), is_directory: true, size: 0 },
        ]);
        assert_eq!(dir.next().unwrap().name, "a");
        assert_eq!(dir.next().unwrap().name, "b");
        assert!(dir.next().is_none());
        dir.reset();
        assert_eq!(dir.next().unwrap().name, "a");
    }
}
