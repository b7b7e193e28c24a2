//! The closed error taxonomy shared by every kernel-facing crate.
//!
//! Every fallible operation in the runtime — handle lookup, wait, archive
//! extraction, VFS resolution — reports one of these variants. Crate-local
//! error types (e.g. an archive parser's format errors) convert into this
//! type at the crate boundary rather than leaking their own taxonomy
//! upward, mirroring how translated-code-facing APIs need a single closed
//! set to map onto Xbox 360 status codes.

use thiserror::Error;

/// The runtime-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// The closed error taxonomy described in the kernel design (`NTSTATUS`-like).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A handle value was never issued, or was already closed.
    #[error("invalid handle: {handle:#010x}")]
    InvalidHandle { handle: u32 },

    /// A handle resolved to an object of a different kind than expected.
    #[error("handle {handle:#010x} is not a {expected}")]
    WrongType { handle: u32, expected: &'static str },

    /// `close` was called twice on the same handle.
    #[error("handle {handle:#010x} was already closed")]
    AlreadyClosed { handle: u32 },

    /// A wait expired before any watched object became signaled.
    #[error("wait timed out")]
    Timeout,

    /// A mutant's owning thread terminated while still holding it.
    #[error("mutant was abandoned by its owner")]
    Abandoned,

    /// Reserved for APC delivery; waits may report this if alerted.
    #[error("wait was alerted")]
    Alerted,

    /// The waiting thread was cooperatively cancelled.
    #[error("wait was cancelled")]
    Cancelled,

    /// A semaphore release would have pushed the count past its maximum.
    #[error("semaphore release of {delta} would exceed maximum {maximum} (current {current})")]
    LimitExceeded { current: u32, delta: u32, maximum: u32 },

    /// A mutant release was attempted by a thread that does not own it.
    #[error("thread {thread} is not the owner of this mutant")]
    NotOwner { thread: u32 },

    /// An operation required a signaled object that was not signaled.
    #[error("object is not signaled")]
    NotSignaled,

    /// A path did not resolve to any overlay, game directory, or archive entry.
    #[error("not found: {path}")]
    NotFound { path: String },

    /// The host file system refused the operation.
    #[error("permission denied: {path}")]
    PermissionDenied { path: String },

    /// A binary structure (archive header, TOC, text table) failed to parse.
    #[error("format error in {context}: {reason}")]
    FormatError { context: String, reason: String },

    /// AES decryption failed or no key was configured for an encrypted archive.
    #[error("decryption error: {reason}")]
    DecryptionError { reason: String },

    /// A deflate stream failed to decompress to its declared size.
    #[error("decompression error: {reason}")]
    DecompressionError { reason: String },

    /// Host memory or guest address space could not be allocated.
    #[error("out of memory: {reason}")]
    OutOfMemory { reason: String },

    /// An unrecoverable condition; the process is expected to abort.
    #[error("fatal: {reason}")]
    Fatal { reason: String },
}

impl Error {
    pub fn format_error(context: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::FormatError { context: context.into(), reason: reason.into() }
    }

    pub fn not_found(path: impl Into<String>) -> Self {
        Error::NotFound { path: path.into() }
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Error::Fatal { reason: reason.into() }
    }

    /// True for the handful of variants the design marks fatal: the process
    /// is expected to log a diagnostic and abort rather than propagate these.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::OutOfMemory { .. } | Error::Fatal { .. })
    }
}
