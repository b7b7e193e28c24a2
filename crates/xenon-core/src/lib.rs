//! Shared primitives for the Xenon recompiled-kernel runtime: the closed
//! error taxonomy, the handle type, wait outcomes, and 100-ns timeouts.
//!
//! Every other crate in the workspace (`xenon-memory`, `xenon-kernel`,
//! `xenon-vfs`, `xenon-config`) depends on this one and converts its own
//! fallible operations into [`Error`] at its public boundary, the same way
//! the teacher corpus centralizes error handling in a single `*-io` crate
//! that the rest of the workspace funnels into.

mod error;
mod handle;
mod time;
mod wait;

pub use error::{Error, Result};
pub use handle::Handle;
pub use time::WaitTimeout;
pub use wait::WaitResult;
