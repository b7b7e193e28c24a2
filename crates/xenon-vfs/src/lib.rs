//! Overlay path resolution, the IMG/RPF archive readers, AES-256-ECB
//! archive decryption, and the localization table loader — everything
//! translated code's file-import handlers need to find and read a guest
//! path without caring whether it lives on disk or inside an archive.

pub mod archive;
pub mod cache;
pub mod crypto;
pub mod cursor;
pub mod hash;
pub mod localization;
pub mod resolver;

pub use archive::{open_archive, Archive, ArchiveEntry};
pub use crypto::AES_KEY_LEN;
pub use localization::LocalizationTable;
pub use resolver::{Resolved, VfsResolver};
