//! Filesystem Shim
//!
//! A passthrough filesystem that mirrors a physical directory tree and
//! records, per file, the byte ranges read through it.
//!
//! - [`paths`]: virtual path → real path → access-log path
//! - [`passthrough`]: the file operations, independent of any FUSE binding
//! - [`fuse`]: `fuser` adapter that maps inode numbers onto virtual paths

pub mod fuse;
pub mod passthrough;
pub mod paths;

pub use fuse::ShimFs;
pub use passthrough::{DirEntry, EntryKind, Passthrough};
pub use paths::PathMapper;

/// Environment variable holding the absolute physical root
pub const PHYS_PATH_ENV: &str = "FF_PHYS_PATH";

/// Environment variable holding the absolute access-log directory
pub const LOG_PATH_ENV: &str = "FF_LOG_PATH";
