//! # iotrace - File I/O Observation for Unmodified Programs
//!
//! iotrace watches the file I/O of programs it cannot recompile, through two
//! complementary front-ends.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────┐
//! │       Observed Program       │
//! │  open/open64/openat/read/... │
//! └──────────────┬───────────────┘
//!                │ LD_PRELOAD
//!                ▼
//! ┌──────────────────────────────┐        ┌──────────────────────────────┐
//! │  libiotrace_preload.so       │ frames │  iotrace-capture             │
//! │  (iotrace-preload crate)     │───────▶│  reader thread ─▶ processor  │
//! │  filter + descriptor set     │  FIFO  │  "file was opened (took n)"  │
//! └──────────────────────────────┘        └──────────────────────────────┘
//!
//! ┌──────────────────────────────┐        ┌──────────────────────────────┐
//! │  Any process reading under   │  FUSE  │  iotrace-fuse                │
//! │  the mountpoint              │───────▶│  passthrough to FF_PHYS_PATH │
//! └──────────────────────────────┘        │  "{offset} {count}" logs     │
//!                                         └──────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`capture`]: reader thread, frame processing and report formatting
//! - [`shim`]: path mapping, passthrough operations and the `fuser` adapter
//! - [`preflight`]: environment checks with actionable error messages
//! - [`cli`]: command-line argument parsing for the binaries
//! - [`domain`]: error enums and the `Errno` newtype
//!
//! The wire format and the FIFO transport live in `iotrace-common`, shared
//! with the preload library.
//!
//! ## Typical Usage
//!
//! ```bash
//! # Terminal 1
//! iotrace-capture
//!
//! # Terminal 2
//! IOTRACE_FILENAME=data.bin LD_PRELOAD=target/release/libiotrace_preload.so ./program
//!
//! # Or observe every reader of a tree
//! FF_PHYS_PATH=/data FF_LOG_PATH=/tmp/logs iotrace-fuse /mnt/traced
//! ```

pub mod capture;
pub mod cli;
pub mod domain;
pub mod preflight;
pub mod shim;
