//! Domain model for iotrace
//!
//! Error enums for the capture and shim front-ends, plus the [`Errno`]
//! newtype the shim reports failures with.

pub mod errors;
pub mod types;

pub use errors::{CaptureError, ShimError};
pub use types::Errno;
