//! Structured error types for iotrace
//!
//! Using thiserror for automatic Display implementation and error chaining.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Failed to create fanout {}: {source}", path.display())]
    FanoutCreate {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to open fanout {} for reading: {source}", path.display())]
    FanoutOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read frame: {0}")]
    ReadFailed(#[source] io::Error),

    #[error("Failed to write raw frame output: {0}")]
    OutputFailed(#[source] io::Error),

    #[error("Failed to print report: {0}")]
    DisplayFailed(#[source] io::Error),
}

#[derive(Error, Debug)]
pub enum ShimError {
    #[error("Missing required setting {0}")]
    MissingSetting(&'static str),

    #[error("{name} must be absolute, got {}", path.display())]
    RelativePath { name: &'static str, path: PathBuf },

    #[error("Failed to mount at {}: {source}", mountpoint.display())]
    MountFailed {
        mountpoint: PathBuf,
        #[source]
        source: io::Error,
    },
}
