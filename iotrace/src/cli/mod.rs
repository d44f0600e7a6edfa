//! Command-line argument definitions for the iotrace binaries

pub mod args;

pub use args::{CaptureArgs, FuseArgs};
