//! Capture pipeline
//!
//! A blocking reader thread owns the FIFO's read end and forwards decoded
//! frames over a bounded channel; the reporting loop in `iotrace-capture`
//! drains the channel into a [`FrameProcessor`].
//!
//! ```text
//! FIFO ──read_frame()──▶ reader thread ──StreamEvent──▶ FrameProcessor ──▶ stdout
//!                                                              └──▶ --output file
//! ```

pub mod display;
pub mod frame_processor;
pub mod reader;

pub use display::{describe_frame, display_summary, CaptureStats};
pub use frame_processor::FrameProcessor;
pub use reader::{spawn_fanout_reader, spawn_reader, StreamEvent};
