//! # Frame Processing
//!
//! Routes each received [`Frame`] to the report, the raw output file and the
//! session counters.
//!
//! ## Output Modes
//!
//! - **Default**: one line per frame on the report sink (stdout)
//! - **Quiet**: counters only
//! - **Raw output**: every frame appended verbatim to a file, in arrival order

use iotrace_common::transport::FrameWriter;
use iotrace_common::Frame;
use log::{debug, warn};
use std::io::Write;

use super::{describe_frame, CaptureStats};
use crate::domain::CaptureError;

/// Encapsulates frame processing logic and state
pub struct FrameProcessor<R: Write, O: Write> {
    quiet: bool,
    report: R,
    raw_output: Option<FrameWriter<O>>,

    pub stats: CaptureStats,
}

impl<R: Write, O: Write> FrameProcessor<R, O> {
    #[must_use]
    pub fn new(quiet: bool, report: R, raw_output: Option<O>) -> Self {
        Self {
            quiet,
            report,
            raw_output: raw_output.map(FrameWriter::new),
            stats: CaptureStats::default(),
        }
    }

    /// # Errors
    /// Fails when the report or the raw output cannot be written.
    pub fn process_frame(&mut self, frame: &Frame) -> Result<(), CaptureError> {
        self.stats.record(frame);
        if frame.operation().is_none() {
            warn!("frame with unknown operation tag {}", frame.raw_operation());
        }
        debug!("fd={} op={} took={}ns", frame.fd(), frame.raw_operation(), frame.duration_ns());

        if let Some(raw) = self.raw_output.as_mut() {
            raw.write_frame(frame).map_err(CaptureError::OutputFailed)?;
        }
        if !self.quiet {
            writeln!(self.report, "{}", describe_frame(frame)).map_err(CaptureError::DisplayFailed)?;
        }
        Ok(())
    }

    /// Flush both sinks
    ///
    /// # Errors
    /// Propagates the first flush failure.
    pub fn finish(&mut self) -> Result<(), CaptureError> {
        if let Some(raw) = self.raw_output.as_mut() {
            raw.flush().map_err(CaptureError::OutputFailed)?;
        }
        self.report.flush().map_err(CaptureError::DisplayFailed)
    }

    pub fn into_parts(self) -> (R, Option<O>) {
        (self.report, self.raw_output.map(FrameWriter::into_inner))
    }
}
