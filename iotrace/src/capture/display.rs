//! Report formatting: per-frame lines on stdout, session summary on stderr

use iotrace_common::{Frame, Operation};
use std::time::Duration;

/// Report line for one received frame
#[must_use]
pub fn describe_frame(frame: &Frame) -> String {
    match frame.operation() {
        Some(Operation::Open) => format!("file was opened (took {}ns)", frame.duration_ns()),
        _ => "unknown operation".to_string(),
    }
}

/// Counters kept over one capture session
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CaptureStats {
    pub frames: u64,
    pub opens: u64,
    pub unknown: u64,
    /// Sum of the durations carried by OPEN frames
    pub open_ns_total: i64,
}

impl CaptureStats {
    pub fn record(&mut self, frame: &Frame) {
        self.frames += 1;
        match frame.operation() {
            Some(Operation::Open) => {
                self.opens += 1;
                self.open_ns_total = self.open_ns_total.saturating_add(frame.duration_ns());
            }
            _ => self.unknown += 1,
        }
    }

    /// Mean OPEN latency, `None` before the first open
    #[must_use]
    pub fn mean_open_ns(&self) -> Option<i64> {
        let opens = i64::try_from(self.opens).ok().filter(|&n| n > 0)?;
        Some(self.open_ns_total / opens)
    }
}

/// Print the closing summary line
pub fn display_summary(exit_reason: &str, elapsed: Duration, stats: &CaptureStats) {
    eprintln!("{}", summary_line(exit_reason, elapsed, stats));
}

fn summary_line(exit_reason: &str, elapsed: Duration, stats: &CaptureStats) -> String {
    let mean = stats.mean_open_ns().map_or_else(|| "-".to_string(), |ns| format!("{ns}ns"));
    format!(
        "{exit_reason}: {:.1}s, {} frames (open: {}, unknown: {}, mean open: {mean})",
        elapsed.as_secs_f64(),
        stats.frames,
        stats.opens,
        stats.unknown,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_line() {
        assert_eq!(describe_frame(&Frame::open(3, 1500)), "file was opened (took 1500ns)");
    }

    #[test]
    fn test_every_other_tag_is_unknown() {
        assert_eq!(describe_frame(&Frame::read(3, 1, 10)), "unknown operation");
        assert_eq!(describe_frame(&Frame::seek(3, 1, 10)), "unknown operation");
        assert_eq!(describe_frame(&Frame::close(3, 1)), "unknown operation");
        assert_eq!(describe_frame(&Frame::from_parts(77, 3, 1, 0)), "unknown operation");
    }

    #[test]
    fn test_stats_counting() {
        let mut stats = CaptureStats::default();
        assert_eq!(stats.mean_open_ns(), None);
        stats.record(&Frame::open(3, 100));
        stats.record(&Frame::open(4, 300));
        stats.record(&Frame::close(3, 1));

        assert_eq!(stats.frames, 3);
        assert_eq!(stats.opens, 2);
        assert_eq!(stats.unknown, 1);
        assert_eq!(stats.mean_open_ns(), Some(200));
    }

    #[test]
    fn test_summary_line() {
        let mut stats = CaptureStats::default();
        stats.record(&Frame::open(3, 42));
        let line = summary_line("stream closed", Duration::from_millis(1500), &stats);
        assert_eq!(line, "stream closed: 1.5s, 1 frames (open: 1, unknown: 0, mean open: 42ns)");
    }
}
