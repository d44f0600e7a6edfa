//! Blocking FIFO reader thread

use crossbeam_channel::{bounded, Receiver, Sender};
use iotrace_common::transport::{self, FrameReader};
use iotrace_common::Frame;
use log::debug;
use std::io::Read;
use std::path::PathBuf;
use std::thread::JoinHandle;

use crate::domain::CaptureError;

/// Frames buffered between the reader thread and the reporting loop
pub const CHANNEL_CAPACITY: usize = 1024;

/// What the reader thread reports; `End` and `Failed` are always last
#[derive(Debug)]
pub enum StreamEvent {
    Frame(Frame),
    /// Every writer closed its end
    End,
    Failed(CaptureError),
}

/// Open `fanout` for reading on a new thread and stream its frames.
///
/// Opening blocks until the first writer appears, which is why it happens on
/// the reader thread rather than the caller's.
pub fn spawn_fanout_reader(fanout: PathBuf) -> (Receiver<StreamEvent>, JoinHandle<()>) {
    let (tx, rx) = bounded(CHANNEL_CAPACITY);
    let handle = std::thread::spawn(move || match transport::open_reader(&fanout) {
        Ok(reader) => {
            debug!("writer connected to {}", fanout.display());
            pump(reader, &tx);
        }
        Err(source) => {
            let _ = tx.send(StreamEvent::Failed(CaptureError::FanoutOpen { path: fanout, source }));
        }
    });
    (rx, handle)
}

/// Stream frames from an already-open reader
pub fn spawn_reader<R: Read + Send + 'static>(
    reader: FrameReader<R>,
) -> (Receiver<StreamEvent>, JoinHandle<()>) {
    let (tx, rx) = bounded(CHANNEL_CAPACITY);
    let handle = std::thread::spawn(move || pump(reader, &tx));
    (rx, handle)
}

fn pump<R: Read>(mut reader: FrameReader<R>, tx: &Sender<StreamEvent>) {
    loop {
        let event = match reader.read_frame() {
            Ok(Some(frame)) => StreamEvent::Frame(frame),
            Ok(None) => StreamEvent::End,
            Err(e) => StreamEvent::Failed(CaptureError::ReadFailed(e)),
        };
        let last = !matches!(event, StreamEvent::Frame(_));
        // A closed channel means the reporting loop is gone.
        if tx.send(event).is_err() || last {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iotrace_common::transport::FrameWriter;
    use std::io::{self, Cursor};

    struct FailingRead;

    impl Read for FailingRead {
        fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::from_raw_os_error(libc::EIO))
        }
    }

    #[test]
    fn test_frames_then_end() {
        let mut writer = FrameWriter::new(Vec::new());
        writer.write_frame(&Frame::open(3, 1)).unwrap();
        writer.write_frame(&Frame::open(4, 2)).unwrap();

        let (rx, handle) = spawn_reader(FrameReader::new(Cursor::new(writer.into_inner())));
        let events: Vec<StreamEvent> = rx.iter().collect();
        handle.join().unwrap();

        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], StreamEvent::Frame(f) if f.fd() == 3));
        assert!(matches!(events[1], StreamEvent::Frame(f) if f.fd() == 4));
        assert!(matches!(events[2], StreamEvent::End));
    }

    #[test]
    fn test_read_error_is_reported_last() {
        let (rx, handle) = spawn_reader(FrameReader::new(FailingRead));
        let events: Vec<StreamEvent> = rx.iter().collect();
        handle.join().unwrap();

        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], StreamEvent::Failed(CaptureError::ReadFailed(_))));
    }

    #[test]
    fn test_fanout_reader_follows_writer() {
        let dir = tempfile::tempdir().unwrap();
        let fanout = dir.path().join("fanout");
        transport::ensure_fifo(&fanout).unwrap();

        let (rx, handle) = spawn_fanout_reader(fanout.clone());
        let mut writer = transport::open_writer(&fanout).unwrap();
        writer.write_frame(&Frame::open(7, 70)).unwrap();
        drop(writer);

        let events: Vec<StreamEvent> = rx.iter().collect();
        handle.join().unwrap();
        assert!(matches!(events[0], StreamEvent::Frame(f) if f.fd() == 7));
        assert!(matches!(events.last(), Some(StreamEvent::End)));
    }
}
