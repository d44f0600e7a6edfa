//! Named-FIFO transport carrying [`Frame`]s from interceptor to capture
//!
//! The channel is a FIFO at a path both processes agree on. Whichever side
//! starts first creates it with [`ensure_fifo`]; an existing FIFO is reused
//! because a FIFO holds no data once both ends are closed, so a leftover
//! from a crashed session behaves like a fresh one. Anything else found at
//! the path is removed first.
//!
//! Opening blocks until the other end shows up: a reader waits for a
//! writer and a writer waits for a reader. There is no timeout.

use std::ffi::CString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

use crate::{Frame, DEFAULT_FANOUT, FANOUT_ENV, FRAME_SIZE};

/// Permission bits requested for a new FIFO (before umask)
pub const FIFO_MODE: libc::mode_t = 0o666;

/// Resolve the fanout path from [`FANOUT_ENV`], falling back to [`DEFAULT_FANOUT`]
#[must_use]
pub fn fanout_path_from_env() -> PathBuf {
    std::env::var_os(FANOUT_ENV).map_or_else(|| PathBuf::from(DEFAULT_FANOUT), PathBuf::from)
}

/// Make sure a FIFO exists at `path`.
///
/// Returns `true` when this call created it (and the caller therefore owns
/// its removal), `false` when a FIFO was already there.
///
/// # Errors
/// Fails if a stale object cannot be removed or `mkfifo` fails for a reason
/// other than losing a creation race to the other end.
pub fn ensure_fifo(path: &Path) -> io::Result<bool> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_fifo() => return Ok(false),
        Ok(_) => fs::remove_file(path)?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "fanout path contains NUL"))?;

    #[allow(unsafe_code)]
    // SAFETY: c_path is a valid NUL-terminated string that outlives the call.
    let ret = unsafe { libc::mkfifo(c_path.as_ptr(), FIFO_MODE) };
    if ret == 0 {
        return Ok(true);
    }

    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::EEXIST)
        && fs::symlink_metadata(path).is_ok_and(|meta| meta.file_type().is_fifo())
    {
        return Ok(false);
    }
    Err(err)
}

/// Remove the FIFO's name. A missing entry is not an error.
///
/// # Errors
/// Propagates any failure other than `NotFound`.
pub fn remove_fifo(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Open the consumer end. Blocks until a writer opens the FIFO.
///
/// # Errors
/// Propagates the `open` failure.
pub fn open_reader(path: &Path) -> io::Result<FrameReader<File>> {
    File::open(path).map(FrameReader::new)
}

/// Open a producer end. Blocks until a reader opens the FIFO.
///
/// # Errors
/// Propagates the `open` failure.
pub fn open_writer(path: &Path) -> io::Result<FrameWriter<File>> {
    OpenOptions::new().write(true).open(path).map(FrameWriter::new)
}

/// Producer side: writes whole frames
///
/// Not synchronized; concurrent producers must serialize calls to
/// [`FrameWriter::write_frame`] themselves so frames never interleave.
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Write exactly [`FRAME_SIZE`] bytes as one unit
    ///
    /// # Errors
    /// Propagates write failures (e.g. `EPIPE` once the reader is gone).
    pub fn write_frame(&mut self, frame: &Frame) -> io::Result<()> {
        self.inner.write_all(&frame.to_bytes())
    }

    /// # Errors
    /// Propagates the underlying flush failure.
    pub fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Consumer side: reads whole frames until the writers are gone
pub struct FrameReader<R> {
    inner: R,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Read the next frame.
    ///
    /// Returns `Ok(None)` at end of stream, i.e. when every writer has
    /// closed its end. A trailing partial frame also counts as end of
    /// stream, not as corruption.
    ///
    /// # Errors
    /// Propagates read failures other than `EINTR`.
    pub fn read_frame(&mut self) -> io::Result<Option<Frame>> {
        let mut buf = [0u8; FRAME_SIZE];
        let mut filled = 0;
        while filled < FRAME_SIZE {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => {
                    if filled > 0 {
                        log::warn!("discarding {filled} trailing bytes of a partial frame");
                    }
                    return Ok(None);
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(Frame::from_bytes(&buf))
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}
