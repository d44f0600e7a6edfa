//! Tracing policy applied around each genuine call
//!
//! A [`Tracer`] owns the filter, the traced descriptor set and the frame
//! sink. It is generic over the genuine operations and over the sink so the
//! policy can be exercised without preloading anything.
//!
//! Ordering: the genuine call always runs first and its result is returned
//! unchanged. Bookkeeping happens only after a success and never alters
//! `errno`.
//!
//! Calls that would copy or map a traced descriptor (`dup*`, `fcntl` with a
//! duplicating command, `mmap*`, `preadv*`, `aio_read`) are refused with
//! [`InterceptError::Unsupported`] before reaching the genuine function.
//! A duplicate would outlive the `close` that drops the original from the
//! traced set, and mapped or vectored reads bypass `read` entirely.

use iotrace_common::transport::FrameWriter;
use iotrace_common::Frame;
use libc::{aiocb, c_char, c_int, c_ulong, c_void, iovec, mode_t, off64_t, size_t, ssize_t};
use log::info;
use std::ffi::CStr;
use std::io::Write;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::descriptors::TracedDescriptors;
use crate::error::InterceptError;
use crate::filter::TraceFilter;
use crate::genuine::{GenuineOps, OpenCall, Width};
use crate::guard::ErrnoGuard;

pub struct Tracer<G, W> {
    genuine: G,
    filter: TraceFilter,
    traced: Mutex<TracedDescriptors>,
    /// Separate from `traced` so emission never holds the set lock
    sink: Mutex<FrameWriter<W>>,
}

impl<G: GenuineOps, W: Write> Tracer<G, W> {
    pub fn new(genuine: G, filter: TraceFilter, sink: FrameWriter<W>) -> Self {
        Self {
            genuine,
            filter,
            traced: Mutex::new(TracedDescriptors::new()),
            sink: Mutex::new(sink),
        }
    }

    /// Forward an open; trace the new descriptor if its path matches.
    ///
    /// A traced open that cannot be recorded (set full, transport broken)
    /// returns the error. The descriptor itself stays open and valid.
    ///
    /// # Safety
    /// `path` must be null or a valid NUL-terminated string, as for `open(2)`.
    ///
    /// # Errors
    /// See [`Tracer::record_open`].
    #[allow(unsafe_code)]
    pub unsafe fn open(
        &self,
        call: OpenCall,
        path: *const c_char,
        flags: c_int,
        mode: mode_t,
    ) -> Result<c_int, (c_int, InterceptError)> {
        let start = Instant::now();
        let fd = self.genuine.open(call, path, flags, mode);
        let duration_ns = i64::try_from(start.elapsed().as_nanos()).unwrap_or(i64::MAX);
        if fd < 0 {
            return Ok(fd);
        }

        let _errno = ErrnoGuard::save();
        let path = if path.is_null() { &[][..] } else { CStr::from_ptr(path).to_bytes() };
        if !self.filter.matches(path) {
            return Ok(fd);
        }

        info!("following {}", String::from_utf8_lossy(path));
        self.record_open(fd, duration_ns).map_err(|e| (fd, e))?;
        Ok(fd)
    }

    /// Forward a read. Reads are not reported.
    ///
    /// # Safety
    /// Same contract as `read(2)`.
    #[allow(unsafe_code)]
    pub unsafe fn read(&self, fd: c_int, buf: *mut c_void, count: size_t) -> ssize_t {
        self.genuine.read(fd, buf, count)
    }

    /// Forward a close; stop tracing `fd` only if the close succeeded.
    ///
    /// # Safety
    /// Same contract as `close(2)`.
    #[allow(unsafe_code)]
    pub unsafe fn close(&self, fd: c_int) -> c_int {
        let result = self.genuine.close(fd);
        if result == 0 {
            let _errno = ErrnoGuard::save();
            self.lock_traced().remove(fd);
        }
        result
    }

    /// Forward an `fcntl`; duplicating commands on a traced `fd` are refused.
    ///
    /// # Safety
    /// Same contract as `fcntl(2)`.
    ///
    /// # Errors
    /// [`InterceptError::Unsupported`] for `F_DUPFD`/`F_DUPFD_CLOEXEC` on a
    /// traced descriptor.
    #[allow(unsafe_code)]
    pub unsafe fn fcntl(
        &self,
        width: Width,
        fd: c_int,
        cmd: c_int,
        arg: c_ulong,
    ) -> Result<c_int, InterceptError> {
        if is_duplicating_command(cmd) {
            self.ensure_untraced("fcntl(F_DUPFD)", fd)?;
        }
        Ok(self.genuine.fcntl(width, fd, cmd, arg))
    }

    /// # Safety
    /// Same contract as `dup(2)`.
    ///
    /// # Errors
    /// [`InterceptError::Unsupported`] when `fd` is traced.
    #[allow(unsafe_code)]
    pub unsafe fn dup(&self, fd: c_int) -> Result<c_int, InterceptError> {
        self.ensure_untraced("dup", fd)?;
        Ok(self.genuine.dup(fd))
    }

    /// # Safety
    /// Same contract as `dup2(2)`.
    ///
    /// # Errors
    /// [`InterceptError::Unsupported`] when `fd` is traced.
    #[allow(unsafe_code)]
    pub unsafe fn dup2(&self, fd: c_int, fd2: c_int) -> Result<c_int, InterceptError> {
        self.ensure_untraced("dup2", fd)?;
        Ok(self.genuine.dup2(fd, fd2))
    }

    /// # Safety
    /// Same contract as `dup3(2)`.
    ///
    /// # Errors
    /// [`InterceptError::Unsupported`] when `fd` is traced.
    #[allow(unsafe_code)]
    pub unsafe fn dup3(&self, fd: c_int, fd2: c_int, flags: c_int) -> Result<c_int, InterceptError> {
        self.ensure_untraced("dup3", fd)?;
        Ok(self.genuine.dup3(fd, fd2, flags))
    }

    /// # Safety
    /// Same contract as `mmap(2)`.
    ///
    /// # Errors
    /// [`InterceptError::Unsupported`] when `fd` is traced.
    #[allow(unsafe_code, clippy::too_many_arguments)]
    pub unsafe fn mmap(
        &self,
        width: Width,
        addr: *mut c_void,
        len: size_t,
        prot: c_int,
        flags: c_int,
        fd: c_int,
        offset: off64_t,
    ) -> Result<*mut c_void, InterceptError> {
        self.ensure_untraced("mmap", fd)?;
        Ok(self.genuine.mmap(width, addr, len, prot, flags, fd, offset))
    }

    /// # Safety
    /// Same contract as `preadv(2)`.
    ///
    /// # Errors
    /// [`InterceptError::Unsupported`] when `fd` is traced.
    #[allow(unsafe_code)]
    pub unsafe fn preadv(
        &self,
        width: Width,
        fd: c_int,
        iov: *const iovec,
        iovcnt: c_int,
        offset: off64_t,
    ) -> Result<ssize_t, InterceptError> {
        self.ensure_untraced("preadv", fd)?;
        Ok(self.genuine.preadv(width, fd, iov, iovcnt, offset))
    }

    /// # Safety
    /// `cb` must point to a valid control block, as for `aio_read(3)`.
    ///
    /// # Errors
    /// [`InterceptError::Unsupported`] when the block's descriptor is traced.
    #[allow(unsafe_code)]
    pub unsafe fn aio_read(&self, cb: *mut aiocb) -> Result<c_int, InterceptError> {
        if !cb.is_null() {
            self.ensure_untraced("aio_read", (*cb).aio_fildes)?;
        }
        Ok(self.genuine.aio_read(cb))
    }

    /// # Errors
    /// [`InterceptError::Unsupported`] naming `call` when `fd` is traced.
    pub fn ensure_untraced(&self, call: &'static str, fd: c_int) -> Result<(), InterceptError> {
        if self.is_traced(fd) {
            return Err(InterceptError::Unsupported { call, fd });
        }
        Ok(())
    }

    pub fn is_traced(&self, fd: c_int) -> bool {
        self.lock_traced().contains(fd)
    }

    pub fn traced_count(&self) -> usize {
        self.lock_traced().len()
    }

    /// Insert into the traced set, then send one OPEN frame.
    ///
    /// # Errors
    /// [`InterceptError::TooManyTracedFiles`] or [`InterceptError::Send`].
    pub fn record_open(&self, fd: c_int, duration_ns: i64) -> Result<(), InterceptError> {
        self.lock_traced().insert(fd)?;
        self.emit(&Frame::open(fd, duration_ns))
    }

    fn emit(&self, frame: &Frame) -> Result<(), InterceptError> {
        self.sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .write_frame(frame)
            .map_err(InterceptError::Send)
    }

    fn lock_traced(&self) -> MutexGuard<'_, TracedDescriptors> {
        self.traced.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn into_sink(self) -> W {
        self.sink.into_inner().unwrap_or_else(PoisonError::into_inner).into_inner()
    }
}

fn is_duplicating_command(cmd: c_int) -> bool {
    cmd == libc::F_DUPFD || cmd == libc::F_DUPFD_CLOEXEC
}
