//! # iotrace interceptor
//!
//! Preloaded into the observed program (`LD_PRELOAD=libiotrace_preload.so`).
//! The library exports `open`, `open64`, `openat`, `openat64`, `read` and
//! `close`; the dynamic linker binds the program's calls to these instead of
//! libc's. Each export forwards to the genuine function and, for successful
//! opens whose basename matches `IOTRACE_FILENAME`, records the descriptor
//! and sends one OPEN [`Frame`](iotrace_common::Frame) down the FIFO named by
//! `IOTRACE_FANOUT`.
//!
//! It also exports `fcntl`, `fcntl64`, `dup`, `dup2`, `dup3`, `mmap`,
//! `mmap64`, `preadv`, `preadv64` and `aio_read`. These only forward, except
//! that duplicating, mapping or vector-reading a traced descriptor aborts:
//! the trace could no longer account for that file.
//!
//! State is initialized on the first intercepted call. Opening the FIFO for
//! writing blocks until the capture process is reading, so start capture
//! first (either order works, the later side simply waits).
//!
//! Anything that would make the trace wrong (unresolvable symbols, a
//! transport that cannot be opened or written, more than
//! [`MAX_FILES_TRACED`](iotrace_common::MAX_FILES_TRACED) traced files, an
//! unsupported call on a traced descriptor) aborts the process.
//!
//! Diagnostics go to stderr through `env_logger`, filtered by `IOTRACE_LOG`
//! (default `warn`; `info` shows what is being traced).

pub mod descriptors;
pub mod error;
pub mod filter;
pub mod genuine;
pub mod guard;
pub mod tracer;

pub use error::InterceptError;
pub use filter::TraceFilter;
pub use genuine::{DlsymOps, GenuineOps, OpenCall, Width};
pub use tracer::Tracer;

/// Log filter variable for the interceptor's own diagnostics
pub const LOG_ENV: &str = "IOTRACE_LOG";

/// `mode` is only meaningful when the flags can create a file
#[must_use]
pub fn open_needs_mode(flags: libc::c_int) -> bool {
    flags & libc::O_CREAT != 0 || flags & libc::O_TMPFILE == libc::O_TMPFILE
}

// The exports are left out of test builds: the unit-test binary would
// otherwise interpose its own libc calls and block on the FIFO.
#[cfg(not(test))]
mod hooks {
    #![allow(unsafe_code)]

    use iotrace_common::transport;
    use libc::{
        aiocb, c_char, c_int, c_ulong, c_void, iovec, mode_t, off64_t, off_t, size_t, ssize_t,
    };
    use log::info;
    use std::fmt::Display;
    use std::fs::File;
    use std::path::PathBuf;
    use std::sync::OnceLock;

    use crate::filter::TraceFilter;
    use crate::genuine::{DlsymOps, GenuineOps, OpenCall, Width};
    use crate::guard::ReentrancyGuard;
    use crate::tracer::Tracer;
    use crate::{open_needs_mode, InterceptError, LOG_ENV};

    // -----------------------------------------------------------------------
    // Process-wide state
    // -----------------------------------------------------------------------

    struct Context {
        tracer: Tracer<&'static DlsymOps, File>,
        /// Set when this process created the FIFO and must remove it at exit
        owned_fanout: Option<PathBuf>,
    }

    static GENUINE: OnceLock<DlsymOps> = OnceLock::new();
    static CONTEXT: OnceLock<Context> = OnceLock::new();

    fn genuine() -> &'static DlsymOps {
        GENUINE.get_or_init(|| DlsymOps::resolve().unwrap_or_else(|e| fatal(&e)))
    }

    fn context() -> &'static Context {
        CONTEXT.get_or_init(|| build_context(genuine()).unwrap_or_else(|e| fatal(&e)))
    }

    fn build_context(genuine: &'static DlsymOps) -> Result<Context, InterceptError> {
        let env = env_logger::Env::new().filter_or(LOG_ENV, "warn");
        let _ = env_logger::Builder::from_env(env).format_timestamp(None).try_init();

        let filter = TraceFilter::from_env();
        match filter.pattern() {
            Some(name) => info!("tracing {}", String::from_utf8_lossy(name)),
            None => info!("tracing every opened file"),
        }

        let fanout = transport::fanout_path_from_env();
        let created = transport::ensure_fifo(&fanout)
            .map_err(|source| InterceptError::Transport { path: fanout.clone(), source })?;
        let writer = transport::open_writer(&fanout)
            .map_err(|source| InterceptError::Transport { path: fanout.clone(), source })?;
        info!("sending frames to {}", fanout.display());

        if created {
            // SAFETY: remove_owned_fanout is a plain extern "C" fn with no arguments.
            unsafe {
                libc::atexit(remove_owned_fanout);
            }
        }

        Ok(Context {
            tracer: Tracer::new(genuine, filter, writer),
            owned_fanout: created.then_some(fanout),
        })
    }

    extern "C" fn remove_owned_fanout() {
        if let Some(path) = CONTEXT.get().and_then(|ctx| ctx.owned_fanout.as_ref()) {
            let _ = transport::remove_fifo(path);
        }
    }

    fn fatal(err: &dyn Display) -> ! {
        eprintln!("iotrace: {err}");
        std::process::abort()
    }

    /// The context, if it exists yet. Before the first traced open nothing
    /// can be traced, so guards need not force initialization.
    fn traced_context() -> Option<&'static Context> {
        CONTEXT.get()
    }

    fn checked<T>(result: Result<T, InterceptError>) -> T {
        result.unwrap_or_else(|e| fatal(&e))
    }

    // -----------------------------------------------------------------------
    // Exports
    // -----------------------------------------------------------------------

    unsafe fn intercept_open(call: OpenCall, path: *const c_char, flags: c_int, mode: mode_t) -> c_int {
        let mode = if open_needs_mode(flags) { mode } else { 0 };
        let Some(_guard) = ReentrancyGuard::enter() else {
            return genuine().open(call, path, flags, mode);
        };
        match context().tracer.open(call, path, flags, mode) {
            Ok(fd) => fd,
            Err((_, e)) => fatal(&e),
        }
    }

    #[no_mangle]
    pub unsafe extern "C" fn open(path: *const c_char, flags: c_int, mode: mode_t) -> c_int {
        intercept_open(OpenCall::Open, path, flags, mode)
    }

    #[no_mangle]
    pub unsafe extern "C" fn open64(path: *const c_char, flags: c_int, mode: mode_t) -> c_int {
        intercept_open(OpenCall::Open64, path, flags, mode)
    }

    #[no_mangle]
    pub unsafe extern "C" fn openat(
        dirfd: c_int,
        path: *const c_char,
        flags: c_int,
        mode: mode_t,
    ) -> c_int {
        intercept_open(OpenCall::OpenAt(dirfd), path, flags, mode)
    }

    #[no_mangle]
    pub unsafe extern "C" fn openat64(
        dirfd: c_int,
        path: *const c_char,
        flags: c_int,
        mode: mode_t,
    ) -> c_int {
        intercept_open(OpenCall::OpenAt64(dirfd), path, flags, mode)
    }

    #[no_mangle]
    pub unsafe extern "C" fn read(fd: c_int, buf: *mut c_void, count: size_t) -> ssize_t {
        match ReentrancyGuard::enter() {
            Some(_guard) => context().tracer.read(fd, buf, count),
            None => genuine().read(fd, buf, count),
        }
    }

    #[no_mangle]
    pub unsafe extern "C" fn close(fd: c_int) -> c_int {
        match ReentrancyGuard::enter() {
            Some(_guard) => context().tracer.close(fd),
            None => genuine().close(fd),
        }
    }

    // -----------------------------------------------------------------------
    // Guarded forwards
    // -----------------------------------------------------------------------

    /// Run `guarded` with the tracer, or `plain` when re-entered or not yet
    /// initialized.
    unsafe fn guard_or_forward<T>(
        guarded: impl FnOnce(&Tracer<&'static DlsymOps, File>) -> Result<T, InterceptError>,
        plain: impl FnOnce(&DlsymOps) -> T,
    ) -> T {
        let Some(_guard) = ReentrancyGuard::enter() else {
            return plain(genuine());
        };
        match traced_context() {
            Some(ctx) => checked(guarded(&ctx.tracer)),
            None => plain(genuine()),
        }
    }

    // `arg` stands in for the variadic argument, as `mode` does for open.
    unsafe fn intercept_fcntl(width: Width, fd: c_int, cmd: c_int, arg: c_ulong) -> c_int {
        guard_or_forward(
            |tracer| tracer.fcntl(width, fd, cmd, arg),
            |ops| ops.fcntl(width, fd, cmd, arg),
        )
    }

    #[no_mangle]
    pub unsafe extern "C" fn fcntl(fd: c_int, cmd: c_int, arg: c_ulong) -> c_int {
        intercept_fcntl(Width::Native, fd, cmd, arg)
    }

    #[no_mangle]
    pub unsafe extern "C" fn fcntl64(fd: c_int, cmd: c_int, arg: c_ulong) -> c_int {
        intercept_fcntl(Width::Large, fd, cmd, arg)
    }

    #[no_mangle]
    pub unsafe extern "C" fn dup(fd: c_int) -> c_int {
        guard_or_forward(|tracer| tracer.dup(fd), |ops| ops.dup(fd))
    }

    #[no_mangle]
    pub unsafe extern "C" fn dup2(fd: c_int, fd2: c_int) -> c_int {
        guard_or_forward(|tracer| tracer.dup2(fd, fd2), |ops| ops.dup2(fd, fd2))
    }

    #[no_mangle]
    pub unsafe extern "C" fn dup3(fd: c_int, fd2: c_int, flags: c_int) -> c_int {
        guard_or_forward(|tracer| tracer.dup3(fd, fd2, flags), |ops| ops.dup3(fd, fd2, flags))
    }

    unsafe fn intercept_mmap(
        width: Width,
        addr: *mut c_void,
        len: size_t,
        prot: c_int,
        flags: c_int,
        fd: c_int,
        offset: off64_t,
    ) -> *mut c_void {
        // Anonymous mappings never concern a traced file.
        if fd < 0 {
            return genuine().mmap(width, addr, len, prot, flags, fd, offset);
        }
        guard_or_forward(
            |tracer| tracer.mmap(width, addr, len, prot, flags, fd, offset),
            |ops| ops.mmap(width, addr, len, prot, flags, fd, offset),
        )
    }

    #[no_mangle]
    pub unsafe extern "C" fn mmap(
        addr: *mut c_void,
        len: size_t,
        prot: c_int,
        flags: c_int,
        fd: c_int,
        offset: off_t,
    ) -> *mut c_void {
        intercept_mmap(Width::Native, addr, len, prot, flags, fd, off64_t::from(offset))
    }

    #[no_mangle]
    pub unsafe extern "C" fn mmap64(
        addr: *mut c_void,
        len: size_t,
        prot: c_int,
        flags: c_int,
        fd: c_int,
        offset: off64_t,
    ) -> *mut c_void {
        intercept_mmap(Width::Large, addr, len, prot, flags, fd, offset)
    }

    #[no_mangle]
    pub unsafe extern "C" fn preadv(
        fd: c_int,
        iov: *const iovec,
        iovcnt: c_int,
        offset: off_t,
    ) -> ssize_t {
        let offset = off64_t::from(offset);
        guard_or_forward(
            |tracer| tracer.preadv(Width::Native, fd, iov, iovcnt, offset),
            |ops| ops.preadv(Width::Native, fd, iov, iovcnt, offset),
        )
    }

    #[no_mangle]
    pub unsafe extern "C" fn preadv64(
        fd: c_int,
        iov: *const iovec,
        iovcnt: c_int,
        offset: off64_t,
    ) -> ssize_t {
        guard_or_forward(
            |tracer| tracer.preadv(Width::Large, fd, iov, iovcnt, offset),
            |ops| ops.preadv(Width::Large, fd, iov, iovcnt, offset),
        )
    }

    #[no_mangle]
    pub unsafe extern "C" fn aio_read(cb: *mut aiocb) -> c_int {
        guard_or_forward(|tracer| tracer.aio_read(cb), |ops| ops.aio_read(cb))
    }
}
