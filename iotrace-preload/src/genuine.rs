//! Genuine-operations provider
//!
//! The tracer never calls libc directly. It forwards through [`GenuineOps`],
//! so the interception strategy (symbol preloading today) can be swapped
//! without touching frame emission or the descriptor bookkeeping.

#![allow(unsafe_code)]

use libc::{
    aiocb, c_char, c_int, c_uint, c_ulong, c_void, iovec, mode_t, off64_t, off_t, size_t,
    ssize_t, RTLD_NEXT,
};

use crate::error::InterceptError;

/// Which open entry point the observed program called
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenCall {
    Open,
    Open64,
    /// `openat` relative to the given directory descriptor
    OpenAt(c_int),
    OpenAt64(c_int),
}

/// Plain entry point or its explicit large-file (`*64`) twin
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Width {
    Native,
    Large,
}

/// The real, unobserved file-I/O implementation
pub trait GenuineOps: Send + Sync {
    /// Forward an open of any flavour.
    ///
    /// # Safety
    /// Same contract as the libc function selected by `call`.
    unsafe fn open(&self, call: OpenCall, path: *const c_char, flags: c_int, mode: mode_t)
        -> c_int;

    /// # Safety
    /// Same contract as `read(2)`.
    unsafe fn read(&self, fd: c_int, buf: *mut c_void, count: size_t) -> ssize_t;

    /// # Safety
    /// Same contract as `close(2)`.
    unsafe fn close(&self, fd: c_int) -> c_int;

    /// `arg` is passed on as the variadic third argument; commands that take
    /// none ignore it.
    ///
    /// # Safety
    /// Same contract as `fcntl(2)` for `cmd`.
    unsafe fn fcntl(&self, width: Width, fd: c_int, cmd: c_int, arg: c_ulong) -> c_int;

    /// # Safety
    /// Same contract as `dup(2)`.
    unsafe fn dup(&self, fd: c_int) -> c_int;

    /// # Safety
    /// Same contract as `dup2(2)`.
    unsafe fn dup2(&self, fd: c_int, fd2: c_int) -> c_int;

    /// # Safety
    /// Same contract as `dup3(2)`.
    unsafe fn dup3(&self, fd: c_int, fd2: c_int, flags: c_int) -> c_int;

    /// # Safety
    /// Same contract as `mmap(2)`.
    #[allow(clippy::too_many_arguments)]
    unsafe fn mmap(
        &self,
        width: Width,
        addr: *mut c_void,
        len: size_t,
        prot: c_int,
        flags: c_int,
        fd: c_int,
        offset: off64_t,
    ) -> *mut c_void;

    /// # Safety
    /// Same contract as `preadv(2)`.
    unsafe fn preadv(
        &self,
        width: Width,
        fd: c_int,
        iov: *const iovec,
        iovcnt: c_int,
        offset: off64_t,
    ) -> ssize_t;

    /// # Safety
    /// Same contract as `aio_read(3)`.
    unsafe fn aio_read(&self, cb: *mut aiocb) -> c_int;
}

impl<T: GenuineOps + ?Sized> GenuineOps for &T {
    unsafe fn open(
        &self,
        call: OpenCall,
        path: *const c_char,
        flags: c_int,
        mode: mode_t,
    ) -> c_int {
        (**self).open(call, path, flags, mode)
    }

    unsafe fn read(&self, fd: c_int, buf: *mut c_void, count: size_t) -> ssize_t {
        (**self).read(fd, buf, count)
    }

    unsafe fn close(&self, fd: c_int) -> c_int {
        (**self).close(fd)
    }

    unsafe fn fcntl(&self, width: Width, fd: c_int, cmd: c_int, arg: c_ulong) -> c_int {
        (**self).fcntl(width, fd, cmd, arg)
    }

    unsafe fn dup(&self, fd: c_int) -> c_int {
        (**self).dup(fd)
    }

    unsafe fn dup2(&self, fd: c_int, fd2: c_int) -> c_int {
        (**self).dup2(fd, fd2)
    }

    unsafe fn dup3(&self, fd: c_int, fd2: c_int, flags: c_int) -> c_int {
        (**self).dup3(fd, fd2, flags)
    }

    unsafe fn mmap(
        &self,
        width: Width,
        addr: *mut c_void,
        len: size_t,
        prot: c_int,
        flags: c_int,
        fd: c_int,
        offset: off64_t,
    ) -> *mut c_void {
        (**self).mmap(width, addr, len, prot, flags, fd, offset)
    }

    unsafe fn preadv(
        &self,
        width: Width,
        fd: c_int,
        iov: *const iovec,
        iovcnt: c_int,
        offset: off64_t,
    ) -> ssize_t {
        (**self).preadv(width, fd, iov, iovcnt, offset)
    }

    unsafe fn aio_read(&self, cb: *mut aiocb) -> c_int {
        (**self).aio_read(cb)
    }
}

type OpenFn = unsafe extern "C" fn(*const c_char, c_int, ...) -> c_int;
type OpenAtFn = unsafe extern "C" fn(c_int, *const c_char, c_int, ...) -> c_int;
type ReadFn = unsafe extern "C" fn(c_int, *mut c_void, size_t) -> ssize_t;
type CloseFn = unsafe extern "C" fn(c_int) -> c_int;
type FcntlFn = unsafe extern "C" fn(c_int, c_int, ...) -> c_int;
type DupFn = unsafe extern "C" fn(c_int) -> c_int;
type Dup2Fn = unsafe extern "C" fn(c_int, c_int) -> c_int;
type Dup3Fn = unsafe extern "C" fn(c_int, c_int, c_int) -> c_int;
type MmapFn = unsafe extern "C" fn(*mut c_void, size_t, c_int, c_int, c_int, off_t) -> *mut c_void;
type Mmap64Fn =
    unsafe extern "C" fn(*mut c_void, size_t, c_int, c_int, c_int, off64_t) -> *mut c_void;
type PreadvFn = unsafe extern "C" fn(c_int, *const iovec, c_int, off_t) -> ssize_t;
type Preadv64Fn = unsafe extern "C" fn(c_int, *const iovec, c_int, off64_t) -> ssize_t;
type AioReadFn = unsafe extern "C" fn(*mut aiocb) -> c_int;

/// Look up the next definition of `$name` after this library, `None` if absent.
macro_rules! lookup_next {
    ($name:literal, $ty:ty) => {{
        // SAFETY: the name is NUL-terminated and RTLD_NEXT is a valid pseudo-handle.
        let sym = unsafe { libc::dlsym(RTLD_NEXT, concat!($name, "\0").as_ptr().cast::<c_char>()) };
        if sym.is_null() {
            None
        } else {
            // SAFETY: libc exports `$name` with exactly this signature.
            Some(unsafe { std::mem::transmute::<*mut c_void, $ty>(sym) })
        }
    }};
}

/// Like `lookup_next!`, but a missing symbol fails resolution.
macro_rules! next_symbol {
    ($name:literal, $ty:ty) => {
        match lookup_next!($name, $ty) {
            Some(func) => func,
            None => return Err(InterceptError::SymbolNotFound($name)),
        }
    };
}

/// Genuine operations resolved with `dlsym(RTLD_NEXT, ...)`
///
/// Because the preloaded library is searched first, `RTLD_NEXT` yields the
/// definitions our own exports shadow (normally glibc's).
pub struct DlsymOps {
    open: OpenFn,
    open64: OpenFn,
    openat: OpenAtFn,
    openat64: OpenAtFn,
    read: ReadFn,
    close: CloseFn,
    fcntl: FcntlFn,
    /// Only glibc 2.28 and later export `fcntl64`
    fcntl64: Option<FcntlFn>,
    dup: DupFn,
    dup2: Dup2Fn,
    dup3: Dup3Fn,
    mmap: MmapFn,
    mmap64: Mmap64Fn,
    preadv: PreadvFn,
    preadv64: Preadv64Fn,
    /// Lives in librt before glibc 2.34, so it is only there if the program links it
    aio_read: Option<AioReadFn>,
}

impl DlsymOps {
    /// Resolve every wrapped entry point.
    ///
    /// # Errors
    /// Returns [`InterceptError::SymbolNotFound`] for the first required
    /// symbol the dynamic linker cannot find.
    pub fn resolve() -> Result<Self, InterceptError> {
        Ok(Self {
            open: next_symbol!("open", OpenFn),
            open64: next_symbol!("open64", OpenFn),
            openat: next_symbol!("openat", OpenAtFn),
            openat64: next_symbol!("openat64", OpenAtFn),
            read: next_symbol!("read", ReadFn),
            close: next_symbol!("close", CloseFn),
            fcntl: next_symbol!("fcntl", FcntlFn),
            fcntl64: lookup_next!("fcntl64", FcntlFn),
            dup: next_symbol!("dup", DupFn),
            dup2: next_symbol!("dup2", Dup2Fn),
            dup3: next_symbol!("dup3", Dup3Fn),
            mmap: next_symbol!("mmap", MmapFn),
            mmap64: next_symbol!("mmap64", Mmap64Fn),
            preadv: next_symbol!("preadv", PreadvFn),
            preadv64: next_symbol!("preadv64", Preadv64Fn),
            aio_read: lookup_next!("aio_read", AioReadFn),
        })
    }
}

impl GenuineOps for DlsymOps {
    unsafe fn open(
        &self,
        call: OpenCall,
        path: *const c_char,
        flags: c_int,
        mode: mode_t,
    ) -> c_int {
        let mode = c_uint::from(mode);
        match call {
            OpenCall::Open => (self.open)(path, flags, mode),
            OpenCall::Open64 => (self.open64)(path, flags, mode),
            OpenCall::OpenAt(dirfd) => (self.openat)(dirfd, path, flags, mode),
            OpenCall::OpenAt64(dirfd) => (self.openat64)(dirfd, path, flags, mode),
        }
    }

    unsafe fn read(&self, fd: c_int, buf: *mut c_void, count: size_t) -> ssize_t {
        (self.read)(fd, buf, count)
    }

    unsafe fn close(&self, fd: c_int) -> c_int {
        (self.close)(fd)
    }

    unsafe fn fcntl(&self, width: Width, fd: c_int, cmd: c_int, arg: c_ulong) -> c_int {
        let func = match width {
            Width::Large => self.fcntl64.unwrap_or(self.fcntl),
            Width::Native => self.fcntl,
        };
        func(fd, cmd, arg)
    }

    unsafe fn dup(&self, fd: c_int) -> c_int {
        (self.dup)(fd)
    }

    unsafe fn dup2(&self, fd: c_int, fd2: c_int) -> c_int {
        (self.dup2)(fd, fd2)
    }

    unsafe fn dup3(&self, fd: c_int, fd2: c_int, flags: c_int) -> c_int {
        (self.dup3)(fd, fd2, flags)
    }

    // The native offset started out as an off_t, so narrowing it back is lossless.
    #[allow(clippy::cast_possible_truncation, clippy::unnecessary_cast)]
    unsafe fn mmap(
        &self,
        width: Width,
        addr: *mut c_void,
        len: size_t,
        prot: c_int,
        flags: c_int,
        fd: c_int,
        offset: off64_t,
    ) -> *mut c_void {
        match width {
            Width::Native => (self.mmap)(addr, len, prot, flags, fd, offset as off_t),
            Width::Large => (self.mmap64)(addr, len, prot, flags, fd, offset),
        }
    }

    #[allow(clippy::cast_possible_truncation, clippy::unnecessary_cast)]
    unsafe fn preadv(
        &self,
        width: Width,
        fd: c_int,
        iov: *const iovec,
        iovcnt: c_int,
        offset: off64_t,
    ) -> ssize_t {
        match width {
            Width::Native => (self.preadv)(fd, iov, iovcnt, offset as off_t),
            Width::Large => (self.preadv64)(fd, iov, iovcnt, offset),
        }
    }

    unsafe fn aio_read(&self, cb: *mut aiocb) -> c_int {
        match self.aio_read {
            Some(func) => func(cb),
            None => {
                *libc::__errno_location() = libc::ENOSYS;
                -1
            }
        }
    }
}
