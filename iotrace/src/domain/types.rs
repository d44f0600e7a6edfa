//! Newtype wrappers for domain primitives

use std::fmt;
use std::io;

/// An OS error number, as handed back to the filesystem framework
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Errno(pub libc::c_int);

impl Errno {
    pub const EBADF: Self = Self(libc::EBADF);
    pub const EINVAL: Self = Self(libc::EINVAL);
    pub const EIO: Self = Self(libc::EIO);
    pub const ENOENT: Self = Self(libc::ENOENT);

    #[must_use]
    pub const fn code(self) -> libc::c_int {
        self.0
    }
}

impl From<io::Error> for Errno {
    /// Errors without an OS code become `EIO`.
    fn from(err: io::Error) -> Self {
        err.raw_os_error().map_or(Self::EIO, Self)
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", io::Error::from_raw_os_error(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_from_os_error() {
        let err = io::Error::from_raw_os_error(libc::EACCES);
        assert_eq!(Errno::from(err), Errno(libc::EACCES));
    }

    #[test]
    fn test_errno_fallback_is_eio() {
        let err = io::Error::other("synthetic");
        assert_eq!(Errno::from(err), Errno::EIO);
    }
}
