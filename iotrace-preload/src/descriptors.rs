//! Fixed-capacity set of descriptors currently being traced

use iotrace_common::MAX_FILES_TRACED;
use libc::c_int;

use crate::error::InterceptError;

/// Unordered set of at most [`MAX_FILES_TRACED`] descriptors
///
/// Stored inline so that recording an open never allocates inside a hook.
pub struct TracedDescriptors {
    fds: [c_int; MAX_FILES_TRACED],
    len: usize,
}

impl TracedDescriptors {
    #[must_use]
    pub const fn new() -> Self {
        Self { fds: [-1; MAX_FILES_TRACED], len: 0 }
    }

    pub fn contains(&self, fd: c_int) -> bool {
        self.fds[..self.len].contains(&fd)
    }

    /// # Errors
    /// [`InterceptError::TooManyTracedFiles`] when the set is full.
    pub fn insert(&mut self, fd: c_int) -> Result<(), InterceptError> {
        if self.len == MAX_FILES_TRACED {
            return Err(InterceptError::TooManyTracedFiles);
        }
        self.fds[self.len] = fd;
        self.len += 1;
        Ok(())
    }

    /// Remove `fd` if present; the last entry takes its slot
    pub fn remove(&mut self, fd: c_int) -> bool {
        match self.fds[..self.len].iter().position(|&traced| traced == fd) {
            Some(idx) => {
                self.len -= 1;
                self.fds[idx] = self.fds[self.len];
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for TracedDescriptors {
    fn default() -> Self {
        Self::new()
    }
}
