//! Basename filter deciding which opens are traced

use iotrace_common::FILENAME_ENV;
use std::os::unix::ffi::OsStringExt;

/// Exact, case-sensitive match on the final path component
///
/// Compared as raw bytes: the path is whatever the program passed to open,
/// not necessarily UTF-8.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TraceFilter {
    pattern: Option<Vec<u8>>,
}

impl TraceFilter {
    /// Trace every successful open
    #[must_use]
    pub fn all() -> Self {
        Self { pattern: None }
    }

    /// Trace opens whose basename equals `name`
    pub fn basename(name: impl Into<Vec<u8>>) -> Self {
        Self { pattern: Some(name.into()) }
    }

    /// Read the filter from [`FILENAME_ENV`]; unset means trace all
    #[must_use]
    pub fn from_env() -> Self {
        Self { pattern: std::env::var_os(FILENAME_ENV).map(OsStringExt::into_vec) }
    }

    pub fn pattern(&self) -> Option<&[u8]> {
        self.pattern.as_deref()
    }

    /// An empty path never matches.
    pub fn matches(&self, path: &[u8]) -> bool {
        if path.is_empty() {
            return false;
        }
        match &self.pattern {
            None => true,
            Some(pattern) => basename(path) == pattern.as_slice(),
        }
    }
}

fn basename(path: &[u8]) -> &[u8] {
    path.rsplit(|&b| b == b'/').next().unwrap_or(path)
}
