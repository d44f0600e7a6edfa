//! Failures the interceptor cannot recover from
//!
//! Every variant ends in a process abort: tracing is configured as
//! mandatory, so running on untraced would silently produce a wrong capture.

use iotrace_common::MAX_FILES_TRACED;
use libc::c_int;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InterceptError {
    #[error("cannot resolve genuine `{0}`")]
    SymbolNotFound(&'static str),

    #[error("cannot open transport {}: {source}", path.display())]
    Transport {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("more than {MAX_FILES_TRACED} traced files open at once")]
    TooManyTracedFiles,

    #[error("failed to send frame: {0}")]
    Send(#[source] io::Error),

    /// The call would let a traced descriptor live on outside the traced set
    #[error("{call} on traced descriptor {fd} is unsupported")]
    Unsupported { call: &'static str, fd: c_int },
}
