//! CLI argument definitions

use clap::Parser;
use iotrace_common::{DEFAULT_FANOUT, FANOUT_ENV};
use std::path::PathBuf;

use crate::shim::{LOG_PATH_ENV, PHYS_PATH_ENV};

#[derive(Parser, Debug)]
#[command(
    name = "iotrace-capture",
    about = "Print the file opens reported by preloaded processes",
    after_help = "\
EXAMPLES:
    iotrace-capture                              Listen on ./iotrace.fanout
    iotrace-capture --fanout /tmp/run1.fanout    Listen on a session-specific FIFO
    iotrace-capture -q -o frames.bin             Save raw frames, print only the summary

Then, in another shell:
    IOTRACE_FILENAME=data.bin LD_PRELOAD=libiotrace_preload.so ./program"
)]
pub struct CaptureArgs {
    /// Named FIFO to create and read frames from
    #[arg(long, env = FANOUT_ENV, default_value = DEFAULT_FANOUT, value_name = "PATH")]
    pub fanout: PathBuf,

    /// Save every received frame, byte for byte, to FILE
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Do not print a line per frame
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(Parser, Debug)]
#[command(
    name = "iotrace-fuse",
    about = "Mirror a directory tree and log every byte range read from it",
    after_help = "\
EXAMPLES:
    FF_PHYS_PATH=/data FF_LOG_PATH=/tmp/logs iotrace-fuse /mnt/traced
    iotrace-fuse --phys-path /data --log-path /tmp/logs /mnt/traced

Each file read through the mount appends \"<offset> <bytes>\" lines to
<log-path>/<real path with '/' replaced by '-'>. Stop with Ctrl-C."
)]
pub struct FuseArgs {
    /// Empty directory where the mirrored tree appears
    #[arg(value_name = "MOUNTPOINT")]
    pub mountpoint: PathBuf,

    /// Absolute path of the real tree to reflect
    #[arg(long, env = PHYS_PATH_ENV, value_name = "DIR")]
    pub phys_path: Option<PathBuf>,

    /// Absolute directory that receives the per-file access logs
    #[arg(long, env = LOG_PATH_ENV, value_name = "DIR")]
    pub log_path: Option<PathBuf>,

    /// Let users other than the mounting one access the mount
    #[arg(long)]
    pub allow_other: bool,
}
