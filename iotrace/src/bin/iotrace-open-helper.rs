//! Test helper binary for preload scenarios.
//!
//! Opens each file named on the command line, reads it to the end and closes
//! it again, in order. Run it under `LD_PRELOAD` to produce a known sequence
//! of open/read/close calls. With `--clone`, each file is duplicated with
//! `File::try_clone` (an `fcntl(F_DUPFD_CLOEXEC)`) before it is read.
//!
//! Usage:
//!   iotrace-open-helper [--clone] <file>...

use std::env;
use std::fs::File;
use std::io::Read;
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut files: Vec<String> = env::args().skip(1).collect();
    let clone = files.first().is_some_and(|arg| arg == "--clone");
    if clone {
        files.remove(0);
    }
    if files.is_empty() {
        eprintln!("usage: iotrace-open-helper [--clone] <file>...");
        return ExitCode::from(2);
    }

    for path in &files {
        let result = File::open(path).and_then(|file| {
            let mut file = if clone { file.try_clone()? } else { file };
            let mut contents = Vec::new();
            file.read_to_end(&mut contents)
        });
        match result {
            Ok(bytes) => println!("{path}: {bytes} bytes"),
            Err(e) => {
                eprintln!("{path}: {e}");
                return ExitCode::FAILURE;
            }
        }
    }
    ExitCode::SUCCESS
}
