//! End-to-end test: capture plus a program running under the preload library.
//!
//! The interceptor is built with cargo into its own target directory before
//! the scenario runs, unless `IOTRACE_PRELOAD_LIB` names an existing build.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

const CAPTURE: &str = env!("CARGO_BIN_EXE_iotrace-capture");
const HELPER: &str = env!("CARGO_BIN_EXE_iotrace-open-helper");
const TIMEOUT: Duration = Duration::from_secs(20);

/// Get the path to the preload library, building it on first use.
///
/// A separate target directory keeps the nested cargo off the lock held by
/// the outer `cargo test`.
fn get_preload_path() -> &'static Path {
    static PRELOAD: OnceLock<PathBuf> = OnceLock::new();
    PRELOAD.get_or_init(|| {
        if let Some(path) = std::env::var_os("IOTRACE_PRELOAD_LIB") {
            return PathBuf::from(path);
        }

        let workspace = Path::new(env!("CARGO_MANIFEST_DIR")).parent().unwrap();
        let target_dir = std::env::var_os("CARGO_TARGET_DIR")
            .map_or_else(|| workspace.join("target"), PathBuf::from)
            .join("preload-e2e");
        let status = Command::new(env!("CARGO"))
            .arg("build")
            .arg("--package")
            .arg("iotrace-preload")
            .arg("--manifest-path")
            .arg(workspace.join("Cargo.toml"))
            .arg("--target-dir")
            .arg(&target_dir)
            .env_remove("CARGO_TARGET_DIR")
            .env_remove("CARGO_BUILD_TARGET")
            .status()
            .expect("failed to run cargo");
        assert!(status.success(), "building iotrace-preload failed with {status}");

        target_dir.join("debug").join("libiotrace_preload.so")
    })
}

fn wait_bounded(child: &mut Child, what: &str) -> ExitStatus {
    let deadline = Instant::now() + TIMEOUT;
    loop {
        if let Some(status) = child.try_wait().unwrap() {
            return status;
        }
        if Instant::now() > deadline {
            child.kill().ok();
            panic!("{what} did not exit within {TIMEOUT:?}");
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

fn wait_for_fifo(path: &Path) {
    use std::os::unix::fs::FileTypeExt;

    let deadline = Instant::now() + TIMEOUT;
    while !std::fs::symlink_metadata(path).is_ok_and(|m| m.file_type().is_fifo()) {
        assert!(Instant::now() < deadline, "fanout {} never appeared", path.display());
        std::thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn test_only_matching_open_is_reported() {
    let preload = get_preload_path();
    assert!(preload.exists(), "preload library missing at {}", preload.display());

    let dir = tempfile::tempdir().unwrap();
    let fanout = dir.path().join("fanout");
    let data = dir.path().join("data.bin");
    let other = dir.path().join("other.bin");
    std::fs::write(&data, vec![0xabu8; 4096]).unwrap();
    std::fs::write(&other, vec![0xcdu8; 128]).unwrap();

    let mut capture = Command::new(CAPTURE)
        .arg("--fanout")
        .arg(&fanout)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to start iotrace-capture");
    wait_for_fifo(&fanout);

    let mut helper = Command::new(HELPER)
        .arg(&data)
        .arg(&other)
        .env("LD_PRELOAD", preload)
        .env("IOTRACE_FANOUT", &fanout)
        .env("IOTRACE_FILENAME", "data.bin")
        .stdout(Stdio::null())
        .spawn()
        .expect("failed to start iotrace-open-helper");
    let helper_status = wait_bounded(&mut helper, "iotrace-open-helper");
    assert!(helper_status.success(), "helper exited with {helper_status}");

    let capture_status = wait_bounded(&mut capture, "iotrace-capture");
    assert!(capture_status.success(), "capture exited with {capture_status}");

    let mut report = String::new();
    capture.stdout.take().unwrap().read_to_string(&mut report).unwrap();
    assert_eq!(report.matches("file was opened").count(), 1, "report:\n{report}");
    assert_eq!(report.matches("unknown operation").count(), 0, "report:\n{report}");
    assert!(std::fs::symlink_metadata(&fanout).is_err(), "fanout left behind");
}

#[test]
fn test_duplicating_traced_file_aborts_program() {
    use std::os::unix::process::ExitStatusExt;

    let preload = get_preload_path();
    let dir = tempfile::tempdir().unwrap();
    let fanout = dir.path().join("fanout");
    let data = dir.path().join("data.bin");
    std::fs::write(&data, b"payload").unwrap();

    let mut capture = Command::new(CAPTURE)
        .arg("--fanout")
        .arg(&fanout)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to start iotrace-capture");
    wait_for_fifo(&fanout);

    let mut helper = Command::new(HELPER)
        .arg("--clone")
        .arg(&data)
        .env("LD_PRELOAD", preload)
        .env("IOTRACE_FANOUT", &fanout)
        .env("IOTRACE_FILENAME", "data.bin")
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to start iotrace-open-helper");
    let helper_status = wait_bounded(&mut helper, "iotrace-open-helper");
    assert_eq!(helper_status.signal(), Some(libc::SIGABRT), "helper exited with {helper_status}");

    let mut stderr = String::new();
    helper.stderr.take().unwrap().read_to_string(&mut stderr).unwrap();
    assert!(stderr.contains("fcntl(F_DUPFD) on traced descriptor"), "stderr:\n{stderr}");

    assert!(wait_bounded(&mut capture, "iotrace-capture").success());
    let mut report = String::new();
    capture.stdout.take().unwrap().read_to_string(&mut report).unwrap();
    assert_eq!(report.matches("file was opened").count(), 1, "report:\n{report}");
}
