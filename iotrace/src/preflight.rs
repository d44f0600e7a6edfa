//! Pre-flight checks for iotrace
//!
//! Validates system requirements before mounting or creating the fanout.
//! Provides clear, actionable error messages when requirements aren't met.

use anyhow::{bail, Context, Result};
use log::warn;
use std::ffi::OsStr;
use std::path::Path;

use crate::shim::{PathMapper, LOG_PATH_ENV, PHYS_PATH_ENV};

/// Device node the kernel exposes FUSE through
const FUSE_DEVICE: &str = "/dev/fuse";

/// Helpers able to perform an unprivileged FUSE mount
const FUSERMOUNT_BINARIES: [&str; 2] = ["fusermount3", "fusermount"];

/// Run all pre-flight checks before mounting the shim
pub fn run_fuse_preflight(paths: &PathMapper, mountpoint: &Path) -> Result<()> {
    check_fuse_device()?;
    check_fusermount()?;
    check_directory(PHYS_PATH_ENV, paths.phys_root())?;
    check_directory(LOG_PATH_ENV, paths.log_root())?;
    check_mountpoint(mountpoint)?;
    Ok(())
}

fn check_fuse_device() -> Result<()> {
    if Path::new(FUSE_DEVICE).exists() {
        return Ok(());
    }
    bail!(
        "FUSE is not available: {FUSE_DEVICE} not found.\n\n\
         Load the module with: sudo modprobe fuse"
    );
}

fn check_fusermount() -> Result<()> {
    #[allow(unsafe_code)]
    // SAFETY: geteuid has no preconditions and cannot fail.
    let euid = unsafe { libc::geteuid() };
    check_fusermount_in(&std::env::var_os("PATH").unwrap_or_default(), euid)
}

/// Unprivileged mounts go through fusermount; root mounts directly, so for
/// root a missing helper is only worth a warning.
fn check_fusermount_in(path: &OsStr, euid: libc::uid_t) -> Result<()> {
    let found = std::env::split_paths(path)
        .any(|dir| FUSERMOUNT_BINARIES.iter().any(|bin| dir.join(bin).is_file()));
    if found {
        return Ok(());
    }
    if euid == 0 {
        warn!("Neither fusermount3 nor fusermount found in PATH; mounting directly as root");
        return Ok(());
    }
    bail!(
        "Neither fusermount3 nor fusermount found in PATH.\n\n\
         Install the fuse3 package (e.g. sudo apt install fuse3) or run as root"
    );
}

/// Check that `path` (configured through `name`) is an existing directory
pub fn check_directory(name: &str, path: &Path) -> Result<()> {
    let meta = std::fs::metadata(path)
        .with_context(|| format!("{name} points to {}, which cannot be accessed", path.display()))?;
    if !meta.is_dir() {
        bail!("{name} points to {}, which is not a directory", path.display());
    }
    Ok(())
}

/// The mountpoint must be a directory; a non-empty one is hidden while mounted
pub fn check_mountpoint(mountpoint: &Path) -> Result<()> {
    check_directory("Mountpoint", mountpoint)?;
    let mut entries = std::fs::read_dir(mountpoint)
        .with_context(|| format!("Failed to list mountpoint {}", mountpoint.display()))?;
    if entries.next().is_some() {
        warn!("{} is not empty; its contents are hidden while mounted", mountpoint.display());
    }
    Ok(())
}

/// The fanout's directory must exist before the FIFO can be created there
pub fn check_fanout_parent(fanout: &Path) -> Result<()> {
    match fanout.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            check_directory("Fanout directory", parent)
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_accepted() {
        let dir = tempfile::tempdir().unwrap();
        assert!(check_directory(PHYS_PATH_ENV, dir.path()).is_ok());
    }

    #[test]
    fn test_missing_directory_names_setting() {
        let dir = tempfile::tempdir().unwrap();
        let err = check_directory(PHYS_PATH_ENV, &dir.path().join("gone")).unwrap_err();
        assert!(err.to_string().contains(PHYS_PATH_ENV));
    }

    #[test]
    fn test_file_is_not_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        std::fs::write(&file, b"x").unwrap();
        let err = check_directory(LOG_PATH_ENV, &file).unwrap_err();
        assert!(err.to_string().contains("not a directory"));
    }

    #[test]
    fn test_non_empty_mountpoint_is_allowed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f"), b"x").unwrap();
        assert!(check_mountpoint(dir.path()).is_ok());
    }

    #[test]
    fn test_fusermount_found_in_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("fusermount3"), b"").unwrap();
        assert!(check_fusermount_in(dir.path().as_os_str(), 1000).is_ok());
    }

    #[test]
    fn test_missing_fusermount_only_blocks_unprivileged_users() {
        let empty = tempfile::tempdir().unwrap();
        let path = empty.path().as_os_str();
        assert!(check_fusermount_in(path, 0).is_ok());
        let err = check_fusermount_in(path, 1000).unwrap_err();
        assert!(err.to_string().contains("fusermount"));
    }

    #[test]
    fn test_fanout_parent() {
        let dir = tempfile::tempdir().unwrap();
        assert!(check_fanout_parent(Path::new("iotrace.fanout")).is_ok());
        assert!(check_fanout_parent(&dir.path().join("fanout")).is_ok());
        assert!(check_fanout_parent(&dir.path().join("missing/fanout")).is_err());
    }
}
