use std::ffi::OsString;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};

use super::{LOG_PATH_ENV, PHYS_PATH_ENV};
use crate::domain::ShimError;

/// Stateless rewrite of virtual paths onto the physical tree and the log root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMapper {
    phys_root: PathBuf,
    log_root: PathBuf,
}

impl PathMapper {
    /// # Errors
    /// Either root is relative or empty.
    pub fn new(phys_root: PathBuf, log_root: PathBuf) -> Result<Self, ShimError> {
        if !phys_root.is_absolute() {
            return Err(ShimError::RelativePath { name: PHYS_PATH_ENV, path: phys_root });
        }
        if !log_root.is_absolute() {
            return Err(ShimError::RelativePath { name: LOG_PATH_ENV, path: log_root });
        }
        Ok(Self { phys_root, log_root })
    }

    pub fn phys_root(&self) -> &Path {
        &self.phys_root
    }

    pub fn log_root(&self) -> &Path {
        &self.log_root
    }

    /// `phys_root + vpath`, by plain concatenation
    ///
    /// `vpath` is the absolute path inside the mount, e.g. `/a/b.dat`.
    pub fn real_path(&self, vpath: &Path) -> PathBuf {
        let mut real = OsString::from(self.phys_root.as_os_str());
        real.push(vpath.as_os_str());
        PathBuf::from(real)
    }

    /// `log_root + "/" + real_path` with every `/` turned into `-`
    pub fn log_path(&self, real_path: &Path) -> PathBuf {
        let flattened: Vec<u8> = real_path
            .as_os_str()
            .as_bytes()
            .iter()
            .map(|&b| if b == b'/' { b'-' } else { b })
            .collect();
        self.log_root.join(OsString::from_vec(flattened))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapper() -> PathMapper {
        PathMapper::new(PathBuf::from("/data/phys"), PathBuf::from("/var/log/ff")).unwrap()
    }

    #[test]
    fn test_real_path_concatenates() {
        let m = mapper();
        assert_eq!(m.real_path(Path::new("/a/b.dat")), PathBuf::from("/data/phys/a/b.dat"));
        assert_eq!(m.real_path(Path::new("/")), PathBuf::from("/data/phys/"));
    }

    #[test]
    fn test_log_path_flattens_separators() {
        let m = mapper();
        let real = m.real_path(Path::new("/a/b.dat"));
        assert_eq!(m.log_path(&real), PathBuf::from("/var/log/ff/-data-phys-a-b.dat"));
    }

    #[test]
    fn test_distinct_files_get_distinct_logs() {
        let m = mapper();
        let one = m.log_path(&m.real_path(Path::new("/x/y")));
        let two = m.log_path(&m.real_path(Path::new("/x/z")));
        assert_ne!(one, two);
    }

    #[test]
    fn test_relative_roots_rejected() {
        assert!(matches!(
            PathMapper::new(PathBuf::from("data"), PathBuf::from("/logs")),
            Err(ShimError::RelativePath { name: PHYS_PATH_ENV, .. })
        ));
        assert!(matches!(
            PathMapper::new(PathBuf::from("/data"), PathBuf::new()),
            Err(ShimError::RelativePath { name: LOG_PATH_ENV, .. })
        ));
    }
}
