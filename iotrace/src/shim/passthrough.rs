//! Passthrough file operations
//!
//! Every operation works on the real file behind a virtual path and reports
//! failures as the [`Errno`] the real call produced. Only reads of regular
//! files are instrumented: after each successful read, one
//! `"{offset} {count}\n"` line is appended to the file's access log.
//!
//! Handle tables sit behind their own mutexes and are held only to insert,
//! look up or remove an entry, so reads on different handles never wait on
//! each other's I/O.

use log::{debug, warn};
use std::collections::HashMap;
use std::ffi::OsString;
use std::fs::{self, File, Metadata, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::{FileExt, FileTypeExt, OpenOptionsExt};
use std::os::unix::io::{AsRawFd, IntoRawFd};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::PathMapper;
use crate::domain::Errno;

/// Permission bits of newly created access logs
pub const LOG_FILE_MODE: u32 = 0o644;

/// An open real file and its access log
struct OpenFile {
    file: File,
    log: File,
}

/// Kind of a directory entry, as reported by the real directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    RegularFile,
    Directory,
    Symlink,
    NamedPipe,
    CharDevice,
    BlockDevice,
    Socket,
}

impl EntryKind {
    pub fn from_file_type(ft: fs::FileType) -> Self {
        if ft.is_dir() {
            Self::Directory
        } else if ft.is_symlink() {
            Self::Symlink
        } else if ft.is_fifo() {
            Self::NamedPipe
        } else if ft.is_char_device() {
            Self::CharDevice
        } else if ft.is_block_device() {
            Self::BlockDevice
        } else if ft.is_socket() {
            Self::Socket
        } else {
            Self::RegularFile
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: OsString,
    pub kind: EntryKind,
}

pub struct Passthrough {
    paths: PathMapper,
    files: Mutex<HashMap<u64, Arc<OpenFile>>>,
    dirs: Mutex<HashMap<u64, Arc<[DirEntry]>>>,
    next_dir_handle: AtomicU64,
}

impl Passthrough {
    #[must_use]
    pub fn new(paths: PathMapper) -> Self {
        Self {
            paths,
            files: Mutex::new(HashMap::new()),
            dirs: Mutex::new(HashMap::new()),
            next_dir_handle: AtomicU64::new(1),
        }
    }

    pub fn paths(&self) -> &PathMapper {
        &self.paths
    }

    /// Metadata of the real path, without following a final symlink
    ///
    /// # Errors
    /// The `lstat` failure, typically `ENOENT` or `EACCES`.
    pub fn getattr(&self, vpath: &Path) -> Result<Metadata, Errno> {
        Ok(fs::symlink_metadata(self.paths.real_path(vpath))?)
    }

    /// # Errors
    /// The `readlink` failure, `EINVAL` when the entry is not a symlink.
    pub fn readlink(&self, vpath: &Path) -> Result<PathBuf, Errno> {
        Ok(fs::read_link(self.paths.real_path(vpath))?)
    }

    /// Open the real file with the caller's flags, together with its log.
    ///
    /// The returned handle is the real file's descriptor number.
    ///
    /// # Errors
    /// The real open's failure, or the log open's failure (in which case the
    /// real file is closed again).
    pub fn open(&self, vpath: &Path, flags: i32) -> Result<u64, Errno> {
        let real = self.paths.real_path(vpath);
        let file = open_with_flags(&real, flags)?;

        let log_path = self.paths.log_path(&real);
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .mode(LOG_FILE_MODE)
            .open(&log_path)
            .map_err(|e| {
                warn!("cannot open access log {}: {e}", log_path.display());
                Errno::from(e)
            })?;

        let fh = u64::try_from(file.as_raw_fd()).map_err(|_| Errno::EBADF)?;
        debug!("open {} as fh {fh}", real.display());
        self.lock_files().insert(fh, Arc::new(OpenFile { file, log }));
        Ok(fh)
    }

    /// Positioned read of up to `size` bytes, then one access-log line.
    ///
    /// The log line carries the count actually read. A failed log write is
    /// logged here and never changes the read's result.
    ///
    /// # Errors
    /// `EBADF` for an unknown handle, `EINVAL` for a negative offset, or the
    /// real read's failure.
    pub fn read(&self, fh: u64, offset: i64, size: u32) -> Result<Vec<u8>, Errno> {
        let open = self.lock_files().get(&fh).cloned().ok_or(Errno::EBADF)?;
        let position = u64::try_from(offset).map_err(|_| Errno::EINVAL)?;

        let mut buf = vec![0u8; size as usize];
        let count = open.file.read_at(&mut buf, position)?;
        buf.truncate(count);

        if let Err(e) = (&open.log).write_all(format!("{offset} {count}\n").as_bytes()) {
            warn!("failed to log read of fh {fh}: {e}");
        }
        Ok(buf)
    }

    /// Close the real file, then its log, and forget the handle.
    ///
    /// The result is that of closing the real file.
    ///
    /// # Errors
    /// `EBADF` for an unknown handle, or the real `close` failure.
    pub fn release(&self, fh: u64) -> Result<(), Errno> {
        let open = self.lock_files().remove(&fh).ok_or(Errno::EBADF)?;
        match Arc::try_unwrap(open) {
            Ok(OpenFile { file, log }) => {
                let result = close_file(file);
                drop(log);
                result
            }
            // A read still in flight holds its own reference; the files
            // close when it finishes.
            Err(_) => Ok(()),
        }
    }

    /// Snapshot the real directory's entries, including `.` and `..`.
    ///
    /// # Errors
    /// The real directory cannot be opened or listed.
    pub fn opendir(&self, vpath: &Path) -> Result<u64, Errno> {
        let mut entries = vec![
            DirEntry { name: OsString::from("."), kind: EntryKind::Directory },
            DirEntry { name: OsString::from(".."), kind: EntryKind::Directory },
        ];
        for entry in fs::read_dir(self.paths.real_path(vpath))? {
            let entry = entry?;
            let kind = EntryKind::from_file_type(entry.file_type()?);
            entries.push(DirEntry { name: entry.file_name(), kind });
        }

        let fh = self.next_dir_handle.fetch_add(1, Ordering::Relaxed);
        self.lock_dirs().insert(fh, entries.into());
        Ok(fh)
    }

    /// # Errors
    /// `EBADF` for an unknown handle.
    pub fn readdir(&self, fh: u64) -> Result<Arc<[DirEntry]>, Errno> {
        self.lock_dirs().get(&fh).cloned().ok_or(Errno::EBADF)
    }

    /// # Errors
    /// `EBADF` for an unknown handle.
    pub fn releasedir(&self, fh: u64) -> Result<(), Errno> {
        self.lock_dirs().remove(&fh).map(drop).ok_or(Errno::EBADF)
    }

    pub fn open_file_count(&self) -> usize {
        self.lock_files().len()
    }

    fn lock_files(&self) -> MutexGuard<'_, HashMap<u64, Arc<OpenFile>>> {
        self.files.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_dirs(&self) -> MutexGuard<'_, HashMap<u64, Arc<[DirEntry]>>> {
        self.dirs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// `close(2)` that reports its failure instead of ignoring it like `drop`
fn close_file(file: File) -> Result<(), Errno> {
    #[allow(unsafe_code)]
    // SAFETY: into_raw_fd transfers ownership, so the descriptor is closed
    // exactly once, here.
    let ret = unsafe { libc::close(file.into_raw_fd()) };
    if ret == 0 {
        Ok(())
    } else {
        Err(Errno::from(io::Error::last_os_error()))
    }
}

/// `open(2)` with raw flags, through `OpenOptions`
fn open_with_flags(path: &Path, flags: i32) -> io::Result<File> {
    let mut options = OpenOptions::new();
    match flags & libc::O_ACCMODE {
        libc::O_WRONLY => options.write(true),
        libc::O_RDWR => options.read(true).write(true),
        _ => options.read(true),
    };
    options.custom_flags(flags & !libc::O_ACCMODE).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    struct Fixture {
        phys: TempDir,
        logs: TempDir,
        shim: Passthrough,
    }

    fn fixture() -> Fixture {
        let phys = tempfile::tempdir().unwrap();
        let logs = tempfile::tempdir().unwrap();
        let mapper =
            PathMapper::new(phys.path().to_path_buf(), logs.path().to_path_buf()).unwrap();
        Fixture { phys, logs, shim: Passthrough::new(mapper) }
    }

    impl Fixture {
        fn log_of(&self, vpath: &str) -> String {
            let real = self.shim.paths().real_path(Path::new(vpath));
            fs::read_to_string(self.shim.paths().log_path(&real)).unwrap()
        }
    }

    #[test]
    fn test_getattr_reflects_real_file() {
        let fx = fixture();
        fs::write(fx.phys.path().join("a.dat"), vec![7u8; 1234]).unwrap();

        assert_eq!(fx.shim.getattr(Path::new("/a.dat")).unwrap().len(), 1234);
        assert!(fx.shim.getattr(Path::new("/")).unwrap().is_dir());
        assert_eq!(fx.shim.getattr(Path::new("/missing")).unwrap_err(), Errno::ENOENT);
    }

    #[test]
    fn test_getattr_does_not_follow_symlinks() {
        let fx = fixture();
        symlink("/nonexistent/target", fx.phys.path().join("link")).unwrap();

        assert!(fx.shim.getattr(Path::new("/link")).unwrap().file_type().is_symlink());
        assert_eq!(
            fx.shim.readlink(Path::new("/link")).unwrap(),
            PathBuf::from("/nonexistent/target")
        );
    }

    #[test]
    fn test_reads_match_real_content_and_are_logged() {
        let fx = fixture();
        let content: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        fs::create_dir(fx.phys.path().join("sub")).unwrap();
        fs::write(fx.phys.path().join("sub/data.bin"), &content).unwrap();

        let fh = fx.shim.open(Path::new("/sub/data.bin"), libc::O_RDONLY).unwrap();
        let calls = [(0i64, 100u32), (4096, 512), (9_900, 512), (20_000, 10)];
        for (offset, len) in calls {
            let got = fx.shim.read(fh, offset, len).unwrap();
            let start = usize::try_from(offset).unwrap().min(content.len());
            let end = (start + len as usize).min(content.len());
            assert_eq!(got, &content[start..end]);
        }
        fx.shim.release(fh).unwrap();

        assert_eq!(fx.log_of("/sub/data.bin"), "0 100\n4096 512\n9900 100\n20000 0\n");
    }

    #[test]
    fn test_log_is_appended_across_opens() {
        let fx = fixture();
        fs::write(fx.phys.path().join("f"), b"abcdef").unwrap();

        for _ in 0..2 {
            let fh = fx.shim.open(Path::new("/f"), libc::O_RDONLY).unwrap();
            fx.shim.read(fh, 2, 3).unwrap();
            fx.shim.release(fh).unwrap();
        }
        assert_eq!(fx.log_of("/f"), "2 3\n2 3\n");
    }

    #[test]
    fn test_log_file_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let fx = fixture();
        fs::write(fx.phys.path().join("f"), b"x").unwrap();
        let fh = fx.shim.open(Path::new("/f"), libc::O_RDONLY).unwrap();
        fx.shim.release(fh).unwrap();

        let real = fx.shim.paths().real_path(Path::new("/f"));
        let mode = fs::metadata(fx.shim.paths().log_path(&real)).unwrap().permissions().mode();
        // umask may only clear bits
        assert_eq!(mode & !LOG_FILE_MODE & 0o777, 0);
    }

    #[test]
    fn test_open_missing_file_fails_without_log() {
        let fx = fixture();
        assert_eq!(fx.shim.open(Path::new("/nope"), libc::O_RDONLY).unwrap_err(), Errno::ENOENT);
        assert_eq!(fs::read_dir(fx.logs.path()).unwrap().count(), 0);
        assert_eq!(fx.shim.open_file_count(), 0);
    }

    #[test]
    fn test_unwritable_log_root_fails_open() {
        let phys = tempfile::tempdir().unwrap();
        fs::write(phys.path().join("f"), b"x").unwrap();
        let mapper = PathMapper::new(
            phys.path().to_path_buf(),
            phys.path().join("no-such-log-dir"),
        )
        .unwrap();
        let shim = Passthrough::new(mapper);

        assert_eq!(shim.open(Path::new("/f"), libc::O_RDONLY).unwrap_err(), Errno::ENOENT);
        assert_eq!(shim.open_file_count(), 0);
    }

    #[test]
    fn test_write_flags_are_honoured() {
        let fx = fixture();
        fs::write(fx.phys.path().join("w"), b"old").unwrap();
        let fh = fx.shim.open(Path::new("/w"), libc::O_WRONLY | libc::O_TRUNC).unwrap();
        fx.shim.release(fh).unwrap();
        assert!(fs::read(fx.phys.path().join("w")).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_handles() {
        let fx = fixture();
        assert_eq!(fx.shim.read(999, 0, 1).unwrap_err(), Errno::EBADF);
        assert_eq!(fx.shim.release(999).unwrap_err(), Errno::EBADF);
        assert_eq!(fx.shim.readdir(999).unwrap_err(), Errno::EBADF);
        assert_eq!(fx.shim.releasedir(999).unwrap_err(), Errno::EBADF);
    }

    #[test]
    fn test_negative_offset_is_invalid() {
        let fx = fixture();
        fs::write(fx.phys.path().join("f"), b"x").unwrap();
        let fh = fx.shim.open(Path::new("/f"), libc::O_RDONLY).unwrap();
        assert_eq!(fx.shim.read(fh, -1, 1).unwrap_err(), Errno::EINVAL);
        fx.shim.release(fh).unwrap();
    }

    #[test]
    fn test_close_failure_is_reported() {
        use std::os::unix::io::FromRawFd;

        // Far above any descriptor limit, so never open
        #[allow(unsafe_code)]
        let bogus = unsafe { File::from_raw_fd(0x3fff_ffff) };
        assert_eq!(close_file(bogus).unwrap_err(), Errno::EBADF);
    }

    #[test]
    fn test_release_closes_and_forgets_handle() {
        let fx = fixture();
        fs::write(fx.phys.path().join("f"), b"abc").unwrap();
        let fh = fx.shim.open(Path::new("/f"), libc::O_RDONLY).unwrap();

        assert_eq!(fx.shim.release(fh), Ok(()));
        assert_eq!(fx.shim.open_file_count(), 0);
        assert_eq!(fx.shim.release(fh).unwrap_err(), Errno::EBADF);
    }

    #[test]
    fn test_directory_listing() {
        let fx = fixture();
        fs::write(fx.phys.path().join("file"), b"x").unwrap();
        fs::create_dir(fx.phys.path().join("dir")).unwrap();

        let fh = fx.shim.opendir(Path::new("/")).unwrap();
        let entries = fx.shim.readdir(fh).unwrap();
        let mut names: Vec<_> = entries.iter().map(|e| e.name.to_string_lossy().into_owned()).collect();
        names.sort();
        assert_eq!(names, [".", "..", "dir", "file"]);

        let dir = entries.iter().find(|e| e.name == "dir").unwrap();
        assert_eq!(dir.kind, EntryKind::Directory);
        let file = entries.iter().find(|e| e.name == "file").unwrap();
        assert_eq!(file.kind, EntryKind::RegularFile);

        fx.shim.releasedir(fh).unwrap();
        assert_eq!(fx.shim.readdir(fh).unwrap_err(), Errno::EBADF);
        assert_eq!(fs::read_dir(fx.logs.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_opendir_on_file_fails() {
        let fx = fixture();
        fs::write(fx.phys.path().join("file"), b"x").unwrap();
        assert_eq!(fx.shim.opendir(Path::new("/file")).unwrap_err(), Errno(libc::ENOTDIR));
    }

    #[test]
    fn test_concurrent_reads_on_separate_handles() {
        let fx = fixture();
        fs::write(fx.phys.path().join("a"), vec![1u8; 4096]).unwrap();
        fs::write(fx.phys.path().join("b"), vec![2u8; 4096]).unwrap();
        let shim = Arc::new(fx.shim);

        let workers: Vec<_> = ["/a", "/b"]
            .into_iter()
            .map(|vpath| {
                let shim = Arc::clone(&shim);
                std::thread::spawn(move || {
                    let fh = shim.open(Path::new(vpath), libc::O_RDONLY).unwrap();
                    for i in 0..16 {
                        assert_eq!(shim.read(fh, i * 256, 256).unwrap().len(), 256);
                    }
                    shim.release(fh).unwrap();
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        for vpath in ["/a", "/b"] {
            let real = shim.paths().real_path(Path::new(vpath));
            let log = fs::read_to_string(shim.paths().log_path(&real)).unwrap();
            let expected: String = (0..16).map(|i| format!("{} 256\n", i * 256)).collect();
            assert_eq!(log, expected);
        }
        assert_eq!(shim.open_file_count(), 0);
    }
}
