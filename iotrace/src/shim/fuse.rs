//! `fuser` binding for the passthrough
//!
//! The kernel addresses nodes by inode number; the passthrough works on
//! virtual paths. [`InodeTable`] hands out inode numbers on `lookup` and
//! remembers the path for each. Entries are never pruned.

// FUSE attribute fields are narrower than the stat fields they mirror
#![allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]

use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry,
    ReplyOpen, Request, FUSE_ROOT_ID,
};
use log::debug;
use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs::Metadata;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::passthrough::{EntryKind, Passthrough};

/// How long the kernel may cache attributes and entries
const TTL: Duration = Duration::from_secs(1);

/// Bidirectional inode ↔ virtual path map
pub struct InodeTable {
    paths: HashMap<u64, PathBuf>,
    inodes: HashMap<PathBuf, u64>,
    next: u64,
}

impl InodeTable {
    #[must_use]
    pub fn new() -> Self {
        let root = PathBuf::from("/");
        Self {
            paths: HashMap::from([(FUSE_ROOT_ID, root.clone())]),
            inodes: HashMap::from([(root, FUSE_ROOT_ID)]),
            next: FUSE_ROOT_ID + 1,
        }
    }

    pub fn path(&self, ino: u64) -> Option<&Path> {
        self.paths.get(&ino).map(PathBuf::as_path)
    }

    /// Inode for `vpath`, allocating one on first sight
    pub fn intern(&mut self, vpath: PathBuf) -> u64 {
        if let Some(&ino) = self.inodes.get(&vpath) {
            return ino;
        }
        let ino = self.next;
        self.next += 1;
        self.paths.insert(ino, vpath.clone());
        self.inodes.insert(vpath, ino);
        ino
    }

    /// Virtual path of `name` inside directory `parent`
    pub fn child(&self, parent: u64, name: &OsStr) -> Option<PathBuf> {
        let dir = self.path(parent)?;
        match name.as_bytes() {
            b"." => Some(dir.to_path_buf()),
            b".." => Some(dir.parent().unwrap_or(dir).to_path_buf()),
            _ => Some(dir.join(name)),
        }
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

/// The mounted filesystem
pub struct ShimFs {
    core: Passthrough,
    inodes: InodeTable,
}

impl ShimFs {
    #[must_use]
    pub fn new(core: Passthrough) -> Self {
        Self { core, inodes: InodeTable::new() }
    }
}

impl Filesystem for ShimFs {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(vpath) = self.inodes.child(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.core.getattr(&vpath) {
            Ok(meta) => {
                let ino = self.inodes.intern(vpath);
                reply.entry(&TTL, &file_attr(ino, &meta), 0);
            }
            Err(errno) => reply.error(errno.code()),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        let Some(vpath) = self.inodes.path(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.core.getattr(vpath) {
            Ok(meta) => reply.attr(&TTL, &file_attr(ino, &meta)),
            Err(errno) => reply.error(errno.code()),
        }
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        let Some(vpath) = self.inodes.path(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.core.readlink(vpath) {
            Ok(target) => reply.data(target.as_os_str().as_bytes()),
            Err(errno) => reply.error(errno.code()),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let Some(vpath) = self.inodes.path(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.core.open(vpath, flags) {
            Ok(fh) => reply.opened(fh, 0),
            Err(errno) => reply.error(errno.code()),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        match self.core.read(fh, offset, size) {
            Ok(data) => reply.data(&data),
            Err(errno) => reply.error(errno.code()),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        match self.core.release(fh) {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno.code()),
        }
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        let Some(vpath) = self.inodes.path(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.core.opendir(vpath) {
            Ok(fh) => reply.opened(fh, 0),
            Err(errno) => reply.error(errno.code()),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let entries = match self.core.readdir(fh) {
            Ok(entries) => entries,
            Err(errno) => {
                reply.error(errno.code());
                return;
            }
        };
        let skip = usize::try_from(offset).unwrap_or(0);
        for (idx, entry) in entries.iter().enumerate().skip(skip) {
            let entry_ino = self
                .inodes
                .child(ino, &entry.name)
                .map_or(ino, |vpath| self.inodes.intern(vpath));
            // The offset handed back is where the next call resumes.
            if reply.add(entry_ino, (idx + 1) as i64, file_type(entry.kind), &entry.name) {
                break;
            }
        }
        reply.ok();
    }

    fn releasedir(&mut self, _req: &Request<'_>, _ino: u64, fh: u64, _flags: i32, reply: ReplyEmpty) {
        match self.core.releasedir(fh) {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno.code()),
        }
    }

    fn destroy(&mut self) {
        debug!("unmounted, {} files still open", self.core.open_file_count());
    }
}

fn file_type(kind: EntryKind) -> FileType {
    match kind {
        EntryKind::RegularFile => FileType::RegularFile,
        EntryKind::Directory => FileType::Directory,
        EntryKind::Symlink => FileType::Symlink,
        EntryKind::NamedPipe => FileType::NamedPipe,
        EntryKind::CharDevice => FileType::CharDevice,
        EntryKind::BlockDevice => FileType::BlockDevice,
        EntryKind::Socket => FileType::Socket,
    }
}

fn timestamp(secs: i64, nsecs: i64) -> SystemTime {
    let nanos = Duration::from_nanos(nsecs as u64);
    if secs >= 0 {
        UNIX_EPOCH + Duration::from_secs(secs as u64) + nanos
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs()) + nanos
    }
}

/// FUSE attributes for `ino`, copied from the real file's metadata
pub fn file_attr(ino: u64, meta: &Metadata) -> FileAttr {
    FileAttr {
        ino,
        size: meta.size(),
        blocks: meta.blocks(),
        atime: timestamp(meta.atime(), meta.atime_nsec()),
        mtime: timestamp(meta.mtime(), meta.mtime_nsec()),
        ctime: timestamp(meta.ctime(), meta.ctime_nsec()),
        crtime: meta.created().unwrap_or(UNIX_EPOCH),
        kind: file_type(EntryKind::from_file_type(meta.file_type())),
        perm: (meta.mode() & 0o7777) as u16,
        nlink: meta.nlink() as u32,
        uid: meta.uid(),
        gid: meta.gid(),
        rdev: meta.rdev() as u32,
        blksize: meta.blksize() as u32,
        flags: 0,
    }
}
