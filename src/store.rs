//! Backing storage seen by the mount after path resolution.
//!
//! Every path handed to a [`Store`] is already physical: redirection has
//! happened in [`crate::resolver`] and stores never see logical names.

use fuse3::path::reply::{FileAttr, ReplyStatFs};
use fuse3::{FileType, SetAttr};
use nix::sys::time::TimeSpec;
use std::ffi::{OsStr, OsString};
use std::path::Path;

#[derive(Debug, Clone)]
pub struct DirEntryInfo {
    pub name: OsString,
    pub kind: FileType,
    pub attr: FileAttr,
}

/// Attribute changes requested by a `setattr`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AttrChange {
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub size: Option<u64>,
    pub atime: Option<TimeSpec>,
    pub mtime: Option<TimeSpec>,
}

impl AttrChange {
    pub fn touches_times(&self) -> bool {
        self.atime.is_some() || self.mtime.is_some()
    }
}

impl From<&SetAttr> for AttrChange {
    fn from(set_attr: &SetAttr) -> Self {
        Self {
            mode: set_attr.mode,
            uid: set_attr.uid,
            gid: set_attr.gid,
            size: set_attr.size,
            atime: set_attr.atime.map(|t| TimeSpec::new(t.sec, t.nsec as _)),
            mtime: set_attr.mtime.map(|t| TimeSpec::new(t.sec, t.nsec as _)),
        }
    }
}

pub trait Store: Send + Sync + 'static {
    /// lstat: a symlink reports itself.
    fn getattr(&self, path: &Path) -> fuse3::Result<FileAttr>;
    fn getattr_handle(&self, fh: u64) -> fuse3::Result<FileAttr>;
    fn setattr(&self, path: &Path, change: &AttrChange) -> fuse3::Result<()>;
    fn readlink(&self, path: &Path) -> fuse3::Result<Vec<u8>>;
    fn access(&self, path: &Path, mask: u32) -> fuse3::Result<()>;

    fn symlink(&self, target: &OsStr, link: &Path) -> fuse3::Result<()>;
    fn mknod(&self, path: &Path, mode: u32, rdev: u32) -> fuse3::Result<()>;
    fn mkdir(&self, path: &Path, mode: u32) -> fuse3::Result<()>;
    fn unlink(&self, path: &Path) -> fuse3::Result<()>;
    fn rmdir(&self, path: &Path) -> fuse3::Result<()>;
    fn rename(&self, from: &Path, to: &Path) -> fuse3::Result<()>;
    fn link(&self, target: &Path, link: &Path) -> fuse3::Result<()>;

    /// Opens (or with `O_CREAT` in `flags`, creates) a file and returns a handle id.
    fn open(&self, path: &Path, flags: u32, mode: u32) -> fuse3::Result<u64>;
    fn read(&self, fh: u64, offset: u64, size: u32) -> fuse3::Result<Vec<u8>>;
    fn write(&self, fh: u64, offset: u64, data: &[u8]) -> fuse3::Result<u32>;
    fn flush(&self, fh: u64) -> fuse3::Result<()>;
    fn fsync(&self, fh: u64, datasync: bool) -> fuse3::Result<()>;
    fn release(&self, fh: u64) -> fuse3::Result<()>;

    fn opendir(&self, path: &Path) -> fuse3::Result<u64>;
    /// Children of an open directory, excluding `.` and `..`.
    fn readdir(&self, fh: u64) -> fuse3::Result<Vec<DirEntryInfo>>;
    fn fsyncdir(&self, fh: u64, datasync: bool) -> fuse3::Result<()>;
    fn releasedir(&self, fh: u64) -> fuse3::Result<()>;

    fn statfs(&self, path: &Path) -> fuse3::Result<ReplyStatFs>;
}
