use crate::resolver::PathResolver;
use crate::store::{AttrChange, DirEntryInfo, Store};
use bytes::Bytes;
use fuse3::path::prelude::*;
use fuse3::path::reply::DirectoryEntryPlus;
use fuse3::{FileType, SetAttr};
use std::ffi::{OsStr, OsString};
use std::num::NonZeroU32;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

const ATTR_TTL: Duration = Duration::from_secs(1);
const MAX_WRITE: u32 = 128 * 1024;

pub fn make_child_path(parent: &OsStr, name: &OsStr) -> OsString {
    if parent == OsStr::new("/") {
        let mut composed = OsString::from("/");
        composed.push(name);
        composed
    } else {
        let mut composed = OsString::from(parent);
        composed.push(OsStr::new("/"));
        composed.push(name);
        composed
    }
}

/// Passthrough filesystem that serves a missing snapshot name from the latest
/// real snapshot.
///
/// Each path argument is resolved once per request. Data calls go through the
/// handle obtained at open time, so writes through a redirected name land in
/// the shared latest snapshot. Directory listings are never rewritten.
pub struct SnapshotFs<S> {
    resolver: PathResolver,
    store: S,
    max_write: NonZeroU32,
}

impl<S: Store> SnapshotFs<S> {
    pub fn new(resolver: PathResolver, store: S) -> Self {
        Self {
            resolver,
            store,
            max_write: NonZeroU32::new(MAX_WRITE).unwrap_or(NonZeroU32::MIN),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn resolve(&self, path: &OsStr) -> PathBuf {
        self.resolver.resolve(path)
    }

    pub fn stat_path(&self, path: &OsStr) -> fuse3::Result<FileAttr> {
        self.store.getattr(&self.resolve(path))
    }

    pub fn setattr_path(&self, path: &OsStr, change: &AttrChange) -> fuse3::Result<FileAttr> {
        let physical = self.resolve(path);
        self.store.setattr(&physical, change)?;
        self.store.getattr(&physical)
    }

    /// Absolute targets inside the backing directory come back relative to
    /// it, so links keep pointing into the mount.
    pub fn readlink_path(&self, path: &OsStr) -> fuse3::Result<Vec<u8>> {
        let target = self.store.readlink(&self.resolve(path))?;
        let absolute = Path::new(OsStr::from_bytes(&target));
        if absolute.is_absolute()
            && let Ok(inner) = absolute.strip_prefix(self.resolver.root())
            && !inner.as_os_str().is_empty()
        {
            return Ok(inner.as_os_str().as_bytes().to_vec());
        }
        Ok(target)
    }

    pub fn access_path(&self, path: &OsStr, mask: u32) -> fuse3::Result<()> {
        self.store.access(&self.resolve(path), mask)
    }

    pub fn symlink_at(
        &self,
        parent: &OsStr,
        name: &OsStr,
        target: &OsStr,
    ) -> fuse3::Result<FileAttr> {
        let physical = self.resolve(&make_child_path(parent, name));
        self.store.symlink(target, &physical)?;
        self.store.getattr(&physical)
    }

    pub fn mknod_at(
        &self,
        parent: &OsStr,
        name: &OsStr,
        mode: u32,
        rdev: u32,
    ) -> fuse3::Result<FileAttr> {
        let physical = self.resolve(&make_child_path(parent, name));
        self.store.mknod(&physical, mode, rdev)?;
        self.store.getattr(&physical)
    }

    pub fn mkdir_at(&self, parent: &OsStr, name: &OsStr, mode: u32) -> fuse3::Result<FileAttr> {
        let physical = self.resolve(&make_child_path(parent, name));
        self.store.mkdir(&physical, mode)?;
        self.store.getattr(&physical)
    }

    pub fn unlink_at(&self, parent: &OsStr, name: &OsStr) -> fuse3::Result<()> {
        self.store
            .unlink(&self.resolve(&make_child_path(parent, name)))
    }

    pub fn rmdir_at(&self, parent: &OsStr, name: &OsStr) -> fuse3::Result<()> {
        self.store.rmdir(&self.resolve(&make_child_path(parent, name)))
    }

    pub fn rename_entry(
        &self,
        origin_parent: &OsStr,
        origin_name: &OsStr,
        parent: &OsStr,
        name: &OsStr,
    ) -> fuse3::Result<()> {
        let from = self.resolve(&make_child_path(origin_parent, origin_name));
        let to = self.resolve(&make_child_path(parent, name));
        self.store.rename(&from, &to)
    }

    pub fn link_entry(
        &self,
        path: &OsStr,
        new_parent: &OsStr,
        new_name: &OsStr,
    ) -> fuse3::Result<FileAttr> {
        let target = self.resolve(path);
        let link = self.resolve(&make_child_path(new_parent, new_name));
        self.store.link(&target, &link)?;
        self.store.getattr(&link)
    }

    pub fn open_file(&self, path: &OsStr, flags: u32) -> fuse3::Result<u64> {
        self.store.open(&self.resolve(path), flags, 0)
    }

    pub fn create_file(
        &self,
        parent: &OsStr,
        name: &OsStr,
        mode: u32,
        flags: u32,
    ) -> fuse3::Result<(u64, FileAttr)> {
        let physical = self.resolve(&make_child_path(parent, name));
        let fh = self
            .store
            .open(&physical, flags | libc::O_CREAT as u32, mode)?;
        match self.store.getattr_handle(fh) {
            Ok(attr) => Ok((fh, attr)),
            Err(err) => {
                let _ = self.store.release(fh);
                Err(err)
            }
        }
    }

    pub fn open_dir(&self, path: &OsStr) -> fuse3::Result<u64> {
        self.store.opendir(&self.resolve(path))
    }

    pub fn list_dir(&self, fh: u64) -> fuse3::Result<Vec<DirEntryInfo>> {
        self.store.readdir(fh)
    }

    /// Directory stream for `readdir`: `.` and `..` first, then the real
    /// children. Entry offsets are 1-based and `offset` skips that many.
    pub fn dir_entries(&self, fh: u64, offset: u64) -> fuse3::Result<Vec<DirectoryEntry>> {
        let children = self.list_dir(fh)?;
        let mut entries = Vec::with_capacity(children.len() + 2);
        for name in [".", ".."] {
            entries.push(DirectoryEntry {
                kind: FileType::Directory,
                name: OsString::from(name),
                offset: entries.len() as i64 + 1,
            });
        }
        for child in children {
            entries.push(DirectoryEntry {
                kind: child.kind,
                name: child.name,
                offset: entries.len() as i64 + 1,
            });
        }
        Ok(entries.into_iter().skip(offset as usize).collect())
    }

    pub fn dir_entries_plus(
        &self,
        parent: &OsStr,
        fh: u64,
        offset: u64,
    ) -> fuse3::Result<Vec<DirectoryEntryPlus>> {
        let children = self.list_dir(fh)?;
        let dir_attr = self.stat_path(parent)?;
        let mut entries = Vec::with_capacity(children.len() + 2);
        for name in [".", ".."] {
            entries.push(DirectoryEntryPlus {
                kind: FileType::Directory,
                name: OsString::from(name),
                offset: entries.len() as i64 + 1,
                attr: dir_attr,
                entry_ttl: ATTR_TTL,
                attr_ttl: ATTR_TTL,
            });
        }
        for child in children {
            entries.push(DirectoryEntryPlus {
                kind: child.kind,
                name: child.name,
                offset: entries.len() as i64 + 1,
                attr: child.attr,
                entry_ttl: ATTR_TTL,
                attr_ttl: ATTR_TTL,
            });
        }
        Ok(entries.into_iter().skip(offset as usize).collect())
    }

    pub fn statfs_path(&self, path: &OsStr) -> fuse3::Result<ReplyStatFs> {
        self.store.statfs(&self.resolve(path))
    }
}

impl<S: Store> PathFilesystem for SnapshotFs<S> {
    async fn init(&self, _req: Request) -> Result<ReplyInit, fuse3::Errno> {
        tracing::info!(root = %self.resolver.root().display(), "snapshot filesystem initialised");
        Ok(ReplyInit {
            max_write: self.max_write,
        })
    }

    async fn destroy(&self, _req: Request) {
        tracing::info!("snapshot filesystem destroyed");
    }

    async fn lookup(
        &self,
        _req: Request,
        parent: &OsStr,
        name: &OsStr,
    ) -> Result<ReplyEntry, fuse3::Errno> {
        let attr = self.stat_path(&make_child_path(parent, name))?;
        Ok(ReplyEntry {
            ttl: ATTR_TTL,
            attr,
        })
    }

    async fn getattr(
        &self,
        _req: Request,
        path: Option<&OsStr>,
        fh: Option<u64>,
        _flags: u32,
    ) -> Result<ReplyAttr, fuse3::Errno> {
        if let Some(fh) = fh
            && let Ok(attr) = self.store.getattr_handle(fh)
        {
            return Ok(ReplyAttr {
                ttl: ATTR_TTL,
                attr,
            });
        }

        let path = path.ok_or_else(fuse3::Errno::new_not_exist)?;
        Ok(ReplyAttr {
            ttl: ATTR_TTL,
            attr: self.stat_path(path)?,
        })
    }

    async fn setattr(
        &self,
        _req: Request,
        path: Option<&OsStr>,
        _fh: Option<u64>,
        set_attr: SetAttr,
    ) -> Result<ReplyAttr, fuse3::Errno> {
        let path = path.ok_or_else(fuse3::Errno::new_not_exist)?;
        let attr = self.setattr_path(path, &AttrChange::from(&set_attr))?;
        Ok(ReplyAttr {
            ttl: ATTR_TTL,
            attr,
        })
    }

    async fn readlink(&self, _req: Request, path: &OsStr) -> Result<ReplyData, fuse3::Errno> {
        let target = self.readlink_path(path)?;
        Ok(Bytes::from(target).into())
    }

    async fn symlink(
        &self,
        _req: Request,
        parent: &OsStr,
        name: &OsStr,
        link_path: &OsStr,
    ) -> Result<ReplyEntry, fuse3::Errno> {
        let attr = self.symlink_at(parent, name, link_path)?;
        Ok(ReplyEntry {
            ttl: ATTR_TTL,
            attr,
        })
    }

    async fn mknod(
        &self,
        _req: Request,
        parent: &OsStr,
        name: &OsStr,
        mode: u32,
        rdev: u32,
    ) -> Result<ReplyEntry, fuse3::Errno> {
        let attr = self.mknod_at(parent, name, mode, rdev)?;
        Ok(ReplyEntry {
            ttl: ATTR_TTL,
            attr,
        })
    }

    async fn mkdir(
        &self,
        _req: Request,
        parent: &OsStr,
        name: &OsStr,
        mode: u32,
        _umask: u32,
    ) -> Result<ReplyEntry, fuse3::Errno> {
        let attr = self.mkdir_at(parent, name, mode)?;
        Ok(ReplyEntry {
            ttl: ATTR_TTL,
            attr,
        })
    }

    async fn unlink(
        &self,
        _req: Request,
        parent: &OsStr,
        name: &OsStr,
    ) -> Result<(), fuse3::Errno> {
        self.unlink_at(parent, name)
    }

    async fn rmdir(&self, _req: Request, parent: &OsStr, name: &OsStr) -> Result<(), fuse3::Errno> {
        self.rmdir_at(parent, name)
    }

    async fn rename(
        &self,
        _req: Request,
        origin_parent: &OsStr,
        origin_name: &OsStr,
        parent: &OsStr,
        name: &OsStr,
    ) -> Result<(), fuse3::Errno> {
        self.rename_entry(origin_parent, origin_name, parent, name)
    }

    async fn link(
        &self,
        _req: Request,
        path: &OsStr,
        new_parent: &OsStr,
        new_name: &OsStr,
    ) -> Result<ReplyEntry, fuse3::Errno> {
        let attr = self.link_entry(path, new_parent, new_name)?;
        Ok(ReplyEntry {
            ttl: ATTR_TTL,
            attr,
        })
    }

    async fn open(
        &self,
        _req: Request,
        path: &OsStr,
        flags: u32,
    ) -> Result<ReplyOpen, fuse3::Errno> {
        let fh = self.open_file(path, flags)?;
        Ok(ReplyOpen { fh, flags: 0 })
    }

    async fn read(
        &self,
        _req: Request,
        _path: Option<&OsStr>,
        fh: u64,
        offset: u64,
        size: u32,
    ) -> Result<ReplyData, fuse3::Errno> {
        let data = self.store.read(fh, offset, size)?;
        Ok(Bytes::from(data).into())
    }

    async fn write(
        &self,
        _req: Request,
        _path: Option<&OsStr>,
        fh: u64,
        offset: u64,
        data: &[u8],
        _write_flags: u32,
        _flags: u32,
    ) -> Result<ReplyWrite, fuse3::Errno> {
        let written = self.store.write(fh, offset, data)?;
        Ok(ReplyWrite { written })
    }

    async fn release(
        &self,
        _req: Request,
        _path: Option<&OsStr>,
        fh: u64,
        _flags: u32,
        _lock_owner: u64,
        _flush: bool,
    ) -> Result<(), fuse3::Errno> {
        self.store.release(fh)
    }

    async fn fsync(
        &self,
        _req: Request,
        _path: Option<&OsStr>,
        fh: u64,
        datasync: bool,
    ) -> Result<(), fuse3::Errno> {
        self.store.fsync(fh, datasync)
    }

    async fn flush(
        &self,
        _req: Request,
        _path: Option<&OsStr>,
        fh: u64,
        _lock_owner: u64,
    ) -> Result<(), fuse3::Errno> {
        self.store.flush(fh)
    }

    async fn access(&self, _req: Request, path: &OsStr, mask: u32) -> Result<(), fuse3::Errno> {
        self.access_path(path, mask)
    }

    async fn create(
        &self,
        _req: Request,
        parent: &OsStr,
        name: &OsStr,
        mode: u32,
        flags: u32,
    ) -> Result<ReplyCreated, fuse3::Errno> {
        let (fh, attr) = self.create_file(parent, name, mode, flags)?;
        Ok(ReplyCreated {
            ttl: ATTR_TTL,
            attr,
            generation: 0,
            fh,
            flags: 0,
        })
    }

    async fn opendir(
        &self,
        _req: Request,
        path: &OsStr,
        flags: u32,
    ) -> Result<ReplyOpen, fuse3::Errno> {
        let fh = self.open_dir(path)?;
        Ok(ReplyOpen { fh, flags })
    }

    type DirEntryStream<'a>
        = futures_util::stream::Iter<std::vec::IntoIter<fuse3::Result<DirectoryEntry>>>
    where
        Self: 'a;
    type DirEntryPlusStream<'a>
        = futures_util::stream::Iter<std::vec::IntoIter<fuse3::Result<DirectoryEntryPlus>>>
    where
        Self: 'a;

    async fn readdir<'a>(
        &'a self,
        _req: Request,
        _path: &'a OsStr,
        fh: u64,
        offset: i64,
    ) -> Result<ReplyDirectory<Self::DirEntryStream<'a>>, fuse3::Errno> {
        let entries = self.dir_entries(fh, offset.max(0) as u64)?;
        Ok(ReplyDirectory {
            entries: futures_util::stream::iter(entries.into_iter().map(Ok).collect::<Vec<_>>()),
        })
    }

    async fn readdirplus<'a>(
        &'a self,
        _req: Request,
        parent: &'a OsStr,
        fh: u64,
        offset: u64,
        _lock_owner: u64,
    ) -> Result<ReplyDirectoryPlus<Self::DirEntryPlusStream<'a>>, fuse3::Errno> {
        let entries = self.dir_entries_plus(parent, fh, offset)?;
        Ok(ReplyDirectoryPlus {
            entries: futures_util::stream::iter(entries.into_iter().map(Ok).collect::<Vec<_>>()),
        })
    }

    async fn releasedir(
        &self,
        _req: Request,
        _path: &OsStr,
        fh: u64,
        _flags: u32,
    ) -> Result<(), fuse3::Errno> {
        self.store.releasedir(fh)
    }

    async fn fsyncdir(
        &self,
        _req: Request,
        _path: &OsStr,
        fh: u64,
        datasync: bool,
    ) -> Result<(), fuse3::Errno> {
        self.store.fsyncdir(fh, datasync)
    }

    async fn statfs(&self, _req: Request, path: &OsStr) -> Result<ReplyStatFs, fuse3::Errno> {
        self.statfs_path(path)
    }
}
