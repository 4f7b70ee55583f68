use crate::config::Config;
use crate::handle_table::HandleTable;
use crate::store::{AttrChange, DirEntryInfo, Store};
use crate::util::{
    access_mask_from_bits, errno_from_nix, file_attr_from_stat, file_type_from_mode,
    oflag_from_bits, retry_eintr,
};
use fuse3::path::reply::{FileAttr, ReplyStatFs};
use nix::dir::Dir;
use nix::fcntl::{AtFlags, OFlag, openat, readlinkat, renameat};
use nix::sys::stat::{
    FchmodatFlags, Mode, SFlag, UtimensatFlags, fchmodat, fstat, fstatat, mkdirat, mknodat,
    utimensat,
};
use nix::sys::statvfs::statvfs;
use nix::sys::time::TimeSpec;
use nix::sys::uio::{pread, pwrite};
use nix::unistd::{
    Gid, Uid, UnlinkatFlags, faccessat, fchownat, fdatasync, fsync, ftruncate, linkat, symlinkat,
    unlinkat,
};
use std::ffi::OsStr;
use std::os::fd::BorrowedFd;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::Path;
use std::sync::Arc;

/// [`Store`] over the real filesystem.
///
/// Calls are issued relative to the held backend fd; resolved paths are
/// absolute so the fd only pins the backing directory.
#[derive(Debug)]
pub struct DiskStore {
    config: Arc<Config>,
    handles: HandleTable,
}

impl DiskStore {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            handles: HandleTable::new(),
        }
    }

    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    fn base(&self) -> BorrowedFd<'_> {
        self.config.backend_fd()
    }

    fn apply_times(&self, path: &Path, change: &AttrChange) -> fuse3::Result<()> {
        if !change.touches_times() {
            return Ok(());
        }
        let atime = change.atime.unwrap_or(TimeSpec::UTIME_OMIT);
        let mtime = change.mtime.unwrap_or(TimeSpec::UTIME_OMIT);
        utimensat(
            self.base(),
            path,
            &atime,
            &mtime,
            UtimensatFlags::NoFollowSymlink,
        )
        .map_err(errno_from_nix)
    }
}

impl Store for DiskStore {
    fn getattr(&self, path: &Path) -> fuse3::Result<FileAttr> {
        let stat = fstatat(self.base(), path, AtFlags::AT_SYMLINK_NOFOLLOW)
            .map_err(errno_from_nix)?;
        Ok(file_attr_from_stat(&stat))
    }

    fn getattr_handle(&self, fh: u64) -> fuse3::Result<FileAttr> {
        let handle = self.handles.file(fh)?;
        let stat = fstat(handle.as_fd()).map_err(errno_from_nix)?;
        Ok(file_attr_from_stat(&stat))
    }

    fn setattr(&self, path: &Path, change: &AttrChange) -> fuse3::Result<()> {
        if let Some(mode) = change.mode {
            fchmodat(
                self.base(),
                path,
                Mode::from_bits_truncate(mode),
                FchmodatFlags::FollowSymlink,
            )
            .map_err(errno_from_nix)?;
        }

        if change.uid.is_some() || change.gid.is_some() {
            fchownat(
                self.base(),
                path,
                change.uid.map(Uid::from_raw),
                change.gid.map(Gid::from_raw),
                AtFlags::AT_SYMLINK_NOFOLLOW,
            )
            .map_err(errno_from_nix)?;
        }

        if let Some(size) = change.size {
            let file = openat(
                self.base(),
                path,
                OFlag::O_WRONLY | OFlag::O_CLOEXEC,
                Mode::empty(),
            )
            .map_err(errno_from_nix)?;
            ftruncate(&file, size as i64).map_err(errno_from_nix)?;
        }

        self.apply_times(path, change)
    }

    fn readlink(&self, path: &Path) -> fuse3::Result<Vec<u8>> {
        let target = readlinkat(self.base(), path).map_err(errno_from_nix)?;
        Ok(target.into_vec())
    }

    fn access(&self, path: &Path, mask: u32) -> fuse3::Result<()> {
        faccessat(
            self.base(),
            path,
            access_mask_from_bits(mask),
            AtFlags::AT_SYMLINK_NOFOLLOW,
        )
        .map_err(errno_from_nix)
    }

    fn symlink(&self, target: &OsStr, link: &Path) -> fuse3::Result<()> {
        symlinkat(target, self.base(), link).map_err(errno_from_nix)
    }

    fn mknod(&self, path: &Path, mode: u32, rdev: u32) -> fuse3::Result<()> {
        let sflag = SFlag::from_bits_truncate(mode);
        let perm = Mode::from_bits_truncate(mode);
        mknodat(self.base(), path, sflag, perm, rdev as u64).map_err(errno_from_nix)
    }

    fn mkdir(&self, path: &Path, mode: u32) -> fuse3::Result<()> {
        mkdirat(self.base(), path, Mode::from_bits_truncate(mode)).map_err(errno_from_nix)
    }

    fn unlink(&self, path: &Path) -> fuse3::Result<()> {
        unlinkat(self.base(), path, UnlinkatFlags::NoRemoveDir).map_err(errno_from_nix)
    }

    fn rmdir(&self, path: &Path) -> fuse3::Result<()> {
        unlinkat(self.base(), path, UnlinkatFlags::RemoveDir).map_err(errno_from_nix)
    }

    fn rename(&self, from: &Path, to: &Path) -> fuse3::Result<()> {
        renameat(self.base(), from, self.base(), to).map_err(errno_from_nix)
    }

    fn link(&self, target: &Path, link: &Path) -> fuse3::Result<()> {
        linkat(self.base(), target, self.base(), link, AtFlags::empty())
            .map_err(errno_from_nix)
    }

    fn open(&self, path: &Path, flags: u32, mode: u32) -> fuse3::Result<u64> {
        let oflag = oflag_from_bits(flags) | OFlag::O_CLOEXEC;
        let fd = openat(
            self.base(),
            path,
            oflag,
            Mode::from_bits_truncate(mode & 0o7777),
        )
        .map_err(errno_from_nix)?;
        Ok(self.handles.insert_file(fd))
    }

    fn read(&self, fh: u64, offset: u64, size: u32) -> fuse3::Result<Vec<u8>> {
        let handle = self.handles.file(fh)?;
        let mut buf = vec![0u8; size as usize];
        let read_len = retry_eintr(|| pread(handle.as_fd(), &mut buf, offset as i64))
            .map_err(errno_from_nix)?;
        buf.truncate(read_len);
        Ok(buf)
    }

    fn write(&self, fh: u64, offset: u64, data: &[u8]) -> fuse3::Result<u32> {
        let handle = self.handles.file(fh)?;
        let written =
            retry_eintr(|| pwrite(handle.as_fd(), data, offset as i64)).map_err(errno_from_nix)?;
        if self.config.sync_data() {
            fdatasync(handle.as_fd()).map_err(errno_from_nix)?;
        }
        Ok(written as u32)
    }

    fn flush(&self, fh: u64) -> fuse3::Result<()> {
        let handle = self.handles.file(fh)?;
        fsync(handle.as_fd()).map_err(errno_from_nix)
    }

    fn fsync(&self, fh: u64, datasync: bool) -> fuse3::Result<()> {
        let handle = self.handles.file(fh)?;
        if datasync {
            fdatasync(handle.as_fd()).map_err(errno_from_nix)
        } else {
            fsync(handle.as_fd()).map_err(errno_from_nix)
        }
    }

    fn release(&self, fh: u64) -> fuse3::Result<()> {
        self.handles.remove(fh)
    }

    fn opendir(&self, path: &Path) -> fuse3::Result<u64> {
        let fd = openat(
            self.base(),
            path,
            OFlag::O_RDONLY | OFlag::O_DIRECTORY | OFlag::O_CLOEXEC,
            Mode::empty(),
        )
        .map_err(errno_from_nix)?;
        Ok(self.handles.insert_dir(fd))
    }

    fn readdir(&self, fh: u64) -> fuse3::Result<Vec<DirEntryInfo>> {
        let handle = self.handles.dir(fh)?;
        let mut dir = Dir::openat(
            handle.as_fd(),
            ".",
            OFlag::O_RDONLY | OFlag::O_DIRECTORY | OFlag::O_CLOEXEC,
            Mode::empty(),
        )
        .map_err(errno_from_nix)?;

        let mut entries = Vec::new();
        for entry in dir.iter() {
            let entry = entry.map_err(errno_from_nix)?;
            let name = entry.file_name();
            let raw = name.to_bytes();
            if raw == b"." || raw == b".." {
                continue;
            }
            // Raced with an unlink; the entry is simply gone.
            let stat = match fstatat(handle.as_fd(), name, AtFlags::AT_SYMLINK_NOFOLLOW) {
                Ok(stat) => stat,
                Err(nix::errno::Errno::ENOENT) => continue,
                Err(err) => return Err(errno_from_nix(err)),
            };
            entries.push(DirEntryInfo {
                name: OsStr::from_bytes(raw).to_os_string(),
                kind: file_type_from_mode(stat.st_mode),
                attr: file_attr_from_stat(&stat),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn fsyncdir(&self, fh: u64, datasync: bool) -> fuse3::Result<()> {
        let handle = self.handles.dir(fh)?;
        if datasync {
            fdatasync(handle.as_fd()).map_err(errno_from_nix)
        } else {
            fsync(handle.as_fd()).map_err(errno_from_nix)
        }
    }

    fn releasedir(&self, fh: u64) -> fuse3::Result<()> {
        self.handles.remove(fh)
    }

    fn statfs(&self, path: &Path) -> fuse3::Result<ReplyStatFs> {
        let stats = statvfs(path).map_err(errno_from_nix)?;
        Ok(ReplyStatFs {
            blocks: stats.blocks(),
            bfree: stats.blocks_free(),
            bavail: stats.blocks_available(),
            files: stats.files(),
            ffree: stats.files_free(),
            bsize: stats.block_size() as u32,
            namelen: stats.name_max() as u32,
            frsize: stats.fragment_size() as u32,
        })
    }
}
