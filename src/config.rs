use crate::error::SnapfixError;
use crate::util::errno_from_nix;
use nix::fcntl::{OFlag, open};
use nix::sys::stat::Mode;
use std::os::fd::{AsFd, OwnedFd};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Snapshot location relative to the user's home directory.
pub const SNAPSHOT_SUBDIR: &str = ".claude/shell-snapshots";

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

pub fn default_snapshot_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(SNAPSHOT_SUBDIR))
}

/// Fails with `DirectoryNotFound` unless `dir` is an existing directory.
pub fn require_dir(dir: &Path) -> Result<(), SnapfixError> {
    if dir.is_dir() {
        Ok(())
    } else {
        Err(SnapfixError::DirectoryNotFound(dir.to_path_buf()))
    }
}

/// Backing directory of a mount, held open for the mount's lifetime.
#[derive(Debug)]
pub struct Config {
    pub backend_path: PathBuf,
    pub backend_fd: OwnedFd,
    pub sync_data: bool,
}

impl Config {
    pub fn open_backend(path: PathBuf, sync_data: bool) -> Result<Self, fuse3::Errno> {
        let fd = open(
            &path,
            OFlag::O_RDONLY | OFlag::O_CLOEXEC | OFlag::O_DIRECTORY,
            Mode::empty(),
        )
        .map_err(errno_from_nix)?;

        Ok(Self {
            backend_path: path,
            backend_fd: fd,
            sync_data,
        })
    }

    pub fn backend_fd(&self) -> std::os::fd::BorrowedFd<'_> {
        self.backend_fd.as_fd()
    }

    pub fn sync_data(&self) -> bool {
        self.sync_data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn open_backend_requires_a_directory() {
        let dir = TempDir::new().unwrap();
        let config = Config::open_backend(dir.path().to_path_buf(), false).unwrap();
        assert_eq!(config.backend_path, dir.path());
        assert!(!config.sync_data());

        let file = dir.path().join("plain");
        std::fs::write(&file, "x").unwrap();
        let err = Config::open_backend(file, false).unwrap_err();
        assert_eq!(err, fuse3::Errno::from(libc::ENOTDIR));

        let err = Config::open_backend(dir.path().join("absent"), false).unwrap_err();
        assert_eq!(err, fuse3::Errno::from(libc::ENOENT));
    }

    #[test]
    fn require_dir_reports_missing_directory() {
        let dir = TempDir::new().unwrap();
        assert!(require_dir(dir.path()).is_ok());
        let missing = dir.path().join("absent");
        assert!(matches!(
            require_dir(&missing),
            Err(SnapfixError::DirectoryNotFound(p)) if p == missing
        ));
    }

    #[test]
    fn default_dir_lives_under_home() {
        if let Some(dir) = default_snapshot_dir() {
            assert!(dir.ends_with(SNAPSHOT_SUBDIR));
        }
    }
}
