use crate::index::SnapshotIndex;
use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

/// Maps a logical mount path to the physical path that should serve it.
///
/// Only a snapshot name that is absent on disk is redirected; everything else
/// is a plain join onto the root. Nothing is cached between calls.
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
    index: SnapshotIndex,
}

impl PathResolver {
    pub fn new(index: SnapshotIndex) -> Self {
        Self {
            root: index.dir().to_path_buf(),
            index,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Physical path for `logical` with no redirection applied.
    pub fn direct(&self, logical: &OsStr) -> PathBuf {
        let bytes = logical.as_bytes();
        let start = bytes.iter().position(|b| *b != b'/').unwrap_or(bytes.len());
        let relative = Path::new(OsStr::from_bytes(&bytes[start..]));
        if relative.as_os_str().is_empty() {
            self.root.clone()
        } else {
            self.root.join(relative)
        }
    }

    pub fn resolve(&self, logical: &OsStr) -> PathBuf {
        let direct = self.direct(logical);
        if !self.index.pattern().matches_path(Path::new(logical)) {
            return direct;
        }
        // Follows links: a dangling redirect counts as absent.
        if direct.exists() {
            return direct;
        }
        match self.index.latest() {
            Some(latest) => {
                tracing::debug!(
                    "redirecting {} -> {}",
                    logical.to_string_lossy(),
                    latest.path.display()
                );
                latest.path
            }
            None => direct,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::tests::write_snapshot;
    use crate::pattern::SnapshotPattern;
    use std::fs;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    fn resolver(dir: &TempDir) -> PathResolver {
        PathResolver::new(SnapshotIndex::new(
            dir.path(),
            SnapshotPattern::new("bash").unwrap(),
        ))
    }

    #[test]
    fn non_snapshot_paths_are_joined_even_when_missing() {
        let dir = TempDir::new().unwrap();
        write_snapshot(dir.path(), "snapshot-bash-200-bb22.sh", "new", 1);
        let r = resolver(&dir);

        assert_eq!(r.resolve(OsStr::new("/notes.txt")), dir.path().join("notes.txt"));
        assert_eq!(
            r.resolve(OsStr::new("/sub/dir/file")),
            dir.path().join("sub/dir/file")
        );
        assert_eq!(r.resolve(OsStr::new("/")), dir.path());
        assert_eq!(r.resolve(OsStr::new("")), dir.path());
        assert_eq!(r.resolve(OsStr::new("relative.txt")), dir.path().join("relative.txt"));
    }

    #[test]
    fn missing_snapshot_redirects_to_latest() {
        let dir = TempDir::new().unwrap();
        write_snapshot(dir.path(), "snapshot-bash-100-aa11.sh", "old", 600);
        let newest = write_snapshot(dir.path(), "snapshot-bash-200-bb22.sh", "new", 10);
        let r = resolver(&dir);

        assert_eq!(r.resolve(OsStr::new("/snapshot-bash-999-zz99.sh")), newest);
        assert_eq!(r.resolve(OsStr::new("snapshot-bash-999-zz99.sh")), newest);
    }

    #[test]
    fn existing_snapshot_is_served_as_itself() {
        let dir = TempDir::new().unwrap();
        let old = write_snapshot(dir.path(), "snapshot-bash-100-aa11.sh", "old", 600);
        write_snapshot(dir.path(), "snapshot-bash-200-bb22.sh", "new", 10);
        let r = resolver(&dir);

        assert_eq!(r.resolve(OsStr::new("/snapshot-bash-100-aa11.sh")), old);
    }

    #[test]
    fn dangling_redirect_name_is_treated_as_missing() {
        let dir = TempDir::new().unwrap();
        let newest = write_snapshot(dir.path(), "snapshot-bash-200-bb22.sh", "new", 10);
        symlink("gone.sh", dir.path().join("snapshot-bash-300-cc33.sh")).unwrap();
        let r = resolver(&dir);

        assert_eq!(r.resolve(OsStr::new("/snapshot-bash-300-cc33.sh")), newest);
    }

    #[test]
    fn no_target_falls_through_to_direct_path() {
        let dir = TempDir::new().unwrap();
        let r = resolver(&dir);
        assert_eq!(
            r.resolve(OsStr::new("/snapshot-bash-999-zz99.sh")),
            dir.path().join("snapshot-bash-999-zz99.sh")
        );
    }

    #[test]
    fn snapshots_created_later_are_picked_up() {
        let dir = TempDir::new().unwrap();
        write_snapshot(dir.path(), "snapshot-bash-100-aa11.sh", "old", 600);
        let r = resolver(&dir);
        let missing = OsStr::new("/snapshot-bash-999-zz99.sh");
        assert_eq!(r.resolve(missing), dir.path().join("snapshot-bash-100-aa11.sh"));

        let fresh = write_snapshot(dir.path(), "snapshot-bash-300-cc33.sh", "fresh", 0);
        assert_eq!(r.resolve(missing), fresh);

        fs::remove_file(&fresh).unwrap();
        assert_eq!(r.resolve(missing), dir.path().join("snapshot-bash-100-aa11.sh"));
    }
}
