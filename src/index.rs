use crate::pattern::SnapshotPattern;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub name: OsString,
    pub path: PathBuf,
    /// mtime of the entry itself (lstat), not of a link target.
    pub modified: SystemTime,
    pub is_redirect: bool,
    /// For redirects: whether the link currently dereferences to something.
    pub target_exists: bool,
}

impl SnapshotEntry {
    /// A redirect whose target no longer exists.
    pub fn is_broken(&self) -> bool {
        self.is_redirect && !self.target_exists
    }
}

/// Read-only view over one snapshot directory.
#[derive(Debug, Clone)]
pub struct SnapshotIndex {
    dir: PathBuf,
    pattern: SnapshotPattern,
}

impl SnapshotIndex {
    pub fn new(dir: impl Into<PathBuf>, pattern: SnapshotPattern) -> Self {
        Self {
            dir: dir.into(),
            pattern,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn pattern(&self) -> &SnapshotPattern {
        &self.pattern
    }

    /// Every grammar-matching entry in the directory, in no particular order.
    ///
    /// Entries that disappear between listing and stat are skipped.
    pub fn scan(&self) -> io::Result<Vec<SnapshotEntry>> {
        let mut entries = Vec::new();
        for dirent in fs::read_dir(&self.dir)? {
            let dirent = dirent?;
            let name = dirent.file_name();
            if !self.pattern.is_entry_name(&name) {
                continue;
            }
            let path = dirent.path();
            let meta = match fs::symlink_metadata(&path) {
                Ok(meta) => meta,
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err),
            };
            let is_redirect = meta.file_type().is_symlink();
            let target_exists = if is_redirect {
                fs::metadata(&path).is_ok()
            } else {
                meta.is_file()
            };
            // Directories and other non-regular entries never take part.
            if !is_redirect && !meta.is_file() {
                continue;
            }
            entries.push(SnapshotEntry {
                name,
                path,
                modified: meta.modified()?,
                is_redirect,
                target_exists,
            });
        }
        Ok(entries)
    }

    /// The most recently modified real entry.
    ///
    /// Redirects are never candidates, so a result is always safe to point a
    /// redirect at. Ties on mtime go to the lexicographically greatest name.
    /// A missing or unreadable directory yields `None`.
    pub fn latest(&self) -> Option<SnapshotEntry> {
        let entries = match self.scan() {
            Ok(entries) => entries,
            Err(err) => {
                tracing::debug!(dir = %self.dir.display(), "cannot scan snapshot directory: {err}");
                return None;
            }
        };
        select_latest(entries)
    }

    /// Redirect entries whose target is gone.
    pub fn broken_redirects(&self) -> io::Result<Vec<SnapshotEntry>> {
        let mut broken: Vec<_> = self
            .scan()?
            .into_iter()
            .filter(SnapshotEntry::is_broken)
            .collect();
        broken.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(broken)
    }
}

fn select_latest(entries: Vec<SnapshotEntry>) -> Option<SnapshotEntry> {
    entries
        .into_iter()
        .filter(|entry| !entry.is_redirect && entry.target_exists)
        .max_by(|a, b| {
            a.modified
                .cmp(&b.modified)
                .then_with(|| a.name.cmp(&b.name))
        })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::fs::File;
    use std::os::unix::fs::symlink;
    use std::time::Duration;
    use tempfile::TempDir;

    pub(crate) fn write_snapshot(dir: &Path, name: &str, body: &str, age_secs: u64) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        let mtime = SystemTime::now() - Duration::from_secs(age_secs);
        File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(mtime)
            .unwrap();
        path
    }

    fn index(dir: &TempDir) -> SnapshotIndex {
        SnapshotIndex::new(dir.path(), SnapshotPattern::new("bash").unwrap())
    }

    #[test]
    fn latest_prefers_newest_mtime() {
        let dir = TempDir::new().unwrap();
        write_snapshot(dir.path(), "snapshot-bash-100-aa11.sh", "old", 600);
        write_snapshot(dir.path(), "snapshot-bash-200-bb22.sh", "new", 10);
        write_snapshot(dir.path(), "snapshot-bash-050-cc33.sh", "older", 900);

        let latest = index(&dir).latest().unwrap();
        assert_eq!(latest.name, "snapshot-bash-200-bb22.sh");
        assert_eq!(latest.path, dir.path().join("snapshot-bash-200-bb22.sh"));
        assert!(!latest.is_redirect);
    }

    #[test]
    fn latest_breaks_ties_by_name() {
        let dir = TempDir::new().unwrap();
        let a = write_snapshot(dir.path(), "snapshot-bash-100-aa11.sh", "a", 60);
        let b = write_snapshot(dir.path(), "snapshot-bash-200-bb22.sh", "b", 60);
        let same = fs::metadata(&a).unwrap().modified().unwrap();
        File::options()
            .write(true)
            .open(&b)
            .unwrap()
            .set_modified(same)
            .unwrap();

        let latest = index(&dir).latest().unwrap();
        assert_eq!(latest.name, "snapshot-bash-200-bb22.sh");
    }

    #[test]
    fn latest_ignores_redirects_and_other_files() {
        let dir = TempDir::new().unwrap();
        write_snapshot(dir.path(), "snapshot-bash-100-aa11.sh", "real", 600);
        write_snapshot(dir.path(), "unrelated.sh", "newer but not a snapshot", 0);
        // A fresh redirect must not nominate itself.
        symlink(
            "snapshot-bash-100-aa11.sh",
            dir.path().join("snapshot-bash-900-zz99.sh"),
        )
        .unwrap();
        fs::create_dir(dir.path().join("snapshot-bash-950-dd44.sh")).unwrap();

        let latest = index(&dir).latest().unwrap();
        assert_eq!(latest.name, "snapshot-bash-100-aa11.sh");
    }

    #[test]
    fn prefixed_names_are_not_snapshots() {
        let dir = TempDir::new().unwrap();
        write_snapshot(dir.path(), "snapshot-bash-100-aa11.sh", "real", 600);
        write_snapshot(dir.path(), "foo-snapshot-bash-1-a.sh", "impostor", 0);

        let index = index(&dir);
        assert_eq!(index.latest().unwrap().name, "snapshot-bash-100-aa11.sh");
        assert_eq!(index.scan().unwrap().len(), 1);
    }

    #[test]
    fn only_broken_redirect_yields_none() {
        let dir = TempDir::new().unwrap();
        symlink("gone.sh", dir.path().join("snapshot-bash-300-cc33.sh")).unwrap();

        let index = index(&dir);
        assert_eq!(index.latest(), None);
        let broken = index.broken_redirects().unwrap();
        assert_eq!(broken.len(), 1);
        assert_eq!(broken[0].name, "snapshot-bash-300-cc33.sh");
    }

    #[test]
    fn missing_directory_yields_none() {
        let dir = TempDir::new().unwrap();
        let index = SnapshotIndex::new(
            dir.path().join("absent"),
            SnapshotPattern::new("bash").unwrap(),
        );
        assert_eq!(index.latest(), None);
        assert!(index.broken_redirects().is_err());
    }

    #[test]
    fn valid_redirects_are_not_broken() {
        let dir = TempDir::new().unwrap();
        write_snapshot(dir.path(), "snapshot-bash-100-aa11.sh", "real", 60);
        symlink(
            "snapshot-bash-100-aa11.sh",
            dir.path().join("snapshot-bash-101-ab12.sh"),
        )
        .unwrap();
        symlink("missing.sh", dir.path().join("snapshot-bash-102-ab13.sh")).unwrap();

        let broken = index(&dir).broken_redirects().unwrap();
        let names: Vec<_> = broken.iter().map(|e| e.name.clone()).collect();
        assert_eq!(names, vec![OsString::from("snapshot-bash-102-ab13.sh")]);
    }
}
