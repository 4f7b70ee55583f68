use crate::error::{Result, SnapfixError};
use std::ffi::{OsStr, OsString};
use std::fs;
use std::io;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

/// Point `dir/name` at `target` (a sibling file name) without a window in
/// which `dir/name` is missing.
///
/// The link is built under a hidden temporary name and renamed over the
/// destination. An existing regular file or directory at `dir/name` is never
/// replaced.
pub fn replace_redirect(dir: &Path, name: &OsStr, target: &OsStr) -> Result<PathBuf> {
    let link_path = dir.join(name);
    match fs::symlink_metadata(&link_path) {
        Ok(meta) if !meta.file_type().is_symlink() => {
            return Err(SnapfixError::NameOccupied(link_path));
        }
        Ok(_) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(symlink_failure(link_path, err)),
    }

    let temp_path = dir.join(temp_name(name));
    // Leftover from an interrupted run with the same pid.
    let _ = fs::remove_file(&temp_path);

    if let Err(err) = symlink(target, &temp_path) {
        return Err(symlink_failure(link_path, err));
    }
    if let Err(err) = fs::rename(&temp_path, &link_path) {
        let _ = fs::remove_file(&temp_path);
        return Err(symlink_failure(link_path, err));
    }
    Ok(link_path)
}

fn temp_name(name: &OsStr) -> OsString {
    let mut composed = OsString::from(".");
    composed.push(name);
    composed.push(format!(".snapfix-{}", std::process::id()));
    composed
}

fn symlink_failure(name: PathBuf, source: io::Error) -> SnapfixError {
    SnapfixError::SymlinkCreateFailure { name, source }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn creates_relative_link() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("real.sh"), "x").unwrap();

        let link = replace_redirect(dir.path(), OsStr::new("alias.sh"), OsStr::new("real.sh"))
            .unwrap();
        assert_eq!(link, dir.path().join("alias.sh"));
        assert_eq!(fs::read_link(&link).unwrap(), Path::new("real.sh"));
        assert_eq!(fs::read_to_string(&link).unwrap(), "x");
    }

    #[test]
    fn replaces_existing_link_and_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("new.sh"), "new").unwrap();
        symlink("old.sh", dir.path().join("alias.sh")).unwrap();

        replace_redirect(dir.path(), OsStr::new("alias.sh"), OsStr::new("new.sh")).unwrap();
        assert_eq!(
            fs::read_link(dir.path().join("alias.sh")).unwrap(),
            Path::new("new.sh")
        );

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 2);
    }

    #[test]
    fn refuses_to_replace_regular_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("alias.sh"), "genuine").unwrap();

        let err = replace_redirect(dir.path(), OsStr::new("alias.sh"), OsStr::new("new.sh"))
            .unwrap_err();
        assert!(matches!(err, SnapfixError::NameOccupied(_)));
        assert_eq!(
            fs::read_to_string(dir.path().join("alias.sh")).unwrap(),
            "genuine"
        );
    }

    #[test]
    fn missing_directory_is_a_symlink_failure() {
        let dir = TempDir::new().unwrap();
        let err = replace_redirect(
            &dir.path().join("absent"),
            OsStr::new("alias.sh"),
            OsStr::new("real.sh"),
        )
        .unwrap_err();
        assert!(matches!(err, SnapfixError::SymlinkCreateFailure { .. }));
    }
}
