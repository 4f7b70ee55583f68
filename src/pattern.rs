use regex::bytes::Regex;
use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

/// Shell kind written by the agent CLI today.
pub const DEFAULT_SHELL_KIND: &str = "bash";

/// Filename grammar `snapshot-<kind>-<digits>-<lowercase alnum>.sh`.
///
/// Directory entries must be exactly a snapshot name. Requested paths match
/// on a basename suffix, and free-form text is searched for the first
/// occurrence anywhere.
#[derive(Debug, Clone)]
pub struct SnapshotPattern {
    shell_kind: String,
    entry: Regex,
    name: Regex,
    text: Regex,
}

impl SnapshotPattern {
    pub fn new(shell_kind: &str) -> Result<Self, regex::Error> {
        let body = format!(
            r"snapshot-{}-[0-9]+-[a-z0-9]+\.sh",
            regex::escape(shell_kind)
        );
        Ok(Self {
            shell_kind: shell_kind.to_owned(),
            entry: Regex::new(&format!("^{body}$"))?,
            name: Regex::new(&format!("{body}$"))?,
            text: Regex::new(&body)?,
        })
    }

    pub fn shell_kind(&self) -> &str {
        &self.shell_kind
    }

    /// True when a directory entry is itself a snapshot file name.
    pub fn is_entry_name(&self, name: &OsStr) -> bool {
        self.entry.is_match(name.as_bytes())
    }

    /// True when `name` (a single path component) ends in a snapshot filename.
    pub fn matches_name(&self, name: &OsStr) -> bool {
        self.name.is_match(name.as_bytes())
    }

    /// Matches on the basename only; directory prefixes are ignored.
    pub fn matches_path(&self, path: &Path) -> bool {
        path.file_name().is_some_and(|name| self.matches_name(name))
    }

    /// First snapshot filename mentioned in `text`, if any.
    pub fn find_in_text(&self, text: &str) -> Option<String> {
        self.text
            .find(text.as_bytes())
            .map(|m| String::from_utf8_lossy(m.as_bytes()).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_plain_names() {
        let pattern = SnapshotPattern::new("bash").unwrap();
        assert!(pattern.matches_name(OsStr::new("snapshot-bash-100-aa11.sh")));
        assert!(pattern.matches_name(OsStr::new("snapshot-bash-1-z.sh")));
        assert!(!pattern.matches_name(OsStr::new("snapshot-zsh-100-aa11.sh")));
        assert!(!pattern.matches_name(OsStr::new("snapshot-bash-abc-aa11.sh")));
        assert!(!pattern.matches_name(OsStr::new("snapshot-bash-100-AA11.sh")));
        assert!(!pattern.matches_name(OsStr::new("snapshot-bash-100-aa11.sh.bak")));
        assert!(!pattern.matches_name(OsStr::new("notes.txt")));
    }

    #[test]
    fn matches_basename_of_nested_path() {
        let pattern = SnapshotPattern::new("bash").unwrap();
        assert!(pattern.matches_path(Path::new("/a/b/snapshot-bash-7-x1.sh")));
        assert!(pattern.matches_path(Path::new("snapshot-bash-7-x1.sh")));
        assert!(!pattern.matches_path(Path::new("/snapshot-bash-7-x1.sh/inner")));
        assert!(!pattern.matches_path(Path::new("/")));
    }

    #[test]
    fn entry_names_are_anchored_at_both_ends() {
        let pattern = SnapshotPattern::new("bash").unwrap();
        assert!(pattern.is_entry_name(OsStr::new("snapshot-bash-1-a.sh")));
        assert!(!pattern.is_entry_name(OsStr::new("foo-snapshot-bash-1-a.sh")));
        assert!(pattern.matches_name(OsStr::new("foo-snapshot-bash-1-a.sh")));
    }

    #[test]
    fn temp_link_names_never_match() {
        let pattern = SnapshotPattern::new("bash").unwrap();
        assert!(!pattern.matches_name(OsStr::new(".snapshot-bash-7-x1.sh.snapfix-42")));
        assert!(!pattern.is_entry_name(OsStr::new(".snapshot-bash-7-x1.sh.snapfix-42")));
    }

    #[test]
    fn finds_first_name_in_text() {
        let pattern = SnapshotPattern::new("bash").unwrap();
        let text = "Error: /home/u/.claude/shell-snapshots/snapshot-bash-123-abc0.sh: No such file \
                    (also snapshot-bash-456-def.sh)";
        assert_eq!(
            pattern.find_in_text(text).as_deref(),
            Some("snapshot-bash-123-abc0.sh")
        );
        assert_eq!(pattern.find_in_text("nothing useful here"), None);
    }

    #[test]
    fn other_shell_kinds_are_escaped() {
        let pattern = SnapshotPattern::new("z.sh").unwrap();
        assert_eq!(pattern.shell_kind(), "z.sh");
        assert!(pattern.matches_name(OsStr::new("snapshot-z.sh-1-a.sh")));
        assert!(!pattern.matches_name(OsStr::new("snapshot-zXsh-1-a.sh")));
    }
}
