use crate::config::require_dir;
use crate::error::{Result, SnapfixError};
use crate::index::SnapshotIndex;
use crate::link::replace_redirect;
use std::ffi::{OsStr, OsString};
use std::io::Write;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repair {
    pub missing: String,
    pub target: OsString,
    pub link: PathBuf,
}

/// Repairs exactly one snapshot name taken from an error message.
#[derive(Debug, Clone)]
pub struct OneShotFixer {
    index: SnapshotIndex,
}

impl OneShotFixer {
    pub fn new(index: SnapshotIndex) -> Self {
        Self { index }
    }

    pub fn extract(&self, text: &str) -> Result<String> {
        self.index
            .pattern()
            .find_in_text(text)
            .ok_or(SnapfixError::NoMatchInInput)
    }

    /// Points `missing` at the latest real snapshot, replacing a previous
    /// redirect of the same name.
    pub fn repair(&self, missing: &str) -> Result<Repair> {
        let latest = self
            .index
            .latest()
            .ok_or_else(|| SnapfixError::NoSnapshotAvailable(self.index.dir().to_path_buf()))?;
        let link = replace_redirect(self.index.dir(), OsStr::new(missing), &latest.name)?;
        Ok(Repair {
            missing: missing.to_owned(),
            target: latest.name,
            link,
        })
    }

    /// Full one-shot flow, writing human-readable progress to `out`.
    pub fn run(&self, text: &str, out: &mut impl Write) -> Result<Repair> {
        require_dir(self.index.dir())?;

        let missing = self.extract(text)?;
        writeln!(out, "Missing snapshot detected: {missing}")?;

        let repair = self.repair(&missing)?;
        writeln!(
            out,
            "Latest snapshot found: {}",
            repair.target.to_string_lossy()
        )?;
        writeln!(
            out,
            "Created symlink: {} -> {}",
            repair.missing,
            repair.target.to_string_lossy()
        )?;
        writeln!(out, "Successfully fixed shell snapshot issue!")?;
        tracing::info!(
            link = %repair.link.display(),
            "redirected {} to {}",
            repair.missing,
            repair.target.to_string_lossy()
        );
        Ok(repair)
    }
}
