use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnapfixError {
    #[error("snapshot directory not found: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    #[error("no snapshot filename found in input")]
    NoMatchInInput,

    #[error("no snapshots available in {}", .0.display())]
    NoSnapshotAvailable(PathBuf),

    #[error("refusing to replace regular file {}", .0.display())]
    NameOccupied(PathBuf),

    #[error("failed to create symlink {}: {source}", .name.display())]
    SymlinkCreateFailure {
        name: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl SnapfixError {
    /// Process exit status for this failure category.
    pub fn exit_code(&self) -> u8 {
        match self {
            SnapfixError::DirectoryNotFound(_) => 2,
            SnapfixError::NoMatchInInput => 3,
            SnapfixError::NoSnapshotAvailable(_) => 4,
            SnapfixError::NameOccupied(_) | SnapfixError::SymlinkCreateFailure { .. } => 5,
            SnapfixError::Io(_) => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, SnapfixError>;
