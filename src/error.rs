//! Error types for the install pipeline
//!
//! Every stage of an install attempt has its own `InstallError` variant, and
//! every variant maps onto exactly one of the three result codes handed back
//! to the caller.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::install::runner::ChildExit;
use crate::package::archive::ArchiveError;
use crate::package::keys::KeyError;
use crate::package::verify::VerifyError;

/// Outcome of one install attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstallResult {
    Success,
    /// A package meant for us that failed partway; a retry may succeed.
    Error,
    /// Not a valid signed update for this system; don't retry as-is.
    Corrupt,
}

impl InstallResult {
    /// Process exit code used by the `recovery-install` binary.
    pub fn exit_code(self) -> i32 {
        match self {
            InstallResult::Success => 0,
            InstallResult::Error => 1,
            InstallResult::Corrupt => 2,
        }
    }

    pub fn is_success(self) -> bool {
        self == InstallResult::Success
    }
}

impl fmt::Display for InstallResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstallResult::Success => "SUCCESS",
            InstallResult::Error => "ERROR",
            InstallResult::Corrupt => "CORRUPT",
        };
        f.write_str(s)
    }
}

/// Failure of a single install stage.
#[derive(Error, Debug)]
pub enum InstallError {
    #[error("failed to set up expected mounts for install: {0}")]
    MountSetup(String),

    #[error("failed to map {path}: {source}")]
    Map {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to load keys: {0}")]
    Keys(#[from] KeyError),

    #[error("signature verification failed: {0}")]
    Verify(#[from] VerifyError),

    #[error("can't open package archive: {0}")]
    OpenArchive(#[source] ArchiveError),

    #[error("package has no installer entry {0}")]
    MissingInstaller(String),

    #[error("can't make {path}: {source}")]
    CreateInstaller {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("can't copy {entry}: {source}")]
    ExtractInstaller {
        entry: String,
        #[source]
        source: ArchiveError,
    },

    #[error("failed to spawn installer: {0}")]
    Spawn(String),

    #[error("control pipe failure: {0}")]
    ControlPipe(#[source] io::Error),

    #[error("installer {0}")]
    InstallerFailed(ChildExit),
}

impl InstallError {
    /// Result code the orchestrator reports for this failure.
    pub fn result(&self) -> InstallResult {
        match self {
            InstallError::Map { .. }
            | InstallError::Keys(_)
            | InstallError::Verify(_)
            | InstallError::OpenArchive(_)
            | InstallError::MissingInstaller(_) => InstallResult::Corrupt,
            InstallError::MountSetup(_)
            | InstallError::CreateInstaller { .. }
            | InstallError::ExtractInstaller { .. }
            | InstallError::Spawn(_)
            | InstallError::ControlPipe(_)
            | InstallError::InstallerFailed(_) => InstallResult::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn package_level_failures_are_corrupt() {
        let err = InstallError::MissingInstaller("META-INF/x".to_string());
        assert_eq!(err.result(), InstallResult::Corrupt);

        let err = InstallError::Verify(VerifyError::NoMatchingKey);
        assert_eq!(err.result(), InstallResult::Corrupt);

        let err = InstallError::Map {
            path: PathBuf::from("/sdcard/update.zip"),
            source: io::Error::from(io::ErrorKind::NotFound),
        };
        assert_eq!(err.result(), InstallResult::Corrupt);
    }

    #[test]
    fn operational_failures_are_errors() {
        let err = InstallError::InstallerFailed(ChildExit::Exited(3));
        assert_eq!(err.result(), InstallResult::Error);

        let err = InstallError::ExtractInstaller {
            entry: "META-INF/x".to_string(),
            source: ArchiveError::Truncated { expected: 10, copied: 4 },
        };
        assert_eq!(err.result(), InstallResult::Error);

        let err = InstallError::Spawn("fork: EAGAIN".to_string());
        assert_eq!(err.result(), InstallResult::Error);
    }

    #[test]
    fn exit_codes_are_distinct() {
        assert_eq!(InstallResult::Success.exit_code(), 0);
        assert_eq!(InstallResult::Error.exit_code(), 1);
        assert_eq!(InstallResult::Corrupt.exit_code(), 2);
        assert_eq!(InstallResult::Corrupt.to_string(), "CORRUPT");
    }
}
