// Installation error taxonomy: every stage failure maps to exactly one kind.

use std::path::{Path, PathBuf};

use thiserror::Error;

pub type Result<T, E = InstallError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum InstallError {
    /// Transport failure, timeout or non-success HTTP status.
    #[error("network error: {0}")]
    Network(String),

    /// No published release (or no matching installer asset).
    #[error("no release found: {0}")]
    ReleaseNotFound(String),

    /// The staging location could not be created or written.
    #[error("disk error at {}: {source}", .path.display())]
    Disk {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The downloaded file failed size, format or checksum validation.
    #[error("corrupt artifact {}: {reason}", .path.display())]
    CorruptArtifact { path: PathBuf, reason: String },

    /// The OS refused to start the installer.
    #[error("failed to launch {}: {source}", .path.display())]
    Launch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to monitor installer process: {0}")]
    ProcessWait(String),

    /// The installer ran and reported failure.
    #[error("installer exited with code {0}")]
    InstallerProcess(i32),

    /// Rejected `start()`; never recorded as a terminal failure.
    #[error("an installation attempt is already in progress")]
    AttemptInProgress,
}

impl InstallError {
    pub fn disk(path: &Path, source: std::io::Error) -> Self {
        Self::Disk {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn corrupt(path: &Path, reason: impl Into<String>) -> Self {
        Self::CorruptArtifact {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) => ErrorKind::Network,
            Self::ReleaseNotFound(_) => ErrorKind::ReleaseNotFound,
            Self::Disk { .. } => ErrorKind::Disk,
            Self::CorruptArtifact { .. } => ErrorKind::CorruptArtifact,
            Self::Launch { .. } => ErrorKind::Launch,
            Self::ProcessWait(_) => ErrorKind::ProcessWait,
            Self::InstallerProcess(code) => ErrorKind::InstallerProcess(*code),
            Self::AttemptInProgress => ErrorKind::AttemptInProgress,
        }
    }
}

impl From<reqwest::Error> for InstallError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Network(format!("request timed out: {}", e))
        } else {
            Self::Network(e.to_string())
        }
    }
}

/// Copyable view of an [`InstallError`], carried on UI events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Network,
    ReleaseNotFound,
    Disk,
    CorruptArtifact,
    Launch,
    ProcessWait,
    InstallerProcess(i32),
    AttemptInProgress,
}

impl ErrorKind {
    /// Whether re-invoking `start()` can reasonably succeed.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Network
                | Self::CorruptArtifact
                | Self::InstallerProcess(_)
                | Self::AttemptInProgress
        )
    }
}
