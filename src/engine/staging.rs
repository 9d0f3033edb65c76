// Per-attempt staging directory: validation of the downloaded package and its cleanup.

use std::io::{self, Read};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::fetcher::{DownloadSession, DownloadStatus};
use crate::config::{InstallerConfig, DEFAULT_PACKAGE_FILE_NAME, STAGING_DIR_PREFIX};
use crate::detect::package::{detect_package, SNIFF_BYTES};
use crate::error::{InstallError, Result};
use crate::source::release::{Checksum, ReleaseDescriptor};

const HASH_BUFFER_BYTES: usize = 1024 * 1024;

/// A downloaded package that passed validation and may be launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedArtifact {
    path: PathBuf,
    validated: bool,
}

impl StagedArtifact {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_validated(&self) -> bool {
        self.validated
    }
}

/// The temporary directory holding one attempt's package.
///
/// Removed by [`StagingArea::cleanup`]; if the area is dropped first (the
/// attempt task was aborted) it removes itself.
#[derive(Debug)]
pub struct StagingArea {
    dir: PathBuf,
    package_path: PathBuf,
    cleaned: bool,
}

impl StagingArea {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn package_path(&self) -> &Path {
        &self.package_path
    }

    pub fn is_cleaned(&self) -> bool {
        self.cleaned
    }

    /// Delete the package and the directory. Returns `false` if already done.
    ///
    /// Missing files are fine; other failures are logged and swallowed.
    pub fn cleanup(&mut self) -> bool {
        if self.cleaned {
            debug!("staging area {} already cleaned", self.dir.display());
            return false;
        }
        self.cleaned = true;

        match std::fs::remove_file(&self.package_path) {
            Ok(()) => debug!("removed {}", self.package_path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("failed to remove {}: {}", self.package_path.display(), e),
        }
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => info!("staging area {} removed", self.dir.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("failed to remove staging dir {}: {}", self.dir.display(), e),
        }
        true
    }
}

impl Drop for StagingArea {
    fn drop(&mut self) {
        if !self.cleaned {
            warn!(
                "staging area {} dropped before cleanup, removing",
                self.dir.display()
            );
            self.cleanup();
        }
    }
}

pub struct StagingManager {
    root: PathBuf,
    package_file_name: Option<String>,
}

impl StagingManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            package_file_name: None,
        }
    }

    pub fn from_config(config: &InstallerConfig) -> Self {
        Self {
            root: config.staging_root(),
            package_file_name: config.package_file_name.clone(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the attempt's directory and decide where the package goes.
    pub async fn prepare(
        &self,
        attempt_id: &str,
        descriptor: &ReleaseDescriptor,
    ) -> Result<StagingArea> {
        let dir = self.root.join(format!("{}{}", STAGING_DIR_PREFIX, attempt_id));
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| InstallError::disk(&dir, e))?;

        let file_name = self
            .package_file_name
            .clone()
            .or_else(|| descriptor.file_name())
            .filter(|name| is_plain_file_name(name))
            .unwrap_or_else(|| DEFAULT_PACKAGE_FILE_NAME.to_string());
        let package_path = dir.join(file_name);

        debug!("staging area prepared {}", package_path.display());
        Ok(StagingArea {
            dir,
            package_path,
            cleaned: false,
        })
    }

    /// Check a finished download and turn it into a launchable artifact.
    pub async fn validate(
        &self,
        session: &DownloadSession,
        descriptor: &ReleaseDescriptor,
        cancel: &CancellationToken,
    ) -> Result<StagedArtifact> {
        let path = session.destination();

        if session.status() != DownloadStatus::Complete {
            return Err(InstallError::corrupt(
                path,
                format!("download did not complete (status {:?})", session.status()),
            ));
        }

        let size = tokio::fs::metadata(path)
            .await
            .map_err(|e| InstallError::corrupt(path, format!("staged file unreadable: {}", e)))?
            .len();
        if size == 0 {
            return Err(InstallError::corrupt(path, "downloaded file is empty"));
        }

        if let Some(total) = session.total_bytes() {
            if session.bytes_received() != total || size != total {
                return Err(InstallError::corrupt(
                    path,
                    format!(
                        "size mismatch: expected {} bytes, received {}, on disk {}",
                        total,
                        session.bytes_received(),
                        size
                    ),
                ));
            }
        }
        if let Some(expected) = descriptor.expected_size {
            if size != expected {
                return Err(InstallError::corrupt(
                    path,
                    format!("size mismatch: release lists {} bytes, on disk {}", expected, size),
                ));
            }
        }

        let format = sniff(path).await?;
        if format.is_rejected() {
            return Err(InstallError::corrupt(
                path,
                format!("not an installer package ({:?})", format),
            ));
        }
        debug!("staged package format {:?}", format);

        if let Some(checksum) = &descriptor.checksum {
            verify_checksum(path, checksum, cancel).await?;
        }
        mark_executable(path).await?;

        info!("artifact validated {} ({} bytes)", path.display(), size);
        Ok(StagedArtifact {
            path: path.to_path_buf(),
            validated: true,
        })
    }

    /// Remove an attempt's staged files; see [`StagingArea::cleanup`].
    pub fn cleanup(&self, area: &mut StagingArea) -> bool {
        area.cleanup()
    }
}

fn is_plain_file_name(name: &str) -> bool {
    let trimmed = name.trim();
    !trimmed.is_empty()
        && Path::new(trimmed).file_name().and_then(|n| n.to_str()) == Some(trimmed)
}

async fn sniff(path: &Path) -> Result<crate::detect::package::PackageFormat> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| InstallError::corrupt(path, format!("staged file unreadable: {}", e)))?;
    let mut header = Vec::with_capacity(SNIFF_BYTES);
    file.take(SNIFF_BYTES as u64)
        .read_to_end(&mut header)
        .await
        .map_err(|e| InstallError::corrupt(path, format!("staged file unreadable: {}", e)))?;
    Ok(detect_package(&header))
}

async fn verify_checksum(
    path: &Path,
    checksum: &Checksum,
    cancel: &CancellationToken,
) -> Result<()> {
    let owned = path.to_path_buf();
    let token = cancel.clone();
    let actual = match checksum {
        Checksum::Sha256(_) => tokio::task::spawn_blocking(move || sha256_file(&owned, &token))
            .await
            .map_err(|e| InstallError::corrupt(path, format!("checksum task failed: {}", e)))?
            .map_err(|e| InstallError::corrupt(path, format!("checksum read failed: {}", e)))?,
    };

    if actual != checksum.expected_hex() {
        return Err(InstallError::corrupt(
            path,
            format!(
                "{} mismatch: expected {}, got {}",
                checksum.algorithm(),
                checksum.expected_hex(),
                actual
            ),
        ));
    }
    debug!("checksum verified {}", checksum);
    Ok(())
}

/// Hex SHA-256 of a file; stops early with `Interrupted` once `cancel` fires.
pub fn sha256_file(path: &Path, cancel: &CancellationToken) -> io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_BUFFER_BYTES];
    loop {
        if cancel.is_cancelled() {
            return Err(io::Error::new(io::ErrorKind::Interrupted, "checksum cancelled"));
        }
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Give the owner, group and others execute permission (`0o755`).
#[cfg(unix)]
async fn mark_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .await
        .map_err(|e| InstallError::disk(path, e))
}

#[cfg(not(unix))]
async fn mark_executable(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_of_known_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        std::fs::write(&path, b"test").unwrap();
        let hex = sha256_file(&path, &CancellationToken::new()).unwrap();
        assert_eq!(
            hex,
            "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08"
        );
    }

    #[test]
    fn sha256_stops_when_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        std::fs::write(&path, b"test").unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let err = sha256_file(&path, &token).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Interrupted);
    }

    #[test]
    fn plain_file_names_only() {
        assert!(is_plain_file_name("Setup.exe"));
        assert!(!is_plain_file_name("../Setup.exe"));
        assert!(!is_plain_file_name("a/b.exe"));
        assert!(!is_plain_file_name("  "));
    }

    #[tokio::test]
    async fn prepare_derives_file_name_from_url() {
        let root = tempfile::tempdir().unwrap();
        let manager = StagingManager::new(root.path());
        let d = ReleaseDescriptor::new("2.0.0", "https://dl.example.com/files/App.Setup.2.0.0.exe");
        let mut area = manager.prepare("abc", &d).await.unwrap();
        assert!(area.dir().is_dir());
        assert_eq!(area.dir(), root.path().join("setup-engine-abc"));
        assert_eq!(area.package_path(), area.dir().join("App.Setup.2.0.0.exe"));
        assert!(manager.cleanup(&mut area));
        assert!(!area.dir().exists());
    }

    #[tokio::test]
    async fn dropped_area_removes_itself() {
        let root = tempfile::tempdir().unwrap();
        let manager = StagingManager::new(root.path());
        let d = ReleaseDescriptor::new("latest", "https://dl.example.com/download");
        let area = manager.prepare("dropped", &d).await.unwrap();
        let dir = area.dir().to_path_buf();
        assert_eq!(area.package_path(), dir.join(DEFAULT_PACKAGE_FILE_NAME));
        std::fs::write(area.package_path(), b"partial").unwrap();
        drop(area);
        assert!(!dir.exists());
    }
}
