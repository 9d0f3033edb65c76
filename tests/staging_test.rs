mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use setup_engine::config::InstallerConfig;
use setup_engine::engine::fetcher::{DownloadSession, Fetcher};
use setup_engine::engine::staging::{StagingArea, StagingManager};
use setup_engine::error::InstallError;
use setup_engine::source::release::{Checksum, ReleaseDescriptor};

use common::*;

async fn download_into(
    manager: &StagingManager,
    descriptor: &ReleaseDescriptor,
    packages: FakePackages,
) -> (StagingArea, DownloadSession) {
    let area = manager.prepare("test", descriptor).await.unwrap();
    let fetcher = Fetcher::new(Arc::new(FakeRelease::NotFound), Arc::new(packages))
        .with_progress_interval(Duration::ZERO);
    let session = fetcher
        .download(descriptor, area.package_path(), &CancellationToken::new(), |_, _| {})
        .await
        .unwrap();
    (area, session)
}

fn assert_corrupt(err: InstallError, needle: &str) {
    match err {
        InstallError::CorruptArtifact { reason, .. } => {
            assert!(reason.contains(needle), "reason {reason:?} lacks {needle:?}")
        }
        other => panic!("expected corrupt artifact, got {other:?}"),
    }
}

#[tokio::test]
async fn test_validate_accepts_matching_package() {
    let root = tempfile::tempdir().unwrap();
    let manager = StagingManager::new(root.path());
    let data = package_bytes(300_000);
    let descriptor = descriptor_for("3.1.0", &data);
    let (mut area, session) = download_into(&manager, &descriptor, FakePackages::new(data)).await;

    let artifact = manager
        .validate(&session, &descriptor, &CancellationToken::new())
        .await
        .unwrap();
    assert!(artifact.is_validated());
    assert_eq!(artifact.path(), area.package_path());
    assert!(artifact.path().exists());
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(artifact.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755, "staged package must be executable");
    }

    assert!(manager.cleanup(&mut area));
    assert!(!artifact.path().exists());
    assert!(!manager.cleanup(&mut area), "second cleanup is a no-op");
    assert!(area.is_cleaned());
}

#[tokio::test]
async fn test_checksum_mismatch() {
    let root = tempfile::tempdir().unwrap();
    let manager = StagingManager::new(root.path());
    let data = package_bytes(4096);
    let descriptor = ReleaseDescriptor::new("3.1.0", "https://dl.example.com/App.exe")
        .with_checksum(Checksum::Sha256(sha256_hex(b"other")));
    let (_area, session) = download_into(&manager, &descriptor, FakePackages::new(data)).await;

    let err = manager
        .validate(&session, &descriptor, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_corrupt(err, "sha256 mismatch");
}

#[tokio::test]
async fn test_empty_file_is_rejected() {
    let root = tempfile::tempdir().unwrap();
    let manager = StagingManager::new(root.path());
    let descriptor = ReleaseDescriptor::new("3.1.0", "https://dl.example.com/App.exe");
    let (_area, session) =
        download_into(&manager, &descriptor, FakePackages::new(bytes::Bytes::new())).await;

    let err = manager
        .validate(&session, &descriptor, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_corrupt(err, "empty");
}

#[tokio::test]
async fn test_size_differs_from_release_listing() {
    let root = tempfile::tempdir().unwrap();
    let manager = StagingManager::new(root.path());
    let data = package_bytes(1000);
    let descriptor =
        ReleaseDescriptor::new("3.1.0", "https://dl.example.com/App.exe").with_expected_size(999);
    let (_area, session) = download_into(&manager, &descriptor, FakePackages::new(data)).await;

    let err = manager
        .validate(&session, &descriptor, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_corrupt(err, "size mismatch");
}

#[tokio::test]
async fn test_missing_file_is_rejected() {
    let root = tempfile::tempdir().unwrap();
    let manager = StagingManager::new(root.path());
    let descriptor = ReleaseDescriptor::new("3.1.0", "https://dl.example.com/App.exe");
    let (area, session) =
        download_into(&manager, &descriptor, FakePackages::new(package_bytes(64))).await;
    std::fs::remove_file(area.package_path()).unwrap();

    let err = manager
        .validate(&session, &descriptor, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_corrupt(err, "unreadable");
}

#[tokio::test]
async fn test_cancelled_session_is_not_staged() {
    let root = tempfile::tempdir().unwrap();
    let manager = StagingManager::new(root.path());
    let descriptor = ReleaseDescriptor::new("3.1.0", "https://dl.example.com/App.exe");
    let area = manager.prepare("cancelled", &descriptor).await.unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let fetcher = Fetcher::new(
        Arc::new(FakeRelease::NotFound),
        Arc::new(FakePackages::new(package_bytes(64))),
    );
    let session = fetcher
        .download(&descriptor, area.package_path(), &cancel, |_, _| {})
        .await
        .unwrap();

    let err = manager
        .validate(&session, &descriptor, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_corrupt(err, "did not complete");
}

#[tokio::test]
async fn test_config_overrides_root_and_file_name() {
    let root = tempfile::tempdir().unwrap();
    let config = InstallerConfig {
        staging_dir: Some(root.path().to_path_buf()),
        package_file_name: Some("Setup.exe".into()),
        ..InstallerConfig::default()
    };
    let manager = StagingManager::from_config(&config);
    assert_eq!(manager.root(), root.path());

    let descriptor = ReleaseDescriptor::new("3.1.0", "https://dl.example.com/App-3.1.0.exe");
    let mut area = manager.prepare("cfg", &descriptor).await.unwrap();
    assert_eq!(area.package_path(), root.path().join("setup-engine-cfg").join("Setup.exe"));
    manager.cleanup(&mut area);
    assert!(dir_is_empty(root.path()));
}
