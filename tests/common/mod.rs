#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, StreamExt};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, Notify};

use setup_engine::engine::events::InstallEvent;
use setup_engine::engine::fetcher::Fetcher;
use setup_engine::engine::launcher::{InstallerProcess, Launcher};
use setup_engine::engine::orchestrator::Orchestrator;
use setup_engine::engine::staging::StagingManager;
use setup_engine::error::{InstallError, Result};
use setup_engine::source::release::{Checksum, ReleaseDescriptor};
use setup_engine::source::traits::{PackageSource, PackageStream, ReleaseSource};

pub const CHUNK_SIZE: usize = 64 * 1024;

/// Installer-looking bytes: a PE stub followed by a repeating pattern.
pub fn package_bytes(len: usize) -> Bytes {
    let mut data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    if len >= 2 {
        data[..2].copy_from_slice(b"MZ");
    }
    Bytes::from(data)
}

pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

pub fn descriptor_for(version: &str, data: &[u8]) -> ReleaseDescriptor {
    ReleaseDescriptor::new(
        version,
        format!("https://dl.example.com/releases/App-Setup-{}.exe", version),
    )
    .with_expected_size(data.len() as u64)
    .with_checksum(Checksum::Sha256(sha256_hex(data)))
}

pub enum FakeRelease {
    Found(ReleaseDescriptor),
    NetworkDown,
    NotFound,
}

#[async_trait]
impl ReleaseSource for FakeRelease {
    fn name(&self) -> &str {
        "fake"
    }

    async fn resolve_latest(&self) -> Result<ReleaseDescriptor> {
        match self {
            Self::Found(d) => Ok(d.clone()),
            Self::NetworkDown => Err(InstallError::Network("connection refused".into())),
            Self::NotFound => Err(InstallError::ReleaseNotFound("no releases".into())),
        }
    }
}

pub struct FakePackages {
    data: Bytes,
    fail_at: Option<usize>,
    chunk_delay: Option<Duration>,
    advertise_length: bool,
    opened: AtomicUsize,
}

impl FakePackages {
    pub fn new(data: Bytes) -> Self {
        Self {
            data,
            fail_at: None,
            chunk_delay: None,
            advertise_length: true,
            opened: AtomicUsize::new(0),
        }
    }

    /// Drop the connection once `offset` bytes have been sent.
    pub fn fail_at(mut self, offset: usize) -> Self {
        self.fail_at = Some(offset);
        self
    }

    pub fn chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    pub fn without_length(mut self) -> Self {
        self.advertise_length = false;
        self
    }

    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PackageSource for FakePackages {
    async fn open(&self, _url: &str) -> Result<PackageStream> {
        self.opened.fetch_add(1, Ordering::SeqCst);

        let limit = self.fail_at.unwrap_or(self.data.len()).min(self.data.len());
        let mut items: Vec<Result<Bytes>> = Vec::new();
        let mut offset = 0;
        while offset < limit {
            let end = (offset + CHUNK_SIZE).min(limit);
            items.push(Ok(self.data.slice(offset..end)));
            offset = end;
        }
        if self.fail_at.is_some() {
            items.push(Err(InstallError::Network("connection reset by peer".into())));
        }

        let delay = self.chunk_delay;
        let body = stream::iter(items)
            .then(move |item| async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                item
            })
            .boxed();

        Ok(PackageStream {
            content_length: self.advertise_length.then_some(self.data.len() as u64),
            body,
        })
    }
}

/// What the launcher saw when it was asked to start a package.
#[derive(Debug, Clone)]
pub struct LaunchRecord {
    pub path: PathBuf,
    pub existed: bool,
    pub size: u64,
}

pub struct FakeLauncher {
    exit_code: i32,
    refuse: bool,
    hold: Option<Arc<Notify>>,
    pub launched: Arc<Notify>,
    pub records: Arc<Mutex<Vec<LaunchRecord>>>,
}

impl FakeLauncher {
    pub fn exiting_with(exit_code: i32) -> Self {
        Self {
            exit_code,
            refuse: false,
            hold: None,
            launched: Arc::new(Notify::new()),
            records: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Fail every launch the way the OS does for a non-executable file.
    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::exiting_with(0)
        }
    }

    /// Keep the process "running" until `release` is notified.
    pub fn held_by(mut self, release: Arc<Notify>) -> Self {
        self.hold = Some(release);
        self
    }

    pub fn launch_count(&self) -> usize {
        self.records.lock().len()
    }
}

#[async_trait]
impl Launcher for FakeLauncher {
    async fn launch(&self, artifact_path: &Path) -> Result<Box<dyn InstallerProcess>> {
        let meta = std::fs::metadata(artifact_path).ok();
        self.records.lock().push(LaunchRecord {
            path: artifact_path.to_path_buf(),
            existed: meta.is_some(),
            size: meta.map_or(0, |m| m.len()),
        });

        if self.refuse {
            return Err(InstallError::Launch {
                path: artifact_path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "not executable"),
            });
        }
        self.launched.notify_one();
        Ok(Box::new(FakeProcess {
            exit_code: self.exit_code,
            hold: self.hold.clone(),
        }))
    }
}

struct FakeProcess {
    exit_code: i32,
    hold: Option<Arc<Notify>>,
}

#[async_trait]
impl InstallerProcess for FakeProcess {
    fn id(&self) -> Option<u32> {
        Some(4242)
    }

    async fn await_completion(&mut self) -> Result<i32> {
        if let Some(hold) = &self.hold {
            hold.notified().await;
        }
        Ok(self.exit_code)
    }
}

pub fn build_orchestrator(
    release: FakeRelease,
    packages: Arc<FakePackages>,
    launcher: Arc<FakeLauncher>,
    staging_root: &Path,
) -> (Orchestrator, mpsc::UnboundedReceiver<InstallEvent>) {
    let fetcher = Fetcher::new(Arc::new(release), packages)
        .with_progress_interval(Duration::from_millis(1));
    Orchestrator::new(fetcher, StagingManager::new(staging_root), launcher)
}

pub fn drain(rx: &mut mpsc::UnboundedReceiver<InstallEvent>) -> Vec<InstallEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn stages(events: &[InstallEvent]) -> Vec<setup_engine::engine::attempt::Stage> {
    events
        .iter()
        .filter_map(|e| match e {
            InstallEvent::StageChanged { to, .. } => Some(*to),
            _ => None,
        })
        .collect()
}

pub fn progress(events: &[InstallEvent]) -> Vec<u64> {
    events
        .iter()
        .filter_map(|e| match e {
            InstallEvent::Progress { received, .. } => Some(*received),
            _ => None,
        })
        .collect()
}

pub fn cleaned_up_count(events: &[InstallEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, InstallEvent::CleanedUp { .. }))
        .count()
}

pub fn dir_is_empty(path: &Path) -> bool {
    std::fs::read_dir(path).map_or(true, |mut entries| entries.next().is_none())
}
