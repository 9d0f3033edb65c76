// Release resolution and streamed package download with cooperative cancellation.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::progress::ProgressMeter;
use crate::config::{InstallerConfig, WRITE_BUFFER_BYTES};
use crate::error::{InstallError, Result};
use crate::source::release::ReleaseDescriptor;
use crate::source::traits::{ByteStream, PackageSource, PackageStream, ReleaseSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStatus {
    Pending,
    InProgress,
    Complete,
    Failed,
    Cancelled,
}

/// One download of a release package to a destination path.
#[derive(Debug, Clone)]
pub struct DownloadSession {
    descriptor: ReleaseDescriptor,
    destination: PathBuf,
    bytes_received: u64,
    total_bytes: Option<u64>,
    status: DownloadStatus,
}

impl DownloadSession {
    fn new(descriptor: ReleaseDescriptor, destination: PathBuf) -> Self {
        Self {
            descriptor,
            destination,
            bytes_received: 0,
            total_bytes: None,
            status: DownloadStatus::Pending,
        }
    }

    pub fn descriptor(&self) -> &ReleaseDescriptor {
        &self.descriptor
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    pub fn total_bytes(&self) -> Option<u64> {
        self.total_bytes
    }

    pub fn status(&self) -> DownloadStatus {
        self.status
    }

    /// Complete and, when the total is known, every byte arrived.
    pub fn is_complete(&self) -> bool {
        self.status == DownloadStatus::Complete
            && self.total_bytes.map_or(true, |t| t == self.bytes_received)
    }

    fn fail(&mut self, err: InstallError) -> InstallError {
        self.status = DownloadStatus::Failed;
        warn!(
            "download failed at {}/{} bytes: {}",
            self.bytes_received,
            total_label(self.total_bytes),
            err
        );
        err
    }
}

fn total_label(total: Option<u64>) -> String {
    total.map_or_else(|| "?".to_string(), |t| t.to_string())
}

fn overall_timeout() -> InstallError {
    InstallError::Network("download exceeded the overall time limit".into())
}

pub struct Fetcher {
    releases: Arc<dyn ReleaseSource>,
    packages: Arc<dyn PackageSource>,
    progress_interval: Duration,
    chunk_timeout: Duration,
    download_timeout: Option<Duration>,
}

impl Fetcher {
    pub fn new(releases: Arc<dyn ReleaseSource>, packages: Arc<dyn PackageSource>) -> Self {
        let defaults = InstallerConfig::default();
        Self {
            releases,
            packages,
            progress_interval: defaults.progress_interval(),
            chunk_timeout: defaults.chunk_timeout(),
            download_timeout: defaults.download_timeout(),
        }
    }

    pub fn with_timing(mut self, config: &InstallerConfig) -> Self {
        self.progress_interval = config.progress_interval();
        self.chunk_timeout = config.chunk_timeout();
        self.download_timeout = config.download_timeout();
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn with_chunk_timeout(mut self, timeout: Duration) -> Self {
        self.chunk_timeout = timeout;
        self
    }

    pub async fn resolve_latest(&self) -> Result<ReleaseDescriptor> {
        self.releases.resolve_latest().await
    }

    /// Stream the package to `destination`.
    ///
    /// Returns a session whose status is `Complete` or `Cancelled`; every
    /// other outcome is an error and leaves any partial file on disk.
    pub async fn download<F>(
        &self,
        descriptor: &ReleaseDescriptor,
        destination: &Path,
        cancel: &CancellationToken,
        mut on_progress: F,
    ) -> Result<DownloadSession>
    where
        F: FnMut(u64, Option<u64>) + Send,
    {
        let mut session = DownloadSession::new(descriptor.clone(), destination.to_path_buf());
        let deadline = self.download_timeout.map(|t| Instant::now() + t);

        let stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("download cancelled before request url={}", descriptor.download_url);
                session.status = DownloadStatus::Cancelled;
                return Ok(session);
            }
            opened = self.open_package(&descriptor.download_url, deadline) => {
                opened.map_err(|e| session.fail(e))?
            }
        };

        session.total_bytes = stream.content_length.or(descriptor.expected_size);
        session.status = DownloadStatus::InProgress;
        info!(
            "download started url={} total={} dest={}",
            descriptor.download_url,
            total_label(session.total_bytes),
            destination.display()
        );

        let file = File::create(destination)
            .await
            .map_err(|e| session.fail(InstallError::disk(destination, e)))?;
        let mut writer = BufWriter::with_capacity(WRITE_BUFFER_BYTES, file);
        let mut body = stream.body;
        let mut meter = ProgressMeter::new(self.progress_interval);

        if meter.should_report(0) {
            on_progress(0, session.total_bytes);
        }

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let _ = writer.flush().await;
                    info!(
                        "download cancelled at {}/{} bytes",
                        session.bytes_received,
                        total_label(session.total_bytes)
                    );
                    session.status = DownloadStatus::Cancelled;
                    return Ok(session);
                }
                next = self.next_chunk(&mut body, deadline) => next,
            };

            let chunk = match next {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => {
                    let _ = writer.flush().await;
                    return Err(session.fail(e));
                }
            };

            if let Err(e) = writer.write_all(&chunk).await {
                return Err(session.fail(InstallError::disk(destination, e)));
            }
            session.bytes_received += chunk.len() as u64;

            if let Some(total) = session.total_bytes {
                if session.bytes_received > total {
                    let _ = writer.flush().await;
                    let err = InstallError::Network(format!(
                        "received {} bytes, more than the advertised {}",
                        session.bytes_received, total
                    ));
                    return Err(session.fail(err));
                }
            }

            if meter.should_report(session.bytes_received) {
                debug!(
                    "download progress received={} total={} bps={}",
                    session.bytes_received,
                    total_label(session.total_bytes),
                    meter.bytes_per_second(session.bytes_received)
                );
                on_progress(session.bytes_received, session.total_bytes);
            }
        }

        if let Err(e) = writer.flush().await {
            return Err(session.fail(InstallError::disk(destination, e)));
        }
        if let Err(e) = writer.get_mut().sync_all().await {
            return Err(session.fail(InstallError::disk(destination, e)));
        }

        if let Some(total) = session.total_bytes {
            if session.bytes_received < total {
                let err = InstallError::Network(format!(
                    "connection closed at {} of {} bytes",
                    session.bytes_received, total
                ));
                return Err(session.fail(err));
            }
        }

        // A cancel that raced the last chunk still wins.
        if cancel.is_cancelled() {
            info!("download cancelled after last chunk");
            session.status = DownloadStatus::Cancelled;
            return Ok(session);
        }

        if meter.finish(session.bytes_received) {
            on_progress(session.bytes_received, session.total_bytes);
        }
        session.status = DownloadStatus::Complete;
        info!(
            "download complete bytes={} elapsed_ms={} bps={}",
            session.bytes_received,
            meter.elapsed().as_millis(),
            meter.bytes_per_second(session.bytes_received)
        );
        Ok(session)
    }

    /// Open the package stream. A server that accepts the request but never
    /// answers is bounded by the chunk timeout and the overall deadline.
    async fn open_package(&self, url: &str, deadline: Option<Instant>) -> Result<PackageStream> {
        let open = tokio::time::timeout(self.chunk_timeout, self.packages.open(url));
        let opened = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, open)
                .await
                .map_err(|_| overall_timeout())?,
            None => open.await,
        };
        opened.map_err(|_| {
            InstallError::Network(format!("no response received for {:?}", self.chunk_timeout))
        })?
    }

    async fn next_chunk(
        &self,
        body: &mut ByteStream,
        deadline: Option<Instant>,
    ) -> Result<Option<Bytes>> {
        let read = tokio::time::timeout(self.chunk_timeout, body.next());
        let item = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, read).await {
                Ok(item) => item,
                Err(_) => return Err(overall_timeout()),
            },
            None => read.await,
        };

        match item {
            Ok(Some(Ok(chunk))) => Ok(Some(chunk)),
            Ok(Some(Err(e))) => Err(e),
            Ok(None) => Ok(None),
            Err(_) => Err(InstallError::Network(format!(
                "no data received for {:?}",
                self.chunk_timeout
            ))),
        }
    }
}
