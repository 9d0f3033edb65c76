// Installation state machine: drives one attempt from download to launch,
// then cleans up on every exit path.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::attempt::{InstallationAttempt, Stage};
use super::events::{AttemptOutcome, InstallEvent};
use super::fetcher::{DownloadSession, DownloadStatus, Fetcher};
use super::launcher::{InstallerProcess, Launcher, SystemLauncher};
use super::staging::{StagedArtifact, StagingArea, StagingManager};
use crate::config::InstallerConfig;
use crate::error::{InstallError, Result};
use crate::source::http_source::{build_client, HttpPackageSource};
use crate::source::metadata::FallbackReleaseSource;

struct ActiveAttempt {
    stage: Stage,
    cancel: CancellationToken,
}

/// Releases the single-attempt slot even if the attempt future is dropped.
struct ClaimGuard<'a> {
    active: &'a Mutex<Option<ActiveAttempt>>,
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        *self.active.lock() = None;
    }
}

enum Terminal {
    Succeeded,
    Failed(InstallError),
    Cancelled,
}

pub struct Orchestrator {
    fetcher: Fetcher,
    staging: StagingManager,
    launcher: Arc<dyn Launcher>,
    events: mpsc::UnboundedSender<InstallEvent>,
    active: Mutex<Option<ActiveAttempt>>,
}

impl Orchestrator {
    pub fn new(
        fetcher: Fetcher,
        staging: StagingManager,
        launcher: Arc<dyn Launcher>,
    ) -> (Self, mpsc::UnboundedReceiver<InstallEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let orchestrator = Self {
            fetcher,
            staging,
            launcher,
            events,
            active: Mutex::new(None),
        };
        (orchestrator, rx)
    }

    /// Wire the HTTP sources, staging root and system launcher from config.
    pub fn from_config(
        config: &InstallerConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<InstallEvent>)> {
        let client = build_client(config)?;
        let releases = Arc::new(FallbackReleaseSource::from_config(config, &client));
        let packages = Arc::new(HttpPackageSource::new(client));
        if !config.request_headers.is_empty() {
            packages.set_headers(config.request_headers.clone());
        }
        let fetcher = Fetcher::new(releases, packages).with_timing(config);
        let staging = StagingManager::from_config(config);
        info!("staging packages under {}", staging.root().display());
        Ok(Self::new(
            fetcher,
            staging,
            Arc::new(SystemLauncher::from_config(config)),
        ))
    }

    /// Current stage; `Idle` when no attempt is in flight.
    pub fn stage(&self) -> Stage {
        self.active
            .lock()
            .as_ref()
            .map_or(Stage::Idle, |a| a.stage)
    }

    pub fn is_busy(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Run one installation attempt to its terminal state.
    ///
    /// Fails only with [`InstallError::AttemptInProgress`]; every other
    /// failure is reported through the returned outcome.
    pub async fn start(&self) -> Result<AttemptOutcome> {
        let cancel = {
            let mut active = self.active.lock();
            if active.is_some() {
                warn!("start rejected: an attempt is already in progress");
                return Err(InstallError::AttemptInProgress);
            }
            let cancel = CancellationToken::new();
            *active = Some(ActiveAttempt {
                stage: Stage::Idle,
                cancel: cancel.clone(),
            });
            cancel
        };
        let _claim = ClaimGuard {
            active: &self.active,
        };

        let mut attempt = InstallationAttempt::new();
        info!("attempt {} started", attempt.id());

        let mut area: Option<StagingArea> = None;
        let terminal = self.run(&mut attempt, &mut area, &cancel).await;
        Ok(self.finish(&mut attempt, area.as_mut(), terminal))
    }

    /// Request cancellation; honoured only while downloading or staging.
    pub fn cancel(&self) -> bool {
        let active = self.active.lock();
        match active.as_ref() {
            Some(a) if a.stage.is_cancellable() => {
                info!("cancellation requested during {}", a.stage);
                a.cancel.cancel();
                true
            }
            Some(a) => {
                warn!("cancel ignored during {}", a.stage);
                false
            }
            None => {
                debug!("cancel ignored: no attempt in progress");
                false
            }
        }
    }

    async fn run(
        &self,
        attempt: &mut InstallationAttempt,
        area: &mut Option<StagingArea>,
        cancel: &CancellationToken,
    ) -> Terminal {
        self.transition(attempt, Stage::Downloading);
        self.status("Resolving latest release...");

        let descriptor = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Terminal::Cancelled,
            resolved = self.fetcher.resolve_latest() => match resolved {
                Ok(descriptor) => descriptor,
                Err(e) => return Terminal::Failed(e),
            },
        };
        info!(
            "attempt {} resolved release {} url={}",
            attempt.id(),
            descriptor.version,
            descriptor.download_url
        );
        attempt.set_release(descriptor.clone());

        let package_path = match self.staging.prepare(attempt.id(), &descriptor).await {
            Ok(prepared) => area.insert(prepared).package_path().to_path_buf(),
            Err(e) => return Terminal::Failed(e),
        };

        let file_name = package_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.status(format!("Downloading {} {}...", file_name, descriptor.version));

        let session = match self
            .fetcher
            .download(&descriptor, &package_path, cancel, |received, total| {
                self.on_download_progress(received, total)
            })
            .await
        {
            Ok(session) if session.status() == DownloadStatus::Cancelled => {
                return Terminal::Cancelled
            }
            Ok(session) => session,
            Err(e) => return Terminal::Failed(e),
        };

        let artifact = match self.on_download_complete(attempt, &session, cancel).await {
            Ok(artifact) => artifact,
            Err(terminal) => return terminal,
        };

        let mut process = match self.on_staged(attempt, artifact, cancel).await {
            Ok(process) => process,
            Err(terminal) => return terminal,
        };

        match process.await_completion().await {
            Ok(code) => self.on_launch_result(code),
            Err(e) => Terminal::Failed(e),
        }
    }

    fn on_download_progress(&self, received: u64, total: Option<u64>) {
        self.emit(InstallEvent::Progress { received, total });
    }

    async fn on_download_complete(
        &self,
        attempt: &mut InstallationAttempt,
        session: &DownloadSession,
        cancel: &CancellationToken,
    ) -> std::result::Result<StagedArtifact, Terminal> {
        self.transition(attempt, Stage::Staging);
        self.status("Verifying download...");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Terminal::Cancelled),
            validated = self.staging.validate(session, session.descriptor(), cancel) => {
                validated.map_err(Terminal::Failed)
            }
        }
    }

    async fn on_staged(
        &self,
        attempt: &mut InstallationAttempt,
        artifact: StagedArtifact,
        cancel: &CancellationToken,
    ) -> std::result::Result<Box<dyn InstallerProcess>, Terminal> {
        if !artifact.is_validated() {
            return Err(Terminal::Failed(InstallError::corrupt(
                artifact.path(),
                "artifact was not validated",
            )));
        }
        let path = artifact.path().to_path_buf();
        attempt.set_artifact(artifact);

        if !self.begin_launch(attempt, cancel) {
            return Err(Terminal::Cancelled);
        }
        self.status("Launching installer...");

        let process = self
            .launcher
            .launch(&path)
            .await
            .map_err(Terminal::Failed)?;

        self.transition(attempt, Stage::Running);
        self.status("Waiting for installer to finish...");
        Ok(process)
    }

    fn on_launch_result(&self, exit_code: i32) -> Terminal {
        info!("installer exited with code {}", exit_code);
        if exit_code == 0 {
            Terminal::Succeeded
        } else {
            Terminal::Failed(InstallError::InstallerProcess(exit_code))
        }
    }

    /// Enter `Launching` unless a cancel already landed; checked under the
    /// same lock `cancel()` takes, so no cancel is accepted afterwards.
    fn begin_launch(&self, attempt: &mut InstallationAttempt, cancel: &CancellationToken) -> bool {
        let mut active = self.active.lock();
        if cancel.is_cancelled() {
            return false;
        }
        self.apply(&mut active, attempt, Stage::Launching);
        true
    }

    fn finish(
        &self,
        attempt: &mut InstallationAttempt,
        area: Option<&mut StagingArea>,
        terminal: Terminal,
    ) -> AttemptOutcome {
        let (stage, outcome) = match terminal {
            Terminal::Succeeded => {
                let version = attempt
                    .release()
                    .map(|r| r.version.clone())
                    .unwrap_or_default();
                (Stage::Succeeded, AttemptOutcome::Succeeded { version })
            }
            Terminal::Failed(e) => {
                let outcome = AttemptOutcome::Failed {
                    kind: e.kind(),
                    message: e.to_string(),
                };
                attempt.record_error(e);
                (Stage::Failed, outcome)
            }
            Terminal::Cancelled => (Stage::Cancelled, AttemptOutcome::Cancelled),
        };

        self.transition(attempt, stage);
        if let Some(e) = attempt.last_error() {
            error!("attempt {} failed: {}", attempt.id(), e);
        }
        self.cleanup(attempt, area);

        match &outcome {
            AttemptOutcome::Succeeded { .. } => self.status("Installation complete!"),
            AttemptOutcome::Failed { message, .. } => self.status(format!("Error: {}", message)),
            AttemptOutcome::Cancelled => self.status("Installation cancelled"),
        }
        self.emit(InstallEvent::Finished(outcome.clone()));

        self.transition(attempt, Stage::Idle);
        outcome
    }

    /// Remove staged files once per attempt; later calls are no-ops.
    fn cleanup(&self, attempt: &mut InstallationAttempt, area: Option<&mut StagingArea>) {
        if !attempt.mark_cleaned_up() {
            debug!("cleanup already ran for attempt {}", attempt.id());
            return;
        }
        if let Some(artifact) = attempt.artifact() {
            debug!("releasing staged package {}", artifact.path().display());
        }
        if let Some(area) = area {
            self.staging.cleanup(area);
        }
        attempt.take_artifact();
        self.emit(InstallEvent::CleanedUp {
            attempt_id: attempt.id().to_string(),
        });
    }

    fn transition(&self, attempt: &mut InstallationAttempt, next: Stage) {
        let mut active = self.active.lock();
        self.apply(&mut active, attempt, next);
    }

    fn apply(
        &self,
        active: &mut Option<ActiveAttempt>,
        attempt: &mut InstallationAttempt,
        next: Stage,
    ) {
        match attempt.transition(next) {
            Ok(prev) => {
                if let Some(a) = active.as_mut() {
                    a.stage = next;
                }
                info!("attempt {} stage {} -> {}", attempt.id(), prev, next);
                self.emit(InstallEvent::StageChanged { from: prev, to: next });
            }
            Err(e) => error!("attempt {}: {}", attempt.id(), e),
        }
    }

    fn status(&self, message: impl Into<String>) {
        let message = message.into();
        debug!("status: {}", message);
        self.emit(InstallEvent::Status(message));
    }

    fn emit(&self, event: InstallEvent) {
        // Receiver gone means nobody is watching; the attempt still runs.
        let _ = self.events.send(event);
    }
}
