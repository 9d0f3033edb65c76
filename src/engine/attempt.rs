// Installation attempt record: stage, recorded error, release and staged artifact.

use std::fmt;

use thiserror::Error;
use uuid::Uuid;

use super::staging::StagedArtifact;
use crate::error::InstallError;
use crate::source::release::ReleaseDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Idle,
    Downloading,
    Staging,
    Launching,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// Cancellation is honoured only before the installer is started.
    pub fn is_cancellable(self) -> bool {
        matches!(self, Self::Downloading | Self::Staging)
    }

    pub fn can_transition_to(self, next: Stage) -> bool {
        use Stage::*;
        match (self, next) {
            (Idle, Downloading) => true,
            (Downloading, Staging | Failed | Cancelled) => true,
            (Staging, Launching | Failed | Cancelled) => true,
            (Launching, Running | Failed) => true,
            (Running, Succeeded | Failed) => true,
            (from, Idle) => from.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Downloading => "downloading",
            Self::Staging => "staging",
            Self::Launching => "launching",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal stage transition {from} -> {to}")]
pub struct IllegalTransition {
    pub from: Stage,
    pub to: Stage,
}

/// One user-initiated install, from `start()` to its terminal stage.
#[derive(Debug)]
pub struct InstallationAttempt {
    id: String,
    stage: Stage,
    last_error: Option<InstallError>,
    release: Option<ReleaseDescriptor>,
    artifact: Option<StagedArtifact>,
    cleaned_up: bool,
}

impl InstallationAttempt {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            stage: Stage::Idle,
            last_error: None,
            release: None,
            artifact: None,
            cleaned_up: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn last_error(&self) -> Option<&InstallError> {
        self.last_error.as_ref()
    }

    pub fn release(&self) -> Option<&ReleaseDescriptor> {
        self.release.as_ref()
    }

    pub fn artifact(&self) -> Option<&StagedArtifact> {
        self.artifact.as_ref()
    }

    pub fn is_cleaned_up(&self) -> bool {
        self.cleaned_up
    }

    /// Move to `next`, returning the previous stage.
    pub fn transition(&mut self, next: Stage) -> Result<Stage, IllegalTransition> {
        if !self.stage.can_transition_to(next) {
            return Err(IllegalTransition {
                from: self.stage,
                to: next,
            });
        }
        let prev = self.stage;
        self.stage = next;
        Ok(prev)
    }

    pub fn set_release(&mut self, release: ReleaseDescriptor) {
        self.release = Some(release);
    }

    pub fn set_artifact(&mut self, artifact: StagedArtifact) {
        self.artifact = Some(artifact);
    }

    pub fn record_error(&mut self, err: InstallError) {
        self.last_error = Some(err);
    }

    /// Mark cleanup done; returns `false` if it already was.
    pub fn mark_cleaned_up(&mut self) -> bool {
        !std::mem::replace(&mut self.cleaned_up, true)
    }

    /// Drop the staged artifact reference after its file is gone.
    pub fn take_artifact(&mut self) -> Option<StagedArtifact> {
        self.artifact.take()
    }
}

impl Default for InstallationAttempt {
    fn default() -> Self {
        Self::new()
    }
}
