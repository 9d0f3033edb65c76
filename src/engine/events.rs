use super::attempt::Stage;
use crate::error::ErrorKind;

/// How an attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Succeeded { version: String },
    Failed { kind: ErrorKind, message: String },
    Cancelled,
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Failed { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

/// Notifications for the UI collaborator, in emission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallEvent {
    StageChanged { from: Stage, to: Stage },
    /// Byte counts never decrease within one download.
    Progress { received: u64, total: Option<u64> },
    Status(String),
    CleanedUp { attempt_id: String },
    Finished(AttemptOutcome),
}

impl InstallEvent {
    /// Fraction complete in `0.0..=1.0`, when the total is known.
    pub fn progress_fraction(&self) -> Option<f64> {
        match self {
            Self::Progress {
                received,
                total: Some(total),
            } if *total > 0 => Some((*received as f64 / *total as f64).min(1.0)),
            _ => None,
        }
    }
}
