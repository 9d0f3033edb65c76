use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

use crate::config::InstallerConfig;
use crate::engine::attempt::Stage;
use crate::engine::events::{AttemptOutcome, InstallEvent};
use crate::engine::orchestrator::Orchestrator;
use crate::error::Result;

/// Handle the UI holds: starts attempts in the background, cancels them and
/// hands out the event stream.
#[derive(Clone)]
pub struct InstallerService {
    orchestrator: Arc<Orchestrator>,
    events: Arc<Mutex<Option<UnboundedReceiver<InstallEvent>>>>,
}

impl InstallerService {
    pub fn new(config: &InstallerConfig) -> Result<Self> {
        let (orchestrator, events) = Orchestrator::from_config(config)?;
        Ok(Self::from_orchestrator(orchestrator, events))
    }

    pub fn from_orchestrator(
        orchestrator: Orchestrator,
        events: UnboundedReceiver<InstallEvent>,
    ) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            events: Arc::new(Mutex::new(Some(events))),
        }
    }

    /// The event stream; only the first caller gets it.
    pub fn take_events(&self) -> Option<UnboundedReceiver<InstallEvent>> {
        self.events.lock().take()
    }

    /// Spawn an attempt on the runtime and return its handle.
    pub fn start(&self) -> JoinHandle<Result<AttemptOutcome>> {
        let orchestrator = Arc::clone(&self.orchestrator);
        tokio::spawn(async move { orchestrator.start().await })
    }

    pub fn cancel(&self) -> bool {
        self.orchestrator.cancel()
    }

    pub fn stage(&self) -> Stage {
        self.orchestrator.stage()
    }

    pub fn is_busy(&self) -> bool {
        self.orchestrator.is_busy()
    }
}
