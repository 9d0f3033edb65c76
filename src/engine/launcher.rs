use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::{debug, info};

use crate::config::InstallerConfig;
use crate::error::{InstallError, Result};

/// A started installer process. Only its exit code is observable.
#[async_trait]
pub trait InstallerProcess: Send {
    fn id(&self) -> Option<u32>;

    /// Wait for the process to exit and return its exit code.
    async fn await_completion(&mut self) -> Result<i32>;
}

/// Starts staged installer packages.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self, artifact_path: &Path) -> Result<Box<dyn InstallerProcess>>;
}

/// Runs the package as an OS process with detached stdio.
pub struct SystemLauncher {
    args: Vec<String>,
}

impl SystemLauncher {
    pub fn new(args: Vec<String>) -> Self {
        Self { args }
    }

    pub fn from_config(config: &InstallerConfig) -> Self {
        Self::new(config.installer_args.clone())
    }
}

impl Default for SystemLauncher {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl Launcher for SystemLauncher {
    async fn launch(&self, artifact_path: &Path) -> Result<Box<dyn InstallerProcess>> {
        let mut cmd = Command::new(artifact_path);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false);

        let child = cmd.spawn().map_err(|source| InstallError::Launch {
            path: artifact_path.to_path_buf(),
            source,
        })?;
        info!(
            "installer launched pid={:?} path={}",
            child.id(),
            artifact_path.display()
        );
        Ok(Box::new(ChildProcess { child }))
    }
}

struct ChildProcess {
    child: Child,
}

#[async_trait]
impl InstallerProcess for ChildProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn await_completion(&mut self) -> Result<i32> {
        let status = self
            .child
            .wait()
            .await
            .map_err(|e| InstallError::ProcessWait(e.to_string()))?;
        debug!("installer exited status={}", status);
        status.code().ok_or_else(|| {
            InstallError::ProcessWait(format!(
                "installer terminated without an exit code ({})",
                status
            ))
        })
    }
}
