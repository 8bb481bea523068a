//! Inner Docker daemon process management.

use std::sync::Mutex;

use anyhow::Result;
use tokio::process::Child;

use crate::application::ports::{CommandRunner, DaemonLauncher};

/// Spawns `dockerd` in the background and keeps its handle.
///
/// Dropping the launcher kills the daemon.
pub struct DockerdLauncher<R: CommandRunner> {
    runner: R,
    args: Vec<String>,
    child: Mutex<Option<Child>>,
}

impl<R: CommandRunner> DockerdLauncher<R> {
    pub fn new(runner: R, bridge_cidr: Option<&str>, gpu_runtime: Option<&str>) -> Self {
        Self {
            runner,
            args: dockerd_args(bridge_cidr, gpu_runtime),
            child: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Kill the daemon if this launcher started it.
    ///
    /// # Errors
    ///
    /// Returns an error if the process could not be signalled.
    pub async fn shutdown(&self) -> Result<()> {
        let child = self
            .child
            .lock()
            .map_err(|_| anyhow::anyhow!("dockerd handle lock poisoned"))?
            .take();
        if let Some(mut child) = child {
            tracing::info!("stopping docker daemon");
            child.kill().await?;
        }
        Ok(())
    }
}

/// Arguments passed to `dockerd`.
#[must_use]
pub fn dockerd_args(bridge_cidr: Option<&str>, gpu_runtime: Option<&str>) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(cidr) = bridge_cidr {
        args.push(format!("--bip={cidr}"));
    }
    if let Some(runtime) = gpu_runtime {
        args.push(format!("--add-runtime={runtime}={runtime}-container-runtime"));
    }
    args
}

impl<R: CommandRunner> DaemonLauncher for DockerdLauncher<R> {
    async fn launch(&self) -> Result<()> {
        let mut slot = self
            .child
            .lock()
            .map_err(|_| anyhow::anyhow!("dockerd handle lock poisoned"))?;
        if let Some(child) = slot.as_mut() {
            if child.try_wait()?.is_none() {
                tracing::debug!("dockerd already running");
                return Ok(());
            }
        }
        let args: Vec<&str> = self.args.iter().map(String::as_str).collect();
        let child = self.runner.spawn("dockerd", &args)?;
        tracing::info!(pid = child.id(), ?args, "spawned dockerd");
        *slot = Some(child);
        Ok(())
    }
}
