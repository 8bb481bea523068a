//! Port trait definitions for the Application layer.
//!
//! Ports are the interfaces (contracts) that infrastructure must fulfill.
//! This file imports only from `crate::domain`, never from `crate::infra`,
//! `crate::commands`, or `crate::cli`.

use std::path::{Path, PathBuf};
use std::process::Output;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use crate::domain::{LibraryEntry, ReconcileError, WorkspaceContainerSpec};

// ── Value Types ───────────────────────────────────────────────────────────────

/// What `inspect` reports about a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerStatus {
    /// Docker's state string, e.g. `created`, `running`, `exited`.
    pub status: String,
    pub running: bool,
    pub exit_code: Option<i64>,
}

// ── Daemon Port Traits ────────────────────────────────────────────────────────

/// Liveness of the inner Docker daemon.
#[allow(async_fn_in_trait)]
pub trait DaemonProbe {
    /// Succeeds when the daemon answers API requests.
    async fn ping(&self) -> Result<()>;
}

/// Image presence and retrieval.
#[allow(async_fn_in_trait)]
pub trait ImageStore {
    /// Whether `image` is already present in the daemon's image store.
    async fn image_present(&self, image: &str) -> Result<bool>;
    /// Pull `image` from its registry.
    async fn pull_image(&self, image: &str) -> Result<()>;
}

/// Container create/start/stop/remove.
#[allow(async_fn_in_trait)]
pub trait ContainerLifecycle {
    /// Create (but do not start) a container from `spec`. Returns its id.
    async fn create_container(&self, spec: &WorkspaceContainerSpec) -> Result<String>;
    /// Start a created container.
    async fn start_container(&self, reference: &str) -> Result<()>;
    /// Stop a container. A missing container is not an error.
    async fn stop_container(&self, reference: &str) -> Result<()>;
    /// Force-remove a container. A missing container is not an error.
    async fn remove_container(&self, reference: &str) -> Result<()>;
}

/// Container state inspection.
#[allow(async_fn_in_trait)]
pub trait ContainerInspector {
    /// Inspect a container; errors if it does not exist.
    async fn inspect_container(&self, reference: &str) -> Result<ContainerStatus>;
}

/// Composite trait: the Docker-compatible control interface.
pub trait DaemonControl: DaemonProbe + ImageStore + ContainerLifecycle + ContainerInspector {}

/// Blanket implementation: any type implementing all four sub-traits is a `DaemonControl`.
impl<T> DaemonControl for T where T: DaemonProbe + ImageStore + ContainerLifecycle + ContainerInspector
{}

/// Starts the inner Docker daemon process.
#[allow(async_fn_in_trait)]
pub trait DaemonLauncher {
    /// Launch the daemon in the background. Returns once the process is
    /// spawned; liveness is checked separately through [`DaemonProbe`].
    async fn launch(&self) -> Result<()>;
}

// ── Library Port ──────────────────────────────────────────────────────────────

/// Copies GPU libraries from a host directory into a staging directory.
#[allow(async_fn_in_trait)]
pub trait LibraryReconciler {
    /// Create `dest_dir` if needed and check that it accepts writes.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or written.
    fn prepare(&self, dest_dir: &Path) -> Result<()>;

    /// Reconcile `host_dir` into `dest_dir`.
    ///
    /// `None` for `host_dir` is a no-op returning no entries. Per-file copy
    /// failures surface as [`ReconcileError::PartialCopy`] after every other
    /// file was attempted.
    async fn reconcile(
        &self,
        host_dir: Option<&Path>,
        dest_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<Vec<LibraryEntry>, ReconcileError>;
}

/// Discovers GPU device nodes to pass into the workspace container.
pub trait DeviceScanner {
    fn gpu_devices(&self) -> Vec<PathBuf>;
}

// ── Command Runner Port ───────────────────────────────────────────────────────

/// Abstracts process execution so infrastructure can be swapped or mocked.
#[allow(async_fn_in_trait)]
pub trait CommandRunner {
    /// Run a program and capture its output.
    ///
    /// Implementations should delegate to `run_with_timeout` using the
    /// instance's configured default timeout.
    async fn run(&self, program: &str, args: &[&str]) -> Result<Output>;
    /// Run a program with a custom timeout override.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be spawned or exceeds `timeout`.
    /// On timeout, the child process must be killed (not left orphaned).
    async fn run_with_timeout(
        &self,
        program: &str,
        args: &[&str],
        timeout: std::time::Duration,
    ) -> Result<Output>;
    /// Spawn a program without waiting for it to finish.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be spawned.
    fn spawn(&self, program: &str, args: &[&str]) -> Result<tokio::process::Child>;
}

// ── Progress Reporting Port ───────────────────────────────────────────────────

/// Abstracts progress reporting so services can emit events without
/// depending on the Presentation layer. Sync trait.
pub trait ProgressReporter {
    /// Emit an in-progress step message.
    fn step(&self, message: &str);
    /// Emit a success message.
    fn success(&self, message: &str);
    /// Emit a warning message.
    fn warn(&self, message: &str);
}
