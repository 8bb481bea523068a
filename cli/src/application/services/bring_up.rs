//! Application service: workspace bring-up supervisor.
//!
//! Drives one run through
//! `Idle → DaemonStarting → DaemonReady → [ReconcilingLibraries] →
//! ContainerStarting → WaitingForReady → Ready`, or to `Failed` from any
//! non-terminal state. Imports only from `crate::domain` and
//! `crate::application`.

use std::future::Future;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{
    DaemonControl, DaemonLauncher, DeviceScanner, LibraryReconciler, ProgressReporter,
};
use crate::application::services::readiness::{ProbeOutcome, wait_daemon, wait_ready};
use crate::domain::error::PartialCopy;
use crate::domain::workspace::{ContainerState, forwarded_env, library_mounts};
use crate::domain::{
    BringUpConfig, BringUpError, BringUpFailure, BringUpState, ConfigError, ContainerHandle,
    LibraryEntry, ReconcileError, WorkspaceContainerSpec, WorkspaceSpecBuilder,
};

/// A workspace container that reached `Ready`.
#[derive(Debug)]
pub struct Workspace {
    pub handle: ContainerHandle,
    /// Libraries staged and mounted for this run.
    pub libraries: Vec<LibraryEntry>,
    /// Set when some libraries failed to copy but bring-up continued.
    pub partial_copy: Option<PartialCopy>,
}

/// Injected ports for one bring-up run.
pub struct BringUpPorts<'a, D, L, R, S, P> {
    pub daemon: &'a D,
    pub launcher: &'a L,
    pub reconciler: &'a R,
    pub devices: &'a S,
    pub reporter: &'a P,
}

/// Owns the bring-up state machine for a single run.
pub struct Supervisor<'a, D, L, R, S, P> {
    ports: BringUpPorts<'a, D, L, R, S, P>,
    config: &'a BringUpConfig,
    outer_env: Vec<(String, String)>,
    state: BringUpState,
    transitions: Vec<BringUpState>,
}

impl<'a, D, L, R, S, P> Supervisor<'a, D, L, R, S, P>
where
    D: DaemonControl,
    L: DaemonLauncher,
    R: LibraryReconciler,
    S: DeviceScanner,
    P: ProgressReporter,
{
    #[must_use]
    pub fn new(config: &'a BringUpConfig, ports: BringUpPorts<'a, D, L, R, S, P>) -> Self {
        Self {
            ports,
            config,
            outer_env: Vec::new(),
            state: BringUpState::Idle,
            transitions: vec![BringUpState::Idle],
        }
    }

    /// Outer environment to select forwarded variables from.
    #[must_use]
    pub fn with_outer_env(mut self, env: impl IntoIterator<Item = (String, String)>) -> Self {
        self.outer_env = env.into_iter().collect();
        self
    }

    #[must_use]
    pub fn state(&self) -> BringUpState {
        self.state
    }

    /// Every state this run has entered, starting with `Idle`.
    #[must_use]
    pub fn transitions(&self) -> &[BringUpState] {
        &self.transitions
    }

    /// Run bring-up to a terminal state.
    ///
    /// A workspace container created by a failed run is removed before
    /// returning.
    ///
    /// # Errors
    ///
    /// Returns [`BringUpFailure`] carrying the state the run failed in.
    pub async fn run(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Workspace, BringUpFailure> {
        let mut handle = None;
        match self.drive(cancel, &mut handle).await {
            Ok(workspace) => {
                self.transition(BringUpState::Ready);
                self.ports.reporter.success("workspace ready");
                Ok(workspace)
            }
            Err(error) => {
                let failed_in = self.state;
                if let Some(handle) = handle.as_mut() {
                    self.discard(handle).await;
                }
                self.transition(BringUpState::Failed);
                tracing::error!(state = %failed_in, error = %error, "bring-up failed");
                Err(BringUpFailure::new(failed_in, error))
            }
        }
    }

    fn transition(&mut self, next: BringUpState) {
        tracing::info!(from = %self.state, to = %next, "bring-up transition");
        self.state = next;
        self.transitions.push(next);
    }

    async fn drive(
        &mut self,
        cancel: &CancellationToken,
        handle: &mut Option<ContainerHandle>,
    ) -> Result<Workspace, BringUpError> {
        self.start_daemon(cancel).await?;
        self.transition(BringUpState::DaemonReady);

        let (libraries, partial_copy) = self.reconcile_libraries(cancel).await?;

        self.transition(BringUpState::ContainerStarting);
        let spec = self.container_spec(&libraries)?;
        let handle = handle.insert(ContainerHandle::new(spec.name.clone()));
        self.start_container(&spec, handle, cancel).await?;

        self.transition(BringUpState::WaitingForReady);
        self.ports.reporter.step("waiting for workspace container...");
        let policy = self.config.ready_poll;
        match wait_ready(self.ports.daemon, handle.reference(), policy, cancel).await {
            ProbeOutcome::Ready => {}
            ProbeOutcome::TimedOut { elapsed } => {
                return Err(BringUpError::ReadinessTimeout { elapsed });
            }
            ProbeOutcome::Cancelled => return Err(BringUpError::Cancelled),
        }
        handle.advance(ContainerState::Ready);

        Ok(Workspace {
            handle: handle.clone(),
            libraries,
            partial_copy,
        })
    }

    async fn start_daemon(&mut self, cancel: &CancellationToken) -> Result<(), BringUpError> {
        self.transition(BringUpState::DaemonStarting);
        let daemon = self.ports.daemon;

        let live = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(BringUpError::Cancelled),
            res = daemon.ping() => res.is_ok(),
        };
        if live {
            tracing::info!("docker daemon already live");
            return Ok(());
        }

        self.ports.reporter.step("starting docker daemon...");
        if let Err(e) = self.ports.launcher.launch().await {
            return Err(BringUpError::DaemonUnavailable {
                elapsed: std::time::Duration::ZERO,
                cause: Some(e),
            });
        }
        match wait_daemon(daemon, self.config.daemon_poll, cancel).await {
            ProbeOutcome::Ready => {
                self.ports.reporter.success("docker daemon started");
                Ok(())
            }
            ProbeOutcome::TimedOut { elapsed } => {
                Err(BringUpError::DaemonUnavailable { elapsed, cause: None })
            }
            ProbeOutcome::Cancelled => Err(BringUpError::Cancelled),
        }
    }

    async fn reconcile_libraries(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<(Vec<LibraryEntry>, Option<PartialCopy>), BringUpError> {
        let config = self.config;
        let libs = &config.libraries;
        if !config.gpu || !libs.enabled {
            tracing::debug!("gpu disabled, skipping library reconciliation");
            return Ok((Vec::new(), None));
        }
        self.transition(BringUpState::ReconcilingLibraries);

        let Some(host) = libs.dirs.host.as_deref() else {
            tracing::info!("no host library directory configured");
            return Ok((Vec::new(), None));
        };
        self.ports.reporter.step("staging gpu libraries...");
        self.ports
            .reconciler
            .prepare(&libs.staging_dir)
            .map_err(|e| ConfigError::StagingUnwritable {
                path: libs.staging_dir.clone(),
                reason: format!("{e:#}"),
            })?;

        match self
            .ports
            .reconciler
            .reconcile(Some(host), &libs.staging_dir, cancel)
            .await
        {
            Ok(entries) => {
                self.ports
                    .reporter
                    .success(&format!("{} gpu libraries staged", entries.len()));
                Ok((entries, None))
            }
            Err(ReconcileError::PartialCopy(partial)) => {
                self.ports.reporter.warn(&partial.to_string());
                Ok((partial.copied.clone(), Some(partial)))
            }
            Err(ReconcileError::Cancelled) => Err(BringUpError::Cancelled),
            Err(e) => Err(BringUpError::Reconciliation(e)),
        }
    }

    fn container_spec(
        &self,
        libraries: &[LibraryEntry],
    ) -> Result<WorkspaceContainerSpec, BringUpError> {
        let cfg = self.config;
        let env = forwarded_env(&cfg.env_patterns, cfg.gpu, self.outer_env.iter().cloned());

        let mut mounts = cfg.extra_mounts.clone();
        let mut devices = Vec::new();
        let mut runtime = None;
        if cfg.gpu {
            if cfg.libraries.dirs.host.is_some() {
                mounts.extend(library_mounts(
                    &cfg.libraries.staging_dir,
                    &cfg.libraries.dirs.guest,
                    libraries,
                    cfg.libraries.mount_mode,
                ));
            }
            devices = self.ports.devices.gpu_devices();
            runtime.clone_from(&cfg.gpu_runtime);
        }

        let spec = WorkspaceSpecBuilder::new(&cfg.image, &cfg.username)
            .hostname(cfg.hostname.clone())
            .env(env)
            .mounts(mounts)
            .devices(devices)
            .gpu_runtime(runtime)
            .limits(cfg.limits.clone())
            .build()?;
        Ok(spec)
    }

    async fn start_container(
        &self,
        spec: &WorkspaceContainerSpec,
        handle: &mut ContainerHandle,
        cancel: &CancellationToken,
    ) -> Result<(), BringUpError> {
        let daemon = self.ports.daemon;
        let reporter = self.ports.reporter;
        reporter.step("starting workspace container...");

        cancellable(cancel, async {
            daemon
                .remove_container(&spec.name)
                .await
                .context("removing stale workspace container")
        })
        .await?;

        let present = cancellable(cancel, async {
            daemon
                .image_present(&spec.image)
                .await
                .with_context(|| format!("inspecting image {}", spec.image))
        })
        .await?;
        if !present {
            reporter.step(&format!("pulling {}...", spec.image));
            cancellable(cancel, async {
                daemon
                    .pull_image(&spec.image)
                    .await
                    .with_context(|| format!("pulling image {}", spec.image))
            })
            .await?;
        }

        let id = cancellable(cancel, async {
            daemon
                .create_container(spec)
                .await
                .context("creating workspace container")
        })
        .await?;
        tracing::info!(container = %spec.name, id = %id, "workspace container created");
        handle.id = Some(id);
        handle.advance(ContainerState::Starting);

        cancellable(cancel, async {
            daemon
                .start_container(handle.reference())
                .await
                .context("starting workspace container")
        })
        .await
    }

    /// Best-effort removal of a container from a failed run.
    async fn discard(&self, handle: &mut ContainerHandle) {
        handle.advance(ContainerState::Failed);
        if let Err(e) = self.ports.daemon.remove_container(handle.reference()).await {
            tracing::warn!(container = %handle.reference(), error = %e, "failed to remove workspace container");
            self.ports
                .reporter
                .warn(&format!("could not remove {}: {e:#}", handle.name));
        }
    }
}

/// Await `fut` unless `cancel` fires first.
async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = anyhow::Result<T>>,
) -> Result<T, BringUpError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(BringUpError::Cancelled),
        res = fut => res.map_err(BringUpError::ContainerStart),
    }
}
