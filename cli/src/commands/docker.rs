//! Docker command: bring up the nested workspace and hold it until signalled.

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use crate::application::services::bring_up::{BringUpPorts, Supervisor};
use crate::application::services::teardown::teardown;
use crate::infra::command_runner::TokioCommandRunner;
use crate::infra::config::load_from_env;
use crate::infra::daemon::DockerdLauncher;
use crate::infra::devices::DevScanner;
use crate::infra::docker::DockerCli;
use crate::infra::reconcile::FsReconciler;
use crate::output::reporter::LogReporter;

/// Run bring-up, then block until SIGINT/SIGTERM and tear down.
///
/// # Errors
///
/// Returns an error if the settings are invalid or bring-up fails.
pub async fn run() -> Result<()> {
    let settings = load_from_env()?;
    let config = settings.validate().context("invalid CODER_* settings")?;
    tracing::info!(
        image = %config.image,
        gpu = config.gpu,
        host_lib_dir = ?config.libraries.dirs.host,
        guest_lib_dir = %config.libraries.dirs.guest.display(),
        "starting envbox"
    );

    let cancel = CancellationToken::new();
    spawn_signal_listener(cancel.clone());

    let daemon = DockerCli::default_runner();
    let launcher = DockerdLauncher::new(
        TokioCommandRunner::default(),
        settings.docker_bridge_cidr.as_deref(),
        config.gpu_runtime.as_deref().filter(|_| config.gpu),
    );
    let reconciler = FsReconciler;
    let devices = DevScanner::default();
    let reporter = LogReporter;

    let mut supervisor = Supervisor::new(
        &config,
        BringUpPorts {
            daemon: &daemon,
            launcher: &launcher,
            reconciler: &reconciler,
            devices: &devices,
            reporter: &reporter,
        },
    )
    .with_outer_env(outer_env());

    let workspace = match supervisor.run(&cancel).await {
        Ok(workspace) => workspace,
        Err(failure) => {
            if let Err(e) = launcher.shutdown().await {
                tracing::warn!(error = %e, "failed to stop docker daemon");
            }
            return Err(failure.into());
        }
    };
    if let Some(partial) = &workspace.partial_copy {
        tracing::warn!(failed = partial.failed.len(), "workspace running with missing gpu libraries");
    }
    tracing::info!(
        container = %workspace.handle.name,
        id = workspace.handle.id.as_deref().unwrap_or_default(),
        libraries = workspace.libraries.len(),
        "workspace ready"
    );

    cancel.cancelled().await;
    tracing::info!("shutdown signal received");
    teardown(&daemon, &reporter, workspace.handle.reference()).await?;
    launcher.shutdown().await
}

/// Outer environment variables with valid UTF-8 names and values.
fn outer_env() -> Vec<(String, String)> {
    std::env::vars_os()
        .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
        .collect()
}

/// Cancel `token` on the first SIGINT or SIGTERM.
fn spawn_signal_listener(token: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "cannot listen for SIGINT");
                std::future::pending::<()>().await;
            }
        };
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "cannot listen for SIGTERM");
                    std::future::pending::<()>().await;
                }
            }
        };
        tokio::select! {
            () = ctrl_c => {},
            () = terminate => {},
        }
        token.cancel();
    });
}
