//! Application service: workspace teardown.

use anyhow::{Context, Result};

use crate::application::ports::{ContainerLifecycle, ProgressReporter};

/// Stop and remove the workspace container.
///
/// Idempotent: a container that is already gone is not an error.
///
/// # Errors
///
/// Returns an error if the daemon rejects the stop or remove request.
pub async fn teardown(
    daemon: &impl ContainerLifecycle,
    reporter: &impl ProgressReporter,
    container: &str,
) -> Result<()> {
    reporter.step(&format!("stopping {container}..."));
    daemon
        .stop_container(container)
        .await
        .with_context(|| format!("stopping {container}"))?;
    daemon
        .remove_container(container)
        .await
        .with_context(|| format!("removing {container}"))?;
    reporter.success(&format!("{container} removed"));
    Ok(())
}
