//! Teardown command: stop and remove the workspace container.

use anyhow::Result;

use crate::application::services::teardown::teardown;
use crate::domain::workspace::CONTAINER_NAME;
use crate::infra::docker::DockerCli;
use crate::output::OutputContext;
use crate::output::reporter::TerminalReporter;

/// Run the teardown command against the local daemon.
///
/// # Errors
///
/// Returns an error if docker rejects the stop or remove request.
pub async fn run(ctx: &OutputContext) -> Result<()> {
    let daemon = DockerCli::default_runner();
    teardown(&daemon, &TerminalReporter::new(ctx), CONTAINER_NAME).await
}
