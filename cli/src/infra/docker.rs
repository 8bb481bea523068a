//! Infrastructure implementation of the daemon control port traits.
//!
//! `DockerCli<R>` routes every request to the inner daemon through the
//! `docker` CLI via a `CommandRunner`, so tests can inject a scripted runner
//! without spawning real processes.

use std::process::Output;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::application::ports::{
    CommandRunner, ContainerInspector, ContainerLifecycle, ContainerStatus, DaemonProbe,
    ImageStore,
};
use crate::domain::{WorkspaceContainerSpec, WorkspaceError};
use crate::infra::command_runner::{PULL_TIMEOUT, TokioCommandRunner};

/// Docker CLI adapter for the inner daemon.
pub struct DockerCli<R: CommandRunner> {
    runner: R,
    program: String,
}

impl<R: CommandRunner> DockerCli<R> {
    pub fn new(runner: R) -> Self {
        Self {
            runner,
            program: "docker".to_string(),
        }
    }

    /// Use a different client binary (e.g. an absolute path).
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    async fn docker(&self, args: &[&str]) -> Result<Output> {
        self.runner
            .run(&self.program, args)
            .await
            .with_context(|| format!("docker {}", args.first().copied().unwrap_or_default()))
    }
}

impl DockerCli<TokioCommandRunner> {
    /// Convenience constructor for production use.
    #[must_use]
    pub fn default_runner() -> Self {
        Self::new(TokioCommandRunner::default())
    }
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

fn is_missing(output: &Output) -> bool {
    let stderr = String::from_utf8_lossy(&output.stderr);
    stderr.contains("No such container") || stderr.contains("No such object")
}

fn check(command: &str, output: &Output) -> Result<()> {
    if output.status.success() {
        return Ok(());
    }
    Err(WorkspaceError::Docker {
        command: command.to_string(),
        stderr: stderr_of(output),
    }
    .into())
}

/// Arguments for `docker create` (without the program name).
#[must_use]
pub fn create_args(spec: &WorkspaceContainerSpec) -> Vec<String> {
    let mut args = vec![
        "create".to_string(),
        "--name".to_string(),
        spec.name.clone(),
        "--user".to_string(),
        spec.username.clone(),
    ];
    if let Some(hostname) = &spec.hostname {
        args.push("--hostname".into());
        args.push(hostname.clone());
    }
    for (key, value) in &spec.env {
        args.push("--env".into());
        args.push(format!("{key}={value}"));
    }
    for mount in &spec.mounts {
        args.push("--volume".into());
        let mut volume = format!("{}:{}", mount.source.display(), mount.target.display());
        if mount.read_only {
            volume.push_str(":ro");
        }
        args.push(volume);
    }
    for device in &spec.devices {
        args.push("--device".into());
        args.push(device.display().to_string());
    }
    if let Some(runtime) = &spec.gpu_runtime {
        args.push(format!("--runtime={runtime}"));
        args.push("--gpus=all".into());
    }
    if let Some(cpus) = &spec.limits.cpus {
        args.push(format!("--cpus={cpus}"));
    }
    if let Some(memory) = &spec.limits.memory {
        args.push(format!("--memory={memory}"));
    }
    args.push(spec.image.clone());
    args.extend(spec.command.iter().cloned());
    args
}

/// The subset of `docker inspect`'s `.State` object we read.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    status: String,
    running: bool,
    #[serde(default)]
    exit_code: Option<i64>,
}

/// Parse the output of `docker inspect --format '{{json .State}}'`.
///
/// # Errors
///
/// Returns an error if the output is not the expected JSON object.
pub fn parse_state(stdout: &[u8]) -> Result<ContainerStatus> {
    let state: InspectState =
        serde_json::from_slice(stdout).context("parsing docker inspect output")?;
    Ok(ContainerStatus {
        status: state.status,
        running: state.running,
        exit_code: state.exit_code,
    })
}

impl<R: CommandRunner> DaemonProbe for DockerCli<R> {
    async fn ping(&self) -> Result<()> {
        let output = self
            .docker(&["version", "--format", "{{.Server.Version}}"])
            .await?;
        check("version", &output)
    }
}

impl<R: CommandRunner> ImageStore for DockerCli<R> {
    async fn image_present(&self, image: &str) -> Result<bool> {
        let output = self.docker(&["image", "inspect", image]).await?;
        Ok(output.status.success())
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        let output = self
            .runner
            .run_with_timeout(&self.program, &["pull", image], PULL_TIMEOUT)
            .await
            .context("docker pull")?;
        check("pull", &output)
    }
}

impl<R: CommandRunner> ContainerLifecycle for DockerCli<R> {
    async fn create_container(&self, spec: &WorkspaceContainerSpec) -> Result<String> {
        let args = create_args(spec);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.docker(&args).await?;
        check("create", &output)?;
        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        anyhow::ensure!(!id.is_empty(), "docker create returned no container id");
        Ok(id)
    }

    async fn start_container(&self, reference: &str) -> Result<()> {
        let output = self.docker(&["start", reference]).await?;
        check("start", &output)
    }

    async fn stop_container(&self, reference: &str) -> Result<()> {
        let output = self.docker(&["stop", reference]).await?;
        if is_missing(&output) {
            return Ok(());
        }
        check("stop", &output)
    }

    async fn remove_container(&self, reference: &str) -> Result<()> {
        let output = self.docker(&["rm", "--force", reference]).await?;
        if is_missing(&output) {
            return Ok(());
        }
        check("rm", &output)
    }
}

impl<R: CommandRunner> ContainerInspector for DockerCli<R> {
    async fn inspect_container(&self, reference: &str) -> Result<ContainerStatus> {
        let output = self
            .docker(&[
                "inspect",
                "--type",
                "container",
                "--format",
                "{{json .State}}",
                reference,
            ])
            .await?;
        if is_missing(&output) {
            return Err(WorkspaceError::NotFound(reference.to_string()).into());
        }
        check("inspect", &output)?;
        parse_state(&output.stdout)
    }
}
