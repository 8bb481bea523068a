//! Workspace container domain types and pure construction helpers.
//!
//! This module is intentionally free of I/O, async, and external layer imports.
//! All functions take data in and return data out.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::domain::error::ConfigError;
use crate::domain::library::LibraryEntry;

/// Docker container name of the workspace inside the outer container.
pub const CONTAINER_NAME: &str = "workspace_cvm";

/// Keeps the workspace container alive; workloads attach via `docker exec`.
pub const KEEPALIVE_COMMAND: &[&str] = &["sleep", "infinity"];

// ── Bring-up state machine ───────────────────────────────────────────────────

/// Bring-up supervisor states, in the order a successful run visits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BringUpState {
    Idle,
    DaemonStarting,
    DaemonReady,
    ReconcilingLibraries,
    ContainerStarting,
    WaitingForReady,
    Ready,
    Failed,
}

impl BringUpState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ready | Self::Failed)
    }
}

impl fmt::Display for BringUpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::DaemonStarting => "daemon-starting",
            Self::DaemonReady => "daemon-ready",
            Self::ReconcilingLibraries => "reconciling-libraries",
            Self::ContainerStarting => "container-starting",
            Self::WaitingForReady => "waiting-for-ready",
            Self::Ready => "ready",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

// ── Container handle ─────────────────────────────────────────────────────────

/// Observed state of the workspace container. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ContainerState {
    Unstarted,
    Starting,
    Ready,
    Failed,
}

/// The workspace container created by one bring-up run.
#[derive(Debug, Clone)]
pub struct ContainerHandle {
    /// Container name, usable wherever docker accepts an id.
    pub name: String,
    /// Daemon-assigned id, known once the create request is accepted.
    pub id: Option<String>,
    pub created_at: DateTime<Utc>,
    state: ContainerState,
}

impl ContainerHandle {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
            created_at: Utc::now(),
            state: ContainerState::Unstarted,
        }
    }

    #[must_use]
    pub fn state(&self) -> ContainerState {
        self.state
    }

    /// Move to `next` if it is later than the current state.
    ///
    /// Returns `false` (and leaves the state alone) for backwards moves.
    pub fn advance(&mut self, next: ContainerState) -> bool {
        if next > self.state {
            self.state = next;
            true
        } else {
            false
        }
    }

    /// The id if known, otherwise the name.
    #[must_use]
    pub fn reference(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.name)
    }
}

// ── Mounts ───────────────────────────────────────────────────────────────────

/// One bind mount from the outer container into the workspace container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    pub source: PathBuf,
    pub target: PathBuf,
    pub read_only: bool,
}

impl BindMount {
    #[must_use]
    pub fn read_only(source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            read_only: true,
        }
    }
}

/// How reconciled libraries are presented at the guest library directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LibraryMountMode {
    /// Bind each library over `<guest>/<name>`. A host library replaces a
    /// guest-native one of the same name; every other guest library stays.
    #[default]
    PerFile,
    /// Bind the whole staging directory at `<guest>`, hiding what the image
    /// ships there. Meant for relocated guest directories.
    Directory,
}

impl LibraryMountMode {
    pub const VALID: &'static [&'static str] = &["file", "dir"];

    /// Parse the `CODER_USR_LIB_MOUNT` setting.
    ///
    /// # Errors
    ///
    /// Returns an error for anything other than `file`, `dir`, or empty.
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim() {
            "" | "file" => Ok(Self::PerFile),
            "dir" => Ok(Self::Directory),
            other => Err(ConfigError::InvalidValue {
                key: "CODER_USR_LIB_MOUNT",
                value: other.to_string(),
                valid: Self::VALID.join(", "),
            }),
        }
    }
}

/// Bind mounts exposing staged libraries at the guest library directory.
///
/// In per-file mode every mount targets a file directly inside `guest_dir`;
/// in directory mode the single mount targets `guest_dir` itself. An empty
/// library set yields no mounts in per-file mode.
#[must_use]
pub fn library_mounts(
    staging_dir: &Path,
    guest_dir: &Path,
    libraries: &[LibraryEntry],
    mode: LibraryMountMode,
) -> Vec<BindMount> {
    match mode {
        LibraryMountMode::Directory => vec![BindMount::read_only(staging_dir, guest_dir)],
        LibraryMountMode::PerFile => libraries
            .iter()
            .map(|lib| {
                BindMount::read_only(
                    staging_dir.join(&lib.file_name),
                    guest_dir.join(&lib.file_name),
                )
            })
            .collect(),
    }
}

/// Parse `CODER_MOUNTS`: comma separated `source:target[:ro]`.
///
/// # Errors
///
/// Returns an error for entries that are not `source:target` with absolute
/// paths and an optional `ro` flag.
pub fn parse_mounts(value: &str) -> Result<Vec<BindMount>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let parts: Vec<&str> = entry.split(':').collect();
            let (source, target, read_only) = match parts.as_slice() {
                [s, t] => (*s, *t, false),
                [s, t, "ro"] => (*s, *t, true),
                [s, t, "rw"] => (*s, *t, false),
                _ => return Err(ConfigError::InvalidMount(entry.to_string())),
            };
            if !source.starts_with('/') || !target.starts_with('/') {
                return Err(ConfigError::InvalidMount(entry.to_string()));
            }
            Ok(BindMount {
                source: PathBuf::from(source),
                target: PathBuf::from(target),
                read_only,
            })
        })
        .collect()
}

// ── Environment ──────────────────────────────────────────────────────────────

/// Select outer environment variables to forward into the workspace.
///
/// `patterns` is the comma separated `CODER_INNER_ENVS` list; an entry ending
/// in `*` matches by prefix. When `gpu` is set, `NVIDIA_*` variables are
/// forwarded as well.
#[must_use]
pub fn forwarded_env<I>(patterns: &str, gpu: bool, outer: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (String, String)>,
{
    let patterns: Vec<&str> = patterns
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    outer
        .into_iter()
        .filter(|(key, _)| {
            (gpu && key.starts_with("NVIDIA_")) || patterns.iter().any(|p| env_matches(p, key))
        })
        .collect()
}

fn env_matches(pattern: &str, key: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => pattern == key,
    }
}

// ── Container spec ───────────────────────────────────────────────────────────

/// CPU and memory limits, passed through in docker's own syntax.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceLimits {
    pub cpus: Option<String>,
    pub memory: Option<String>,
}

/// Everything needed to create the workspace container. Immutable once built.
#[derive(Debug, Clone)]
pub struct WorkspaceContainerSpec {
    pub name: String,
    pub image: String,
    pub username: String,
    pub hostname: Option<String>,
    pub env: BTreeMap<String, String>,
    pub mounts: Vec<BindMount>,
    pub devices: Vec<PathBuf>,
    /// Container runtime to request, e.g. `nvidia`. Also enables `--gpus=all`.
    pub gpu_runtime: Option<String>,
    pub limits: ResourceLimits,
    pub command: Vec<String>,
}

/// Accumulates a [`WorkspaceContainerSpec`]; `build` enforces its invariants.
#[derive(Debug, Clone)]
pub struct WorkspaceSpecBuilder {
    spec: WorkspaceContainerSpec,
}

impl WorkspaceSpecBuilder {
    #[must_use]
    pub fn new(image: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            spec: WorkspaceContainerSpec {
                name: CONTAINER_NAME.to_string(),
                image: image.into(),
                username: username.into(),
                hostname: None,
                env: BTreeMap::new(),
                mounts: Vec::new(),
                devices: Vec::new(),
                gpu_runtime: None,
                limits: ResourceLimits::default(),
                command: KEEPALIVE_COMMAND.iter().map(|s| (*s).to_string()).collect(),
            },
        }
    }

    #[must_use]
    pub fn hostname(mut self, hostname: Option<String>) -> Self {
        self.spec.hostname = hostname.filter(|h| !h.is_empty());
        self
    }

    #[must_use]
    pub fn env(mut self, env: BTreeMap<String, String>) -> Self {
        self.spec.env.extend(env);
        self
    }

    #[must_use]
    pub fn mounts(mut self, mounts: impl IntoIterator<Item = BindMount>) -> Self {
        self.spec.mounts.extend(mounts);
        self
    }

    #[must_use]
    pub fn devices(mut self, devices: impl IntoIterator<Item = PathBuf>) -> Self {
        self.spec.devices.extend(devices);
        self
    }

    #[must_use]
    pub fn gpu_runtime(mut self, runtime: Option<String>) -> Self {
        self.spec.gpu_runtime = runtime.filter(|r| !r.is_empty());
        self
    }

    #[must_use]
    pub fn limits(mut self, limits: ResourceLimits) -> Self {
        self.spec.limits = limits;
        self
    }

    /// Finish the spec.
    ///
    /// # Errors
    ///
    /// Returns an error if the image or username is empty, or two mounts
    /// share a target path.
    pub fn build(self) -> Result<WorkspaceContainerSpec, ConfigError> {
        if self.spec.image.trim().is_empty() {
            return Err(ConfigError::Missing("CODER_INNER_IMAGE"));
        }
        if self.spec.username.trim().is_empty() {
            return Err(ConfigError::Missing("CODER_INNER_USERNAME"));
        }
        let mut targets = HashSet::new();
        for mount in &self.spec.mounts {
            if !targets.insert(mount.target.as_path()) {
                return Err(ConfigError::DuplicateMountTarget(
                    mount.target.display().to_string(),
                ));
            }
        }
        Ok(self.spec)
    }
}
