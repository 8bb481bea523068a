//! Envbox settings and their validated views.
//!
//! Pure functions only, no I/O. Loading from the process environment lives
//! in `crate::infra::config`.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::domain::error::ConfigError;
use crate::domain::paths::{self, LibraryDirs};
use crate::domain::workspace::{BindMount, LibraryMountMode, ResourceLimits, parse_mounts};

/// Environment variable prefix for every setting.
pub const ENV_PREFIX: &str = "CODER_";

pub const DEFAULT_STAGING_DIR: &str = "/var/lib/envbox/gpu-libs";
pub const DEFAULT_DAEMON_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_READY_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Settings loaded from `CODER_*` environment variables via `envy`.
///
/// Each field maps to `CODER_<FIELD>`, e.g. `inner_image` is
/// `CODER_INNER_IMAGE`. String settings default to empty so that
/// [`EnvboxConfig::validate`] can report them as typed errors.
#[derive(Debug, Clone, Deserialize)]
pub struct EnvboxConfig {
    #[serde(default)]
    pub inner_image: String,

    #[serde(default)]
    pub inner_username: String,

    pub inner_hostname: Option<String>,

    /// Comma separated names (`FOO`, `BAR_*`) of outer variables to forward.
    #[serde(default)]
    pub inner_envs: String,

    /// Comma separated `source:target[:ro]` bind mounts.
    #[serde(default)]
    pub mounts: String,

    pub cpus: Option<String>,

    pub memory: Option<String>,

    #[serde(default)]
    pub add_gpu: bool,

    /// Host library source directory, as seen from the outer container.
    #[serde(default)]
    pub usr_lib_dir: String,

    /// Guest library directory override.
    #[serde(default)]
    pub inner_usr_lib_dir: String,

    /// `file` or `dir`, see [`LibraryMountMode`].
    #[serde(default)]
    pub usr_lib_mount: String,

    pub gpu_runtime: Option<String>,

    #[serde(default = "default_staging_dir")]
    pub lib_staging_dir: PathBuf,

    pub docker_bridge_cidr: Option<String>,

    #[serde(default = "default_daemon_timeout_secs")]
    pub daemon_timeout_secs: u64,

    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from(DEFAULT_STAGING_DIR)
}

fn default_daemon_timeout_secs() -> u64 {
    DEFAULT_DAEMON_TIMEOUT_SECS
}

fn default_ready_timeout_secs() -> u64 {
    DEFAULT_READY_TIMEOUT_SECS
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

/// Bounded polling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Overall bound, measured from the first attempt.
    pub timeout: Duration,
    /// Pause between attempts.
    pub interval: Duration,
}

/// Library passthrough settings for one bring-up. Not shared across runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciliationConfig {
    /// When false nothing is discovered, copied, or created.
    pub enabled: bool,
    pub dirs: LibraryDirs,
    /// Outer directory the libraries are copied into before mounting.
    pub staging_dir: PathBuf,
    pub mount_mode: LibraryMountMode,
}

/// The validated settings one bring-up run needs.
#[derive(Debug, Clone)]
pub struct BringUpConfig {
    pub image: String,
    pub username: String,
    pub hostname: Option<String>,
    pub env_patterns: String,
    pub extra_mounts: Vec<BindMount>,
    pub limits: ResourceLimits,
    pub gpu: bool,
    pub gpu_runtime: Option<String>,
    pub libraries: ReconciliationConfig,
    pub daemon_poll: PollPolicy,
    pub ready_poll: PollPolicy,
}

impl EnvboxConfig {
    /// Check the settings and derive the bring-up view.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found: missing image or username,
    /// relative guest library directory, staging directory inside the host
    /// library directory, unknown mount mode, or malformed mounts.
    pub fn validate(&self) -> Result<BringUpConfig, ConfigError> {
        if self.inner_image.trim().is_empty() {
            return Err(ConfigError::Missing("CODER_INNER_IMAGE"));
        }
        if self.inner_username.trim().is_empty() {
            return Err(ConfigError::Missing("CODER_INNER_USERNAME"));
        }
        let dirs = paths::resolve(&self.usr_lib_dir, &self.inner_usr_lib_dir)?;
        if let Some(host) = &dirs.host {
            if self.lib_staging_dir.starts_with(host) {
                return Err(ConfigError::StagingInsideHost {
                    staging: self.lib_staging_dir.clone(),
                    host: host.clone(),
                });
            }
        }
        let mount_mode = LibraryMountMode::parse(&self.usr_lib_mount)?;
        let interval = Duration::from_millis(self.poll_interval_ms.max(1));

        Ok(BringUpConfig {
            image: self.inner_image.trim().to_string(),
            username: self.inner_username.trim().to_string(),
            hostname: self.inner_hostname.clone(),
            env_patterns: self.inner_envs.clone(),
            extra_mounts: parse_mounts(&self.mounts)?,
            limits: ResourceLimits {
                cpus: self.cpus.clone().filter(|s| !s.is_empty()),
                memory: self.memory.clone().filter(|s| !s.is_empty()),
            },
            gpu: self.add_gpu,
            gpu_runtime: self.gpu_runtime.clone().filter(|s| !s.is_empty()),
            libraries: ReconciliationConfig {
                enabled: self.add_gpu,
                dirs,
                staging_dir: self.lib_staging_dir.clone(),
                mount_mode,
            },
            daemon_poll: PollPolicy {
                timeout: Duration::from_secs(self.daemon_timeout_secs),
                interval,
            },
            ready_poll: PollPolicy {
                timeout: Duration::from_secs(self.ready_timeout_secs),
                interval,
            },
        })
    }
}
