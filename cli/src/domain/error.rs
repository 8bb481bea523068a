//! Typed domain error enums.
//!
//! This module has zero imports from `crate::infra`, `crate::commands`,
//! `crate::application`, `tokio`, `std::fs`, or `std::process`.
//! All error types implement `thiserror::Error` and convert to `anyhow::Error`
//! via the `?` operator.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::domain::library::LibraryEntry;
use crate::domain::workspace::BringUpState;

// ── Config errors ─────────────────────────────────────────────────────────────

/// Contradictory or unusable settings. Never retried.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {value}\n\nValid values: {valid}")]
    InvalidValue {
        key: &'static str,
        value: String,
        valid: String,
    },

    #[error("guest library directory must be absolute: {0}")]
    RelativeGuestLibDir(String),

    #[error("invalid mount '{0}': expected <source>:<target>[:ro]")]
    InvalidMount(String),

    #[error("duplicate mount target {0}")]
    DuplicateMountTarget(String),

    #[error("library staging directory {} is not writable: {reason}", path.display())]
    StagingUnwritable { path: PathBuf, reason: String },

    #[error(
        "library staging directory {} must be outside the host library directory {}",
        staging.display(),
        host.display()
    )]
    StagingInsideHost { staging: PathBuf, host: PathBuf },
}

// ── Reconciliation errors ─────────────────────────────────────────────────────

/// A single library that could not be copied.
#[derive(Debug, Clone)]
pub struct CopyFailure {
    pub path: PathBuf,
    pub reason: String,
}

/// Reconciliation finished but some matched libraries were not copied.
#[derive(Debug, Clone, Default)]
pub struct PartialCopy {
    /// Libraries that did land in the destination directory.
    pub copied: Vec<LibraryEntry>,
    pub failed: Vec<CopyFailure>,
}

impl std::fmt::Display for PartialCopy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let total = self.failed.len() + self.copied.len();
        write!(f, "{} of {total} libraries failed to copy", self.failed.len())?;
        for failure in &self.failed {
            write!(f, "\n  {}: {}", failure.path.display(), failure.reason)?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("cannot read library source {}: {source}", path.display())]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot prepare library destination {}: {source}", path.display())]
    DestinationUnwritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("library destination {} is inside the source {}", dest.display(), host.display())]
    DestinationInsideSource { dest: PathBuf, host: PathBuf },

    #[error("{0}")]
    PartialCopy(PartialCopy),

    #[error("library reconciliation cancelled")]
    Cancelled,

    #[error("library reconciliation worker failed: {0}")]
    Worker(String),
}

// ── Bring-up errors ───────────────────────────────────────────────────────────

/// Why a bring-up run ended in `Failed`.
#[derive(Debug, Error)]
pub enum BringUpError {
    #[error(transparent)]
    Configuration(#[from] ConfigError),

    #[error("inner docker daemon not live after {}s", elapsed.as_secs())]
    DaemonUnavailable {
        elapsed: Duration,
        #[source]
        cause: Option<anyhow::Error>,
    },

    #[error("library reconciliation failed: {0}")]
    Reconciliation(#[source] ReconcileError),

    #[error("workspace container rejected: {0:#}")]
    ContainerStart(#[source] anyhow::Error),

    #[error("workspace container not running after {}s", elapsed.as_secs())]
    ReadinessTimeout { elapsed: Duration },

    #[error("bring-up cancelled")]
    Cancelled,
}

/// Terminal failure of a bring-up run: the error plus the state it hit.
#[derive(Debug, Error)]
#[error("{error} (while {state})")]
pub struct BringUpFailure {
    pub state: BringUpState,
    #[source]
    pub error: BringUpError,
}

impl BringUpFailure {
    #[must_use]
    pub fn new(state: BringUpState, error: BringUpError) -> Self {
        Self { state, error }
    }
}

// ── Workspace errors ──────────────────────────────────────────────────────────

/// Errors from the daemon control interface about the workspace container.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("workspace container '{0}' not found")]
    NotFound(String),

    #[error("docker {command} failed: {stderr}")]
    Docker { command: String, stderr: String },
}
