//! Domain layer: pure business logic, types, and validation.
//!
//! This module has zero imports from `crate::infra`, `crate::commands`,
//! `crate::application`, `tokio`, `std::fs`, `std::process`, or `std::net`.
//! All functions are synchronous and take data in, returning data out.

pub mod config;
pub mod error;
pub mod library;
pub mod paths;
pub mod workspace;

pub use config::{BringUpConfig, EnvboxConfig, PollPolicy, ReconciliationConfig};
pub use error::{BringUpError, BringUpFailure, ConfigError, ReconcileError, WorkspaceError};
pub use library::{LibraryClass, LibraryEntry, classify, is_gpu_library};
pub use paths::{LibraryDirs, resolve};
pub use workspace::{
    BindMount, BringUpState, ContainerHandle, ContainerState, LibraryMountMode,
    WorkspaceContainerSpec, WorkspaceSpecBuilder,
};
