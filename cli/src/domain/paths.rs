//! Directory resolution for library passthrough.
//!
//! Pure functions only; the filesystem is never consulted.

use std::path::{Path, PathBuf};

use crate::domain::error::ConfigError;

/// Host and guest library directories after defaults and overrides apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryDirs {
    /// Host (outer container) directory to scan. `None` disables reconciliation.
    pub host: Option<PathBuf>,
    /// Directory inside the workspace container that receives the libraries.
    pub guest: PathBuf,
}

/// Multiarch library directory for an architecture as reported by
/// `std::env::consts::ARCH`, e.g. `/usr/lib/x86_64-linux-gnu`.
#[must_use]
pub fn default_guest_lib_dir(arch: &str) -> PathBuf {
    let triplet = match arch {
        "x86" => "i386-linux-gnu".to_string(),
        "arm" => "arm-linux-gnueabihf".to_string(),
        "powerpc64" => "powerpc64le-linux-gnu".to_string(),
        other => format!("{other}-linux-gnu"),
    };
    PathBuf::from("/usr/lib").join(triplet)
}

/// Resolve library directories for the running host's architecture.
///
/// # Errors
///
/// Returns an error if the guest override is not an absolute path.
pub fn resolve(host_setting: &str, guest_setting: &str) -> Result<LibraryDirs, ConfigError> {
    resolve_for_arch(host_setting, guest_setting, std::env::consts::ARCH)
}

/// Resolve library directories for an explicit architecture.
///
/// Empty (or whitespace-only) settings count as unset. A set guest override
/// is used verbatim.
///
/// # Errors
///
/// Returns an error if the guest override is not an absolute path.
pub fn resolve_for_arch(
    host_setting: &str,
    guest_setting: &str,
    arch: &str,
) -> Result<LibraryDirs, ConfigError> {
    let host = non_empty(host_setting).map(PathBuf::from);
    let guest = match non_empty(guest_setting) {
        Some(dir) => {
            if !Path::new(dir).is_absolute() {
                return Err(ConfigError::RelativeGuestLibDir(dir.to_string()));
            }
            PathBuf::from(dir)
        }
        None => default_guest_lib_dir(arch),
    };
    Ok(LibraryDirs { host, guest })
}

fn non_empty(s: &str) -> Option<&str> {
    if s.trim().is_empty() { None } else { Some(s) }
}
