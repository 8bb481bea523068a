//! GPU device node discovery.

use std::path::PathBuf;

use crate::application::ports::DeviceScanner;

/// Lists `nvidia*` device nodes under a `/dev`-like directory.
pub struct DevScanner {
    root: PathBuf,
}

impl DevScanner {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Default for DevScanner {
    fn default() -> Self {
        Self::new("/dev")
    }
}

impl DeviceScanner for DevScanner {
    fn gpu_devices(&self) -> Vec<PathBuf> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(root = %self.root.display(), error = %e, "cannot scan for gpu devices");
                return Vec::new();
            }
        };
        let mut devices: Vec<PathBuf> = entries
            .flatten()
            .filter(|e| e.file_type().is_ok_and(|t| !t.is_dir()))
            .filter(|e| e.file_name().to_string_lossy().starts_with("nvidia"))
            .map(|e| e.path())
            .collect();
        devices.sort();
        devices
    }
}
