//! GPU library classification: pure and total.
//!
//! Two rule sets decide whether a shared object from the host belongs in the
//! inner container:
//!
//! 1. [`PRIMARY_RE`]: core vendor markers (`nvidia`, `cuda`, `vulkan`)
//!    anywhere in the file name.
//! 2. [`AUXILIARY_RE`]: vendor libraries with less predictable names (GLVND
//!    dispatch libraries, EGL/GLES, NVIDIA codec and compiler libraries).
//!    Anchored at `lib` and case-sensitive, so `libglib-2.0.so.0` and friends
//!    never match.
//!
//! Both are gated on [`SHARED_OBJECT_RE`]. Primary is consulted first; the
//! auxiliary set only sees names the primary set rejected.

use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// `.so` optionally followed by numeric version components.
pub static SHARED_OBJECT_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"\.so(\.[0-9]+)*$").expect("valid regex")
});

pub static PRIMARY_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"nvidia|cuda|vulkan").expect("valid regex")
});

pub static AUXILIARY_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(
        r"^lib(GL|GLX(_\w+)?|GLES(v1_CM|v2)(_\w+)?|GLdispatch|EGL(_\w+)?|OpenGL|nv(cuvid|optix|rtc|jpeg|blas))\.so",
    )
    .expect("valid regex")
});

/// Which rule set (if any) claimed a library file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LibraryClass {
    /// Matched a core vendor marker.
    Primary,
    /// Matched the narrow auxiliary vendor list.
    Auxiliary,
    /// Not a GPU user-space library.
    Unrelated,
}

impl LibraryClass {
    #[must_use]
    pub fn is_gpu(self) -> bool {
        !matches!(self, Self::Unrelated)
    }
}

/// A host library discovered and classified during one reconciliation pass.
///
/// Identity is `host_path`; `file_name` is what the guest sees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LibraryEntry {
    pub host_path: PathBuf,
    pub file_name: String,
    /// `host_path` with symlinks followed.
    pub real_path: PathBuf,
    pub class: LibraryClass,
    pub size: u64,
    /// Hex SHA-256 of the content, when computed.
    pub sha256: Option<String>,
}

/// Classify a library by its base file name.
///
/// Names that are not shared objects are always [`LibraryClass::Unrelated`].
#[must_use]
pub fn classify(file_name: &str) -> LibraryClass {
    if !SHARED_OBJECT_RE.is_match(file_name) {
        return LibraryClass::Unrelated;
    }
    if PRIMARY_RE.is_match(file_name) {
        LibraryClass::Primary
    } else if AUXILIARY_RE.is_match(file_name) {
        LibraryClass::Auxiliary
    } else {
        LibraryClass::Unrelated
    }
}

/// Shorthand for `classify(name).is_gpu()`.
#[must_use]
pub fn is_gpu_library(file_name: &str) -> bool {
    classify(file_name).is_gpu()
}
