//! Filesystem implementation of the `LibraryReconciler` port.
//!
//! Walks the host library directory, keeps the files the GPU matcher
//! claims, and copies each one's real content into a flat staging
//! directory under its own base name. Copies go through a temporary file in
//! the destination and an atomic rename, and are skipped when the staged
//! copy already has the same SHA-256.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::application::ports::LibraryReconciler;
use crate::domain::error::{CopyFailure, PartialCopy};
use crate::domain::library::{self, LibraryClass, LibraryEntry};
use crate::domain::ReconcileError;
use crate::infra::fs::{ensure_writable_dir, sha256_file};

/// Symlink hops followed before an entry is treated as a cycle.
pub const MAX_LINK_DEPTH: usize = 8;

/// File name prefix of in-flight copies left behind by an interrupted pass.
const TEMP_PREFIX: &str = ".tmp";

/// Production reconciler. Runs the copy pass on the blocking pool.
pub struct FsReconciler;

impl LibraryReconciler for FsReconciler {
    fn prepare(&self, dest_dir: &Path) -> anyhow::Result<()> {
        ensure_writable_dir(dest_dir)
    }

    async fn reconcile(
        &self,
        host_dir: Option<&Path>,
        dest_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<Vec<LibraryEntry>, ReconcileError> {
        let Some(host_dir) = host_dir else {
            return Ok(Vec::new());
        };
        let host = host_dir.to_path_buf();
        let dest = dest_dir.to_path_buf();
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || reconcile_dir(&host, &dest, &cancel))
            .await
            .map_err(|e| ReconcileError::Worker(e.to_string()))?
    }
}

/// A matched library before it is copied.
struct Candidate {
    depth: usize,
    host_path: PathBuf,
    file_name: String,
    real_path: PathBuf,
    class: LibraryClass,
    size: u64,
}

/// Reconcile `host` into `dest` synchronously.
///
/// # Errors
///
/// - [`ReconcileError::SourceUnreadable`] if `host` cannot be listed at all.
/// - [`ReconcileError::DestinationUnwritable`] if `dest` cannot be created.
/// - [`ReconcileError::DestinationInsideSource`] if `dest` is `host` or lies
///   under it.
/// - [`ReconcileError::Cancelled`] if `cancel` fires between copies.
/// - [`ReconcileError::PartialCopy`] if some copies failed; every other
///   library was still attempted and is present in `dest`.
pub fn reconcile_dir(
    host: &Path,
    dest: &Path,
    cancel: &CancellationToken,
) -> Result<Vec<LibraryEntry>, ReconcileError> {
    fs::read_dir(host).map_err(|source| ReconcileError::SourceUnreadable {
        path: host.to_path_buf(),
        source,
    })?;

    let candidates = discover(host);
    tracing::info!(
        host = %host.display(),
        matched = candidates.len(),
        "discovered gpu libraries"
    );

    ensure_disjoint(host, dest)?;
    fs::create_dir_all(dest).map_err(|source| ReconcileError::DestinationUnwritable {
        path: dest.to_path_buf(),
        source,
    })?;

    let mut result = PartialCopy::default();
    for candidate in candidates {
        if cancel.is_cancelled() {
            return Err(ReconcileError::Cancelled);
        }
        match copy_one(&candidate, dest) {
            Ok(entry) => result.copied.push(entry),
            Err(e) => {
                tracing::warn!(path = %candidate.host_path.display(), error = %e, "failed to copy library");
                result.failed.push(CopyFailure {
                    path: candidate.host_path,
                    reason: e.to_string(),
                });
            }
        }
    }

    let keep: HashSet<&str> = result.copied.iter().map(|e| e.file_name.as_str()).collect();
    prune(dest, &keep);

    if result.failed.is_empty() {
        Ok(result.copied)
    } else {
        Err(ReconcileError::PartialCopy(result))
    }
}

/// List the libraries a reconciliation of `host` would stage, without
/// copying anything. Digests are not computed.
///
/// # Errors
///
/// Returns [`ReconcileError::SourceUnreadable`] if `host` cannot be listed.
pub fn scan(host: &Path) -> Result<Vec<LibraryEntry>, ReconcileError> {
    fs::read_dir(host).map_err(|source| ReconcileError::SourceUnreadable {
        path: host.to_path_buf(),
        source,
    })?;
    Ok(discover(host)
        .into_iter()
        .map(|c| LibraryEntry {
            host_path: c.host_path,
            file_name: c.file_name,
            real_path: c.real_path,
            class: c.class,
            size: c.size,
            sha256: None,
        })
        .collect())
}

/// Refuse a destination that is the source directory or nested inside it.
fn ensure_disjoint(host: &Path, dest: &Path) -> Result<(), ReconcileError> {
    if canonical(dest).starts_with(canonical(host)) {
        return Err(ReconcileError::DestinationInsideSource {
            dest: dest.to_path_buf(),
            host: host.to_path_buf(),
        });
    }
    Ok(())
}

/// Canonical form of `path`, resolving through the nearest existing ancestor
/// when `path` itself does not exist yet.
fn canonical(path: &Path) -> PathBuf {
    if let Ok(resolved) = fs::canonicalize(path) {
        return resolved;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => canonical(parent).join(name),
        _ => path.to_path_buf(),
    }
}

/// Enumerate matched libraries under `host`.
///
/// When a base name occurs more than once, the shallowest entry wins, then
/// the first in sorted walk order.
fn discover(host: &Path) -> Vec<Candidate> {
    let mut found = Vec::new();
    let walker = WalkDir::new(host)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name();
    for item in walker {
        let entry = match item {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if entry.file_type().is_dir() {
            continue;
        }
        let Some(name) = entry.file_name().to_str() else {
            continue;
        };
        let class = library::classify(name);
        if !class.is_gpu() {
            continue;
        }
        let real_path = match resolve_link(entry.path(), MAX_LINK_DEPTH) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(path = %entry.path().display(), error = %e, "skipping unresolvable library link");
                continue;
            }
        };
        let size = match fs::metadata(&real_path) {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => {
                tracing::warn!(path = %entry.path().display(), "skipping library that is not a regular file");
                continue;
            }
        };
        found.push(Candidate {
            depth: entry.depth(),
            host_path: entry.path().to_path_buf(),
            file_name: name.to_string(),
            real_path,
            class,
            size,
        });
    }

    // Stable sort keeps walk order within one depth.
    found.sort_by_key(|c| c.depth);
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(found.len());
    for candidate in found {
        if seen.insert(candidate.file_name.clone()) {
            out.push(candidate);
        } else {
            tracing::debug!(path = %candidate.host_path.display(), "duplicate library name, keeping shallower");
        }
    }
    out.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    out
}

/// Follow `path` through at most `max_depth` symlinks.
///
/// Relative targets resolve against the link's own directory.
///
/// # Errors
///
/// Returns an error for dangling links and for chains longer than
/// `max_depth` (which covers cycles).
pub fn resolve_link(path: &Path, max_depth: usize) -> io::Result<PathBuf> {
    let mut current = path.to_path_buf();
    for _ in 0..=max_depth {
        if !fs::symlink_metadata(&current)?.file_type().is_symlink() {
            return Ok(current);
        }
        let target = fs::read_link(&current)?;
        current = match current.parent() {
            Some(parent) if target.is_relative() => parent.join(target),
            _ => target,
        };
    }
    Err(io::Error::other(format!(
        "{} has more than {max_depth} levels of symlinks",
        path.display()
    )))
}

fn copy_one(candidate: &Candidate, dest: &Path) -> anyhow::Result<LibraryEntry> {
    let meta = fs::metadata(&candidate.real_path)?;
    let digest = sha256_file(&candidate.real_path)?;
    let target = dest.join(&candidate.file_name);

    if !is_current(&target, meta.len(), &digest) {
        let mut tmp = NamedTempFile::new_in(dest)?;
        let mut src = fs::File::open(&candidate.real_path)?;
        io::copy(&mut src, tmp.as_file_mut())?;
        tmp.as_file().sync_all()?;
        fs::set_permissions(tmp.path(), meta.permissions())?;
        tmp.persist(&target).map_err(|e| e.error)?;
        tracing::debug!(library = %candidate.file_name, "staged library");
    } else if fs::metadata(&target)?.permissions() != meta.permissions() {
        fs::set_permissions(&target, meta.permissions())?;
        tracing::debug!(library = %candidate.file_name, "restored library permissions");
    }

    Ok(LibraryEntry {
        host_path: candidate.host_path.clone(),
        file_name: candidate.file_name.clone(),
        real_path: candidate.real_path.clone(),
        class: candidate.class,
        size: meta.len(),
        sha256: Some(digest),
    })
}

/// Whether `target` is a regular file with the expected size and digest.
fn is_current(target: &Path, size: u64, digest: &str) -> bool {
    match fs::symlink_metadata(target) {
        Ok(meta) if meta.is_file() && meta.len() == size => {
            sha256_file(target).is_ok_and(|d| d == digest)
        }
        _ => false,
    }
}

/// Remove GPU libraries that this pass did not produce, and temp leftovers.
///
/// Anything else in `dest` belongs to someone else and is left alone.
fn prune(dest: &Path, keep: &HashSet<&str>) {
    let Ok(entries) = fs::read_dir(dest) else {
        return;
    };
    for entry in entries.flatten() {
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let stale = !keep.contains(name)
            && (library::is_gpu_library(name) || name.starts_with(TEMP_PREFIX));
        if !stale {
            continue;
        }
        if let Err(e) = fs::remove_file(entry.path()) {
            tracing::warn!(path = %entry.path().display(), error = %e, "failed to prune stale library");
        }
    }
}
