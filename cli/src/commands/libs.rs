//! Libs command: preview or stage the GPU libraries of a host directory.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tokio_util::sync::CancellationToken;

use crate::application::ports::LibraryReconciler;
use crate::domain::{LibraryEntry, ReconcileError};
use crate::infra::reconcile::{FsReconciler, scan};
use crate::output::OutputContext;

/// Arguments for `envbox libs`.
#[derive(Args)]
pub struct LibsArgs {
    /// Host library directory to scan
    pub dir: PathBuf,

    /// Copy the matched libraries into this directory instead of only listing them
    #[arg(long, value_name = "DIR")]
    pub stage: Option<PathBuf>,
}

/// Run the libs command.
///
/// # Errors
///
/// Returns an error if the directory cannot be read, or if staging was
/// requested and any library failed to copy.
pub async fn run(ctx: &OutputContext, args: &LibsArgs, json: bool) -> Result<()> {
    let Some(dest) = &args.stage else {
        let entries = scan(&args.dir)?;
        return print_entries(ctx, &entries, json);
    };

    let reconciler = FsReconciler;
    reconciler.prepare(dest)?;
    match reconciler
        .reconcile(Some(&args.dir), dest, &CancellationToken::new())
        .await
    {
        Ok(entries) => print_entries(ctx, &entries, json),
        Err(ReconcileError::PartialCopy(partial)) => {
            print_entries(ctx, &partial.copied, json)?;
            for failure in &partial.failed {
                ctx.error(&format!("{}: {}", failure.path.display(), failure.reason));
            }
            Err(ReconcileError::PartialCopy(partial).into())
        }
        Err(e) => Err(e.into()),
    }
}

fn print_entries(ctx: &OutputContext, entries: &[LibraryEntry], json: bool) -> Result<()> {
    if json {
        let out = serde_json::to_string_pretty(entries).context("JSON serialization")?;
        println!("{out}");
        return Ok(());
    }
    if entries.is_empty() {
        ctx.warn("no GPU libraries found");
        return Ok(());
    }
    ctx.header(&format!("{} GPU libraries", entries.len()));
    for entry in entries {
        let source = if entry.real_path == entry.host_path {
            entry.host_path.display().to_string()
        } else {
            format!("{} -> {}", entry.host_path.display(), entry.real_path.display())
        };
        ctx.kv(&entry.file_name, &source);
    }
    Ok(())
}
