//! `ProgressReporter` implementations.
//!
//! `TerminalReporter` prints to the terminal for interactive subcommands.
//! `LogReporter` routes progress into `tracing` for the long-running
//! `docker` subcommand, whose output is a container log.

use owo_colors::OwoColorize as _;

use crate::application::ports::ProgressReporter;
use crate::output::OutputContext;

/// Terminal progress reporter that wraps an `OutputContext`.
///
/// - `step()` prints `"  → {message}"` (suppressed when `ctx.quiet`)
/// - `success()` prints `"  ✓ {message}"` (suppressed when `ctx.quiet`)
/// - `warn()` prints `"  ⚠ {message}"` (suppressed when `ctx.quiet`)
pub struct TerminalReporter<'a> {
    ctx: &'a OutputContext,
}

impl<'a> TerminalReporter<'a> {
    #[must_use]
    pub fn new(ctx: &'a OutputContext) -> Self {
        Self { ctx }
    }
}

impl ProgressReporter for TerminalReporter<'_> {
    fn step(&self, message: &str) {
        if !self.ctx.quiet {
            println!("  {} {message}", "→".style(self.ctx.styles.step));
        }
    }

    fn success(&self, message: &str) {
        self.ctx.success(message);
    }

    fn warn(&self, message: &str) {
        self.ctx.warn(message);
    }
}

/// Progress as structured log events.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl ProgressReporter for LogReporter {
    fn step(&self, message: &str) {
        tracing::info!(target: "envbox::progress", "{message}");
    }

    fn success(&self, message: &str) {
        tracing::info!(target: "envbox::progress", done = true, "{message}");
    }

    fn warn(&self, message: &str) {
        tracing::warn!(target: "envbox::progress", "{message}");
    }
}
