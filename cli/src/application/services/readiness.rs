//! Readiness prober: bounded, cancellable polling.
//!
//! Imports only from `crate::domain` and `crate::application::ports`.
//! Timing uses `tokio::time`, so tests drive it with a paused clock.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{ContainerInspector, DaemonProbe};
use crate::domain::PollPolicy;

/// How a bounded poll ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Ready,
    TimedOut { elapsed: Duration },
    Cancelled,
}

/// Run `attempt` every `policy.interval` until it returns `true`, the
/// overall timeout elapses, or `cancel` fires.
///
/// A failed attempt is never fatal. An attempt still in flight at the
/// deadline is abandoned; cancellation interrupts both an in-flight attempt
/// and the pause between attempts.
pub async fn poll_until<F, Fut>(
    policy: PollPolicy,
    cancel: &CancellationToken,
    mut attempt: F,
) -> ProbeOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let started = Instant::now();
    let deadline = started + policy.timeout;
    loop {
        let ok = tokio::select! {
            biased;
            () = cancel.cancelled() => return ProbeOutcome::Cancelled,
            res = tokio::time::timeout_at(deadline, attempt()) => res.unwrap_or(false),
        };
        if ok {
            return ProbeOutcome::Ready;
        }

        let now = Instant::now();
        if now >= deadline {
            return ProbeOutcome::TimedOut {
                elapsed: now - started,
            };
        }
        let wake = (now + policy.interval).min(deadline);
        tokio::select! {
            biased;
            () = cancel.cancelled() => return ProbeOutcome::Cancelled,
            () = tokio::time::sleep_until(wake) => {}
        }
    }
}

/// Wait until the named container exists and is reported running.
pub async fn wait_ready(
    daemon: &impl ContainerInspector,
    container: &str,
    policy: PollPolicy,
    cancel: &CancellationToken,
) -> ProbeOutcome {
    poll_until(policy, cancel, move || async move {
        match daemon.inspect_container(container).await {
            Ok(status) if status.running => true,
            Ok(status) => {
                tracing::debug!(container, status = %status.status, "waiting for workspace container");
                false
            }
            Err(e) => {
                tracing::debug!(container, error = %e, "workspace container not inspectable yet");
                false
            }
        }
    })
    .await
}

/// Wait until the inner Docker daemon answers.
pub async fn wait_daemon(
    daemon: &impl DaemonProbe,
    policy: PollPolicy,
    cancel: &CancellationToken,
) -> ProbeOutcome {
    poll_until(policy, cancel, move || async move {
        match daemon.ping().await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(error = %e, "docker daemon not live yet");
                false
            }
        }
    })
    .await
}
