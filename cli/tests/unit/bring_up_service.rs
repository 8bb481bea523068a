//! Tests for the bring-up supervisor, driven entirely through fakes.
//!
//! Timing-sensitive cases run on a paused tokio clock, so the 5s daemon and
//! 10s readiness timeouts from `bring_up_config` elapse instantly.

#![allow(clippy::expect_used)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use envbox::application::ports::LibraryReconciler;
use envbox::application::services::bring_up::{BringUpPorts, Supervisor, Workspace};
use envbox::domain::error::{CopyFailure, PartialCopy};
use envbox::domain::{
    BindMount, BringUpConfig, BringUpError, BringUpFailure, BringUpState, ConfigError,
    ContainerState, LibraryClass, LibraryEntry, ReconcileError,
};
use envbox::infra::reconcile::FsReconciler;

use crate::helpers::bring_up_config;
use crate::mocks::{
    FAKE_ID, FakeDaemon, FakeLauncher, FixedDevices, RecordingReporter, StubReconciler,
};

const GUEST_LIB_DIR: &str = "/usr/lib/x86_64-linux-gnu";

struct Rig {
    daemon: FakeDaemon,
    launcher: FakeLauncher,
    devices: FixedDevices,
    reporter: RecordingReporter,
}

impl Rig {
    fn new(daemon: FakeDaemon) -> Self {
        Self {
            daemon,
            launcher: FakeLauncher::default(),
            devices: FixedDevices::nvidia(),
            reporter: RecordingReporter::default(),
        }
    }

    async fn run(
        &self,
        config: &BringUpConfig,
        reconciler: &impl LibraryReconciler,
        cancel: &CancellationToken,
    ) -> (Result<Workspace, BringUpFailure>, Vec<BringUpState>) {
        let mut supervisor = Supervisor::new(
            config,
            BringUpPorts {
                daemon: &self.daemon,
                launcher: &self.launcher,
                reconciler,
                devices: &self.devices,
                reporter: &self.reporter,
            },
        )
        .with_outer_env(outer_env());
        let result = supervisor.run(cancel).await;
        assert!(supervisor.state().is_terminal());
        (result, supervisor.transitions().to_vec())
    }
}

fn outer_env() -> Vec<(String, String)> {
    [
        ("NVIDIA_VISIBLE_DEVICES", "all"),
        ("NVIDIA_DRIVER_CAPABILITIES", "compute,utility"),
        ("HOME", "/root"),
        ("FOO", "1"),
        ("BAR_X", "2"),
        ("BAZ", "3"),
    ]
    .iter()
    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
    .collect()
}

fn entry(name: &str) -> LibraryEntry {
    LibraryEntry {
        host_path: Path::new("/host/lib").join(name),
        file_name: name.to_string(),
        real_path: Path::new("/host/lib").join(name),
        class: LibraryClass::Primary,
        size: 4,
        sha256: None,
    }
}

fn path_str(p: &Path) -> &str {
    p.to_str().expect("utf-8 path")
}

fn write(dir: &Path, name: &str) {
    std::fs::write(dir.join(name), name).expect("write");
}

fn gpu_config(host: &str, staging: &str, extra: &[(&str, &str)]) -> BringUpConfig {
    let mut pairs = vec![
        ("CODER_ADD_GPU", "true"),
        ("CODER_USR_LIB_DIR", host),
        ("CODER_LIB_STAGING_DIR", staging),
    ];
    pairs.extend_from_slice(extra);
    bring_up_config(&pairs)
}

// ── Success paths ────────────────────────────────────────────────────────────

#[tokio::test]
async fn gpu_bring_up_stages_and_mounts_libraries() {
    let host = tempfile::tempdir().expect("host");
    write(host.path(), "libcuda.so.1");
    write(host.path(), "libGLX_nvidia.so.0");
    write(host.path(), "libglib-2.0.so.0");
    let scratch = tempfile::tempdir().expect("scratch");
    let staging = scratch.path().join("gpu-libs");
    let config = gpu_config(
        path_str(host.path()),
        path_str(&staging),
        &[("CODER_GPU_RUNTIME", "nvidia")],
    );
    let rig = Rig::new(FakeDaemon {
        image_present: false,
        ..FakeDaemon::default()
    });

    let (result, transitions) = rig
        .run(&config, &FsReconciler, &CancellationToken::new())
        .await;
    let workspace = result.expect("bring-up succeeds");

    assert_eq!(
        transitions,
        [
            BringUpState::Idle,
            BringUpState::DaemonStarting,
            BringUpState::DaemonReady,
            BringUpState::ReconcilingLibraries,
            BringUpState::ContainerStarting,
            BringUpState::WaitingForReady,
            BringUpState::Ready,
        ]
    );
    assert_eq!(workspace.handle.state(), ContainerState::Ready);
    assert_eq!(workspace.handle.id.as_deref(), Some(FAKE_ID));
    assert!(workspace.partial_copy.is_none());
    let names: Vec<_> = workspace.libraries.iter().map(|e| e.file_name.as_str()).collect();
    assert_eq!(names, ["libGLX_nvidia.so.0", "libcuda.so.1"]);
    assert!(staging.join("libcuda.so.1").is_file());
    assert!(!staging.join("libglib-2.0.so.0").exists());

    let spec = rig.daemon.spec();
    assert_eq!(
        spec.mounts,
        [
            BindMount::read_only(
                staging.join("libGLX_nvidia.so.0"),
                Path::new(GUEST_LIB_DIR).join("libGLX_nvidia.so.0")
            ),
            BindMount::read_only(
                staging.join("libcuda.so.1"),
                Path::new(GUEST_LIB_DIR).join("libcuda.so.1")
            ),
        ]
    );
    assert_eq!(spec.devices, FixedDevices::nvidia().0);
    assert_eq!(spec.gpu_runtime.as_deref(), Some("nvidia"));
    assert_eq!(spec.env.get("NVIDIA_VISIBLE_DEVICES").map(String::as_str), Some("all"));
    assert!(!spec.env.contains_key("HOME"));

    assert_eq!(rig.launcher.launches.get(), 0, "daemon was already live");
    assert!(rig.daemon.called("pull ubuntu:22.04"));
    let stale = rig.daemon.position("remove workspace_cvm").expect("stale removal");
    let create = rig.daemon.position("create workspace_cvm").expect("create");
    assert!(stale < create);
    assert!(rig.daemon.called(&format!("start {FAKE_ID}")));
}

#[tokio::test]
async fn gpu_disabled_skips_reconciliation() {
    let scratch = tempfile::tempdir().expect("scratch");
    let staging = scratch.path().join("gpu-libs");
    let config = bring_up_config(&[
        ("CODER_USR_LIB_DIR", "/usr/lib/host"),
        ("CODER_LIB_STAGING_DIR", path_str(&staging)),
        ("CODER_INNER_ENVS", "FOO,BAR_*"),
        ("CODER_MOUNTS", "/home/coder:/home/coder"),
        ("CODER_GPU_RUNTIME", "nvidia"),
    ]);
    let rig = Rig::new(FakeDaemon::default());

    let (result, transitions) = rig
        .run(&config, &FsReconciler, &CancellationToken::new())
        .await;
    let workspace = result.expect("bring-up succeeds");

    assert!(!transitions.contains(&BringUpState::ReconcilingLibraries));
    assert!(workspace.libraries.is_empty());
    assert!(!staging.exists(), "no staging directory without gpu");

    let spec = rig.daemon.spec();
    assert!(spec.devices.is_empty());
    assert!(spec.gpu_runtime.is_none());
    assert_eq!(
        spec.mounts,
        [BindMount {
            source: PathBuf::from("/home/coder"),
            target: PathBuf::from("/home/coder"),
            read_only: false,
        }]
    );
    let keys: Vec<_> = spec.env.keys().map(String::as_str).collect();
    assert_eq!(keys, ["BAR_X", "FOO"]);
    assert!(!rig.daemon.called("pull ubuntu:22.04"));
}

#[tokio::test]
async fn gpu_without_host_lib_dir_still_passes_devices() {
    let scratch = tempfile::tempdir().expect("scratch");
    let staging = scratch.path().join("gpu-libs");
    let config = bring_up_config(&[
        ("CODER_ADD_GPU", "true"),
        ("CODER_GPU_RUNTIME", "nvidia"),
        ("CODER_LIB_STAGING_DIR", path_str(&staging)),
    ]);
    let rig = Rig::new(FakeDaemon::default());

    let (result, transitions) = rig
        .run(&config, &FsReconciler, &CancellationToken::new())
        .await;
    let workspace = result.expect("bring-up succeeds");

    assert!(transitions.contains(&BringUpState::ReconcilingLibraries));
    assert!(workspace.libraries.is_empty());
    assert!(!staging.exists(), "nothing to stage");

    let spec = rig.daemon.spec();
    assert!(spec.mounts.is_empty());
    assert_eq!(spec.devices, FixedDevices::nvidia().0);
    assert_eq!(spec.gpu_runtime.as_deref(), Some("nvidia"));
    assert_eq!(spec.env.get("NVIDIA_VISIBLE_DEVICES").map(String::as_str), Some("all"));
}

#[tokio::test(start_paused = true)]
async fn daemon_is_launched_when_not_live() {
    let config = bring_up_config(&[]);
    let daemon = FakeDaemon::default();
    daemon.failing_pings.set(3);
    let rig = Rig::new(daemon);

    let (result, _) = rig
        .run(&config, &FsReconciler, &CancellationToken::new())
        .await;

    result.expect("bring-up succeeds");
    assert_eq!(rig.launcher.launches.get(), 1);
}

#[tokio::test]
async fn partial_copy_is_reported_and_bring_up_continues() {
    let config = gpu_config("/usr/lib/host", "/var/lib/envbox/gpu-libs", &[]);
    let reconciler = StubReconciler::returning(Err(ReconcileError::PartialCopy(PartialCopy {
        copied: vec![entry("libcuda.so.1")],
        failed: vec![CopyFailure {
            path: PathBuf::from("/usr/lib/host/libGL.so.1"),
            reason: "Permission denied (os error 13)".to_string(),
        }],
    })));
    let rig = Rig::new(FakeDaemon::default());

    let (result, _) = rig
        .run(&config, &reconciler, &CancellationToken::new())
        .await;
    let workspace = result.expect("bring-up continues");

    let partial = workspace.partial_copy.expect("partial copy recorded");
    assert_eq!(partial.failed.len(), 1);
    assert_eq!(workspace.libraries.len(), 1);
    assert!(
        rig.reporter
            .warnings()
            .iter()
            .any(|w| w.starts_with("1 of 2 libraries failed to copy")),
        "{:?}",
        rig.reporter.warnings()
    );
    let targets: Vec<_> = rig.daemon.spec().mounts.into_iter().map(|m| m.target).collect();
    assert_eq!(targets, [Path::new(GUEST_LIB_DIR).join("libcuda.so.1")]);
}

#[tokio::test]
async fn directory_mount_mode_mounts_staging_dir_once() {
    let config = gpu_config(
        "/usr/lib/host",
        "/var/lib/envbox/gpu-libs",
        &[("CODER_USR_LIB_MOUNT", "dir")],
    );
    let reconciler =
        StubReconciler::returning(Ok(vec![entry("libcuda.so.1"), entry("libEGL_nvidia.so.0")]));
    let rig = Rig::new(FakeDaemon::default());

    let (result, _) = rig
        .run(&config, &reconciler, &CancellationToken::new())
        .await;

    result.expect("bring-up succeeds");
    assert_eq!(
        rig.daemon.spec().mounts,
        [BindMount::read_only("/var/lib/envbox/gpu-libs", GUEST_LIB_DIR)]
    );
}

// ── Failure paths ────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn unreachable_daemon_fails_without_creating_container() {
    let config = bring_up_config(&[]);
    let daemon = FakeDaemon::default();
    daemon.failing_pings.set(u32::MAX);
    let rig = Rig::new(daemon);

    let (result, transitions) = rig
        .run(&config, &FsReconciler, &CancellationToken::new())
        .await;
    let failure = result.expect_err("daemon never answers");

    assert_eq!(failure.state, BringUpState::DaemonStarting);
    match &failure.error {
        BringUpError::DaemonUnavailable { elapsed, cause } => {
            assert_eq!(*elapsed, Duration::from_secs(5));
            assert!(cause.is_none());
        }
        other => panic!("expected DaemonUnavailable, got {other}"),
    }
    assert!(failure.to_string().contains("not live after 5s"), "{failure}");
    assert_eq!(
        transitions,
        [BringUpState::Idle, BringUpState::DaemonStarting, BringUpState::Failed]
    );
    assert!(!rig.daemon.calls().iter().any(|c| c.starts_with("create")));
    assert!(!rig.daemon.calls().iter().any(|c| c.starts_with("remove")));
}

#[tokio::test]
async fn launch_failure_carries_cause() {
    let config = bring_up_config(&[]);
    let daemon = FakeDaemon::default();
    daemon.failing_pings.set(1);
    let mut rig = Rig::new(daemon);
    rig.launcher.fail = true;

    let (result, _) = rig
        .run(&config, &FsReconciler, &CancellationToken::new())
        .await;
    let failure = result.expect_err("launch fails");

    assert!(matches!(
        failure.error,
        BringUpError::DaemonUnavailable { cause: Some(_), .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn cancel_during_readiness_removes_container() {
    let config = bring_up_config(&[]);
    let rig = Rig::new(FakeDaemon {
        never_running: true,
        ..FakeDaemon::default()
    });
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(3)).await;
        trigger.cancel();
    });

    let (result, transitions) = rig.run(&config, &FsReconciler, &cancel).await;
    let failure = result.expect_err("cancelled");

    assert_eq!(failure.state, BringUpState::WaitingForReady);
    assert!(matches!(failure.error, BringUpError::Cancelled));
    assert_eq!(transitions.last(), Some(&BringUpState::Failed));
    assert_eq!(
        rig.daemon.calls().last().map(String::as_str),
        Some(format!("remove {FAKE_ID}").as_str())
    );
}

#[tokio::test(start_paused = true)]
async fn readiness_timeout_removes_container() {
    let config = bring_up_config(&[]);
    let rig = Rig::new(FakeDaemon {
        never_running: true,
        ..FakeDaemon::default()
    });

    let (result, _) = rig
        .run(&config, &FsReconciler, &CancellationToken::new())
        .await;
    let failure = result.expect_err("never running");

    assert_eq!(failure.state, BringUpState::WaitingForReady);
    assert!(matches!(
        failure.error,
        BringUpError::ReadinessTimeout { elapsed } if elapsed == Duration::from_secs(10)
    ));
    assert!(rig.daemon.called(&format!("remove {FAKE_ID}")));
}

#[tokio::test]
async fn rejected_start_cleans_up() {
    let config = bring_up_config(&[]);
    let rig = Rig::new(FakeDaemon {
        reject_start: true,
        ..FakeDaemon::default()
    });

    let (result, _) = rig
        .run(&config, &FsReconciler, &CancellationToken::new())
        .await;
    let failure = result.expect_err("start rejected");

    assert_eq!(failure.state, BringUpState::ContainerStarting);
    assert!(matches!(failure.error, BringUpError::ContainerStart(_)));
    assert!(failure.to_string().contains("unable to find user"), "{failure}");
    let start = rig.daemon.position(&format!("start {FAKE_ID}")).expect("start");
    let remove = rig.daemon.position(&format!("remove {FAKE_ID}")).expect("cleanup");
    assert!(start < remove);
}

#[tokio::test]
async fn unreadable_library_source_is_fatal() {
    let config = gpu_config("/usr/lib/host", "/var/lib/envbox/gpu-libs", &[]);
    let reconciler = StubReconciler::returning(Err(ReconcileError::SourceUnreadable {
        path: PathBuf::from("/usr/lib/host"),
        source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
    }));
    let rig = Rig::new(FakeDaemon::default());

    let (result, _) = rig
        .run(&config, &reconciler, &CancellationToken::new())
        .await;
    let failure = result.expect_err("source unreadable");

    assert_eq!(failure.state, BringUpState::ReconcilingLibraries);
    assert!(matches!(failure.error, BringUpError::Reconciliation(_)));
    assert!(!rig.daemon.calls().iter().any(|c| c.starts_with("create")));
}

#[tokio::test]
async fn unwritable_staging_is_a_configuration_error() {
    let config = gpu_config("/usr/lib/host", "/var/lib/envbox/gpu-libs", &[]);
    let reconciler = StubReconciler {
        prepare_error: Some("Read-only file system (os error 30)".to_string()),
        ..StubReconciler::returning(Ok(Vec::new()))
    };
    let rig = Rig::new(FakeDaemon::default());

    let (result, _) = rig
        .run(&config, &reconciler, &CancellationToken::new())
        .await;
    let failure = result.expect_err("staging unwritable");

    assert!(matches!(
        failure.error,
        BringUpError::Configuration(ConfigError::StagingUnwritable { .. })
    ));
}

#[tokio::test]
async fn already_cancelled_does_nothing() {
    let config = bring_up_config(&[]);
    let rig = Rig::new(FakeDaemon::default());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let (result, _) = rig.run(&config, &FsReconciler, &cancel).await;
    let failure = result.expect_err("cancelled");

    assert_eq!(failure.state, BringUpState::DaemonStarting);
    assert!(matches!(failure.error, BringUpError::Cancelled));
    assert!(rig.daemon.calls().is_empty());
}
