//! Tests for the teardown service.

#![allow(clippy::expect_used)]

use envbox::application::services::teardown::teardown;

use crate::mocks::{FakeDaemon, RecordingReporter};

#[tokio::test]
async fn teardown_stops_then_removes() {
    let daemon = FakeDaemon::default();
    let reporter = RecordingReporter::default();

    teardown(&daemon, &reporter, "workspace_cvm")
        .await
        .expect("teardown");

    assert_eq!(daemon.calls(), ["stop workspace_cvm", "remove workspace_cvm"]);
    assert!(
        reporter
            .events
            .borrow()
            .iter()
            .any(|e| e == "success: workspace_cvm removed")
    );
}

#[tokio::test]
async fn teardown_is_repeatable() {
    let daemon = FakeDaemon::default();
    let reporter = RecordingReporter::default();
    for _ in 0..2 {
        teardown(&daemon, &reporter, "workspace_cvm")
            .await
            .expect("teardown");
    }
    assert_eq!(daemon.calls().len(), 4);
}
