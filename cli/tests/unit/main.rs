//! Unit tests for envbox
//!
//! These tests use hand-written fakes for the daemon ports and run fast
//! without a real Docker daemon.

mod bring_up_service;
mod teardown_service;
