//! Command implementations

pub mod docker;
pub mod libs;
pub mod teardown;
pub mod version;
