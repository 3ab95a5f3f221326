//! Switchboard Test - shared test utilities for the Switchboard workspace.
//!
//! Mock implementations of the external-interface traits
//! (`switchboard-provider`) plus fixture builders, used as a dev-dependency
//! by resolver unit and integration tests.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod fixtures;
pub mod mocks;

pub use fixtures::*;
pub use mocks::*;

/// Initialize test logging from `RUST_LOG`, once per process.
///
/// Safe to call from every test; repeat calls are no-ops.
pub fn init_test_logging() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
