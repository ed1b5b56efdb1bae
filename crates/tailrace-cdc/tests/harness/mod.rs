//! Test harness for commit log pipeline integration tests
//!
//! Provides:
//! - Segment and marker fixture authoring through the public codec API
//! - Shared table schemas and mutation generators
//! - Fast-interval pipeline configuration for tempdir runs
//! - Polling assertions for asynchronous pipeline progress

pub mod assertions;
pub mod fixtures;

pub use assertions::{collect_events, wait_for, ChangeEventVecExt};
pub use fixtures::*;

use std::sync::Once;

static INIT: Once = Once::new();

/// Initialize test logging (idempotent)
pub fn init_test_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive("tailrace_cdc=debug".parse().unwrap()),
            )
            .with_test_writer()
            .try_init()
            .ok();
    });
}
