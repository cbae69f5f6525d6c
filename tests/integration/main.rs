// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Integration tests against a live testbed.
//!
//! These tests require a reachable cluster. They are marked with #[ignore]
//! and must be run explicitly:
//!
//! ```bash
//! # Read-only checks and the non-disruptive suites
//! cargo test --test integration -- --ignored
//!
//! # Run specific test
//! cargo test --test integration test_lists_ready_nodes -- --ignored
//! ```
//!
//! The configuration is read from `TESTBED_CONFIG` (default
//! `tests/test_config.yaml`) and the credentials from `KUBECONFIG` or the
//! paths that configuration names.
//!
//! Resilience checks delete pods and restart daemonsets. They are kept
//! behind a separate ignore reason and must never run alongside the other
//! tests against the same cluster:
//!
//! ```bash
//! cargo test --test integration test_resilience -- --ignored --test-threads=1
//! ```

#[path = "../common/mod.rs"]
mod common;


mod cluster_tests;
mod suite_tests;

pub use cluster::*;
