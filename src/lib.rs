//! testbed-validator library crate
//!
//! Validation and resilience engine for a multi-node mobile-core testbed.
//! Suites of checks query the cluster through [`Cluster`], judge raw command
//! output with the validators in [`validation`], wait for recovery after
//! disruptions with [`RecoveryPoller`], and roll up into a [`RunSummary`].

pub mod cluster;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod poller;
pub mod preflight;
pub mod suites;
pub mod validation;

pub use cluster::{Cluster, ExecOutcome, KubeCluster, Mutation, Node, Workload, WorkloadPhase};
pub use config::{TestConfig, Thresholds};
pub use error::{Error, Result};
pub use orchestrator::{
    Phase, RunSummary, SuiteId, SuiteLauncher, SuiteOrchestrator, SuiteOutcome, SuiteRequest,
    SuiteResult, expand_phases,
};
pub use poller::{Clock, Observation, PollOutcome, PollState, RecoveryPoller, TokioClock};
pub use suites::{Finding, SuiteContext, SuiteReport};
pub use validation::{Capture, Protocol, Verdict};
