//! Suite selection, execution and tallying.
//!
//! A suite is a named group of checks that runs as its own process; a
//! phase is a named grouping that expands to one or more suites. The
//! orchestrator runs suites strictly one after another so that, for
//! example, a resilience suite deleting pods never overlaps a performance
//! suite measuring them.

pub mod launcher;

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::time::{Duration, Instant};

use clap::ValueEnum;
use tracing::{error, info};

use crate::config::TestConfig;
use crate::error::{Error, Result};

pub use launcher::ProcessLauncher;

/// Exit status of a suite process that could not reach the control API.
///
/// Any other nonzero status is an ordinary suite failure.
pub const CLUSTER_UNAVAILABLE_EXIT: u8 = 3;

/// Suite identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, ValueEnum)]
pub enum SuiteId {
    E2e,
    Protocols,
    Performance,
    Resilience,
    Ran,
}

impl SuiteId {
    pub const ALL: [SuiteId; 5] = [
        SuiteId::E2e,
        SuiteId::Protocols,
        SuiteId::Performance,
        SuiteId::Resilience,
        SuiteId::Ran,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SuiteId::E2e => "e2e",
            SuiteId::Protocols => "protocols",
            SuiteId::Performance => "performance",
            SuiteId::Resilience => "resilience",
            SuiteId::Ran => "ran",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            SuiteId::E2e => "End-to-end integration tests",
            SuiteId::Protocols => "5G protocol tests (PFCP, NGAP, GTP-U, NAS)",
            SuiteId::Performance => "Performance and stress tests",
            SuiteId::Resilience => "Failure recovery and fault tolerance tests",
            SuiteId::Ran => "Physical RAN integration tests (OVS RAN bridge)",
        }
    }
}

impl fmt::Display for SuiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SuiteId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        SuiteId::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| Error::Config(format!("unknown suite '{s}'")))
    }
}

/// Phase identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum Phase {
    Infrastructure,
    #[value(name = "5g-core")]
    FiveGCore,
    Ueransim,
    E2e,
    Performance,
    Resilience,
}

impl Phase {
    pub const ALL: [Phase; 6] = [
        Phase::Infrastructure,
        Phase::FiveGCore,
        Phase::Ueransim,
        Phase::E2e,
        Phase::Performance,
        Phase::Resilience,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Infrastructure => "infrastructure",
            Phase::FiveGCore => "5g-core",
            Phase::Ueransim => "ueransim",
            Phase::E2e => "e2e",
            Phase::Performance => "performance",
            Phase::Resilience => "resilience",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Phase::Infrastructure => "Basic infrastructure tests",
            Phase::FiveGCore => "5G Core network function tests",
            Phase::Ueransim => "UERANSIM simulator tests",
            Phase::E2e => "Complete end-to-end tests",
            Phase::Performance => "Performance tests",
            Phase::Resilience => "Resilience tests",
        }
    }

    /// Suites this phase expands to.
    pub fn suites(&self) -> &'static [SuiteId] {
        match self {
            Phase::Infrastructure | Phase::Ueransim => &[SuiteId::E2e],
            Phase::FiveGCore => &[SuiteId::E2e, SuiteId::Protocols],
            Phase::E2e => &[SuiteId::E2e, SuiteId::Protocols, SuiteId::Performance],
            Phase::Performance => &[SuiteId::Performance],
            Phase::Resilience => &[SuiteId::Resilience],
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Phase::ALL
            .into_iter()
            .find(|phase| phase.as_str() == s)
            .ok_or_else(|| Error::Config(format!("unknown phase '{s}'")))
    }
}

/// Expand phases to suites, de-duplicated in first-seen order.
pub fn expand_phases(phases: &[Phase]) -> Vec<SuiteId> {
    let mut suites = Vec::new();
    for suite in phases.iter().flat_map(|p| p.suites().iter().copied()) {
        if !suites.contains(&suite) {
            suites.push(suite);
        }
    }
    suites
}

/// A suite to run, and whether its configured enablement is overridden.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuiteRequest {
    pub id: SuiteId,
    pub forced: bool,
}

impl SuiteRequest {
    pub fn new(id: SuiteId, forced: bool) -> Self {
        Self { id, forced }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuiteOutcome {
    Passed,
    Failed,
    Skipped,
}

impl fmt::Display for SuiteOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SuiteOutcome::Passed => write!(f, "PASSED"),
            SuiteOutcome::Failed => write!(f, "FAILED"),
            SuiteOutcome::Skipped => write!(f, "SKIPPED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SuiteResult {
    pub id: SuiteId,
    pub outcome: SuiteOutcome,
    pub duration: Duration,
    /// Why a suite failed to launch, or was skipped
    pub detail: Option<String>,
    /// The suite lost the cluster; nothing after it is run
    pub fatal: bool,
}

/// Results of a run, in execution order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub results: Vec<SuiteResult>,
}

impl RunSummary {
    fn count(&self, outcome: SuiteOutcome) -> usize {
        self.results.iter().filter(|r| r.outcome == outcome).count()
    }

    pub fn passed(&self) -> usize {
        self.count(SuiteOutcome::Passed)
    }

    pub fn failed(&self) -> usize {
        self.count(SuiteOutcome::Failed)
    }

    pub fn skipped(&self) -> usize {
        self.count(SuiteOutcome::Skipped)
    }

    /// Skipped suites never count against success.
    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    pub fn outcomes(&self) -> Vec<SuiteOutcome> {
        self.results.iter().map(|r| r.outcome).collect()
    }

    /// The suite that aborted the run, if any.
    pub fn aborted(&self) -> Option<&SuiteResult> {
        self.results.iter().find(|r| r.fatal)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for result in &self.results {
            writeln!(
                f,
                "{:12} {:8} ({:.1}s)",
                result.id.as_str().to_uppercase(),
                result.outcome,
                result.duration.as_secs_f64()
            )?;
        }
        if let Some(aborted) = self.aborted() {
            writeln!(f, "Aborted after {}: cluster unavailable", aborted.id)?;
        }
        write!(
            f,
            "Total: {} passed, {} failed, {} skipped",
            self.passed(),
            self.failed(),
            self.skipped()
        )
    }
}

/// Starts a suite's executable unit and reports its exit code.
pub trait SuiteLauncher {
    /// `Err` means the unit could not be located or started.
    fn launch(&self, suite: SuiteId) -> impl Future<Output = Result<i32>> + Send;
}

/// Runs suites one at a time and tallies the results.
pub struct SuiteOrchestrator<L> {
    config: TestConfig,
    launcher: L,
}

impl<L: SuiteLauncher> SuiteOrchestrator<L> {
    pub fn new(config: TestConfig, launcher: L) -> Self {
        Self { config, launcher }
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    /// Run one suite, unless it is disabled and not forced.
    pub async fn run_suite(&self, id: SuiteId, forced: bool) -> SuiteResult {
        if !forced && !self.config.suite_enabled(id.as_str()) {
            info!(suite = %id, "Suite disabled by configuration, skipping");
            return SuiteResult {
                id,
                outcome: SuiteOutcome::Skipped,
                duration: Duration::ZERO,
                detail: Some("disabled by configuration".to_string()),
                fatal: false,
            };
        }

        info!(suite = %id, "Running suite");
        let start = Instant::now();
        let mut fatal = false;
        let (outcome, detail) = match self.launcher.launch(id).await {
            Ok(0) => (SuiteOutcome::Passed, None),
            Ok(code) if code == i32::from(CLUSTER_UNAVAILABLE_EXIT) => {
                fatal = true;
                (SuiteOutcome::Failed, Some("cluster unavailable".to_string()))
            }
            Ok(code) => (SuiteOutcome::Failed, Some(format!("exit status {code}"))),
            Err(e) => {
                error!(suite = %id, error = %e, "Suite could not be launched");
                (SuiteOutcome::Failed, Some(e.to_string()))
            }
        };
        let duration = start.elapsed();

        match outcome {
            SuiteOutcome::Passed => info!(suite = %id, ?duration, "Suite passed"),
            _ => error!(suite = %id, ?duration, detail = ?detail, "Suite failed"),
        }

        SuiteResult {
            id,
            outcome,
            duration,
            detail,
            fatal,
        }
    }

    /// Run every request in order.
    ///
    /// A failed suite never stops later suites. A suite that lost the
    /// cluster ends the run: the remaining requests are not launched.
    pub async fn run_many(&self, requests: &[SuiteRequest]) -> RunSummary {
        let mut summary = RunSummary::default();
        for request in requests {
            let result = self.run_suite(request.id, request.forced).await;
            let fatal = result.fatal;
            summary.results.push(result);
            if fatal {
                error!(suite = %request.id, "Cluster unavailable, aborting run");
                break;
            }
        }
        info!(
            passed = summary.passed(),
            failed = summary.failed(),
            skipped = summary.skipped(),
            "Run complete"
        );
        summary
    }
}
