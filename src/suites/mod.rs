//! Check suites.
//!
//! Each suite is an ordered list of checks run inside one suite process.
//! A check yields a [`Finding`]; an error from a check counts as a failed
//! check unless it is fatal (the cluster itself is unreachable), in which
//! case the suite is aborted.

pub mod e2e;
pub mod performance;
pub mod protocols;
pub mod ran;
pub mod resilience;

use std::fmt;

use tracing::{error, info, warn};

use crate::cluster::{Cluster, Workload};
use crate::config::{TestConfig, Thresholds};
use crate::error::Result;
use crate::orchestrator::SuiteId;
use crate::poller::{Clock, RecoveryPoller, TokioClock};
use crate::preflight::Provisioner;
use crate::validation::{ComponentValidator, NetworkValidator, describe_workload};

/// Namespace of the mobile-core and RAN simulator workloads.
pub const CORE_NAMESPACE: &str = "5g";
pub const SYSTEM_NAMESPACE: &str = "kube-system";
pub const EDGE_NAMESPACE: &str = "kubeedge";
pub const MEC_NAMESPACE: &str = "mec";

/// Everything a check needs. Built once per suite process.
pub struct SuiteContext<C, K = TokioClock> {
    pub cluster: C,
    pub config: TestConfig,
    pub thresholds: Thresholds,
    pub poller: RecoveryPoller<K>,
}

impl<C: Cluster> SuiteContext<C, TokioClock> {
    pub fn new(cluster: C, config: TestConfig) -> Self {
        Self::with_poller(cluster, config, RecoveryPoller::new())
    }
}

impl<C: Cluster, K: Clock> SuiteContext<C, K> {
    pub fn with_poller(cluster: C, config: TestConfig, poller: RecoveryPoller<K>) -> Self {
        let thresholds = config.thresholds();
        Self {
            cluster,
            config,
            thresholds,
            poller,
        }
    }

    pub fn network(&self) -> NetworkValidator<'_, C> {
        NetworkValidator::new(&self.cluster)
    }

    pub fn components(&self) -> ComponentValidator<'_, C> {
        ComponentValidator::new(&self.cluster)
    }

    /// First workload of a core component, whatever its phase.
    pub async fn first_component(&self, component: &str) -> Result<Option<Workload>> {
        Ok(self
            .components()
            .component_workloads(component, CORE_NAMESPACE)
            .await?
            .into_iter()
            .next())
    }

    /// Log status, log tail and events for a workload behind a failed check.
    pub async fn log_diagnostics(&self, workload: &Workload) {
        let diagnostics = describe_workload(&self.cluster, workload).await;
        info!(workload = %workload.name, "Diagnostics:\n{diagnostics}");
    }
}

/// Outcome of one check.
///
/// A skipped check neither passed nor failed: what it checks is not
/// configured on this testbed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub passed: bool,
    pub skipped: bool,
    pub message: String,
}

impl Finding {
    pub fn pass(message: impl Into<String>) -> Self {
        Self {
            passed: true,
            skipped: false,
            message: message.into(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            skipped: false,
            message: message.into(),
        }
    }

    pub fn skip(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            skipped: true,
            message: message.into(),
        }
    }
}

/// A named check and its finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub name: &'static str,
    pub passed: bool,
    pub skipped: bool,
    pub message: String,
}

impl CheckResult {
    pub fn mark(&self) -> &'static str {
        match (self.passed, self.skipped) {
            (true, _) => "PASS",
            (false, true) => "SKIP",
            (false, false) => "FAIL",
        }
    }
}

/// Checks run by one suite, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuiteReport {
    pub suite: SuiteId,
    pub checks: Vec<CheckResult>,
}

impl SuiteReport {
    pub fn new(suite: SuiteId) -> Self {
        Self {
            suite,
            checks: Vec::new(),
        }
    }

    /// Record a check result.
    ///
    /// Returns whether the check passed; a skipped check did not. A fatal
    /// error is propagated; any other error is recorded as a failed check.
    pub fn record(&mut self, name: &'static str, result: Result<Finding>) -> Result<bool> {
        let finding = match result {
            Ok(finding) => finding,
            Err(e) if e.is_fatal() => {
                error!(suite = %self.suite, check = name, error = %e, "Aborting suite");
                return Err(e);
            }
            Err(e) => Finding::fail(format!("{name} failed with error: {e}")),
        };

        if finding.passed {
            info!(suite = %self.suite, check = name, "PASS: {}", finding.message);
        } else if finding.skipped {
            info!(suite = %self.suite, check = name, "SKIP: {}", finding.message);
        } else {
            error!(suite = %self.suite, check = name, "FAIL: {}", finding.message);
        }
        let passed = finding.passed;
        self.checks.push(CheckResult {
            name,
            passed,
            skipped: finding.skipped,
            message: finding.message,
        });
        Ok(passed)
    }

    pub fn passed(&self) -> usize {
        self.checks.iter().filter(|c| c.passed).count()
    }

    pub fn failed(&self) -> usize {
        self.checks.iter().filter(|c| !c.passed && !c.skipped).count()
    }

    pub fn skipped(&self) -> usize {
        self.checks.iter().filter(|c| c.skipped).count()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    pub fn check(&self, name: &str) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.name == name)
    }
}

impl fmt::Display for SuiteReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} results: {} passed, {} failed, {} skipped",
            self.suite,
            self.passed(),
            self.failed(),
            self.skipped()
        )
    }
}

/// Run one suite to completion.
pub async fn run<C: Cluster, K: Clock>(suite: SuiteId, ctx: &SuiteContext<C, K>) -> Result<SuiteReport> {
    info!(%suite, "Starting suite");
    let report = match suite {
        SuiteId::E2e => e2e::run(ctx).await?,
        SuiteId::Protocols => protocols::run(ctx).await?,
        SuiteId::Performance => performance::run(ctx).await?,
        SuiteId::Resilience => resilience::run(ctx).await?,
        SuiteId::Ran => ran::run(ctx, &Provisioner::new()).await?,
    };
    if report.is_success() {
        info!("{report}");
    } else {
        warn!("{report}");
    }
    Ok(report)
}

/// Network setup workloads that run Open vSwitch.
pub(crate) fn ovs_workloads(workloads: &[Workload]) -> Vec<&Workload> {
    workloads.iter().filter(|w| is_ovs_workload(w)).collect()
}

pub(crate) fn is_ovs_workload(workload: &Workload) -> bool {
    workload.name_contains("ds-net-setup") || workload.name_contains("ovs")
}

/// Configured address for an interface role, or a failing finding.
pub(crate) fn required_address(
    config: &TestConfig,
    interface: &str,
    role: &str,
) -> std::result::Result<String, Finding> {
    config.interface_address(interface, role).ok_or_else(|| {
        Finding::fail(format!(
            "no address configured at network.interfaces.{interface}.{role}_ip"
        ))
    })
}
