//! Output validators.
//!
//! Validators turn raw command output into [`Verdict`]s. They never return
//! errors: a command that could not be issued, a missing pod and a socket
//! that is not listed are all ordinary negative evidence. Each check takes
//! a [`Capture`] mode so a failing check can be logged with the text it was
//! judged on, without running the command a second time.

pub mod diagnostics;
pub mod parsing;

use std::fmt;

use tracing::{debug, warn};

use crate::cluster::{Cluster, ExecOutcome, Workload};
use crate::error::Result;

pub use diagnostics::{WorkloadDiagnostics, describe_workload};
pub use parsing::{ParseError, PingStats, REACHABILITY_MARKERS};

/// Whether a validator keeps the raw output it was judged on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Capture {
    #[default]
    Discard,
    Keep,
}

/// Result of a single check.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Verdict {
    pub passed: bool,
    /// Raw output, present only under [`Capture::Keep`]
    pub output: Option<String>,
}

impl Verdict {
    pub fn pass() -> Self {
        Self {
            passed: true,
            output: None,
        }
    }

    pub fn fail() -> Self {
        Self {
            passed: false,
            output: None,
        }
    }

    /// Negative verdict carrying an error description.
    pub fn error(message: impl fmt::Display, capture: Capture) -> Self {
        Self {
            passed: false,
            output: (capture == Capture::Keep).then(|| format!("ERROR: {message}")),
        }
    }

    /// Judge an exec outcome by its stdout text.
    ///
    /// The exit status only decides what gets captured; whether the check
    /// passes is read from the text alone.
    pub fn from_outcome(
        outcome: &ExecOutcome,
        capture: Capture,
        judge: impl FnOnce(&str) -> bool,
    ) -> Self {
        let passed = judge(&outcome.stdout);
        let output = (capture == Capture::Keep).then(|| captured_text(outcome));
        Self { passed, output }
    }

    /// Captured output, or an empty string.
    pub fn output(&self) -> &str {
        self.output.as_deref().unwrap_or_default()
    }
}

impl PartialEq<bool> for Verdict {
    fn eq(&self, other: &bool) -> bool {
        self.passed == *other
    }
}

fn captured_text(outcome: &ExecOutcome) -> String {
    if outcome.is_success() || !outcome.stdout.is_empty() {
        outcome.stdout.clone()
    } else {
        format!("ERROR: {}", outcome.stderr.trim())
    }
}

/// Transport protocol of a listening socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
    Sctp,
}

impl Protocol {
    /// Socket listing command for this protocol.
    ///
    /// SCTP associations are not shown in the TCP/UDP listing modes.
    pub fn listing_command(&self) -> &'static [&'static str] {
        match self {
            Protocol::Tcp => &["ss", "-tnap"],
            Protocol::Udp => &["ss", "-unap"],
            Protocol::Sctp => &["ss", "-S", "-na"],
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "TCP"),
            Protocol::Udp => write!(f, "UDP"),
            Protocol::Sctp => write!(f, "SCTP"),
        }
    }
}

/// Interface, socket and reachability checks run inside workloads.
pub struct NetworkValidator<'a, C> {
    cluster: &'a C,
}

impl<'a, C: Cluster> NetworkValidator<'a, C> {
    pub fn new(cluster: &'a C) -> Self {
        Self { cluster }
    }

    /// Check that `interface` inside the workload carries `expected_address`.
    pub async fn interface_has_address(
        &self,
        workload: &str,
        namespace: &str,
        interface: &str,
        expected_address: &str,
        capture: Capture,
    ) -> Verdict {
        let outcome = self
            .cluster
            .exec_command(workload, namespace, &["ip", "addr", "show", interface], None)
            .await;
        let verdict = Verdict::from_outcome(&outcome, capture, |text| {
            parsing::contains_address(text, expected_address)
        });
        debug!(
            workload,
            interface,
            address = expected_address,
            passed = verdict.passed,
            "Interface address check"
        );
        verdict
    }

    /// Check that the workload's socket table lists `port` for `protocol`.
    pub async fn port_is_listening(
        &self,
        workload: &str,
        namespace: &str,
        port: u16,
        protocol: Protocol,
        capture: Capture,
    ) -> Verdict {
        let outcome = self
            .cluster
            .exec_command(workload, namespace, protocol.listing_command(), None)
            .await;
        let verdict =
            Verdict::from_outcome(&outcome, capture, |text| parsing::lists_port(text, port));
        debug!(
            workload,
            port,
            %protocol,
            passed = verdict.passed,
            "Listening port check"
        );
        verdict
    }

    /// Ping `target_address` from `source`.
    ///
    /// `target` names the workload behind the address and is only used for
    /// logging.
    pub async fn can_reach(
        &self,
        source: &str,
        target: &str,
        namespace: &str,
        target_address: &str,
        capture: Capture,
    ) -> Verdict {
        let outcome = self
            .cluster
            .exec_command(
                source,
                namespace,
                &["ping", "-c", "3", "-W", "5", target_address],
                None,
            )
            .await;
        let verdict = Verdict::from_outcome(&outcome, capture, parsing::reachability_confirmed);
        debug!(
            source,
            target,
            address = target_address,
            passed = verdict.passed,
            "Reachability check"
        );
        verdict
    }
}

/// Lookups and readiness checks for named network-function components.
///
/// Components are found by a case-insensitive substring of the pod name,
/// since pods carry generated suffixes.
pub struct ComponentValidator<'a, C> {
    cluster: &'a C,
}

impl<'a, C: Cluster> ComponentValidator<'a, C> {
    pub fn new(cluster: &'a C) -> Self {
        Self { cluster }
    }

    /// Workloads in `namespace` whose name contains `component`.
    pub async fn component_workloads(
        &self,
        component: &str,
        namespace: &str,
    ) -> Result<Vec<Workload>> {
        let workloads = self.cluster.list_workloads(Some(namespace)).await?;
        Ok(workloads
            .into_iter()
            .filter(|w| w.name_contains(component))
            .collect())
    }

    /// First running workload of a component, if any.
    pub async fn running_workload(&self, component: &str, namespace: &str) -> Option<Workload> {
        match self.component_workloads(component, namespace).await {
            Ok(workloads) => workloads.into_iter().find(Workload::is_running),
            Err(e) => {
                warn!(component, namespace, error = %e, "Cannot list component workloads");
                None
            }
        }
    }

    /// A component is ready when it has at least one workload and all of
    /// them are running.
    pub async fn is_component_ready(
        &self,
        component: &str,
        namespace: &str,
        capture: Capture,
    ) -> Verdict {
        let workloads = match self.component_workloads(component, namespace).await {
            Ok(workloads) => workloads,
            Err(e) => return Verdict::error(e, capture),
        };
        let passed = !workloads.is_empty() && workloads.iter().all(Workload::is_running);
        let output = (capture == Capture::Keep).then(|| {
            if workloads.is_empty() {
                format!("no {component} workloads in {namespace}")
            } else {
                workloads
                    .iter()
                    .map(Workload::status_line)
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        });
        Verdict { passed, output }
    }

    /// Non-loopback interface names inside a workload.
    pub async fn component_interfaces(&self, workload: &str, namespace: &str) -> Vec<String> {
        let outcome = self
            .cluster
            .exec_command(workload, namespace, &["ip", "link", "show"], None)
            .await;
        if !outcome.is_success() {
            debug!(workload, stderr = %outcome.stderr.trim(), "Cannot list interfaces");
            return Vec::new();
        }
        parsing::parse_interface_names(&outcome.stdout)
    }

    /// Primary address of a workload as reported by `hostname -i`.
    pub async fn workload_address(&self, workload: &str, namespace: &str) -> Option<String> {
        let outcome = self
            .cluster
            .exec_command(workload, namespace, &["hostname", "-i"], None)
            .await;
        if !outcome.is_success() {
            return None;
        }
        parsing::parse_hostname_address(&outcome.stdout)
    }
}
