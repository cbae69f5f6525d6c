//! Typed views of cluster objects.
//!
//! The control API hands back deeply nested, mostly-optional structures.
//! This module maps them once, at the client boundary, into the small set
//! of named fields the validators actually need. Nothing here is cached:
//! every value is a snapshot of a single call.

use std::collections::BTreeMap;
use std::fmt;

use jiff::Timestamp;
use k8s_openapi::api::core::v1::{Event, Node as KubeNode, Pod};
use kube::ResourceExt;
use kube::api::DynamicObject;

/// Lifecycle phase of a workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WorkloadPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    #[default]
    Unknown,
}

impl WorkloadPhase {
    /// Parse the phase string reported by the control API.
    pub fn parse(phase: &str) -> Self {
        match phase {
            "Pending" => WorkloadPhase::Pending,
            "Running" => WorkloadPhase::Running,
            "Succeeded" => WorkloadPhase::Succeeded,
            "Failed" => WorkloadPhase::Failed,
            _ => WorkloadPhase::Unknown,
        }
    }
}

impl fmt::Display for WorkloadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkloadPhase::Pending => write!(f, "Pending"),
            WorkloadPhase::Running => write!(f, "Running"),
            WorkloadPhase::Succeeded => write!(f, "Succeeded"),
            WorkloadPhase::Failed => write!(f, "Failed"),
            WorkloadPhase::Unknown => write!(f, "Unknown"),
        }
    }
}

/// A `type -> status` condition pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub type_: String,
    pub status: String,
}

impl Condition {
    pub fn new(type_: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            type_: type_.into(),
            status: status.into(),
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == "True"
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.type_, self.status)
    }
}

/// A running unit (pod) identified by namespace and name.
///
/// A `Running` phase does not mean the application inside has bound its
/// sockets yet; pair it with an output validator before declaring success.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Workload {
    pub namespace: String,
    pub name: String,
    /// Server-assigned identity; differs between a pod and its replacement
    pub uid: Option<String>,
    pub phase: WorkloadPhase,
    /// Container names in declaration order.
    pub containers: Vec<String>,
    /// Restart count per container, as reported by container statuses.
    pub restart_counts: BTreeMap<String, i32>,
    pub conditions: Vec<Condition>,
    pub annotations: BTreeMap<String, String>,
    pub node_name: Option<String>,
}

impl Workload {
    /// Map a pod into a workload snapshot.
    pub fn from_pod(pod: &Pod) -> Self {
        let status = pod.status.as_ref();

        let containers = pod
            .spec
            .as_ref()
            .map(|s| s.containers.iter().map(|c| c.name.clone()).collect())
            .unwrap_or_default();

        let restart_counts = status
            .and_then(|s| s.container_statuses.as_ref())
            .map(|statuses| {
                statuses
                    .iter()
                    .map(|cs| (cs.name.clone(), cs.restart_count))
                    .collect()
            })
            .unwrap_or_default();

        let conditions = status
            .and_then(|s| s.conditions.as_ref())
            .map(|conds| {
                conds
                    .iter()
                    .map(|c| Condition::new(c.type_.clone(), c.status.clone()))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            namespace: pod.namespace().unwrap_or_default(),
            name: pod.name_any(),
            uid: pod.metadata.uid.clone(),
            phase: status
                .and_then(|s| s.phase.as_deref())
                .map(WorkloadPhase::parse)
                .unwrap_or_default(),
            containers,
            restart_counts,
            conditions,
            annotations: pod.annotations().clone(),
            node_name: pod.spec.as_ref().and_then(|s| s.node_name.clone()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.phase == WorkloadPhase::Running
    }

    /// First declared container, the fallback target for exec.
    pub fn first_container(&self) -> Option<&str> {
        self.containers.first().map(String::as_str)
    }

    /// Check whether this workload is a different instance from `previous`.
    ///
    /// Compares server identities when both are known. Otherwise falls back
    /// to names, which only works for controllers that generate new names.
    pub fn is_replacement_of(&self, previous: &Workload) -> bool {
        match (&self.uid, &previous.uid) {
            (Some(current), Some(old)) => current != old,
            _ => self.name != previous.name,
        }
    }

    pub fn total_restarts(&self) -> i32 {
        self.restart_counts.values().sum()
    }

    /// Case-insensitive name substring match, used to find a component's pods.
    pub fn name_contains(&self, needle: &str) -> bool {
        self.name.to_lowercase().contains(&needle.to_lowercase())
    }

    /// Compact one-line status for diagnostics.
    pub fn status_line(&self) -> String {
        let conditions = if self.conditions.is_empty() {
            "n/a".to_string()
        } else {
            self.conditions
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        };
        format!(
            "{}: phase={}, restarts={}, conditions=[{}]",
            self.name,
            self.phase,
            self.total_restarts(),
            conditions
        )
    }
}

/// A cluster node.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Node {
    pub name: String,
    /// `None` when the node reports no Ready condition at all.
    pub ready: Option<bool>,
    pub labels: BTreeMap<String, String>,
}

impl Node {
    pub fn from_kube(node: &KubeNode) -> Self {
        let ready = node
            .status
            .as_ref()
            .and_then(|s| s.conditions.as_ref())
            .and_then(|conds| conds.iter().find(|c| c.type_ == "Ready"))
            .map(|c| c.status == "True");

        Self {
            name: node.name_any(),
            ready,
            labels: node.labels().clone(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready == Some(true)
    }

    /// Edge nodes are recognised by name.
    pub fn is_edge(&self) -> bool {
        self.name.to_lowercase().contains("edge")
    }
}

/// A secondary-network definition (Multus NetworkAttachmentDefinition).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct NetworkAttachment {
    pub name: String,
    pub namespace: Option<String>,
}

impl NetworkAttachment {
    pub fn from_dynamic(obj: &DynamicObject) -> Self {
        Self {
            name: obj.name_any(),
            namespace: obj.namespace(),
        }
    }
}

/// Names from `expected` that are not present in `observed`, in `expected` order.
pub fn missing_attachments<'a>(
    expected: &[&'a str],
    observed: &[NetworkAttachment],
) -> Vec<&'a str> {
    expected
        .iter()
        .copied()
        .filter(|name| !observed.iter().any(|a| a.name == *name))
        .collect()
}

/// An event recorded against a single workload.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadEvent {
    pub reason: String,
    pub message: String,
    pub type_: String,
    pub count: i32,
    /// Most recent of last timestamp, event time, first timestamp.
    pub last_seen: Option<Timestamp>,
}

impl WorkloadEvent {
    pub fn from_kube(event: &Event) -> Self {
        let last_seen = event
            .last_timestamp
            .as_ref()
            .map(|t| t.0)
            .or_else(|| event.event_time.as_ref().map(|t| t.0))
            .or_else(|| event.first_timestamp.as_ref().map(|t| t.0));

        Self {
            reason: event.reason.clone().unwrap_or_default(),
            message: event.message.clone().unwrap_or_default(),
            type_: event.type_.clone().unwrap_or_default(),
            count: event.count.unwrap_or(1),
            last_seen,
        }
    }
}

/// Result of a remote command execution.
///
/// A command that ran and failed and a command that could not be issued at
/// all both show up here with a nonzero exit status; the difference is only
/// visible in `stderr`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecOutcome {
    pub stdout: String,
    pub stderr: String,
    pub exit_status: i32,
}

impl ExecOutcome {
    /// Exit status used for calls that exceeded their timeout.
    pub const TIMED_OUT: i32 = 124;
    /// Exit status used when the command-line tool is not installed.
    pub const NOT_FOUND: i32 = 127;

    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_status: 0,
        }
    }

    pub fn failure(stderr: impl Into<String>, exit_status: i32) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_status,
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_status == 0
    }

    /// Stdout when present, otherwise stderr.
    pub fn text(&self) -> &str {
        if self.stdout.is_empty() {
            &self.stderr
        } else {
            &self.stdout
        }
    }
}

impl PartialEq<bool> for ExecOutcome {
    fn eq(&self, other: &bool) -> bool {
        self.is_success() == *other
    }
}

/// A disruptive administrative action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    pub verb: MutationVerb,
    pub kind: String,
    pub name: String,
    pub namespace: String,
    pub extra_args: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationVerb {
    Delete,
    RolloutRestart,
}

impl Mutation {
    pub fn delete_pod(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            verb: MutationVerb::Delete,
            kind: "pod".to_string(),
            name: name.into(),
            namespace: namespace.into(),
            extra_args: Vec::new(),
        }
    }

    pub fn rollout_restart(
        kind: impl Into<String>,
        name: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            verb: MutationVerb::RolloutRestart,
            kind: kind.into(),
            name: name.into(),
            namespace: namespace.into(),
            extra_args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Command-line arguments after the namespace flag.
    pub fn args(&self) -> Vec<String> {
        let mut args = match self.verb {
            MutationVerb::Delete => vec!["delete".to_string()],
            MutationVerb::RolloutRestart => vec!["rollout".to_string(), "restart".to_string()],
        };
        args.push(self.kind.clone());
        args.push(self.name.clone());
        args.extend(self.extra_args.iter().cloned());
        args
    }
}
