//! Cluster access.
//!
//! [`Cluster`] is the only boundary between the validation engine and the
//! orchestrated cluster. [`KubeCluster`] implements it against a live
//! control API; tests implement it in memory.

pub mod exec_policy;
pub mod kube_cluster;
pub mod kubectl;
pub mod types;

use std::future::Future;

pub use kube_cluster::KubeCluster;
pub use types::{
    Condition, ExecOutcome, Mutation, MutationVerb, NetworkAttachment, Node, Workload,
    WorkloadEvent, WorkloadPhase, missing_attachments,
};

use crate::error::Result;

/// Read, exec and mutate operations against the cluster.
///
/// Hard errors (`ClusterUnavailable`) are returned as `Err`; per-call
/// failures of exec and mutate are data in the returned [`ExecOutcome`].
/// Empty list results are never errors.
pub trait Cluster {
    fn list_nodes(&self) -> impl Future<Output = Result<Vec<Node>>> + Send;

    /// `None` lists across all namespaces.
    fn list_workloads(
        &self,
        namespace: Option<&str>,
    ) -> impl Future<Output = Result<Vec<Workload>>> + Send;

    /// `None` lists cluster-wide.
    fn list_network_attachments(
        &self,
        namespace: Option<&str>,
    ) -> impl Future<Output = Result<Vec<NetworkAttachment>>> + Send;

    /// Fails with `LogUnavailable` if the workload or container does not exist.
    fn read_logs(
        &self,
        workload: &str,
        namespace: &str,
        container: Option<&str>,
        tail_lines: i64,
    ) -> impl Future<Output = Result<String>> + Send;

    /// Events whose involved object is exactly this workload.
    fn list_events(
        &self,
        workload: &str,
        namespace: &str,
    ) -> impl Future<Output = Result<Vec<WorkloadEvent>>> + Send;

    /// Run a command inside a workload, with the single container fallback.
    fn exec_command(
        &self,
        workload: &str,
        namespace: &str,
        command: &[&str],
        container: Option<&str>,
    ) -> impl Future<Output = ExecOutcome> + Send;

    /// Apply a disruptive administrative action.
    fn mutate(&self, mutation: &Mutation) -> impl Future<Output = ExecOutcome> + Send;
}
