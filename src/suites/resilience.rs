//! Failure and recovery checks.
//!
//! Disruptive checks delete a pod or restart a rollout, then poll until
//! fresh replacements are running. A replacement only counts once it is a
//! different instance from every workload that existed before the
//! disruption; otherwise the old, still-terminating pod would satisfy the
//! poll on its first evaluation.
//!
//! These checks mutate shared cluster state. Never run them concurrently
//! with another suite against the same cluster.

use std::time::Duration;

use tracing::{debug, info, warn};

use super::{
    CORE_NAMESPACE, EDGE_NAMESPACE, Finding, SYSTEM_NAMESPACE, SuiteContext, SuiteReport,
    is_ovs_workload, required_address,
};
use crate::cluster::{Cluster, Mutation, Workload};
use crate::error::Result;
use crate::orchestrator::SuiteId;
use crate::poller::{Clock, Observation, PollOutcome};
use crate::validation::{Capture, parsing};

/// Network setup daemonsets restarted by the OVS check.
pub const OVS_DAEMONSETS: &[&str] = &["ds-net-setup-worker", "ds-net-setup-edge"];
pub const MULTUS_DAEMONSET: &str = "kube-multus-ds";

/// Node-local daemonsets are expected on the worker and the edge node.
const MIN_DAEMON_PODS: usize = 2;
/// Control plane plus at least one worker or edge node.
const MIN_READY_NODES: usize = 2;
const CRITICAL_COMPONENTS: [&str; 3] = ["amf", "smf", "upf"];
/// How long leftover test pods get to terminate.
const CLEANUP_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResilienceCheck {
    PodRestart,
    InterfaceRecovery,
    NodeHealth,
    NetworkPartition,
    OvsRecovery,
    VxlanRecovery,
    MultusRecovery,
    EdgeRecovery,
    DatabaseRecovery,
    Cleanup,
}

impl ResilienceCheck {
    pub const ALL: [ResilienceCheck; 10] = [
        ResilienceCheck::PodRestart,
        ResilienceCheck::InterfaceRecovery,
        ResilienceCheck::NodeHealth,
        ResilienceCheck::NetworkPartition,
        ResilienceCheck::OvsRecovery,
        ResilienceCheck::VxlanRecovery,
        ResilienceCheck::MultusRecovery,
        ResilienceCheck::EdgeRecovery,
        ResilienceCheck::DatabaseRecovery,
        ResilienceCheck::Cleanup,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ResilienceCheck::PodRestart => "Pod Restart Recovery",
            ResilienceCheck::InterfaceRecovery => "Network Interface Recovery",
            ResilienceCheck::NodeHealth => "Node Failure Recovery",
            ResilienceCheck::NetworkPartition => "Network Partition Recovery",
            ResilienceCheck::OvsRecovery => "OVS Bridge Recovery",
            ResilienceCheck::VxlanRecovery => "VXLAN Tunnel Recovery",
            ResilienceCheck::MultusRecovery => "Multus Recovery",
            ResilienceCheck::EdgeRecovery => "KubeEdge Recovery",
            ResilienceCheck::DatabaseRecovery => "Database Recovery",
            ResilienceCheck::Cleanup => "Stress Test Cleanup",
        }
    }
}

pub async fn run<C: Cluster, K: Clock>(ctx: &SuiteContext<C, K>) -> Result<SuiteReport> {
    let mut report = SuiteReport::new(SuiteId::Resilience);
    for check in ResilienceCheck::ALL {
        report.record(check.name(), run_check(ctx, check).await)?;
    }
    Ok(report)
}

pub async fn run_check<C: Cluster, K: Clock>(
    ctx: &SuiteContext<C, K>,
    check: ResilienceCheck,
) -> Result<Finding> {
    match check {
        ResilienceCheck::PodRestart => pod_restart(ctx).await,
        ResilienceCheck::InterfaceRecovery => interface_recovery(ctx).await,
        ResilienceCheck::NodeHealth => node_health(ctx).await,
        ResilienceCheck::NetworkPartition => network_partition(ctx).await,
        ResilienceCheck::OvsRecovery => ovs_recovery(ctx).await,
        ResilienceCheck::VxlanRecovery => vxlan_recovery(ctx).await,
        ResilienceCheck::MultusRecovery => multus_recovery(ctx).await,
        ResilienceCheck::EdgeRecovery => edge_recovery(ctx).await,
        ResilienceCheck::DatabaseRecovery => database_recovery(ctx).await,
        ResilienceCheck::Cleanup => cleanup(ctx).await,
    }
}

/// What a recovery poll waits for.
#[derive(Debug, Clone)]
pub struct RecoveryTarget<'a> {
    pub namespace: &'a str,
    pub selector: fn(&Workload) -> bool,
    /// Instances that existed before the disruption
    pub replaced: Vec<Workload>,
    pub min_running: usize,
}

impl RecoveryTarget<'_> {
    fn is_fresh(&self, workload: &Workload) -> bool {
        self.replaced.iter().all(|old| workload.is_replacement_of(old))
    }

    /// Running replacements currently visible. Listing errors count as
    /// "not recovered yet".
    pub async fn observe<C: Cluster>(&self, cluster: &C) -> Observation<Vec<Workload>> {
        let workloads = match cluster.list_workloads(Some(self.namespace)).await {
            Ok(workloads) => workloads,
            Err(e) => {
                debug!(namespace = self.namespace, error = %e, "Listing failed while waiting for recovery");
                return Observation::pending(Vec::new());
            }
        };
        let recovered: Vec<Workload> = workloads
            .into_iter()
            .filter(|w| (self.selector)(w) && w.is_running() && self.is_fresh(w))
            .collect();
        if recovered.len() >= self.min_running {
            Observation::converged(recovered)
        } else {
            Observation::pending(recovered)
        }
    }
}

async fn await_recovery<C: Cluster, K: Clock>(
    ctx: &SuiteContext<C, K>,
    target: &RecoveryTarget<'_>,
) -> PollOutcome<Vec<Workload>> {
    info!(
        namespace = target.namespace,
        timeout = ?ctx.thresholds.recovery_timeout,
        "Waiting for recovery"
    );
    let cluster = &ctx.cluster;
    ctx.poller
        .poll_until(
            move || async move { target.observe(cluster).await },
            ctx.thresholds.recovery_timeout,
            ctx.thresholds.poll_interval,
        )
        .await
}

/// Apply a mutation, turning a failed one into a failing finding.
async fn disrupt<C: Cluster>(cluster: &C, mutation: &Mutation) -> std::result::Result<(), Finding> {
    info!(kind = %mutation.kind, name = %mutation.name, namespace = %mutation.namespace, verb = ?mutation.verb, "Disrupting");
    let outcome = cluster.mutate(mutation).await;
    if outcome.is_success() {
        Ok(())
    } else {
        Err(Finding::fail(format!(
            "`{}` in {} failed: {}",
            mutation.args().join(" "),
            mutation.namespace,
            outcome.stderr.trim()
        )))
    }
}

fn recovery_finding(outcome: &PollOutcome<Vec<Workload>>, what: &str) -> Finding {
    if outcome.converged {
        Finding::pass(format!(
            "{what} recovered after {:.0?} ({} attempts)",
            outcome.elapsed, outcome.attempts
        ))
    } else {
        let seen = outcome.last_observation.as_ref().map_or(0, Vec::len);
        Finding::fail(format!(
            "{what} did not recover within {:.0?} ({seen} fresh running)",
            outcome.elapsed
        ))
    }
}

/// Delete one workload and wait for a running replacement.
async fn restart_and_wait<C: Cluster, K: Clock>(
    ctx: &SuiteContext<C, K>,
    victim: &Workload,
    selector: fn(&Workload) -> bool,
    what: &str,
) -> Result<Finding> {
    if let Err(finding) = disrupt(
        &ctx.cluster,
        &Mutation::delete_pod(&victim.name, &victim.namespace),
    )
    .await
    {
        return Ok(finding);
    }
    let target = RecoveryTarget {
        namespace: &victim.namespace,
        selector,
        replaced: vec![victim.clone()],
        min_running: 1,
    };
    let outcome = await_recovery(ctx, &target).await;
    Ok(recovery_finding(&outcome, what))
}

fn is_amf(workload: &Workload) -> bool {
    workload.name_contains("amf")
}

fn is_multus(workload: &Workload) -> bool {
    workload.name_contains("multus")
}

fn is_mongo(workload: &Workload) -> bool {
    workload.name_contains("mongo")
}

fn is_cloudcore(workload: &Workload) -> bool {
    workload.name_contains("cloudcore")
}

fn is_test_workload(workload: &Workload) -> bool {
    workload.name_contains("test")
}

async fn pod_restart<C: Cluster, K: Clock>(ctx: &SuiteContext<C, K>) -> Result<Finding> {
    let Some(amf) = ctx.first_component("amf").await? else {
        return Ok(Finding::fail("No AMF pods found for restart testing"));
    };
    restart_and_wait(ctx, &amf, is_amf, "AMF").await
}

async fn interface_recovery<C: Cluster, K: Clock>(ctx: &SuiteContext<C, K>) -> Result<Finding> {
    let Some(amf) = ctx.first_component("amf").await? else {
        return Ok(Finding::fail("No AMF pods found for interface testing"));
    };
    let (n1, n2) = match (
        required_address(&ctx.config, "n1", "amf"),
        required_address(&ctx.config, "n2", "amf"),
    ) {
        (Ok(n1), Ok(n2)) => (n1, n2),
        (Err(finding), _) | (_, Err(finding)) => return Ok(finding),
    };
    let (n1, n2) = (n1.as_str(), n2.as_str());

    let network = ctx.network();
    let before_n1 = network
        .interface_has_address(&amf.name, CORE_NAMESPACE, "n1", n1, Capture::Discard)
        .await;
    let before_n2 = network
        .interface_has_address(&amf.name, CORE_NAMESPACE, "n2", n2, Capture::Discard)
        .await;
    if !before_n1.passed || !before_n2.passed {
        warn!(workload = %amf.name, "Interfaces not properly configured before restart");
    }

    if let Err(finding) = disrupt(
        &ctx.cluster,
        &Mutation::delete_pod(&amf.name, CORE_NAMESPACE),
    )
    .await
    {
        return Ok(finding);
    }

    let target = RecoveryTarget {
        namespace: CORE_NAMESPACE,
        selector: is_amf,
        replaced: vec![amf.clone()],
        min_running: 1,
    };
    let target = &target;
    let outcome = ctx
        .poller
        .poll_until(
            move || async move {
                let Some(pod) = target.observe(&ctx.cluster).await.value.into_iter().next()
                else {
                    return Observation::pending(None);
                };
                let network = ctx.network();
                let n1_ok = network
                    .interface_has_address(&pod.name, CORE_NAMESPACE, "n1", n1, Capture::Discard)
                    .await;
                let n2_ok = network
                    .interface_has_address(&pod.name, CORE_NAMESPACE, "n2", n2, Capture::Discard)
                    .await;
                if n1_ok.passed && n2_ok.passed {
                    Observation::converged(Some(pod.name))
                } else {
                    Observation::pending(Some(pod.name))
                }
            },
            ctx.thresholds.recovery_timeout,
            ctx.thresholds.poll_interval,
        )
        .await;

    match outcome.last_observation.flatten() {
        Some(pod) if outcome.converged => Ok(Finding::pass(format!(
            "Interfaces n1 and n2 recovered on {pod} after {:.0?}",
            outcome.elapsed
        ))),
        Some(pod) => Ok(Finding::fail(format!(
            "{pod} is running but its n1/n2 addresses did not recover within {:.0?}",
            outcome.elapsed
        ))),
        None => Ok(Finding::fail(format!(
            "No replacement AMF pod was running within {:.0?}",
            outcome.elapsed
        ))),
    }
}

async fn node_health<C: Cluster, K: Clock>(ctx: &SuiteContext<C, K>) -> Result<Finding> {
    let running: Vec<Workload> = ctx
        .cluster
        .list_workloads(None)
        .await?
        .into_iter()
        .filter(Workload::is_running)
        .collect();
    info!(count = running.len(), "Running pods across all namespaces");

    for component in CRITICAL_COMPONENTS {
        if !running.iter().any(|w| w.name_contains(component)) {
            return Ok(Finding::fail(format!(
                "No running {} pods found",
                component.to_uppercase()
            )));
        }
    }

    let ready = ctx
        .cluster
        .list_nodes()
        .await?
        .iter()
        .filter(|n| n.is_ready())
        .count();
    if ready < MIN_READY_NODES {
        return Ok(Finding::fail(format!("Not enough ready nodes: {ready}")));
    }
    Ok(Finding::pass(format!(
        "Core functions running on a cluster with {ready} ready nodes"
    )))
}

/// Connectivity between control-plane peers. Loss is reported but never
/// fails the check.
async fn network_partition<C: Cluster, K: Clock>(ctx: &SuiteContext<C, K>) -> Result<Finding> {
    let amf = ctx.first_component("amf").await?;
    let smf = ctx.first_component("smf").await?;
    let gnb = ctx.first_component("gnb").await?;
    let mut degraded = Vec::new();

    if let (Some(amf), Some(smf)) = (&amf, &smf)
        && let Some(address) = ctx
            .components()
            .workload_address(&amf.name, CORE_NAMESPACE)
            .await
    {
        let verdict = ctx
            .network()
            .can_reach(&smf.name, &amf.name, CORE_NAMESPACE, &address, Capture::Discard)
            .await;
        if !verdict.passed {
            warn!("AMF-SMF connectivity issues (might be normal during startup)");
            degraded.push("AMF-SMF");
        }
    }

    if let (Some(gnb), Some(amf), Some(address)) =
        (&gnb, &amf, ctx.config.interface_address("n2", "amf"))
    {
        let verdict = ctx
            .network()
            .can_reach(&gnb.name, &amf.name, CORE_NAMESPACE, &address, Capture::Discard)
            .await;
        if !verdict.passed {
            warn!("gNB-AMF connectivity issues (might be normal during startup)");
            degraded.push("gNB-AMF");
        }
    }

    if degraded.is_empty() {
        Ok(Finding::pass("Control-plane peers reachable"))
    } else {
        Ok(Finding::pass(format!(
            "Tolerated degraded paths: {}",
            degraded.join(", ")
        )))
    }
}

async fn ovs_recovery<C: Cluster, K: Clock>(ctx: &SuiteContext<C, K>) -> Result<Finding> {
    let before: Vec<Workload> = ctx
        .cluster
        .list_workloads(Some(SYSTEM_NAMESPACE))
        .await?
        .into_iter()
        .filter(is_ovs_workload)
        .collect();
    if before.is_empty() {
        warn!("No OVS setup pods found (OVS configured on nodes)");
        return Ok(Finding::pass("No OVS setup pods to restart"));
    }

    let mut restarted = 0;
    for daemonset in OVS_DAEMONSETS {
        let mutation = Mutation::rollout_restart("daemonset", *daemonset, SYSTEM_NAMESPACE);
        match disrupt(&ctx.cluster, &mutation).await {
            Ok(()) => restarted += 1,
            Err(finding) => warn!("{}", finding.message),
        }
    }
    if restarted == 0 {
        return Ok(Finding::fail("Could not restart any OVS daemonset"));
    }

    let target = RecoveryTarget {
        namespace: SYSTEM_NAMESPACE,
        selector: is_ovs_workload,
        replaced: before,
        min_running: MIN_DAEMON_PODS,
    };
    let outcome = await_recovery(ctx, &target).await;
    Ok(recovery_finding(&outcome, "OVS daemonsets"))
}

/// Tunnel presence after the OVS restart. Reported, never failed.
async fn vxlan_recovery<C: Cluster, K: Clock>(ctx: &SuiteContext<C, K>) -> Result<Finding> {
    let workloads = ctx.cluster.list_workloads(Some(SYSTEM_NAMESPACE)).await?;
    let ovs: Vec<&Workload> = workloads.iter().filter(|w| is_ovs_workload(w)).collect();
    if ovs.is_empty() {
        warn!("No OVS setup pods found for VXLAN testing");
        return Ok(Finding::pass("No OVS setup pods to inspect"));
    }

    let mut with_tunnels = 0;
    for pod in ovs.iter().filter(|w| w.is_running()) {
        let outcome = ctx
            .cluster
            .exec_command(&pod.name, SYSTEM_NAMESPACE, &["ovs-vsctl", "show"], None)
            .await;
        if !outcome.is_success() {
            warn!(workload = %pod.name, stderr = %outcome.stderr.trim(), "Could not check VXLAN");
        } else if parsing::ovs_mentions_vxlan(&outcome.stdout) {
            info!(workload = %pod.name, "VXLAN interfaces found");
            with_tunnels += 1;
        } else {
            warn!(workload = %pod.name, "No VXLAN interfaces found");
        }
    }
    Ok(Finding::pass(format!(
        "VXLAN interfaces present on {with_tunnels} of {} OVS pods",
        ovs.len()
    )))
}

async fn multus_recovery<C: Cluster, K: Clock>(ctx: &SuiteContext<C, K>) -> Result<Finding> {
    let before: Vec<Workload> = ctx
        .cluster
        .list_workloads(Some(SYSTEM_NAMESPACE))
        .await?
        .into_iter()
        .filter(is_multus)
        .collect();
    if before.is_empty() {
        return Ok(Finding::fail("No Multus pods found"));
    }

    let mutation = Mutation::rollout_restart("daemonset", MULTUS_DAEMONSET, SYSTEM_NAMESPACE);
    if let Err(finding) = disrupt(&ctx.cluster, &mutation).await {
        return Ok(finding);
    }

    let target = RecoveryTarget {
        namespace: SYSTEM_NAMESPACE,
        selector: is_multus,
        replaced: before,
        min_running: MIN_DAEMON_PODS,
    };
    let outcome = await_recovery(ctx, &target).await;
    Ok(recovery_finding(&outcome, "Multus daemonset"))
}

async fn edge_recovery<C: Cluster, K: Clock>(ctx: &SuiteContext<C, K>) -> Result<Finding> {
    let pods = ctx.cluster.list_workloads(Some(EDGE_NAMESPACE)).await?;
    if pods.is_empty() {
        return Ok(Finding::fail("No KubeEdge pods found"));
    }

    let Some(cloudcore) = pods.iter().find(|w| is_cloudcore(w)) else {
        // Nothing to restart; just require the edge control plane to be up.
        let target = RecoveryTarget {
            namespace: EDGE_NAMESPACE,
            selector: |_| true,
            replaced: Vec::new(),
            min_running: 1,
        };
        let outcome = await_recovery(ctx, &target).await;
        return Ok(recovery_finding(&outcome, "KubeEdge"));
    };
    restart_and_wait(ctx, cloudcore, is_cloudcore, "CloudCore").await
}

/// The database is optional; its absence passes.
async fn database_recovery<C: Cluster, K: Clock>(ctx: &SuiteContext<C, K>) -> Result<Finding> {
    let Some(mongo) = ctx.first_component("mongo").await? else {
        warn!("No MongoDB pods found (database might not be deployed)");
        return Ok(Finding::pass("No database deployed"));
    };
    restart_and_wait(ctx, &mongo, is_mongo, "MongoDB").await
}

/// Remove leftover test pods. Stragglers are reported, never failed.
async fn cleanup<C: Cluster, K: Clock>(ctx: &SuiteContext<C, K>) -> Result<Finding> {
    let leftovers: Vec<Workload> = ctx
        .cluster
        .list_workloads(None)
        .await?
        .into_iter()
        .filter(is_test_workload)
        .collect();
    if leftovers.is_empty() {
        return Ok(Finding::pass("No test pods to clean up"));
    }

    for pod in &leftovers {
        info!(workload = %pod.name, namespace = %pod.namespace, "Cleaning up test pod");
        if let Err(finding) = disrupt(
            &ctx.cluster,
            &Mutation::delete_pod(&pod.name, &pod.namespace),
        )
        .await
        {
            warn!("{}", finding.message);
        }
    }

    let cluster = &ctx.cluster;
    let outcome = ctx
        .poller
        .poll_until(
            move || async move {
                match cluster.list_workloads(None).await {
                    Ok(workloads) => {
                        let remaining: Vec<String> = workloads
                            .into_iter()
                            .filter(is_test_workload)
                            .map(|w| w.name)
                            .collect();
                        Observation {
                            converged: remaining.is_empty(),
                            value: remaining,
                        }
                    }
                    Err(_) => Observation::pending(Vec::new()),
                }
            },
            CLEANUP_GRACE,
            ctx.thresholds.poll_interval,
        )
        .await;

    if outcome.converged {
        return Ok(Finding::pass(format!(
            "Cleaned up {} test pods",
            leftovers.len()
        )));
    }
    let remaining = outcome.last_observation.unwrap_or_default();
    warn!(?remaining, "Some test pods still remain");
    Ok(Finding::pass(format!(
        "Cleanup requested; {} test pods still terminating",
        remaining.len()
    )))
}
