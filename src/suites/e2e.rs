//! End-to-end deployment checks.
//!
//! Walks the testbed bottom-up: nodes, system pods, edge integration,
//! overlay networking, core functions, their interfaces and sockets, the
//! RAN simulator, and finally pod-to-pod reachability. Node readiness gates
//! everything else: when it fails, no exec-based check runs.

use tracing::{info, warn};

use super::protocols::{NGAP_PORT, PFCP_PORT};
use super::{
    CORE_NAMESPACE, EDGE_NAMESPACE, Finding, MEC_NAMESPACE, SYSTEM_NAMESPACE, SuiteContext,
    SuiteReport, required_address,
};
use crate::cluster::{Cluster, Workload, WorkloadPhase, missing_attachments};
use crate::error::Result;
use crate::orchestrator::SuiteId;
use crate::poller::Clock;
use crate::validation::{Capture, Protocol};

/// Network attachments the overlay must define.
pub const EXPECTED_ATTACHMENTS: &[&str] = &[
    "n1-net",
    "n2-net",
    "n3-net",
    "n4-net",
    "n6-mec-net",
    "n6-cld-net",
];

/// Core functions that must be running.
pub const CORE_COMPONENTS: &[&str] = &["amf", "smf", "upf"];

const MIN_SYSTEM_PODS: usize = 5;
const MIN_MULTUS_PODS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum E2eCheck {
    Infrastructure,
    ClusterHealth,
    EdgeIntegration,
    OverlayNetwork,
    CoreDeployment,
    NetworkInterfaces,
    ProtocolConnectivity,
    RanSimulator,
    Mec,
    EndToEndConnectivity,
}

impl E2eCheck {
    pub const ALL: [E2eCheck; 10] = [
        E2eCheck::Infrastructure,
        E2eCheck::ClusterHealth,
        E2eCheck::EdgeIntegration,
        E2eCheck::OverlayNetwork,
        E2eCheck::CoreDeployment,
        E2eCheck::NetworkInterfaces,
        E2eCheck::ProtocolConnectivity,
        E2eCheck::RanSimulator,
        E2eCheck::Mec,
        E2eCheck::EndToEndConnectivity,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            E2eCheck::Infrastructure => "Infrastructure Connectivity",
            E2eCheck::ClusterHealth => "Kubernetes Cluster Health",
            E2eCheck::EdgeIntegration => "KubeEdge Integration",
            E2eCheck::OverlayNetwork => "Overlay Network Setup",
            E2eCheck::CoreDeployment => "5G Core Deployment",
            E2eCheck::NetworkInterfaces => "Network Interfaces",
            E2eCheck::ProtocolConnectivity => "5G Protocol Connectivity",
            E2eCheck::RanSimulator => "UERANSIM Deployment",
            E2eCheck::Mec => "MEC Deployment",
            E2eCheck::EndToEndConnectivity => "End-to-End Connectivity",
        }
    }
}

pub async fn run<C: Cluster, K: Clock>(ctx: &SuiteContext<C, K>) -> Result<SuiteReport> {
    let mut report = SuiteReport::new(SuiteId::E2e);
    for check in E2eCheck::ALL {
        let passed = report.record(check.name(), run_check(ctx, check).await)?;
        if check == E2eCheck::Infrastructure && !passed {
            warn!("Infrastructure is not ready, skipping remaining checks");
            break;
        }
    }
    Ok(report)
}

pub async fn run_check<C: Cluster, K: Clock>(
    ctx: &SuiteContext<C, K>,
    check: E2eCheck,
) -> Result<Finding> {
    match check {
        E2eCheck::Infrastructure => infrastructure(ctx).await,
        E2eCheck::ClusterHealth => cluster_health(ctx).await,
        E2eCheck::EdgeIntegration => edge_integration(ctx).await,
        E2eCheck::OverlayNetwork => overlay_network(ctx).await,
        E2eCheck::CoreDeployment => core_deployment(ctx).await,
        E2eCheck::NetworkInterfaces => network_interfaces(ctx).await,
        E2eCheck::ProtocolConnectivity => protocol_connectivity(ctx).await,
        E2eCheck::RanSimulator => ran_simulator(ctx).await,
        E2eCheck::Mec => mec(ctx).await,
        E2eCheck::EndToEndConnectivity => end_to_end_connectivity(ctx).await,
    }
}

fn running(workloads: &[Workload]) -> usize {
    workloads.iter().filter(|w| w.is_running()).count()
}

fn named<'a>(workloads: &'a [Workload], needle: &str) -> Vec<&'a Workload> {
    workloads.iter().filter(|w| w.name_contains(needle)).collect()
}

async fn infrastructure<C: Cluster, K: Clock>(ctx: &SuiteContext<C, K>) -> Result<Finding> {
    let nodes = ctx.cluster.list_nodes().await?;
    if nodes.is_empty() {
        return Ok(Finding::fail("No nodes found in cluster"));
    }
    info!(count = nodes.len(), "Found nodes in cluster");

    let not_ready: Vec<&str> = nodes
        .iter()
        .filter(|n| !n.is_ready())
        .map(|n| n.name.as_str())
        .collect();
    if !not_ready.is_empty() {
        return Ok(Finding::fail(format!(
            "Nodes not Ready: {}",
            not_ready.join(", ")
        )));
    }
    Ok(Finding::pass(format!("All {} nodes are Ready", nodes.len())))
}

async fn cluster_health<C: Cluster, K: Clock>(ctx: &SuiteContext<C, K>) -> Result<Finding> {
    let pods = ctx.cluster.list_workloads(Some(SYSTEM_NAMESPACE)).await?;
    let running = running(&pods);
    if running < MIN_SYSTEM_PODS {
        return Ok(Finding::fail(format!(
            "Too few system pods running: {running}"
        )));
    }

    let crashed: Vec<&str> = pods
        .iter()
        .filter(|p| p.phase == WorkloadPhase::Failed)
        .map(|p| p.name.as_str())
        .collect();
    if !crashed.is_empty() {
        return Ok(Finding::fail(format!(
            "Found crashed system pods: {}",
            crashed.join(", ")
        )));
    }
    Ok(Finding::pass(format!(
        "{running} system pods running, none crashed"
    )))
}

async fn edge_integration<C: Cluster, K: Clock>(ctx: &SuiteContext<C, K>) -> Result<Finding> {
    let pods = ctx.cluster.list_workloads(Some(EDGE_NAMESPACE)).await?;
    if pods.is_empty() {
        return Ok(Finding::fail("No KubeEdge pods found"));
    }
    let cloudcore = named(&pods, "cloudcore");
    if cloudcore.is_empty() {
        return Ok(Finding::fail("No CloudCore pods found"));
    }
    if !cloudcore.iter().any(|w| w.is_running()) {
        return Ok(Finding::fail("CloudCore is not running"));
    }

    let nodes = ctx.cluster.list_nodes().await?;
    let edge_nodes = nodes.iter().filter(|n| n.is_edge()).count();
    if edge_nodes == 0 {
        return Ok(Finding::fail("No edge nodes found"));
    }
    Ok(Finding::pass(format!(
        "CloudCore running with {edge_nodes} edge node(s)"
    )))
}

async fn overlay_network<C: Cluster, K: Clock>(ctx: &SuiteContext<C, K>) -> Result<Finding> {
    let pods = ctx.cluster.list_workloads(Some(SYSTEM_NAMESPACE)).await?;
    let multus = named(&pods, "multus");
    if multus.is_empty() {
        return Ok(Finding::fail("Multus pods not found"));
    }
    let running_multus = multus.iter().filter(|w| w.is_running()).count();
    if running_multus < MIN_MULTUS_PODS {
        return Ok(Finding::fail(format!(
            "Not enough Multus pods running: {running_multus}"
        )));
    }

    let attachments = ctx.cluster.list_network_attachments(None).await?;
    let missing = missing_attachments(EXPECTED_ATTACHMENTS, &attachments);
    if !missing.is_empty() {
        return Ok(Finding::fail(format!(
            "Missing NetworkAttachmentDefinitions: {}",
            missing.join(", ")
        )));
    }
    Ok(Finding::pass(format!(
        "{running_multus} Multus pods running, {} network attachments defined",
        attachments.len()
    )))
}

async fn core_deployment<C: Cluster, K: Clock>(ctx: &SuiteContext<C, K>) -> Result<Finding> {
    let pods = ctx.cluster.list_workloads(Some(CORE_NAMESPACE)).await?;
    if pods.is_empty() {
        return Ok(Finding::fail("No 5G pods found"));
    }
    for component in CORE_COMPONENTS {
        let matching = named(&pods, component);
        if matching.is_empty() {
            return Ok(Finding::fail(format!(
                "No {} pods found",
                component.to_uppercase()
            )));
        }
        if !matching.iter().any(|w| w.is_running()) {
            if let Some(first) = matching.first() {
                ctx.log_diagnostics(first).await;
            }
            return Ok(Finding::fail(format!(
                "{} is not running",
                component.to_uppercase()
            )));
        }
    }
    Ok(Finding::pass("AMF, SMF and UPF are running"))
}

async fn network_interfaces<C: Cluster, K: Clock>(ctx: &SuiteContext<C, K>) -> Result<Finding> {
    let Some(amf) = ctx.first_component("amf").await? else {
        return Ok(Finding::fail("No AMF pods found for interface testing"));
    };

    for interface in ["n1", "n2"] {
        let address = match required_address(&ctx.config, interface, "amf") {
            Ok(address) => address,
            Err(finding) => return Ok(finding),
        };
        let verdict = ctx
            .network()
            .interface_has_address(&amf.name, CORE_NAMESPACE, interface, &address, Capture::Keep)
            .await;
        if !verdict.passed {
            info!(workload = %amf.name, "ip addr show {interface}:\n{}", verdict.output());
            return Ok(Finding::fail(format!(
                "AMF {} interface not configured with IP {address}",
                interface.to_uppercase()
            )));
        }
    }
    Ok(Finding::pass("AMF N1 and N2 interfaces configured"))
}

async fn protocol_connectivity<C: Cluster, K: Clock>(
    ctx: &SuiteContext<C, K>,
) -> Result<Finding> {
    let Some(amf) = ctx.first_component("amf").await? else {
        return Ok(Finding::fail("No AMF pods found for protocol testing"));
    };
    let verdict = ctx
        .network()
        .port_is_listening(&amf.name, CORE_NAMESPACE, NGAP_PORT, Protocol::Sctp, Capture::Discard)
        .await;
    if !verdict.passed {
        return Ok(Finding::fail(format!(
            "AMF not listening on SCTP port {NGAP_PORT}"
        )));
    }

    let Some(smf) = ctx.first_component("smf").await? else {
        return Ok(Finding::fail("No SMF pods found for protocol testing"));
    };
    let verdict = ctx
        .network()
        .port_is_listening(&smf.name, CORE_NAMESPACE, PFCP_PORT, Protocol::Udp, Capture::Discard)
        .await;
    if !verdict.passed {
        return Ok(Finding::fail(format!(
            "SMF not listening on PFCP port {PFCP_PORT}"
        )));
    }
    Ok(Finding::pass(format!(
        "AMF listening on SCTP {NGAP_PORT}, SMF on UDP {PFCP_PORT}"
    )))
}

async fn ran_simulator<C: Cluster, K: Clock>(ctx: &SuiteContext<C, K>) -> Result<Finding> {
    let pods = ctx.cluster.list_workloads(Some(CORE_NAMESPACE)).await?;
    for (component, label) in [("gnb", "gNB"), ("ue", "UE")] {
        let matching = named(&pods, component);
        if matching.is_empty() {
            return Ok(Finding::fail(format!("No {label} pods found")));
        }
        if !matching.iter().any(|w| w.is_running()) {
            return Ok(Finding::fail(format!("{label} is not running")));
        }
    }
    Ok(Finding::pass("gNB and UE are running"))
}

/// MEC is optional: absence or a failed lookup is reported but never fails.
async fn mec<C: Cluster, K: Clock>(ctx: &SuiteContext<C, K>) -> Result<Finding> {
    let pods = match ctx.cluster.list_workloads(Some(MEC_NAMESPACE)).await {
        Ok(pods) => pods,
        Err(e) if e.is_fatal() => return Err(e),
        Err(e) => {
            warn!(error = %e, "Cannot list MEC pods");
            return Ok(Finding::pass("MEC not checked (might not be deployed)"));
        }
    };
    let running = running(&pods);
    if running == 0 {
        warn!("No running MEC pods found");
        return Ok(Finding::pass("No running MEC pods (MEC is optional)"));
    }
    Ok(Finding::pass(format!("Found {running} running MEC pods")))
}

async fn end_to_end_connectivity<C: Cluster, K: Clock>(
    ctx: &SuiteContext<C, K>,
) -> Result<Finding> {
    let pods = ctx.cluster.list_workloads(Some(CORE_NAMESPACE)).await?;
    let [source, target, ..] = pods.as_slice() else {
        return Ok(Finding::fail("Need at least 2 pods for connectivity testing"));
    };

    let Some(address) = ctx
        .components()
        .workload_address(&target.name, CORE_NAMESPACE)
        .await
    else {
        return Ok(Finding::fail(format!(
            "Cannot determine address of {}",
            target.name
        )));
    };

    let verdict = ctx
        .network()
        .can_reach(&source.name, &target.name, CORE_NAMESPACE, &address, Capture::Keep)
        .await;
    if !verdict.passed {
        info!(source = %source.name, "ping {address}:\n{}", verdict.output());
        return Ok(Finding::fail(format!(
            "Pod {} cannot reach pod {}",
            source.name, target.name
        )));
    }
    Ok(Finding::pass(format!(
        "Pod {} can reach pod {}",
        source.name, target.name
    )))
}
