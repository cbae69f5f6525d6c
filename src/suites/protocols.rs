//! Mobile-core protocol checks.
//!
//! Protocols are judged by their transport footprint: the socket a function
//! must have bound, the reference-point interface it must carry, and, where
//! a peer exists, reachability from that peer. Peer reachability failures
//! are logged as warnings only, since peers may still be attaching.

use tracing::{info, warn};

use super::{
    CORE_NAMESPACE, Finding, SYSTEM_NAMESPACE, SuiteContext, SuiteReport, ovs_workloads,
    required_address,
};
use crate::cluster::{Cluster, Workload};
use crate::error::Result;
use crate::orchestrator::SuiteId;
use crate::poller::Clock;
use crate::validation::{Capture, Protocol, Verdict, parsing};

pub const PFCP_PORT: u16 = 8805;
pub const NGAP_PORT: u16 = 38412;
pub const GTPU_PORT: u16 = 2152;

const MIN_OVS_PODS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolCheck {
    Pfcp,
    Ngap,
    Gtpu,
    Nas,
    InterfaceAddresses,
    VxlanTunnels,
    OvsBridges,
    MessageExchange,
}

impl ProtocolCheck {
    pub const ALL: [ProtocolCheck; 8] = [
        ProtocolCheck::Pfcp,
        ProtocolCheck::Ngap,
        ProtocolCheck::Gtpu,
        ProtocolCheck::Nas,
        ProtocolCheck::InterfaceAddresses,
        ProtocolCheck::VxlanTunnels,
        ProtocolCheck::OvsBridges,
        ProtocolCheck::MessageExchange,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ProtocolCheck::Pfcp => "PFCP Protocol (N4)",
            ProtocolCheck::Ngap => "NGAP Protocol (N2)",
            ProtocolCheck::Gtpu => "GTP-U Protocol (N3)",
            ProtocolCheck::Nas => "NAS Protocol (N1)",
            ProtocolCheck::InterfaceAddresses => "Network Interface IPs",
            ProtocolCheck::VxlanTunnels => "VXLAN Tunnel Configuration",
            ProtocolCheck::OvsBridges => "OVS Bridge Setup",
            ProtocolCheck::MessageExchange => "Protocol Message Exchange",
        }
    }
}

pub async fn run<C: Cluster, K: Clock>(ctx: &SuiteContext<C, K>) -> Result<SuiteReport> {
    let mut report = SuiteReport::new(SuiteId::Protocols);
    for check in ProtocolCheck::ALL {
        report.record(check.name(), run_check(ctx, check).await)?;
    }
    Ok(report)
}

pub async fn run_check<C: Cluster, K: Clock>(
    ctx: &SuiteContext<C, K>,
    check: ProtocolCheck,
) -> Result<Finding> {
    match check {
        ProtocolCheck::Pfcp => pfcp(ctx).await,
        ProtocolCheck::Ngap => ngap(ctx).await,
        ProtocolCheck::Gtpu => gtpu(ctx).await,
        ProtocolCheck::Nas => nas(ctx).await,
        ProtocolCheck::InterfaceAddresses => interface_addresses(ctx).await,
        ProtocolCheck::VxlanTunnels => vxlan_tunnels(ctx).await,
        ProtocolCheck::OvsBridges => ovs_bridges(ctx).await,
        ProtocolCheck::MessageExchange => message_exchange(ctx).await,
    }
}

/// Turn a failed verdict into a finding, logging the captured output and
/// diagnostics for the workload.
async fn judge<C: Cluster, K: Clock>(
    ctx: &SuiteContext<C, K>,
    workload: &Workload,
    verdict: Verdict,
    command: &str,
    failure: String,
) -> Option<Finding> {
    if verdict.passed {
        return None;
    }
    info!(workload = %workload.name, "{command}:\n{}", verdict.output());
    ctx.log_diagnostics(workload).await;
    Some(Finding::fail(failure))
}

async fn check_port<C: Cluster, K: Clock>(
    ctx: &SuiteContext<C, K>,
    workload: &Workload,
    port: u16,
    protocol: Protocol,
    label: &str,
) -> Option<Finding> {
    let verdict = ctx
        .network()
        .port_is_listening(&workload.name, CORE_NAMESPACE, port, protocol, Capture::Keep)
        .await;
    let command = protocol.listing_command().join(" ");
    judge(
        ctx,
        workload,
        verdict,
        &command,
        format!("{} not listening on {protocol} port {port} ({label})", workload.name),
    )
    .await
}

async fn check_interface<C: Cluster, K: Clock>(
    ctx: &SuiteContext<C, K>,
    workload: &Workload,
    interface: &str,
    address: &str,
) -> Option<Finding> {
    let verdict = ctx
        .network()
        .interface_has_address(&workload.name, CORE_NAMESPACE, interface, address, Capture::Keep)
        .await;
    judge(
        ctx,
        workload,
        verdict,
        &format!("ip addr show {interface}"),
        format!(
            "{} {} interface not configured with IP {address}",
            workload.name,
            interface.to_uppercase()
        ),
    )
    .await
}

/// Ping from the first workload of `peer`, warning on failure.
async fn peer_reachability<C: Cluster, K: Clock>(
    ctx: &SuiteContext<C, K>,
    peer: &str,
    target: &Workload,
    address: &str,
) -> Result<()> {
    let Some(source) = ctx.first_component(peer).await? else {
        return Ok(());
    };
    let verdict = ctx
        .network()
        .can_reach(&source.name, &target.name, CORE_NAMESPACE, address, Capture::Keep)
        .await;
    if verdict.passed {
        info!(source = %source.name, target = %target.name, address, "Peer reachable");
    } else {
        warn!(
            source = %source.name,
            target = %target.name,
            address,
            "Peer cannot reach target (might be normal during startup):\n{}",
            verdict.output()
        );
    }
    Ok(())
}

async fn pfcp<C: Cluster, K: Clock>(ctx: &SuiteContext<C, K>) -> Result<Finding> {
    let Some(smf) = ctx.first_component("smf").await? else {
        return Ok(Finding::fail("No SMF pods found"));
    };
    if let Some(failure) = check_port(ctx, &smf, PFCP_PORT, Protocol::Udp, "PFCP").await {
        return Ok(failure);
    }

    let upfs = ctx
        .components()
        .component_workloads("upf", CORE_NAMESPACE)
        .await?;
    if upfs.is_empty() {
        return Ok(Finding::fail("No UPF pods found"));
    }
    for upf in &upfs {
        if let Some(failure) = check_port(ctx, upf, PFCP_PORT, Protocol::Udp, "PFCP").await {
            return Ok(failure);
        }
    }

    let address = match required_address(&ctx.config, "n4", "smf") {
        Ok(address) => address,
        Err(finding) => return Ok(finding),
    };
    if let Some(failure) = check_interface(ctx, &smf, "n4", &address).await {
        return Ok(failure);
    }
    Ok(Finding::pass(format!(
        "SMF and {} UPF(s) listening on PFCP port {PFCP_PORT}, SMF N4 at {address}",
        upfs.len()
    )))
}

async fn ngap<C: Cluster, K: Clock>(ctx: &SuiteContext<C, K>) -> Result<Finding> {
    let Some(amf) = ctx.first_component("amf").await? else {
        return Ok(Finding::fail("No AMF pods found"));
    };
    if let Some(failure) = check_port(ctx, &amf, NGAP_PORT, Protocol::Sctp, "NGAP").await {
        return Ok(failure);
    }
    let address = match required_address(&ctx.config, "n2", "amf") {
        Ok(address) => address,
        Err(finding) => return Ok(finding),
    };
    if let Some(failure) = check_interface(ctx, &amf, "n2", &address).await {
        return Ok(failure);
    }
    peer_reachability(ctx, "gnb", &amf, &address).await?;
    Ok(Finding::pass(format!(
        "AMF listening on SCTP port {NGAP_PORT}, N2 at {address}"
    )))
}

async fn gtpu<C: Cluster, K: Clock>(ctx: &SuiteContext<C, K>) -> Result<Finding> {
    let upfs = ctx
        .components()
        .component_workloads("upf", CORE_NAMESPACE)
        .await?;
    if upfs.is_empty() {
        return Ok(Finding::fail("No UPF pods found"));
    }
    for upf in &upfs {
        if let Some(failure) = check_port(ctx, upf, GTPU_PORT, Protocol::Udp, "GTP-U").await {
            return Ok(failure);
        }
        // Edge and cloud UPFs sit on different N3 addresses
        let role = if upf.name_contains("edge") {
            "upf_edge"
        } else {
            "upf_cloud"
        };
        let address = match required_address(&ctx.config, "n3", role) {
            Ok(address) => address,
            Err(finding) => return Ok(finding),
        };
        if let Some(failure) = check_interface(ctx, upf, "n3", &address).await {
            return Ok(failure);
        }
    }
    Ok(Finding::pass(format!(
        "{} UPF(s) listening on GTP-U port {GTPU_PORT} with N3 configured",
        upfs.len()
    )))
}

async fn nas<C: Cluster, K: Clock>(ctx: &SuiteContext<C, K>) -> Result<Finding> {
    let Some(amf) = ctx.first_component("amf").await? else {
        return Ok(Finding::fail("No AMF pods found"));
    };
    // NAS rides on NGAP, so the same SCTP endpoint is required
    if let Some(failure) = check_port(ctx, &amf, NGAP_PORT, Protocol::Sctp, "NAS").await {
        return Ok(failure);
    }
    let address = match required_address(&ctx.config, "n1", "amf") {
        Ok(address) => address,
        Err(finding) => return Ok(finding),
    };
    if let Some(failure) = check_interface(ctx, &amf, "n1", &address).await {
        return Ok(failure);
    }
    peer_reachability(ctx, "ue", &amf, &address).await?;
    Ok(Finding::pass(format!("AMF N1 at {address}")))
}

async fn interface_addresses<C: Cluster, K: Clock>(ctx: &SuiteContext<C, K>) -> Result<Finding> {
    let expectations = [("amf", "n1"), ("amf", "n2"), ("smf", "n4")];
    for (component, interface) in expectations {
        let Some(workload) = ctx.first_component(component).await? else {
            return Ok(Finding::fail(format!(
                "No {} pods found",
                component.to_uppercase()
            )));
        };
        let address = match required_address(&ctx.config, interface, component) {
            Ok(address) => address,
            Err(finding) => return Ok(finding),
        };
        if let Some(failure) = check_interface(ctx, &workload, interface, &address).await {
            return Ok(failure);
        }
    }
    Ok(Finding::pass("AMF N1/N2 and SMF N4 addresses configured"))
}

async fn running_ovs<C: Cluster, K: Clock>(ctx: &SuiteContext<C, K>) -> Result<Vec<Workload>> {
    let pods = ctx.cluster.list_workloads(Some(SYSTEM_NAMESPACE)).await?;
    let ovs = ovs_workloads(&pods);
    if ovs.is_empty() {
        let names: Vec<&str> = pods.iter().map(|p| p.name.as_str()).collect();
        info!("kube-system pods: {}", names.join(", "));
    }
    Ok(ovs.into_iter().filter(|w| w.is_running()).cloned().collect())
}

async fn vxlan_tunnels<C: Cluster, K: Clock>(ctx: &SuiteContext<C, K>) -> Result<Finding> {
    let ovs = running_ovs(ctx).await?;
    if ovs.len() < MIN_OVS_PODS {
        return Ok(Finding::fail(format!(
            "Not enough OVS pods running: {}",
            ovs.len()
        )));
    }

    let mut with_vxlan = 0;
    for pod in &ovs {
        let outcome = ctx
            .cluster
            .exec_command(&pod.name, SYSTEM_NAMESPACE, &["ovs-vsctl", "show"], None)
            .await;
        if parsing::ovs_mentions_vxlan(&outcome.stdout) {
            with_vxlan += 1;
        } else {
            warn!(workload = %pod.name, stderr = %outcome.stderr.trim(), "No VXLAN interfaces found");
        }
    }
    Ok(Finding::pass(format!(
        "{} OVS pods running, {with_vxlan} with VXLAN ports",
        ovs.len()
    )))
}

async fn ovs_bridges<C: Cluster, K: Clock>(ctx: &SuiteContext<C, K>) -> Result<Finding> {
    let ovs = running_ovs(ctx).await?;
    if ovs.is_empty() {
        return Ok(Finding::fail("No running OVS pods found"));
    }

    for pod in &ovs {
        let outcome = ctx
            .cluster
            .exec_command(&pod.name, SYSTEM_NAMESPACE, &["ovs-vsctl", "list-br"], None)
            .await;
        let bridges = parsing::parse_bridge_names(&outcome.stdout);
        if bridges.is_empty() {
            warn!(workload = %pod.name, "No OVS bridges found");
        } else {
            info!(workload = %pod.name, bridges = %bridges.join(", "), "OVS bridges found");
        }
    }
    Ok(Finding::pass(format!("Checked bridges on {} OVS pods", ovs.len())))
}

async fn message_exchange<C: Cluster, K: Clock>(ctx: &SuiteContext<C, K>) -> Result<Finding> {
    let Some(amf) = ctx.first_component("amf").await? else {
        return Ok(Finding::pass("No AMF pods, message exchange not checked"));
    };

    if let Some(address) = ctx
        .components()
        .workload_address(&amf.name, CORE_NAMESPACE)
        .await
    {
        peer_reachability(ctx, "smf", &amf, &address).await?;
    }
    if let Some(address) = ctx.config.interface_address("n2", "amf") {
        peer_reachability(ctx, "gnb", &amf, &address).await?;
    }
    Ok(Finding::pass("Control-plane peers checked"))
}
