//! Physical RAN integration checks.
//!
//! A femtocell or small cell attaches to the worker through the `br-ran`
//! OVS bridge, which is patched into the N2 and N3 overlay bridges. These
//! checks run on the worker host itself through [`HostShell`]. The RAN
//! bridge is optional: checks that depend on it are skipped, not failed,
//! when it is not configured.

use tracing::{info, warn};

use super::{CORE_NAMESPACE, Finding, SuiteContext, SuiteReport};
use crate::cluster::{Cluster, Workload};
use crate::error::Result;
use crate::orchestrator::SuiteId;
use crate::poller::Clock;
use crate::preflight::HostShell;
use crate::validation::parsing;

/// Machine the RAN bridge lives on.
pub const RAN_MACHINE: &str = "worker";
pub const RAN_BRIDGE: &str = "br-ran";
/// Addresses on the RAN access network start with this.
pub const RAN_SUBNET_PREFIX: &str = "192.168.57.";

const CORE_BRIDGES: [&str; 2] = ["br-n2", "br-n3"];
const PATCH_PORTS: [&str; 2] = ["patch-ran-n2", "patch-ran-n3"];
/// Overlay gateway address each worker bridge must own.
const OVERLAY_GATEWAYS: [(&str, &str); 3] = [
    ("br-n2", "10.202.0.1/24"),
    ("br-n3", "10.203.0.1/24"),
    ("br-n4", "10.204.0.1/24"),
];
const GNB_LOG_TAIL: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RanCheck {
    OvsBridges,
    GatewayOwnership,
    RanInterface,
    RanBridge,
    PatchPorts,
    AmfReachable,
    UpfReachable,
    GnbConnection,
}

impl RanCheck {
    pub const ALL: [RanCheck; 8] = [
        RanCheck::OvsBridges,
        RanCheck::GatewayOwnership,
        RanCheck::RanInterface,
        RanCheck::RanBridge,
        RanCheck::PatchPorts,
        RanCheck::AmfReachable,
        RanCheck::UpfReachable,
        RanCheck::GnbConnection,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            RanCheck::OvsBridges => "OVS Bridge Configuration",
            RanCheck::GatewayOwnership => "Overlay Gateway Ownership",
            RanCheck::RanInterface => "RAN Interface Detection",
            RanCheck::RanBridge => "OVS RAN Bridge Exists",
            RanCheck::PatchPorts => "Patch Ports Configured",
            RanCheck::AmfReachable => "AMF Overlay IP Reachable",
            RanCheck::UpfReachable => "UPF Overlay IP Reachable",
            RanCheck::GnbConnection => "gNB Connection Status",
        }
    }
}

pub async fn run<C: Cluster, K: Clock, H: HostShell>(
    ctx: &SuiteContext<C, K>,
    host: &H,
) -> Result<SuiteReport> {
    let mut report = SuiteReport::new(SuiteId::Ran);
    for check in RanCheck::ALL {
        report.record(check.name(), run_check(ctx, host, check).await)?;
    }
    Ok(report)
}

pub async fn run_check<C: Cluster, K: Clock, H: HostShell>(
    ctx: &SuiteContext<C, K>,
    host: &H,
    check: RanCheck,
) -> Result<Finding> {
    match check {
        RanCheck::OvsBridges => Ok(ovs_bridges(host).await),
        RanCheck::GatewayOwnership => Ok(gateway_ownership(host).await),
        RanCheck::RanInterface => Ok(ran_interface(host).await),
        RanCheck::RanBridge => Ok(ran_bridge(host).await),
        RanCheck::PatchPorts => Ok(patch_ports(host).await),
        RanCheck::AmfReachable => {
            overlay_reachable(ctx, host, "amf", "AMF N2", |i| i.starts_with("n2")).await
        }
        RanCheck::UpfReachable => {
            overlay_reachable(ctx, host, "upf", "UPF N3", |i| i == "n3").await
        }
        RanCheck::GnbConnection => gnb_connection(ctx).await,
    }
}

async fn ran_bridge_present<H: HostShell>(host: &H) -> bool {
    let outcome = host.run_on(RAN_MACHINE, "sudo ovs-vsctl list-br").await;
    outcome.is_success()
        && parsing::parse_bridge_names(&outcome.stdout)
            .iter()
            .any(|b| b == RAN_BRIDGE)
}

fn ran_bridge_skipped() -> Finding {
    Finding::skip(format!("{RAN_BRIDGE} not configured (RAN bridge mode disabled)"))
}

async fn ovs_bridges<H: HostShell>(host: &H) -> Finding {
    let outcome = host.run_on(RAN_MACHINE, "sudo ovs-vsctl show").await;
    if !outcome.is_success() {
        return Finding::fail(format!(
            "OVS not available on {RAN_MACHINE}: {}",
            outcome.stderr.trim()
        ));
    }
    let missing: Vec<&str> = CORE_BRIDGES
        .into_iter()
        .filter(|bridge| !outcome.stdout.contains(*bridge))
        .collect();
    if !missing.is_empty() {
        return Finding::fail(format!("OVS bridges not found: {}", missing.join(", ")));
    }
    Finding::pass(format!("OVS bridges {} configured", CORE_BRIDGES.join(", ")))
}

async fn gateway_ownership<H: HostShell>(host: &H) -> Finding {
    for (bridge, cidr) in OVERLAY_GATEWAYS {
        let outcome = host
            .run_on(RAN_MACHINE, &format!("ip -o -4 addr show dev {bridge}"))
            .await;
        if !outcome.is_success() {
            return Finding::fail(format!("Cannot inspect {bridge}: {}", outcome.stderr.trim()));
        }
        if !parsing::contains_address(&outcome.stdout, cidr) {
            return Finding::fail(format!("{bridge} does not own expected gateway {cidr}"));
        }
    }
    Finding::pass(format!(
        "{RAN_MACHINE} overlay gateway ownership is correct (N2/N3/N4)"
    ))
}

async fn ran_interface<H: HostShell>(host: &H) -> Finding {
    let outcome = host.run_on(RAN_MACHINE, "ip -4 addr show").await;
    if !outcome.is_success() || !outcome.stdout.contains(RAN_SUBNET_PREFIX) {
        return Finding::skip(format!(
            "no {RAN_SUBNET_PREFIX}0/24 interface on {RAN_MACHINE} (RAN bridge mode disabled)"
        ));
    }
    Finding::pass(format!("RAN interface found in {RAN_SUBNET_PREFIX}0/24"))
}

async fn ran_bridge<H: HostShell>(host: &H) -> Finding {
    if !ran_bridge_present(host).await {
        return ran_bridge_skipped();
    }
    Finding::pass(format!("{RAN_BRIDGE} bridge exists"))
}

async fn patch_ports<H: HostShell>(host: &H) -> Finding {
    if !ran_bridge_present(host).await {
        return ran_bridge_skipped();
    }
    let outcome = host
        .run_on(RAN_MACHINE, &format!("sudo ovs-vsctl list-ports {RAN_BRIDGE}"))
        .await;
    if !outcome.is_success() {
        return Finding::fail(format!(
            "Failed to list ports on {RAN_BRIDGE}: {}",
            outcome.stderr.trim()
        ));
    }
    let ports = parsing::parse_bridge_names(&outcome.stdout);
    let missing: Vec<&str> = PATCH_PORTS
        .into_iter()
        .filter(|patch| !ports.iter().any(|p| p == *patch))
        .collect();
    if !missing.is_empty() {
        return Finding::fail(format!(
            "Patch ports not found on {RAN_BRIDGE}: {}",
            missing.join(", ")
        ));
    }
    Finding::pass(format!("Patch ports {} configured", PATCH_PORTS.join(", ")))
}

async fn running_component<C: Cluster, K: Clock>(
    ctx: &SuiteContext<C, K>,
    component: &str,
) -> Result<Option<Workload>> {
    Ok(ctx
        .components()
        .component_workloads(component, CORE_NAMESPACE)
        .await?
        .into_iter()
        .find(Workload::is_running))
}

/// Overlay address of a workload, read from its network-status annotation.
fn overlay_address(
    workload: &Workload,
    label: &str,
    interface_matches: impl Fn(&str) -> bool,
) -> std::result::Result<String, Finding> {
    let Some(annotation) = workload.annotations.get(parsing::NETWORK_STATUS_ANNOTATION) else {
        return Err(Finding::fail(format!(
            "No network-status annotation on {}",
            workload.name
        )));
    };
    let networks = parsing::parse_network_status(annotation).map_err(|e| {
        Finding::fail(format!("Unreadable network-status on {}: {e}", workload.name))
    })?;
    parsing::attachment_address(&networks, interface_matches)
        .ok_or_else(|| Finding::fail(format!("Could not find {label} IP on {}", workload.name)))
}

async fn overlay_reachable<C: Cluster, K: Clock, H: HostShell>(
    ctx: &SuiteContext<C, K>,
    host: &H,
    component: &str,
    label: &str,
    interface_matches: impl Fn(&str) -> bool,
) -> Result<Finding> {
    let Some(workload) = running_component(ctx, component).await? else {
        return Ok(Finding::fail(format!(
            "No running {} pod found",
            component.to_uppercase()
        )));
    };
    let address = match overlay_address(&workload, label, interface_matches) {
        Ok(address) => address,
        Err(finding) => return Ok(finding),
    };
    info!(workload = %workload.name, %address, "{label} overlay address");

    if !ran_bridge_present(host).await {
        return Ok(ran_bridge_skipped());
    }
    let outcome = host
        .run_on(RAN_MACHINE, &format!("ping -c 2 -W 2 {address}"))
        .await;
    if !parsing::reachability_confirmed(&outcome.stdout) {
        warn!(%address, "Ping from {RAN_MACHINE}:\n{}", outcome.text());
        return Ok(Finding::fail(format!(
            "Cannot reach {label} IP {address} from {RAN_MACHINE}"
        )));
    }
    Ok(Finding::pass(format!("{label} IP {address} is reachable")))
}

async fn gnb_connection<C: Cluster, K: Clock>(ctx: &SuiteContext<C, K>) -> Result<Finding> {
    let Some(amf) = running_component(ctx, "amf").await? else {
        return Ok(Finding::fail("No running AMF pod found"));
    };
    let logs = ctx
        .cluster
        .read_logs(&amf.name, CORE_NAMESPACE, None, GNB_LOG_TAIL)
        .await?;

    match parsing::parse_gnb_count(&logs) {
        Ok(Some(count)) if count > 0 => {
            return Ok(Finding::pass(format!("AMF has {count} connected gNB(s)")));
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "Cannot parse AMF gNB count"),
    }
    if logs.contains("gNB-N2 accepted") {
        return Ok(Finding::pass("gNB connection detected in AMF logs"));
    }
    Ok(Finding::fail("No gNB connections found in AMF logs"))
}
