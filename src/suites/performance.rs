//! Data-plane performance checks.
//!
//! Throughput is measured with iperf3 between two core functions; latency
//! and packet loss with ping between two core pods. Thresholds come from
//! [`Thresholds`](crate::config::Thresholds).

use std::time::Duration;

use tracing::{info, warn};

use super::protocols::{NGAP_PORT, PFCP_PORT};
use super::{CORE_NAMESPACE, Finding, SuiteContext, SuiteReport};
use crate::cluster::{Cluster, Workload};
use crate::error::Result;
use crate::orchestrator::SuiteId;
use crate::poller::Clock;
use crate::validation::parsing::{self, PingStats};
use crate::validation::{Capture, Protocol};

/// Pause between starting the iperf3 server and running the client.
const SERVER_STARTUP: Duration = Duration::from_secs(2);

/// Payload sizes used for the latency measurement.
pub const LATENCY_PAYLOADS: &[u32] = &[64, 1024, 1400];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerformanceCheck {
    Throughput,
    Latency,
    PacketLoss,
    PfcpPath,
    NgapPath,
}

impl PerformanceCheck {
    pub const ALL: [PerformanceCheck; 5] = [
        PerformanceCheck::Throughput,
        PerformanceCheck::Latency,
        PerformanceCheck::PacketLoss,
        PerformanceCheck::PfcpPath,
        PerformanceCheck::NgapPath,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            PerformanceCheck::Throughput => "VXLAN Throughput",
            PerformanceCheck::Latency => "VXLAN Latency",
            PerformanceCheck::PacketLoss => "Packet Loss",
            PerformanceCheck::PfcpPath => "PFCP Performance",
            PerformanceCheck::NgapPath => "NGAP Performance",
        }
    }
}

pub async fn run<C: Cluster, K: Clock>(ctx: &SuiteContext<C, K>) -> Result<SuiteReport> {
    let mut report = SuiteReport::new(SuiteId::Performance);
    for check in PerformanceCheck::ALL {
        report.record(check.name(), run_check(ctx, check).await)?;
    }
    Ok(report)
}

pub async fn run_check<C: Cluster, K: Clock>(
    ctx: &SuiteContext<C, K>,
    check: PerformanceCheck,
) -> Result<Finding> {
    match check {
        PerformanceCheck::Throughput => throughput(ctx).await,
        PerformanceCheck::Latency => latency(ctx).await,
        PerformanceCheck::PacketLoss => packet_loss(ctx).await,
        PerformanceCheck::PfcpPath => pfcp_path(ctx).await,
        PerformanceCheck::NgapPath => ngap_path(ctx).await,
    }
}

/// First two pods in the core namespace and the second one's address.
async fn ping_pair<C: Cluster, K: Clock>(
    ctx: &SuiteContext<C, K>,
) -> Result<std::result::Result<(Workload, String), Finding>> {
    let pods = ctx.cluster.list_workloads(Some(CORE_NAMESPACE)).await?;
    let [source, target, ..] = pods.as_slice() else {
        return Ok(Err(Finding::fail("Need at least 2 pods for probing")));
    };
    match ctx
        .components()
        .workload_address(&target.name, CORE_NAMESPACE)
        .await
    {
        Some(address) => Ok(Ok((source.clone(), address))),
        None => Ok(Err(Finding::fail(format!(
            "Cannot determine address of {}",
            target.name
        )))),
    }
}

async fn has_iperf<C: Cluster>(cluster: &C, workload: &str) -> bool {
    cluster
        .exec_command(workload, CORE_NAMESPACE, &["which", "iperf3"], None)
        .await
        .is_success()
}

async fn throughput<C: Cluster, K: Clock>(ctx: &SuiteContext<C, K>) -> Result<Finding> {
    let Some(server) = ctx.first_component("amf").await? else {
        return Ok(Finding::fail("AMF pods not found for throughput testing"));
    };
    let Some(client) = ctx.first_component("smf").await? else {
        return Ok(Finding::fail("SMF pods not found for throughput testing"));
    };
    for pod in [&server, &client] {
        if !has_iperf(&ctx.cluster, &pod.name).await {
            return Ok(Finding::fail(format!("iperf3 not available in {}", pod.name)));
        }
    }

    let started = ctx
        .cluster
        .exec_command(&server.name, CORE_NAMESPACE, &["iperf3", "-s", "-D"], None)
        .await;
    if !started.is_success() {
        return Ok(Finding::fail(format!(
            "Cannot start iperf3 server: {}",
            started.stderr.trim()
        )));
    }
    ctx.poller.clock().sleep(SERVER_STARTUP).await;

    let Some(address) = ctx
        .components()
        .workload_address(&server.name, CORE_NAMESPACE)
        .await
    else {
        return Ok(Finding::fail(format!(
            "Cannot determine address of {}",
            server.name
        )));
    };

    let duration = ctx.thresholds.iperf_duration_secs.to_string();
    let parallel = ctx.thresholds.iperf_parallel.to_string();
    let outcome = ctx
        .cluster
        .exec_command(
            &client.name,
            CORE_NAMESPACE,
            &[
                "iperf3",
                "-c",
                address.as_str(),
                "-t",
                duration.as_str(),
                "-P",
                parallel.as_str(),
                "-J",
            ],
            None,
        )
        .await;

    let mbps = match parsing::parse_iperf_json_mbps(&outcome.stdout) {
        Ok(mbps) => mbps,
        Err(e) => {
            info!(workload = %client.name, "iperf3 output:\n{}", outcome.text());
            return Ok(Finding::fail(format!("Failed to parse iperf3 results: {e}")));
        }
    };
    let min = ctx.thresholds.min_throughput_mbps;
    if mbps < min {
        return Ok(Finding::fail(format!(
            "VXLAN throughput too low: {mbps:.2} Mbps < {min} Mbps"
        )));
    }
    Ok(Finding::pass(format!(
        "VXLAN throughput: {mbps:.2} Mbps (min: {min} Mbps)"
    )))
}

async fn latency<C: Cluster, K: Clock>(ctx: &SuiteContext<C, K>) -> Result<Finding> {
    let (source, address) = match ping_pair(ctx).await? {
        Ok(pair) => pair,
        Err(finding) => return Ok(finding),
    };
    let max = ctx.thresholds.max_latency_ms;

    let mut averages = Vec::new();
    for size in LATENCY_PAYLOADS {
        let size = size.to_string();
        let outcome = ctx
            .cluster
            .exec_command(
                &source.name,
                CORE_NAMESPACE,
                &["ping", "-c", "10", "-s", size.as_str(), "-W", "5", address.as_str()],
                None,
            )
            .await;
        let avg = PingStats::parse(&outcome.stdout)
            .ok()
            .and_then(|stats| stats.rtt_avg_ms);
        let Some(avg) = avg else {
            return Ok(Finding::fail(format!(
                "Failed to parse ping results for {size} byte packets"
            )));
        };
        if avg > max {
            return Ok(Finding::fail(format!(
                "Latency too high for {size} byte packets: {avg:.2} ms > {max} ms"
            )));
        }
        averages.push(format!("{size}B={avg:.2}ms"));
    }
    Ok(Finding::pass(format!(
        "Average latency {} (max: {max} ms)",
        averages.join(", ")
    )))
}

async fn packet_loss<C: Cluster, K: Clock>(ctx: &SuiteContext<C, K>) -> Result<Finding> {
    let (source, address) = match ping_pair(ctx).await? {
        Ok(pair) => pair,
        Err(finding) => return Ok(finding),
    };
    let outcome = ctx
        .cluster
        .exec_command(
            &source.name,
            CORE_NAMESPACE,
            &["ping", "-c", "100", "-i", "0.01", "-W", "1", address.as_str()],
            None,
        )
        .await;
    let stats = match PingStats::parse(&outcome.stdout) {
        Ok(stats) => stats,
        Err(e) => return Ok(Finding::fail(format!("Failed to parse ping results: {e}"))),
    };
    let max = ctx.thresholds.max_packet_loss_percent;
    if stats.loss_percent > max {
        return Ok(Finding::fail(format!(
            "Packet loss too high: {}% > {max}%",
            stats.loss_percent
        )));
    }
    Ok(Finding::pass(format!(
        "Packet loss {}% over {} packets (max: {max}%)",
        stats.loss_percent, stats.transmitted
    )))
}

async fn pfcp_path<C: Cluster, K: Clock>(ctx: &SuiteContext<C, K>) -> Result<Finding> {
    let (Some(smf), Some(upf)) = (
        ctx.first_component("smf").await?,
        ctx.first_component("upf").await?,
    ) else {
        return Ok(Finding::fail("SMF or UPF pods not found for PFCP testing"));
    };

    for pod in [&smf, &upf] {
        let verdict = ctx
            .network()
            .port_is_listening(&pod.name, CORE_NAMESPACE, PFCP_PORT, Protocol::Udp, Capture::Discard)
            .await;
        if !verdict.passed {
            return Ok(Finding::fail(format!("{} not listening on PFCP port", pod.name)));
        }
    }

    if let Some(address) = ctx
        .components()
        .workload_address(&upf.name, CORE_NAMESPACE)
        .await
    {
        let verdict = ctx
            .network()
            .can_reach(&smf.name, &upf.name, CORE_NAMESPACE, &address, Capture::Discard)
            .await;
        if !verdict.passed {
            warn!("SMF cannot reach UPF (might be normal during startup)");
        }
    }
    Ok(Finding::pass("PFCP ports are listening"))
}

async fn ngap_path<C: Cluster, K: Clock>(ctx: &SuiteContext<C, K>) -> Result<Finding> {
    let Some(amf) = ctx.first_component("amf").await? else {
        return Ok(Finding::fail("AMF pods not found for NGAP testing"));
    };
    let verdict = ctx
        .network()
        .port_is_listening(&amf.name, CORE_NAMESPACE, NGAP_PORT, Protocol::Sctp, Capture::Discard)
        .await;
    if !verdict.passed {
        return Ok(Finding::fail("AMF not listening on SCTP port for NGAP"));
    }

    if let (Some(gnb), Some(address)) = (
        ctx.first_component("gnb").await?,
        ctx.config.interface_address("n2", "amf"),
    ) {
        let verdict = ctx
            .network()
            .can_reach(&gnb.name, &amf.name, CORE_NAMESPACE, &address, Capture::Discard)
            .await;
        if !verdict.passed {
            warn!("gNB cannot reach AMF (might be normal during startup)");
        }
    }
    Ok(Finding::pass("AMF listening on SCTP port for NGAP"))
}
