//! Suite bodies against scripted clusters.

use testbed_validator::cluster::{ExecOutcome, WorkloadPhase};
use testbed_validator::suites::e2e::{self, E2eCheck};
use testbed_validator::suites::performance::{self, PerformanceCheck};
use testbed_validator::suites::protocols::{self, ProtocolCheck};
use testbed_validator::{Error, SuiteId, suites};

use crate::common::{NodeBuilder, WorkloadBuilder, attachment, ping_lost, ping_ok};
use crate::testbed::{AMF_POD_IP, SMF_POD_IP, healthy_testbed};
use crate::{FakeCluster, context, init_tracing};

fn iperf_json(bits_per_second: f64) -> String {
    format!(
        r#"{{"start":{{"connected":[]}},"end":{{"sum_sent":{{"bits_per_second":{bits_per_second}}},"sum_received":{{"bits_per_second":{bits_per_second}}}}}}}"#
    )
}

fn ping_with_rtt(address: &str, avg_ms: f64) -> String {
    format!(
        "PING {address} ({address}) 64(92) bytes of data.\n\
         72 bytes from {address}: icmp_seq=1 ttl=64 time={avg_ms} ms\n\
         \n\
         --- {address} ping statistics ---\n\
         10 packets transmitted, 10 received, 0% packet loss, time 9012ms\n\
         rtt min/avg/max/mdev = 0.300/{avg_ms}/90.000/0.050 ms\n"
    )
}

// ============================================================================
// E2E suite
// ============================================================================

#[tokio::test]
async fn test_e2e_fails_fast_on_unready_node() {
    init_tracing();
    let cluster = FakeCluster::new().with_nodes([
        NodeBuilder::new("edge-1").build(),
        NodeBuilder::new("worker-1").not_ready().build(),
    ]);
    let (ctx, _clock) = context(cluster);

    let report = e2e::run(&ctx).await.unwrap();

    assert_eq!(report.checks.len(), 1);
    let check = &report.checks[0];
    assert_eq!(check.name, E2eCheck::Infrastructure.name());
    assert!(!check.passed);
    assert!(check.message.contains("worker-1"));
    assert!(!check.message.contains("edge-1"));
    assert!(ctx.cluster.exec_calls().is_empty());
}

#[tokio::test]
async fn test_e2e_node_without_ready_condition_is_not_ready() {
    let cluster = FakeCluster::new().with_nodes([NodeBuilder::new("master").unknown().build()]);
    let (ctx, _clock) = context(cluster);

    let finding = e2e::run_check(&ctx, E2eCheck::Infrastructure).await.unwrap();

    assert!(!finding.passed);
    assert!(finding.message.contains("master"));
}

#[tokio::test]
async fn test_e2e_empty_cluster_fails_infrastructure() {
    let (ctx, _clock) = context(FakeCluster::new());

    let report = e2e::run(&ctx).await.unwrap();

    assert_eq!(report.checks.len(), 1);
    assert_eq!(report.checks[0].message, "No nodes found in cluster");
}

#[tokio::test]
async fn test_e2e_passes_on_healthy_testbed() {
    init_tracing();
    let (ctx, _clock) = context(healthy_testbed());

    let report = e2e::run(&ctx).await.unwrap();

    let failures: Vec<_> = report.checks.iter().filter(|c| !c.passed).collect();
    assert!(failures.is_empty(), "unexpected failures: {failures:?}");
    assert_eq!(report.checks.len(), E2eCheck::ALL.len());
    assert!(report.is_success());
}

#[tokio::test]
async fn test_e2e_overlay_reports_missing_attachment() {
    let cluster = FakeCluster::new()
        .with_workloads(
            ["kube-multus-ds-a", "kube-multus-ds-b"]
                .map(|name| WorkloadBuilder::new(name).namespace("kube-system").build()),
        )
        .with_attachments(["n1-net", "n3-net", "n4-net", "n6-mec-net", "n6-cld-net"].map(attachment));
    let (ctx, _clock) = context(cluster);

    let finding = e2e::run_check(&ctx, E2eCheck::OverlayNetwork).await.unwrap();

    assert!(!finding.passed);
    assert_eq!(
        finding.message,
        "Missing NetworkAttachmentDefinitions: n2-net"
    );
}

#[tokio::test]
async fn test_e2e_overlay_needs_two_running_multus_pods() {
    let cluster = FakeCluster::new().with_workloads([
        WorkloadBuilder::new("kube-multus-ds-a")
            .namespace("kube-system")
            .build(),
        WorkloadBuilder::new("kube-multus-ds-b")
            .namespace("kube-system")
            .pending()
            .build(),
    ]);
    let (ctx, _clock) = context(cluster);

    let finding = e2e::run_check(&ctx, E2eCheck::OverlayNetwork).await.unwrap();

    assert!(!finding.passed);
    assert!(finding.message.contains("Not enough Multus pods running: 1"));
}

#[tokio::test]
async fn test_e2e_core_deployment_names_missing_component() {
    let cluster = FakeCluster::new().with_workloads([
        WorkloadBuilder::new("amf-0").build(),
        WorkloadBuilder::new("smf-0").build(),
    ]);
    let (ctx, _clock) = context(cluster);

    let finding = e2e::run_check(&ctx, E2eCheck::CoreDeployment).await.unwrap();

    assert!(!finding.passed);
    assert_eq!(finding.message, "No UPF pods found");
}

#[tokio::test]
async fn test_e2e_cluster_health_flags_crashed_pods() {
    let mut pods: Vec<_> = (0..5)
        .map(|i| {
            WorkloadBuilder::new(format!("coredns-{i}"))
                .namespace("kube-system")
                .build()
        })
        .collect();
    pods.push(
        WorkloadBuilder::new("etcd-master")
            .namespace("kube-system")
            .phase(WorkloadPhase::Failed)
            .build(),
    );
    let (ctx, _clock) = context(FakeCluster::new().with_workloads(pods));

    let finding = e2e::run_check(&ctx, E2eCheck::ClusterHealth).await.unwrap();

    assert!(!finding.passed);
    assert!(finding.message.contains("etcd-master"));
}

#[tokio::test]
async fn test_e2e_mec_is_optional() {
    let (ctx, _clock) = context(FakeCluster::new());

    let finding = e2e::run_check(&ctx, E2eCheck::Mec).await.unwrap();

    assert!(finding.passed);
}

#[tokio::test]
async fn test_e2e_unreachable_peer_fails_connectivity() {
    let cluster = healthy_testbed();
    cluster.respond_ok(
        "amf",
        &format!("ping -c 3 -W 5 {SMF_POD_IP}"),
        ping_lost(SMF_POD_IP),
    );
    let (ctx, _clock) = context(cluster);

    let finding = e2e::run_check(&ctx, E2eCheck::EndToEndConnectivity)
        .await
        .unwrap();

    assert!(!finding.passed);
    assert_eq!(finding.message, "Pod amf-0 cannot reach pod smf-0");
}

#[tokio::test]
async fn test_unavailable_cluster_aborts_suite() {
    let cluster = healthy_testbed();
    cluster.set_unavailable(true);
    let (ctx, _clock) = context(cluster);

    let result = suites::run(SuiteId::E2e, &ctx).await;

    assert!(matches!(result, Err(Error::ClusterUnavailable(_))));
}

#[tokio::test]
async fn test_soft_list_error_becomes_failed_check() {
    let cluster = healthy_testbed();
    cluster.fail_next_lists(1);
    let (ctx, _clock) = context(cluster);

    let report = suites::run(SuiteId::E2e, &ctx).await.unwrap();

    // The node listing fails, which fails Infrastructure and stops the suite
    assert_eq!(report.checks.len(), 1);
    assert!(!report.checks[0].passed);
    assert!(report.checks[0].message.contains("failed with error"));
}

// ============================================================================
// Protocol suite
// ============================================================================

#[tokio::test]
async fn test_protocols_pass_on_healthy_testbed() {
    init_tracing();
    let (ctx, _clock) = context(healthy_testbed());

    let report = protocols::run(&ctx).await.unwrap();

    let failures: Vec<_> = report.checks.iter().filter(|c| !c.passed).collect();
    assert!(failures.is_empty(), "unexpected failures: {failures:?}");
    assert_eq!(report.checks.len(), ProtocolCheck::ALL.len());
}

#[tokio::test]
async fn test_gtpu_fails_when_upf_has_no_gtpu_socket() {
    let cluster = healthy_testbed();
    cluster.respond_ok(
        "upf",
        "ss -unap",
        "State  Recv-Q Send-Q Local Address:Port Peer Address:Port\nUNCONN 0 0 10.10.4.30:8805 0.0.0.0:*\n",
    );
    let (ctx, _clock) = context(cluster);

    let finding = protocols::run_check(&ctx, ProtocolCheck::Gtpu).await.unwrap();

    assert!(!finding.passed);
    assert_eq!(
        finding.message,
        "upf-cloud-0 not listening on UDP port 2152 (GTP-U)"
    );
}

#[tokio::test]
async fn test_edge_upf_is_checked_against_edge_address() {
    let cluster = healthy_testbed().with_workloads([WorkloadBuilder::new("upf-edge-0").build()]);
    cluster
        .respond_ok("upf-edge", "ss -unap", "UNCONN 0 0 10.10.3.31:2152 0.0.0.0:*\n")
        .respond_ok(
            "upf-edge",
            "ip addr show n3",
            crate::common::ip_addr_output("n3", "10.10.3.30"),
        );
    let (ctx, _clock) = context(cluster);

    let finding = protocols::run_check(&ctx, ProtocolCheck::Gtpu).await.unwrap();

    assert!(!finding.passed);
    assert!(finding.message.contains("upf-edge-0 N3"));
    assert!(finding.message.contains("10.10.3.31"));
}

#[tokio::test]
async fn test_ngap_peer_failure_only_warns() {
    let cluster = healthy_testbed();
    cluster.respond_ok("gnb", "ping -c 3 -W 5 10.10.2.10", ping_lost("10.10.2.10"));
    let (ctx, _clock) = context(cluster);

    let finding = protocols::run_check(&ctx, ProtocolCheck::Ngap).await.unwrap();

    assert!(finding.passed);
    let pinged = ctx
        .cluster
        .exec_calls()
        .iter()
        .any(|c| c.workload == "gnb-0" && c.command.starts_with("ping"));
    assert!(pinged);
}

#[tokio::test]
async fn test_missing_interface_address_in_config_fails() {
    let cluster = healthy_testbed();
    let (mut ctx, _clock) = context(cluster);
    ctx.config = testbed_validator::TestConfig::from_yaml("network: {}").unwrap();

    let finding = protocols::run_check(&ctx, ProtocolCheck::Nas).await.unwrap();

    assert!(!finding.passed);
    assert!(finding.message.contains("network.interfaces.n1.amf_ip"));
}

#[tokio::test]
async fn test_vxlan_needs_two_running_ovs_pods() {
    let cluster = FakeCluster::new().with_workloads([WorkloadBuilder::new("ds-net-setup-worker-x")
        .namespace("kube-system")
        .build()]);
    let (ctx, _clock) = context(cluster);

    let finding = protocols::run_check(&ctx, ProtocolCheck::VxlanTunnels)
        .await
        .unwrap();

    assert!(!finding.passed);
    assert_eq!(finding.message, "Not enough OVS pods running: 1");
}

// ============================================================================
// Performance suite
// ============================================================================

fn with_perf_tools(cluster: &FakeCluster, mbps: f64) {
    cluster
        .respond_ok("amf", "which iperf3", "/usr/bin/iperf3\n")
        .respond_ok("smf", "which iperf3", "/usr/bin/iperf3\n")
        .respond_ok("amf", "iperf3 -s -D", "")
        .respond_ok(
            "smf",
            &format!("iperf3 -c {AMF_POD_IP} -t 10 -P 4 -J"),
            iperf_json(mbps * 1_000_000.0),
        );
}

#[tokio::test]
async fn test_throughput_from_iperf_json() {
    let cluster = healthy_testbed();
    with_perf_tools(&cluster, 940.5);
    let (ctx, clock) = context(cluster);

    let finding = performance::run_check(&ctx, PerformanceCheck::Throughput)
        .await
        .unwrap();

    assert!(finding.passed, "{}", finding.message);
    assert!(finding.message.contains("940.50 Mbps"));
    assert_eq!(clock.sleeps(), vec![std::time::Duration::from_secs(2)]);
}

#[tokio::test]
async fn test_throughput_below_threshold_fails() {
    let cluster = healthy_testbed();
    with_perf_tools(&cluster, 4.0);
    let (ctx, _clock) = context(cluster);

    let finding = performance::run_check(&ctx, PerformanceCheck::Throughput)
        .await
        .unwrap();

    assert!(!finding.passed);
    assert!(finding.message.contains("too low"));
}

#[tokio::test]
async fn test_throughput_without_iperf_fails_without_starting_server() {
    let cluster = healthy_testbed();
    cluster.respond(
        "amf",
        "which iperf3",
        ExecOutcome::failure("", 1),
    );
    let (ctx, _clock) = context(cluster);

    let finding = performance::run_check(&ctx, PerformanceCheck::Throughput)
        .await
        .unwrap();

    assert!(!finding.passed);
    assert_eq!(finding.message, "iperf3 not available in amf-0");
    assert!(
        !ctx.cluster
            .exec_calls()
            .iter()
            .any(|c| c.command.starts_with("iperf3"))
    );
}

#[tokio::test]
async fn test_latency_within_threshold_passes() {
    let cluster = healthy_testbed();
    for size in [64, 1024, 1400] {
        cluster.respond_ok(
            "amf",
            &format!("ping -c 10 -s {size} -W 5 {SMF_POD_IP}"),
            ping_with_rtt(SMF_POD_IP, 0.42),
        );
    }
    let (ctx, _clock) = context(cluster);

    let finding = performance::run_check(&ctx, PerformanceCheck::Latency)
        .await
        .unwrap();

    assert!(finding.passed, "{}", finding.message);
    assert!(finding.message.contains("1400B=0.42ms"));
}

#[tokio::test]
async fn test_latency_above_threshold_fails_at_first_slow_size() {
    let cluster = healthy_testbed();
    cluster
        .respond_ok(
            "amf",
            &format!("ping -c 10 -s 64 -W 5 {SMF_POD_IP}"),
            ping_with_rtt(SMF_POD_IP, 0.42),
        )
        .respond_ok(
            "amf",
            &format!("ping -c 10 -s 1024 -W 5 {SMF_POD_IP}"),
            ping_with_rtt(SMF_POD_IP, 75.0),
        );
    let (ctx, _clock) = context(cluster);

    let finding = performance::run_check(&ctx, PerformanceCheck::Latency)
        .await
        .unwrap();

    assert!(!finding.passed);
    assert!(finding.message.contains("1024 byte packets"));
    assert!(
        !ctx.cluster
            .exec_calls()
            .iter()
            .any(|c| c.command.contains("-s 1400"))
    );
}

#[tokio::test]
async fn test_packet_loss_from_ping_summary() {
    let cluster = healthy_testbed();
    cluster.respond_ok(
        "amf",
        &format!("ping -c 100 -i 0.01 -W 1 {SMF_POD_IP}"),
        ping_ok(SMF_POD_IP),
    );
    let (ctx, _clock) = context(cluster);

    let finding = performance::run_check(&ctx, PerformanceCheck::PacketLoss)
        .await
        .unwrap();

    assert!(finding.passed, "{}", finding.message);
}

#[tokio::test]
async fn test_pfcp_and_ngap_paths_pass_on_healthy_testbed() {
    let (ctx, _clock) = context(healthy_testbed());

    for check in [PerformanceCheck::PfcpPath, PerformanceCheck::NgapPath] {
        let finding = performance::run_check(&ctx, check).await.unwrap();
        assert!(finding.passed, "{}: {}", check.name(), finding.message);
    }
}
