//! Read-only queries against the live testbed.

use testbed_validator::Cluster;
use testbed_validator::suites::e2e::EXPECTED_ATTACHMENTS;
use testbed_validator::suites::{CORE_NAMESPACE, SYSTEM_NAMESPACE};

use crate::init_test;

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires a running testbed"]
async fn test_lists_ready_nodes() {
    let testbed = init_test().await;
    let cluster = testbed.cluster().await;

    let nodes = cluster.list_nodes().await.expect("list nodes");

    assert!(!nodes.is_empty(), "testbed has no nodes");
    for node in &nodes {
        assert!(node.is_ready(), "node {} is not Ready", node.name);
    }
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires a running testbed"]
async fn test_lists_system_workloads() {
    let testbed = init_test().await;
    let cluster = testbed.cluster().await;

    let workloads = cluster
        .list_workloads(Some(SYSTEM_NAMESPACE))
        .await
        .expect("list workloads");

    assert!(workloads.iter().all(|w| w.namespace == SYSTEM_NAMESPACE));
    assert!(workloads.iter().any(|w| w.is_running()));
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires a running testbed"]
async fn test_unknown_namespace_lists_nothing() {
    let testbed = init_test().await;
    let cluster = testbed.cluster().await;

    let workloads = cluster
        .list_workloads(Some("no-such-namespace-for-tests"))
        .await
        .expect("list workloads");

    assert!(workloads.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires a running testbed"]
async fn test_overlay_attachments_are_defined() {
    let testbed = init_test().await;
    let cluster = testbed.cluster().await;

    let attachments = cluster
        .list_network_attachments(None)
        .await
        .expect("list attachments");
    let missing = testbed_validator::cluster::missing_attachments(EXPECTED_ATTACHMENTS, &attachments);

    assert!(missing.is_empty(), "missing attachments: {missing:?}");
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires a running testbed"]
async fn test_exec_in_core_workload() {
    let testbed = init_test().await;
    let cluster = testbed.cluster().await;
    let workloads = cluster
        .list_workloads(Some(CORE_NAMESPACE))
        .await
        .expect("list workloads");
    let Some(workload) = workloads.iter().find(|w| w.is_running()) else {
        panic!("no running workload in {CORE_NAMESPACE}");
    };

    let outcome = cluster
        .exec_command(&workload.name, CORE_NAMESPACE, &["hostname", "-i"], None)
        .await;

    assert!(outcome.is_success(), "exec failed: {}", outcome.text());
    assert!(!outcome.stdout.trim().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires a running testbed"]
async fn test_exec_in_missing_workload_is_soft() {
    let testbed = init_test().await;
    let cluster = testbed.cluster().await;

    let outcome = cluster
        .exec_command("no-such-pod", CORE_NAMESPACE, &["true"], None)
        .await;

    assert!(!outcome.is_success());
    assert!(!outcome.stderr.is_empty());
}
