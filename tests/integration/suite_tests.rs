//! Whole suites against the live testbed.

use testbed_validator::{SuiteId, suites};

use crate::init_test;

async fn run_suite(suite: SuiteId) {
    let testbed = init_test().await;
    let ctx = testbed.context().await;

    let report = suites::run(suite, &ctx).await.expect("suite aborted");

    for check in &report.checks {
        println!("{} {}: {}", check.mark(), check.name, check.message);
    }
    assert!(report.is_success(), "{report}");
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires a running testbed"]
async fn test_e2e_suite() {
    run_suite(SuiteId::E2e).await;
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires a running testbed"]
async fn test_protocol_suite() {
    run_suite(SuiteId::Protocols).await;
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires a running testbed with iperf3 in the core pods"]
async fn test_performance_suite() {
    run_suite(SuiteId::Performance).await;
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "disrupts the testbed; run alone with --test-threads=1"]
async fn test_resilience_suite() {
    run_suite(SuiteId::Resilience).await;
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires a running testbed and vagrant access to the worker"]
async fn test_ran_suite() {
    run_suite(SuiteId::Ran).await;
}
