//! Test fixtures and builder patterns for cluster snapshots.

use std::collections::BTreeMap;

use testbed_validator::cluster::{Condition, NetworkAttachment, Node, Workload, WorkloadPhase};

/// Builder for creating [`Workload`] test fixtures.
///
/// # Example
/// ```ignore
/// let amf = WorkloadBuilder::new("amf-0")
///     .namespace("5g")
///     .containers(["amf", "sidecar"])
///     .build();
/// ```
#[derive(Clone, Debug)]
pub struct WorkloadBuilder {
    name: String,
    namespace: String,
    uid: Option<String>,
    phase: WorkloadPhase,
    containers: Vec<String>,
    restart_counts: BTreeMap<String, i32>,
    conditions: Vec<Condition>,
    annotations: BTreeMap<String, String>,
    node_name: Option<String>,
}

impl WorkloadBuilder {
    /// Create a running single-container workload in the core namespace.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            uid: Some(format!("uid-{name}")),
            containers: vec![name.split('-').next().unwrap_or_default().to_string()],
            name,
            namespace: "5g".to_string(),
            phase: WorkloadPhase::Running,
            restart_counts: BTreeMap::new(),
            conditions: vec![Condition::new("Ready", "True")],
            annotations: BTreeMap::new(),
            node_name: None,
        }
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn phase(mut self, phase: WorkloadPhase) -> Self {
        self.phase = phase;
        self
    }

    /// Shorthand for a workload stuck in `Pending`.
    pub fn pending(self) -> Self {
        self.phase(WorkloadPhase::Pending)
    }

    pub fn uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = Some(uid.into());
        self
    }

    pub fn containers<I, S>(mut self, containers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.containers = containers.into_iter().map(Into::into).collect();
        self
    }

    pub fn restarts(mut self, container: impl Into<String>, count: i32) -> Self {
        self.restart_counts.insert(container.into(), count);
        self
    }

    pub fn condition(mut self, type_: &str, status: &str) -> Self {
        self.conditions.retain(|c| c.type_ != type_);
        self.conditions.push(Condition::new(type_, status));
        self
    }

    pub fn annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    pub fn node(mut self, node: impl Into<String>) -> Self {
        self.node_name = Some(node.into());
        self
    }

    pub fn build(self) -> Workload {
        Workload {
            namespace: self.namespace,
            name: self.name,
            uid: self.uid,
            phase: self.phase,
            containers: self.containers,
            restart_counts: self.restart_counts,
            conditions: self.conditions,
            annotations: self.annotations,
            node_name: self.node_name,
        }
    }
}

/// Builder for creating [`Node`] test fixtures.
#[derive(Clone, Debug)]
pub struct NodeBuilder {
    name: String,
    ready: Option<bool>,
    labels: BTreeMap<String, String>,
}

impl NodeBuilder {
    /// Create a Ready node.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ready: Some(true),
            labels: BTreeMap::new(),
        }
    }

    pub fn not_ready(mut self) -> Self {
        self.ready = Some(false);
        self
    }

    /// Node reporting no Ready condition at all.
    pub fn unknown(mut self) -> Self {
        self.ready = None;
        self
    }

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Node {
        Node {
            name: self.name,
            ready: self.ready,
            labels: self.labels,
        }
    }
}

/// A namespaced network attachment.
pub fn attachment(name: &str) -> NetworkAttachment {
    NetworkAttachment {
        name: name.to_string(),
        namespace: Some("5g".to_string()),
    }
}

/// `ip addr show <iface>` output carrying `address`.
pub fn ip_addr_output(interface: &str, address: &str) -> String {
    format!(
        "4: {interface}@if12: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1450 qdisc noqueue state UP group default\n    \
         link/ether 8a:3c:1f:22:aa:01 brd ff:ff:ff:ff:ff:ff link-netnsid 0\n    \
         inet {address}/24 brd 10.0.0.255 scope global {interface}\n       \
         valid_lft forever preferred_lft forever\n"
    )
}

/// Successful `ping` output towards `address`.
pub fn ping_ok(address: &str) -> String {
    format!(
        "PING {address} ({address}) 56(84) bytes of data.\n\
         64 bytes from {address}: icmp_seq=1 ttl=64 time=0.412 ms\n\
         64 bytes from {address}: icmp_seq=2 ttl=64 time=0.388 ms\n\
         64 bytes from {address}: icmp_seq=3 ttl=64 time=0.401 ms\n\
         \n\
         --- {address} ping statistics ---\n\
         3 packets transmitted, 3 received, 0% packet loss, time 2003ms\n\
         rtt min/avg/max/mdev = 0.388/0.400/0.412/0.010 ms\n"
    )
}

/// `ping` output with every packet lost.
pub fn ping_lost(address: &str) -> String {
    format!(
        "PING {address} ({address}) 56(84) bytes of data.\n\
         \n\
         --- {address} ping statistics ---\n\
         3 packets transmitted, 0 received, 100% packet loss, time 2047ms\n"
    )
}

/// Credentials file for an API server nobody listens on.
pub fn unreachable_kubeconfig(dir: &std::path::Path) -> std::path::PathBuf {
    let path = dir.join("kubeconfig");
    std::fs::write(
        &path,
        r#"apiVersion: v1
kind: Config
clusters:
- name: testbed
  cluster:
    server: https://127.0.0.1:1
contexts:
- name: testbed
  context:
    cluster: testbed
    user: admin
current-context: testbed
users:
- name: admin
  user:
    token: unused
"#,
    )
    .unwrap();
    path
}
