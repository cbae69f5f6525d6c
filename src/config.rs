//! Test configuration.
//!
//! Configuration is a YAML document addressed by dotted key paths
//! (`suites.e2e.enabled`, `network.interfaces.n2.amf_ip`, ...). A missing or
//! empty file is not an error: every lookup has a documented default so the
//! engine still runs against a cluster with no explicit test configuration.
//!
//! The loaded [`TestConfig`] is an explicit value handed to the cluster
//! client, the validators and the orchestrator. There is no process-wide
//! configuration state.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_yaml::Value;
use tracing::{debug, warn};

use crate::error::Result;

/// Environment variable overriding the credentials file path.
pub const KUBECONFIG_ENV: &str = "KUBECONFIG";

/// Credentials path used when nothing else is configured.
pub const DEFAULT_KUBECONFIG_PATH: &str = "/home/vagrant/kubeconfig";

/// Default location of the YAML configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "tests/test_config.yaml";

/// Default location of the locally cached credentials file.
pub const DEFAULT_LOCAL_KUBECONFIG: &str = "tests/kubeconfig";

const DEFAULT_CONFIG_YAML: &str = r#"
cluster:
  kubeconfig_path: /home/vagrant/kubeconfig
  master_ip: ""
  worker_ip: ""
  edge_ip: ""
suites:
  e2e:
    enabled: true
  protocols:
    enabled: true
  performance:
    enabled: true
  resilience:
    enabled: true
"#;

/// Key-path addressable test configuration.
#[derive(Debug, Clone)]
pub struct TestConfig {
    root: Value,
    local_kubeconfig: PathBuf,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            root: serde_yaml::from_str(DEFAULT_CONFIG_YAML).unwrap_or(Value::Null),
            local_kubeconfig: PathBuf::from(DEFAULT_LOCAL_KUBECONFIG),
        }
    }
}

impl TestConfig {
    /// Load configuration from a YAML file.
    ///
    /// A missing file yields the built-in defaults; an empty file yields an
    /// empty document (every lookup then falls back to its default). A file
    /// that exists but is not valid YAML is an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml(&raw)
    }

    /// Parse configuration from YAML text.
    pub fn from_yaml(raw: &str) -> Result<Self> {
        let root = if raw.trim().is_empty() {
            Value::Null
        } else {
            serde_yaml::from_str(raw)?
        };
        Ok(Self {
            root,
            local_kubeconfig: PathBuf::from(DEFAULT_LOCAL_KUBECONFIG),
        })
    }

    /// Override where the locally cached credentials file lives.
    pub fn with_local_kubeconfig(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_kubeconfig = path.into();
        self
    }

    /// Path of the locally cached credentials file.
    pub fn local_kubeconfig(&self) -> &Path {
        &self.local_kubeconfig
    }

    /// Look up a value by dotted key path.
    pub fn get(&self, key_path: &str) -> Option<&Value> {
        key_path
            .split('.')
            .try_fold(&self.root, |value, key| value.as_mapping()?.get(key))
    }

    /// Look up a string value. Numbers are rendered as text.
    pub fn get_str(&self, key_path: &str) -> Option<String> {
        match self.get(key_path)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn get_u64(&self, key_path: &str, default: u64) -> u64 {
        self.get(key_path)
            .and_then(Value::as_u64)
            .unwrap_or(default)
    }

    pub fn get_f64(&self, key_path: &str, default: f64) -> f64 {
        self.get(key_path)
            .and_then(Value::as_f64)
            .unwrap_or(default)
    }

    pub fn get_bool(&self, key_path: &str, default: bool) -> bool {
        self.get(key_path)
            .and_then(Value::as_bool)
            .unwrap_or(default)
    }

    /// Whether a suite is enabled. Suites are enabled unless configured off.
    pub fn suite_enabled(&self, suite: &str) -> bool {
        self.get_bool(&format!("suites.{suite}.enabled"), true)
    }

    /// Configured address of a network interface for a role, e.g.
    /// `interface_address("n2", "amf")` reads `network.interfaces.n2.amf_ip`.
    pub fn interface_address(&self, interface: &str, role: &str) -> Option<String> {
        self.get_str(&format!("network.interfaces.{interface}.{role}_ip"))
            .filter(|s| !s.is_empty())
    }

    /// Resolve the credentials file path using the process environment.
    pub fn kubeconfig_path(&self) -> PathBuf {
        let env = std::env::var_os(KUBECONFIG_ENV).map(PathBuf::from);
        self.resolve_kubeconfig(env.as_deref())
    }

    /// Resolve the credentials file path.
    ///
    /// Precedence: the environment override (if that file exists), then the
    /// locally cached file (if it exists), then `cluster.kubeconfig_path`,
    /// then [`DEFAULT_KUBECONFIG_PATH`].
    pub fn resolve_kubeconfig(&self, env_override: Option<&Path>) -> PathBuf {
        if let Some(path) = env_override {
            if path.exists() {
                return path.to_path_buf();
            }
            warn!(path = %path.display(), "{} points at a missing file, ignoring", KUBECONFIG_ENV);
        }
        if self.local_kubeconfig.exists() {
            return self.local_kubeconfig.clone();
        }
        self.get_str("cluster.kubeconfig_path")
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_KUBECONFIG_PATH))
    }

    /// Snapshot of the numeric thresholds used by validators and pollers.
    pub fn thresholds(&self) -> Thresholds {
        let d = Thresholds::default();
        Thresholds {
            recovery_timeout: Duration::from_secs(self.get_u64(
                "test_configs.resilience.recovery_timeout",
                d.recovery_timeout.as_secs(),
            )),
            poll_interval: Duration::from_secs(self.get_u64(
                "test_configs.resilience.poll_interval",
                d.poll_interval.as_secs(),
            )),
            exec_timeout: Duration::from_secs(
                self.get_u64("cluster.exec_timeout", d.exec_timeout.as_secs()),
            ),
            kubectl_timeout: Duration::from_secs(
                self.get_u64("cluster.kubectl_timeout", d.kubectl_timeout.as_secs()),
            ),
            api_timeout: Duration::from_secs(
                self.get_u64("cluster.api_timeout", d.api_timeout.as_secs()),
            ),
            min_throughput_mbps: self
                .get_f64("performance.throughput.min_mbps", d.min_throughput_mbps),
            max_latency_ms: self.get_f64("performance.latency.max_ms", d.max_latency_ms),
            max_packet_loss_percent: self.get_f64(
                "performance.packet_loss.max_percent",
                d.max_packet_loss_percent,
            ),
            iperf_duration_secs: self.get_u64(
                "test_configs.performance.iperf_duration",
                d.iperf_duration_secs,
            ),
            iperf_parallel: self.get_u64(
                "test_configs.performance.iperf_parallel",
                d.iperf_parallel,
            ),
        }
    }
}

/// Numeric thresholds referenced by validators, pollers and the cluster client.
#[derive(Debug, Clone, PartialEq)]
pub struct Thresholds {
    /// How long a resilience check waits for convergence after a disruption
    pub recovery_timeout: Duration,
    /// Fixed delay between convergence checks
    pub poll_interval: Duration,
    /// Upper bound for a single remote command execution
    pub exec_timeout: Duration,
    /// Upper bound for a single kubectl invocation
    pub kubectl_timeout: Duration,
    /// Connect/read timeout for control API calls
    pub api_timeout: Duration,
    pub min_throughput_mbps: f64,
    pub max_latency_ms: f64,
    pub max_packet_loss_percent: f64,
    pub iperf_duration_secs: u64,
    pub iperf_parallel: u64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            recovery_timeout: Duration::from_secs(180),
            poll_interval: Duration::from_secs(5),
            exec_timeout: Duration::from_secs(60),
            kubectl_timeout: Duration::from_secs(60),
            api_timeout: Duration::from_secs(30),
            min_throughput_mbps: 10.0,
            max_latency_ms: 50.0,
            max_packet_loss_percent: 1.0,
            iperf_duration_secs: 10,
            iperf_parallel: 4,
        }
    }
}

impl Thresholds {
    /// Read timeout for the API connection.
    ///
    /// Exec streams are upgraded from the same connection and inherit it, so
    /// it must not expire before `exec_timeout` on a command that stays
    /// silent while it runs.
    pub fn read_timeout(&self) -> Duration {
        self.api_timeout.max(self.exec_timeout)
    }
}
