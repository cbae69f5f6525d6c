//! Error types for the validation engine.
//!
//! Only cluster-level unavailability is fatal. Everything a check can
//! observe on a degraded cluster (failed commands, missing pods, timeouts)
//! travels as data instead: see [`crate::cluster::ExecOutcome`] and
//! [`crate::validation::Verdict`].

use thiserror::Error;

/// Error type for engine operations
#[derive(Error, Debug)]
pub enum Error {
    /// Control endpoint unreachable or credentials missing/rejected
    #[error("Cluster unavailable: {0}")]
    ClusterUnavailable(String),

    /// Logs for a workload or container could not be read
    #[error("Logs unavailable for {namespace}/{workload}: {reason}")]
    LogUnavailable {
        workload: String,
        namespace: String,
        reason: String,
    },

    /// Kubernetes API error that is neither unavailability nor expected absence
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file could not be parsed
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Local I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Host provisioner reported a problem
    #[error("Provisioner error: {0}")]
    Provisioner(String),

    /// A suite's executable unit could not be started
    #[error("Failed to launch suite {suite}: {reason}")]
    Launch { suite: String, reason: String },
}

impl Error {
    /// Check if this error must abort the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::ClusterUnavailable(_))
    }

    /// Classify a kube error raised by a read/list call.
    ///
    /// Authentication failures and transport errors mean the cluster cannot
    /// be observed at all; anything else is returned as a plain API error.
    pub fn from_list_error(err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(resp) if resp.code == 401 || resp.code == 403 => {
                Error::ClusterUnavailable(format!("credentials rejected: {}", resp.message))
            }
            kube::Error::Service(_)
            | kube::Error::HyperError(_)
            | kube::Error::Auth(_)
            | kube::Error::InferConfig(_) => Error::ClusterUnavailable(err.to_string()),
            _ => Error::Kube(err),
        }
    }

    /// Check if this error indicates a not-found condition
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(e)) if e.code == 404)
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;
