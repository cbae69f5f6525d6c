//! Mutating operations through the `kubectl` command-line surface.
//!
//! Deletes and rollout restarts are administrative actions outside the
//! steady-state read path, so they go through the same tool an operator
//! would use instead of the typed API. Every outcome, including a missing
//! binary or a hung call, comes back as an [`ExecOutcome`].

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::types::{ExecOutcome, Mutation};

/// Runs `kubectl` with an optional explicit credentials file.
#[derive(Debug, Clone)]
pub struct Kubectl {
    binary: PathBuf,
    kubeconfig: Option<PathBuf>,
    timeout: Duration,
}

impl Kubectl {
    pub fn new(kubeconfig: Option<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: PathBuf::from("kubectl"),
            kubeconfig,
            timeout,
        }
    }

    /// Use a different binary (tests point this at a stub script).
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Full argument vector for a mutation.
    pub fn command_args(&self, mutation: &Mutation) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(path) = &self.kubeconfig {
            args.push("--kubeconfig".to_string());
            args.push(path.display().to_string());
        }
        args.push("-n".to_string());
        args.push(mutation.namespace.clone());
        args.extend(mutation.args());
        args
    }

    /// Apply a mutation. Nonzero exits are reported, never raised.
    pub async fn apply(&self, mutation: &Mutation) -> ExecOutcome {
        let args = self.command_args(mutation);
        info!(
            namespace = %mutation.namespace,
            kind = %mutation.kind,
            name = %mutation.name,
            verb = ?mutation.verb,
            "Applying mutation"
        );

        let child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(binary = %self.binary.display(), "kubectl not found");
                return ExecOutcome::failure("kubectl not found", ExecOutcome::NOT_FOUND);
            }
            Err(e) => return ExecOutcome::failure(e.to_string(), 1),
        };

        match timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let outcome = ExecOutcome {
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                    exit_status: output.status.code().unwrap_or(1),
                };
                debug!(exit_status = outcome.exit_status, "kubectl finished");
                if !outcome.is_success() {
                    warn!(
                        exit_status = outcome.exit_status,
                        stderr = %outcome.stderr.trim(),
                        "Mutation failed"
                    );
                }
                outcome
            }
            Ok(Err(e)) => ExecOutcome::failure(e.to_string(), 1),
            Err(_) => {
                warn!(timeout = ?self.timeout, "kubectl timed out");
                ExecOutcome::failure("Command timed out", ExecOutcome::TIMED_OUT)
            }
        }
    }
}
