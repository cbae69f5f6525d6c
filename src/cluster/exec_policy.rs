//! Container-fallback retry policy for remote command execution.
//!
//! When no container is named and the workload hosts several, the control
//! plane rejects an exec with a "container name must be specified" style
//! message. There is no structured error for that case, so the class is
//! recognised from the error text. On that class only, the command is
//! retried exactly once against the first declared container.
//!
//! The policy is a small state machine:
//!
//! ```text
//! Direct ──(container-resolution error)──> FallbackContainer ──> Failed
//!    │                                             │
//!    └──(any other error)──> Failed                └──(ran)──> done
//! ```
//!
//! `FallbackContainer` can only be entered from `Direct`, and the only exit
//! from `FallbackContainer` is a result, so a second retry cannot happen.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use super::types::ExecOutcome;

/// Error text fragments identifying a container-resolution rejection.
const CONTAINER_RESOLUTION_MARKERS: &[&str] =
    &["container not found", "container name must be specified"];

/// Why a command could not be issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueError {
    /// The control plane refused the call; the message is the error body
    Rejected(String),
    /// The call did not complete within its timeout
    TimedOut(Duration),
}

impl IssueError {
    /// Check if this is the container-resolution class that permits a fallback.
    pub fn requires_container(&self) -> bool {
        match self {
            IssueError::Rejected(message) => is_container_resolution_error(message),
            IssueError::TimedOut(_) => false,
        }
    }

    /// Convert into a soft failure.
    pub fn into_outcome(self) -> ExecOutcome {
        match self {
            IssueError::Rejected(message) => ExecOutcome::failure(message, 1),
            IssueError::TimedOut(after) => ExecOutcome::failure(
                format!("command timed out after {after:?}"),
                ExecOutcome::TIMED_OUT,
            ),
        }
    }
}

/// Check an error body for the container-resolution class.
pub fn is_container_resolution_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    CONTAINER_RESOLUTION_MARKERS
        .iter()
        .any(|marker| lower.contains(marker))
}

/// A single exec request.
#[derive(Debug, Clone, Copy)]
pub struct ExecRequest<'a> {
    pub workload: &'a str,
    pub namespace: &'a str,
    pub command: &'a [&'a str],
    pub container: Option<&'a str>,
}

/// Transport seam: one raw exec attempt plus a container lookup.
pub trait ExecTransport {
    /// Issue the command once against `container`.
    ///
    /// `Ok` means the command ran (whatever its exit status); `Err` means it
    /// could not be issued.
    fn exec_once(
        &self,
        request: &ExecRequest<'_>,
        container: Option<&str>,
    ) -> impl Future<Output = Result<ExecOutcome, IssueError>> + Send;

    /// Re-read the workload spec and return its first declared container.
    fn first_declared_container(
        &self,
        workload: &str,
        namespace: &str,
    ) -> impl Future<Output = Option<String>> + Send;
}

/// Retry policy states.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ExecAttempt {
    Direct,
    FallbackContainer(String),
    Failed(IssueError),
}

/// Execute a command under the container-fallback policy.
///
/// Never returns an error: every failure comes back as an [`ExecOutcome`]
/// with a nonzero exit status.
pub async fn execute<T: ExecTransport>(transport: &T, request: &ExecRequest<'_>) -> ExecOutcome {
    let mut state = ExecAttempt::Direct;
    loop {
        state = match state {
            ExecAttempt::Direct => match transport.exec_once(request, request.container).await {
                Ok(outcome) => return outcome,
                Err(err) if err.requires_container() => {
                    let fallback = transport
                        .first_declared_container(request.workload, request.namespace)
                        .await;
                    match fallback {
                        Some(container) if Some(container.as_str()) != request.container => {
                            debug!(
                                workload = request.workload,
                                namespace = request.namespace,
                                container = %container,
                                "Retrying exec against first declared container"
                            );
                            ExecAttempt::FallbackContainer(container)
                        }
                        _ => ExecAttempt::Failed(err),
                    }
                }
                Err(err) => ExecAttempt::Failed(err),
            },
            ExecAttempt::FallbackContainer(container) => {
                match transport.exec_once(request, Some(&container)).await {
                    Ok(outcome) => return outcome,
                    Err(err) => ExecAttempt::Failed(err),
                }
            }
            ExecAttempt::Failed(err) => {
                warn!(
                    workload = request.workload,
                    namespace = request.namespace,
                    error = ?err,
                    "Exec could not be issued"
                );
                return err.into_outcome();
            }
        };
    }
}
