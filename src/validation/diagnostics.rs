//! Diagnostics for failing checks.
//!
//! When a component check fails, the useful context is spread over three
//! places: the pod status, the tail of its logs and its recent events.
//! [`describe_workload`] gathers all three in one best-effort pass.

use std::fmt;

use tracing::{debug, warn};

use crate::cluster::{Cluster, Workload, WorkloadEvent};

/// Log lines kept in the report.
pub const LOG_TAIL_LINES: usize = 12;
/// Log lines requested from the API before trimming to [`LOG_TAIL_LINES`].
pub const LOG_READ_LINES: i64 = 200;
/// Events kept in the report.
pub const EVENT_LIMIT: usize = 6;
/// Event messages longer than this are truncated.
pub const EVENT_MESSAGE_LIMIT: usize = 180;

/// Collected diagnostics for one workload.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WorkloadDiagnostics {
    pub status_line: String,
    pub log_tail: Vec<String>,
    pub events: Vec<String>,
}

impl fmt::Display for WorkloadDiagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.status_line)?;
        if !self.log_tail.is_empty() {
            writeln!(f, "  logs (last {}):", self.log_tail.len())?;
            for line in &self.log_tail {
                writeln!(f, "    {line}")?;
            }
        }
        if !self.events.is_empty() {
            writeln!(f, "  events:")?;
            for event in &self.events {
                writeln!(f, "    {event}")?;
            }
        }
        Ok(())
    }
}

/// Gather status, log tail and recent events for a workload.
///
/// Failures to read logs or events are logged and leave that section empty.
pub async fn describe_workload<C: Cluster>(cluster: &C, workload: &Workload) -> WorkloadDiagnostics {
    let status_line = workload.status_line();

    let log_tail = match cluster
        .read_logs(
            &workload.name,
            &workload.namespace,
            workload.first_container(),
            LOG_READ_LINES,
        )
        .await
    {
        Ok(logs) => tail_lines(&logs, LOG_TAIL_LINES),
        Err(e) => {
            debug!(workload = %workload.name, error = %e, "No logs for diagnostics");
            Vec::new()
        }
    };

    let events = match cluster.list_events(&workload.name, &workload.namespace).await {
        Ok(events) => recent_events(events, EVENT_LIMIT)
            .iter()
            .map(format_event)
            .collect(),
        Err(e) => {
            warn!(workload = %workload.name, error = %e, "Cannot list events for diagnostics");
            Vec::new()
        }
    };

    WorkloadDiagnostics {
        status_line,
        log_tail,
        events,
    }
}

/// Last `count` non-empty lines of `text`.
pub fn tail_lines(text: &str, count: usize) -> Vec<String> {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(count);
    lines[start..].iter().map(|l| l.to_string()).collect()
}

/// Most recent `limit` events, oldest first. Events without a timestamp
/// sort before all others.
pub fn recent_events(mut events: Vec<WorkloadEvent>, limit: usize) -> Vec<WorkloadEvent> {
    events.sort_by_key(|e| e.last_seen);
    let start = events.len().saturating_sub(limit);
    events.split_off(start)
}

/// One-line rendering of an event, message flattened and truncated.
pub fn format_event(event: &WorkloadEvent) -> String {
    let message = event.message.split_whitespace().collect::<Vec<_>>().join(" ");
    let message = truncate(&message, EVENT_MESSAGE_LIMIT);
    if event.count > 1 {
        format!("{} {} (x{}): {}", event.type_, event.reason, event.count, message)
    } else {
        format!("{} {}: {}", event.type_, event.reason, message)
    }
}

fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(limit.saturating_sub(3)).collect();
    cut.push_str("...");
    cut
}
