//! In-memory cluster for functional tests.
//!
//! `FakeCluster` holds workloads, nodes and network attachments, answers
//! exec calls from a script keyed by workload-name prefix and command line,
//! and records every exec call and mutation.
//!
//! Mutations have effects: deleting a pod removes it and (by default)
//! schedules a replacement with a fresh name and uid, and restarting a
//! daemonset replaces every pod whose name starts with the daemonset name.
//! Replacements start `Pending` and turn `Running` after a configurable
//! number of list calls, which is how tests model recovery time.

use std::collections::BTreeMap;
use std::io;
use std::sync::Mutex;

use testbed_validator::cluster::{
    Cluster, ExecOutcome, Mutation, MutationVerb, NetworkAttachment, Node, Workload,
    WorkloadEvent, WorkloadPhase,
};
use testbed_validator::{Error, Result};

/// One recorded exec call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecCall {
    pub workload: String,
    pub namespace: String,
    pub command: String,
    pub container: Option<String>,
}

#[derive(Debug, Default)]
struct FakeState {
    workloads: Vec<Workload>,
    nodes: Vec<Node>,
    attachments: Vec<NetworkAttachment>,
    logs: BTreeMap<String, String>,
    events: BTreeMap<String, Vec<WorkloadEvent>>,
    /// (workload prefix, command line) -> outcome
    responses: Vec<(String, String, ExecOutcome)>,
    exec_calls: Vec<ExecCall>,
    mutations: Vec<Mutation>,
    failing_mutations: Vec<String>,
    unavailable: bool,
    /// Remaining list calls that fail with a non-fatal error
    flaky_lists: u32,
    list_calls: u32,
    /// List calls a replacement stays `Pending` for
    recover_after: u32,
    no_replacements: bool,
    /// Replacement name -> remaining list calls before it is `Running`
    settling: BTreeMap<String, u32>,
    generation: u32,
}

impl FakeState {
    fn replace(&mut self, index: usize) {
        let old = self.workloads.remove(index);
        if self.no_replacements {
            return;
        }
        self.generation += 1;
        let name = format!("{}-r{}", old.name, self.generation);
        let phase = if self.recover_after == 0 {
            WorkloadPhase::Running
        } else {
            self.settling.insert(name.clone(), self.recover_after);
            WorkloadPhase::Pending
        };
        self.workloads.push(Workload {
            uid: Some(format!("uid-{name}")),
            name,
            phase,
            restart_counts: BTreeMap::new(),
            ..old
        });
    }

    fn tick(&mut self) {
        self.list_calls += 1;
        let mut ready = Vec::new();
        for (name, remaining) in self.settling.iter_mut() {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                ready.push(name.clone());
            }
        }
        for name in ready {
            self.settling.remove(&name);
            if let Some(w) = self.workloads.iter_mut().find(|w| w.name == name) {
                w.phase = WorkloadPhase::Running;
            }
        }
    }

    fn check_list(&mut self) -> Result<()> {
        if self.unavailable {
            return Err(Error::ClusterUnavailable("connection refused".to_string()));
        }
        self.tick();
        if self.flaky_lists > 0 {
            self.flaky_lists -= 1;
            return Err(Error::Io(io::Error::other("connection reset by peer")));
        }
        Ok(())
    }

    fn response(&self, workload: &str, command: &str) -> Option<ExecOutcome> {
        self.responses
            .iter()
            .filter(|(prefix, cmd, _)| cmd == command && workload.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _, _)| prefix.len())
            .map(|(_, _, outcome)| outcome.clone())
    }
}

#[derive(Debug, Default)]
pub struct FakeCluster {
    state: Mutex<FakeState>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_nodes(self, nodes: impl IntoIterator<Item = Node>) -> Self {
        self.state.lock().unwrap().nodes.extend(nodes);
        self
    }

    pub fn with_workloads(self, workloads: impl IntoIterator<Item = Workload>) -> Self {
        self.state.lock().unwrap().workloads.extend(workloads);
        self
    }

    pub fn with_attachments(self, attachments: impl IntoIterator<Item = NetworkAttachment>) -> Self {
        self.state.lock().unwrap().attachments.extend(attachments);
        self
    }

    /// Script the outcome of `command` for workloads whose name starts
    /// with `workload`. The longest matching prefix wins.
    pub fn respond(&self, workload: &str, command: &str, outcome: ExecOutcome) -> &Self {
        self.state
            .lock()
            .unwrap()
            .responses
            .push((workload.to_string(), command.to_string(), outcome));
        self
    }

    /// Shorthand for a successful scripted command.
    pub fn respond_ok(&self, workload: &str, command: &str, stdout: impl Into<String>) -> &Self {
        self.respond(workload, command, ExecOutcome::success(stdout))
    }

    pub fn set_logs(&self, workload: &str, logs: &str) {
        self.state
            .lock()
            .unwrap()
            .logs
            .insert(workload.to_string(), logs.to_string());
    }

    pub fn add_event(&self, workload: &str, event: WorkloadEvent) {
        self.state
            .lock()
            .unwrap()
            .events
            .entry(workload.to_string())
            .or_default()
            .push(event);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unwrap().unavailable = unavailable;
    }

    /// Make the next `count` list calls fail with a non-fatal error.
    pub fn fail_next_lists(&self, count: u32) {
        self.state.lock().unwrap().flaky_lists = count;
    }

    /// Keep replacements `Pending` for `lists` list calls.
    pub fn recover_after(&self, lists: u32) {
        self.state.lock().unwrap().recover_after = lists;
    }

    /// Deleted pods are not recreated.
    pub fn no_replacements(&self) {
        self.state.lock().unwrap().no_replacements = true;
    }

    /// Mutations against `name` fail.
    pub fn fail_mutations_for(&self, name: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_mutations
            .push(name.to_string());
    }

    pub fn exec_calls(&self) -> Vec<ExecCall> {
        self.state.lock().unwrap().exec_calls.clone()
    }

    pub fn mutations(&self) -> Vec<Mutation> {
        self.state.lock().unwrap().mutations.clone()
    }

    pub fn workloads(&self) -> Vec<Workload> {
        self.state.lock().unwrap().workloads.clone()
    }

    pub fn list_calls(&self) -> u32 {
        self.state.lock().unwrap().list_calls
    }
}

impl Cluster for FakeCluster {
    async fn list_nodes(&self) -> Result<Vec<Node>> {
        let mut state = self.state.lock().unwrap();
        state.check_list()?;
        Ok(state.nodes.clone())
    }

    async fn list_workloads(&self, namespace: Option<&str>) -> Result<Vec<Workload>> {
        let mut state = self.state.lock().unwrap();
        state.check_list()?;
        Ok(state
            .workloads
            .iter()
            .filter(|w| namespace.is_none_or(|ns| w.namespace == ns))
            .cloned()
            .collect())
    }

    async fn list_network_attachments(
        &self,
        namespace: Option<&str>,
    ) -> Result<Vec<NetworkAttachment>> {
        let mut state = self.state.lock().unwrap();
        state.check_list()?;
        Ok(state
            .attachments
            .iter()
            .filter(|a| namespace.is_none_or(|ns| a.namespace.as_deref() == Some(ns)))
            .cloned()
            .collect())
    }

    async fn read_logs(
        &self,
        workload: &str,
        namespace: &str,
        _container: Option<&str>,
        _tail_lines: i64,
    ) -> Result<String> {
        let state = self.state.lock().unwrap();
        state
            .logs
            .get(workload)
            .cloned()
            .ok_or_else(|| Error::LogUnavailable {
                workload: workload.to_string(),
                namespace: namespace.to_string(),
                reason: "not found".to_string(),
            })
    }

    async fn list_events(&self, workload: &str, _namespace: &str) -> Result<Vec<WorkloadEvent>> {
        let state = self.state.lock().unwrap();
        if state.unavailable {
            return Err(Error::ClusterUnavailable("connection refused".to_string()));
        }
        Ok(state.events.get(workload).cloned().unwrap_or_default())
    }

    async fn exec_command(
        &self,
        workload: &str,
        namespace: &str,
        command: &[&str],
        container: Option<&str>,
    ) -> ExecOutcome {
        let mut state = self.state.lock().unwrap();
        let command = command.join(" ");
        state.exec_calls.push(ExecCall {
            workload: workload.to_string(),
            namespace: namespace.to_string(),
            command: command.clone(),
            container: container.map(str::to_string),
        });

        if state.unavailable {
            return ExecOutcome::failure("connection refused", 1);
        }
        if !state
            .workloads
            .iter()
            .any(|w| w.name == workload && w.namespace == namespace)
        {
            return ExecOutcome::failure(format!("pods \"{workload}\" not found"), 1);
        }
        state
            .response(workload, &command)
            .unwrap_or_else(|| ExecOutcome::failure(format!("{command}: not scripted"), 1))
    }

    async fn mutate(&self, mutation: &Mutation) -> ExecOutcome {
        let mut state = self.state.lock().unwrap();
        state.mutations.push(mutation.clone());
        if state.failing_mutations.contains(&mutation.name) {
            return ExecOutcome::failure(
                format!("Error from server (NotFound): {} not found", mutation.name),
                1,
            );
        }

        let targets: Vec<usize> = state
            .workloads
            .iter()
            .enumerate()
            .filter(|(_, w)| w.namespace == mutation.namespace)
            .filter(|(_, w)| match mutation.verb {
                MutationVerb::Delete => w.name == mutation.name,
                MutationVerb::RolloutRestart => w.name.starts_with(&mutation.name),
            })
            .map(|(i, _)| i)
            .collect();
        if targets.is_empty() && mutation.verb == MutationVerb::Delete {
            return ExecOutcome::failure(
                format!("Error from server (NotFound): pods \"{}\" not found", mutation.name),
                1,
            );
        }
        // Highest index first so earlier indices stay valid.
        for index in targets.into_iter().rev() {
            state.replace(index);
        }
        ExecOutcome::success(format!("{} {} done", mutation.kind, mutation.name))
    }
}
