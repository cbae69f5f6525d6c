//! Host-provisioner gate and credential fetch.
//!
//! The testbed runs on Vagrant machines. Before any suite runs, the three
//! machines must be up, and a credentials file must be available locally.
//! When it is not, it is read from the control-plane machine over
//! `vagrant ssh` and cached.
//!
//! The same driver runs shell commands on the machines themselves for
//! checks that look at host networking rather than at workloads.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::cluster::ExecOutcome;
use crate::config::{DEFAULT_KUBECONFIG_PATH, TestConfig};
use crate::error::{Error, Result};

/// Machines that must be running.
pub const REQUIRED_MACHINES: &[&str] = &["master", "worker", "edge"];

/// Machine the credentials file is fetched from.
pub const CONTROL_PLANE_MACHINE: &str = "master";

const PROVISIONER_TIMEOUT: Duration = Duration::from_secs(30);
const FETCH_TIMEOUT: Duration = Duration::from_secs(60);
const HOST_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Parse `vagrant status` output into machine name -> state.
///
/// Machine lines look like `master    running (virtualbox)`; the state is
/// everything between the name and the trailing provider in parentheses.
pub fn parse_machine_states(output: &str) -> BTreeMap<String, String> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim_end();
            if !line.ends_with(')') || line.starts_with(char::is_whitespace) {
                return None;
            }
            let provider_start = line.rfind('(')?;
            let mut fields = line[..provider_start].split_whitespace();
            let name = fields.next()?;
            let state = fields.collect::<Vec<_>>().join(" ");
            if state.is_empty() {
                return None;
            }
            Some((name.to_string(), state))
        })
        .collect()
}

/// Required machines that are not running, in [`REQUIRED_MACHINES`] order.
pub fn machines_not_running(states: &BTreeMap<String, String>) -> Vec<&'static str> {
    REQUIRED_MACHINES
        .iter()
        .copied()
        .filter(|m| states.get(*m).map(String::as_str) != Some("running"))
        .collect()
}

/// Driver for the `vagrant` command.
#[derive(Debug, Clone)]
pub struct Provisioner {
    binary: PathBuf,
    project_dir: Option<PathBuf>,
}

impl Default for Provisioner {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("vagrant"),
            project_dir: None,
        }
    }
}

impl Provisioner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Directory holding the Vagrantfile.
    pub fn with_project_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.project_dir = Some(dir.into());
        self
    }

    async fn output(&self, args: &[&str], limit: Duration) -> Result<std::process::Output> {
        let mut command = Command::new(&self.binary);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.project_dir {
            command.current_dir(dir);
        }

        let child = command.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::Provisioner("vagrant command not found".to_string())
            } else {
                Error::Provisioner(format!("cannot run vagrant: {e}"))
            }
        })?;

        let output = timeout(limit, child.wait_with_output())
            .await
            .map_err(|_| Error::Provisioner(format!("vagrant {} timed out", args.join(" "))))??;
        Ok(output)
    }

    async fn run(&self, args: &[&str], limit: Duration) -> Result<String> {
        let output = self.output(args, limit).await?;
        if !output.status.success() {
            return Err(Error::Provisioner(format!(
                "vagrant {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Require every machine in [`REQUIRED_MACHINES`] to be running.
    pub async fn check_machines(&self) -> Result<()> {
        let output = self.run(&["status"], PROVISIONER_TIMEOUT).await?;
        let states = parse_machine_states(&output);
        let missing = machines_not_running(&states);
        if !missing.is_empty() {
            return Err(Error::Provisioner(format!(
                "machines not running: {} (start the testbed with `vagrant up`)",
                missing.join(", ")
            )));
        }
        info!("All required machines are running");
        Ok(())
    }

    /// Read the credentials file from the control-plane machine.
    pub async fn fetch_credentials(&self) -> Result<String> {
        let remote = format!("cat {DEFAULT_KUBECONFIG_PATH}");
        let contents = self
            .run(&["ssh", CONTROL_PLANE_MACHINE, "-c", &remote], FETCH_TIMEOUT)
            .await?;
        if contents.trim().is_empty() {
            return Err(Error::Provisioner(
                "credentials file on the control-plane machine is empty".to_string(),
            ));
        }
        Ok(contents)
    }
}

/// Runs shell commands on testbed machines.
pub trait HostShell {
    /// A command that cannot be run at all is a failed outcome, not an error.
    fn run_on(&self, machine: &str, command: &str) -> impl Future<Output = ExecOutcome> + Send;
}

impl HostShell for Provisioner {
    async fn run_on(&self, machine: &str, command: &str) -> ExecOutcome {
        match self
            .output(&["ssh", machine, "-c", command], HOST_COMMAND_TIMEOUT)
            .await
        {
            Ok(output) => ExecOutcome {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                exit_status: output.status.code().unwrap_or(-1),
            },
            Err(e) => {
                warn!(machine, command, error = %e, "Host command could not be run");
                ExecOutcome::failure(e.to_string(), -1)
            }
        }
    }
}

/// Run the machine gate and make sure a local credentials file exists.
///
/// Returns the path child suite processes should use as `KUBECONFIG`.
pub async fn prepare(provisioner: &Provisioner, config: &TestConfig) -> Result<PathBuf> {
    provisioner.check_machines().await?;

    let local = config.local_kubeconfig().to_path_buf();
    if local.exists() {
        info!(path = %local.display(), "Using cached credentials file");
        return Ok(local);
    }

    info!(machine = CONTROL_PLANE_MACHINE, "Fetching credentials file");
    let contents = provisioner.fetch_credentials().await?;
    write_credentials(&local, &contents)?;
    info!(path = %local.display(), "Credentials file cached");
    Ok(local)
}

fn write_credentials(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents).inspect_err(|e| {
        warn!(path = %path.display(), error = %e, "Cannot write credentials file");
    })?;
    Ok(())
}
