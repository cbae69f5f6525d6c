//! Launching suites as isolated child processes.

use std::ffi::OsString;
use std::path::PathBuf;

use tokio::process::Command;
use tracing::debug;

use super::{SuiteId, SuiteLauncher};
use crate::config::KUBECONFIG_ENV;
use crate::error::{Error, Result};

/// Re-invokes a binary as `<program> [--config P] [-v] [--json-logs] suite <id>`.
///
/// With no explicit program, the currently running executable is used, so
/// every suite runs in a fresh process of the same build.
#[derive(Debug, Clone, Default)]
pub struct ProcessLauncher {
    program: Option<PathBuf>,
    config_path: Option<PathBuf>,
    /// Exported to the child as `KUBECONFIG`
    kubeconfig: Option<PathBuf>,
    verbose: bool,
    json_logs: bool,
}

impl ProcessLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = Some(program.into());
        self
    }

    pub fn with_config(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn with_kubeconfig(mut self, path: impl Into<PathBuf>) -> Self {
        self.kubeconfig = Some(path.into());
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn json_logs(mut self, json_logs: bool) -> Self {
        self.json_logs = json_logs;
        self
    }

    /// Arguments passed to the child process.
    pub fn args(&self, suite: SuiteId) -> Vec<OsString> {
        let mut args = Vec::new();
        if let Some(path) = &self.config_path {
            args.push(OsString::from("--config"));
            args.push(path.clone().into_os_string());
        }
        if self.verbose {
            args.push(OsString::from("-v"));
        }
        if self.json_logs {
            args.push(OsString::from("--json-logs"));
        }
        args.push(OsString::from("suite"));
        args.push(OsString::from(suite.as_str()));
        args
    }

    fn program(&self) -> Result<PathBuf> {
        match &self.program {
            Some(program) => Ok(program.clone()),
            None => std::env::current_exe().map_err(|e| Error::Launch {
                suite: String::new(),
                reason: format!("cannot locate current executable: {e}"),
            }),
        }
    }
}

impl SuiteLauncher for ProcessLauncher {
    async fn launch(&self, suite: SuiteId) -> Result<i32> {
        let program = self.program().map_err(|e| match e {
            Error::Launch { reason, .. } => Error::Launch {
                suite: suite.to_string(),
                reason,
            },
            other => other,
        })?;
        let args = self.args(suite);
        debug!(program = %program.display(), ?args, "Launching suite process");

        // stdio is inherited so suite output streams straight to the console
        let mut command = Command::new(&program);
        command.args(&args);
        if let Some(kubeconfig) = &self.kubeconfig {
            command.env(KUBECONFIG_ENV, kubeconfig);
        }
        let status = command
            .status()
            .await
            .map_err(|e| Error::Launch {
                suite: suite.to_string(),
                reason: format!("{}: {e}", program.display()),
            })?;

        // Killed by a signal: no code
        Ok(status.code().unwrap_or(-1))
    }
}
