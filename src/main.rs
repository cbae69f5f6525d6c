//! testbed-validator - validation and resilience runner for the mobile-core testbed.
//!
//! The `run` command gates on the host provisioner, then launches each
//! selected suite as a child process of this same binary (the hidden
//! `suite` command) and prints a pass/fail/skip summary.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use testbed_validator::config::DEFAULT_CONFIG_PATH;
use testbed_validator::orchestrator::{CLUSTER_UNAVAILABLE_EXIT, ProcessLauncher};
use testbed_validator::preflight::{self, Provisioner};
use testbed_validator::{
    KubeCluster, Phase, Result, SuiteContext, SuiteId, SuiteOrchestrator, SuiteRequest,
    TestConfig, expand_phases, suites,
};

/// Validation and resilience runner for the mobile-core testbed.
#[derive(Parser, Debug)]
#[command(name = "testbed-validator", version)]
struct Cli {
    /// Debug-level logging, also passed on to suite processes.
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,
    /// YAML test configuration.
    #[arg(long, global = true, env = "TESTBED_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List suites and phases.
    List,
    /// Run suites, selected directly or by phase (all suites by default).
    Run(RunArgs),
    /// Run one suite in this process.
    #[command(hide = true)]
    Suite {
        #[arg(value_enum)]
        suite: SuiteId,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Run a single suite.
    #[arg(long, value_enum, conflicts_with = "phases")]
    suite: Option<SuiteId>,
    /// Run the suites of one or more phases.
    #[arg(long, value_enum, num_args = 1.., value_delimiter = ',')]
    phases: Vec<Phase>,
    /// Run suites even when disabled in the configuration.
    #[arg(long)]
    force: bool,
    /// Skip the provisioner gate and credentials fetch.
    #[arg(long)]
    skip_preflight: bool,
}

impl RunArgs {
    fn selected(&self) -> Vec<SuiteId> {
        match self.suite {
            Some(suite) => vec![suite],
            None if !self.phases.is_empty() => expand_phases(&self.phases),
            None => SuiteId::ALL.to_vec(),
        }
    }
}

fn init_tracing(verbose: bool, json: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("testbed_validator={level},kube=warn")));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json_logs);

    match execute(cli).await {
        Ok(code) => code,
        Err(e) if e.is_fatal() => {
            error!(error = %e, "Aborted");
            ExitCode::from(CLUSTER_UNAVAILABLE_EXIT)
        }
        Err(e) => {
            error!(error = %e, "Aborted");
            ExitCode::from(2)
        }
    }
}

async fn execute(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::List => {
            list();
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run(args) => run(&cli.config, cli.verbose, cli.json_logs, &args).await,
        Commands::Suite { suite } => run_suite(&cli.config, suite).await,
    }
}

fn list() {
    println!("Suites:");
    for suite in SuiteId::ALL {
        println!("  {:12} {}", suite.as_str(), suite.description());
    }
    println!();
    println!("Phases:");
    for phase in Phase::ALL {
        let suites: Vec<&str> = phase.suites().iter().map(SuiteId::as_str).collect();
        println!(
            "  {:15} {} [{}]",
            phase.as_str(),
            phase.description(),
            suites.join(", ")
        );
    }
}

async fn run(
    config_path: &Path,
    verbose: bool,
    json_logs: bool,
    args: &RunArgs,
) -> Result<ExitCode> {
    let config = TestConfig::load(config_path)?;
    let mut launcher = ProcessLauncher::new()
        .with_config(config_path)
        .verbose(verbose)
        .json_logs(json_logs);

    if args.skip_preflight {
        info!("Skipping preflight");
    } else {
        let kubeconfig = preflight::prepare(&Provisioner::new(), &config).await?;
        launcher = launcher.with_kubeconfig(kubeconfig);
    }

    let requests: Vec<SuiteRequest> = args
        .selected()
        .into_iter()
        .map(|id| SuiteRequest::new(id, args.force))
        .collect();
    let summary = SuiteOrchestrator::new(config, launcher)
        .run_many(&requests)
        .await;

    println!("{summary}");
    if summary.aborted().is_some() {
        return Ok(ExitCode::from(CLUSTER_UNAVAILABLE_EXIT));
    }
    Ok(if summary.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn run_suite(config_path: &Path, suite: SuiteId) -> Result<ExitCode> {
    let config = TestConfig::load(config_path)?;
    let cluster = KubeCluster::connect(&config).await?;
    let ctx = SuiteContext::new(cluster, config);
    let report = suites::run(suite, &ctx).await?;

    for check in &report.checks {
        println!("{} {}: {}", check.mark(), check.name, check.message);
    }
    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
