use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, Subcommand};
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use env_logger::Env;
use log::{error, info};
use tokio_util::sync::CancellationToken;

use subnet_sentinel::checker::Checker;
use subnet_sentinel::config::{self, Config};
use subnet_sentinel::httpclient::SourceBoundClient;
use subnet_sentinel::mount::{self, MountRequest, SystemRunner};
use subnet_sentinel::report;
use subnet_sentinel::subnets::Subnet;

const CONFIG_ENV: &str = "SUBNET_SENTINEL_CONFIG";

/// Verifies that IPv4 subnets are mounted locally and usable as outbound
/// HTTP traffic sources
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the subnet inventory YAML file (falls back to
    /// $SUBNET_SENTINEL_CONFIG, then config.yaml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Default log level filter (RUST_LOG overrides)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Probe subnets repeatedly at the configured interval (default)
    Run,
    /// Probe subnets once and exit
    Once,
    /// Report subnet mount state without changing anything
    CheckMount,
    /// Converge interface, route and kernel state for every subnet
    Mount,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    let args = Args::parse();

    env_logger::Builder::from_env(Env::default().default_filter_or(args.log_level.as_str())).init();

    let config_path = args.config.clone().unwrap_or_else(|| {
        std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("config.yaml"))
    });
    let config = config::load(&config_path)?;
    let subnets = Subnet::from_configs(&config.subnets).wrap_err("invalid subnet inventory")?;
    info!(
        "Loaded {} subnet(s), {} target(s)",
        subnets.len(),
        config.targets.len()
    );
    let requests = mount::prepare_requests(&config.default_interface, &subnets);

    let cancel = CancellationToken::new();
    spawn_signal_listener(cancel.clone());

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run_loop(&config, subnets, &requests, &cancel).await,
        Command::Once => run_once(&config, subnets, &requests, &cancel).await,
        Command::CheckMount => {
            let runner = SystemRunner::new();
            let statuses = mount::check(&runner, &requests).await;
            report::print_mount_statuses("CHECK", &statuses);
            Ok(())
        }
        Command::Mount => {
            let runner = SystemRunner::new();
            let statuses = mount::ensure_mounted(&runner, &requests).await;
            report::print_mount_statuses("MOUNT", &statuses);
            Ok(())
        }
    }
}

/// Cancel the token on SIGINT or SIGTERM.
fn spawn_signal_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        };
        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(_) => std::future::pending::<()>().await,
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();
        tokio::select! {
            _ = ctrl_c => info!("Received interrupt, shutting down"),
            _ = terminate => info!("Received terminate, shutting down"),
        }
        cancel.cancel();
    });
}

fn build_checker(config: &Config, subnets: Vec<Subnet>) -> Checker {
    let client = Arc::new(SourceBoundClient::new(config.http_timeout));
    Checker::new(config, subnets, client)
}

/// Mount pass run before probing when `autoMountSubnets` is set. Failures
/// are logged per subnet and never stop the probing runs.
async fn auto_mount(requests: &[MountRequest]) {
    info!("Auto-mounting {} subnet(s)", requests.len());
    let runner = SystemRunner::new();
    let statuses = mount::ensure_mounted(&runner, requests).await;
    for status in &statuses {
        for action in &status.actions {
            info!("Mount action subnet={} {}", status.cidr, action);
        }
        for err in &status.errors {
            error!("Mount error subnet={} {}", status.cidr, err);
        }
    }
}

async fn run_once(
    config: &Config,
    subnets: Vec<Subnet>,
    requests: &[MountRequest],
    cancel: &CancellationToken,
) -> Result<()> {
    if config.auto_mount_subnets {
        auto_mount(requests).await;
    }
    let checker = build_checker(config, subnets);
    let run = checker.run(cancel).await.wrap_err("probe run failed")?;
    report::print_run_summary(1, &run.results);
    Ok(())
}

async fn run_loop(
    config: &Config,
    subnets: Vec<Subnet>,
    requests: &[MountRequest],
    cancel: &CancellationToken,
) -> Result<()> {
    if config.auto_mount_subnets {
        auto_mount(requests).await;
    }
    let checker = build_checker(config, subnets);
    let mut run_id: u64 = 1;
    loop {
        let started = Instant::now();
        let run = checker.run(cancel).await.wrap_err("probe run failed")?;
        report::print_run_summary(run_id, &run.results);
        if run.cancelled {
            return Ok(());
        }
        run_id += 1;
        if config.interval.is_zero() {
            if cancel.is_cancelled() {
                return Ok(());
            }
            continue;
        }
        let elapsed = started.elapsed();
        if elapsed < config.interval {
            tokio::select! {
                _ = tokio::time::sleep(config.interval - elapsed) => {}
                _ = cancel.cancelled() => return Ok(()),
            }
        }
    }
}
