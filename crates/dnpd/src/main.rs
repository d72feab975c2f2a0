//! dnpd entry point.
//!
//! Loads the configuration, wires the host providers into the daemon and
//! runs the watchers until Ctrl-C. `--once` runs a single NAT cycle and
//! prints its report instead.

mod cli;
mod daemon;
mod inventory;
mod registry;
mod rpc;
mod sinks;
mod static_ip;

use clap::Parser;
use color_eyre::eyre::{Result, WrapErr};
use dnp_common::DaemonConfig;
use dnp_common::config::{LogFormat, LoggingConfig};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::cli::Cli;
use crate::daemon::{Daemon, Providers};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    let mut config = DaemonConfig::load(&cli.config)
        .wrap_err_with(|| format!("Failed to load {}", cli.config.display()))?;
    cli.apply(&mut config);

    init_tracing(&config.logging, cli.debug)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "Starting dnpd"
    );

    let paths = config.dnp_paths();
    paths
        .create_dirs()
        .wrap_err_with(|| format!("Failed to create {}", paths.repo().display()))?;

    let providers = Providers::system(&config, &paths, &cli.docker)?;
    let daemon = Daemon::build(config, &paths, providers);

    if cli.once {
        let report = daemon.reconcile_once().await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    daemon.run().await
}

fn init_tracing(logging: &LoggingConfig, debug: bool) -> Result<()> {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&logging.filter))?
    };

    let registry = tracing_subscriber::registry().with(filter);
    match logging.format {
        LogFormat::Pretty => registry.with(fmt::layer().with_target(true)).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }
    Ok(())
}
