//! Command line interface.

use std::path::PathBuf;

use clap::Parser;
use dnp_common::DaemonConfig;
use dnp_common::config::LogFormat;

/// dnpd - keeps the appliance's packages, router and alerts in sync
#[derive(Parser, Debug)]
#[command(name = "dnpd")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file
    #[arg(
        long,
        short,
        env = "DNP_CONFIG",
        default_value = "/etc/dnpd/config.toml"
    )]
    pub config: PathBuf,

    /// Data root, overrides `paths.root`
    #[arg(long, env = "DNP_ROOT")]
    pub root: Option<PathBuf>,

    /// Log format (pretty or json), overrides `logging.format`
    #[arg(long, env = "DNP_LOG_FORMAT")]
    pub log_format: Option<LogFormat>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// Docker CLI used to list containers
    #[arg(long, env = "DNP_DOCKER", default_value = "docker")]
    pub docker: String,

    /// Run one NAT reconciliation, print its report and exit
    #[arg(long)]
    pub once: bool,
}

impl Cli {
    /// Apply command line overrides to a loaded configuration.
    pub fn apply(&self, config: &mut DaemonConfig) {
        if let Some(root) = &self.root {
            config.paths.root = Some(root.clone());
        }
        if let Some(format) = self.log_format {
            config.logging.format = format;
        }
    }
}
