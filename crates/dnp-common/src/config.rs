//! Daemon configuration.
//!
//! Loaded from a TOML file. Every field has a default, so a missing file or
//! a partial one is always valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DnpError, DnpResult};
use crate::paths::DnpPaths;

/// Top-level daemon configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Filesystem locations.
    pub paths: PathsConfig,
    /// NAT renewal settings.
    pub nat: NatConfig,
    /// Periodic watcher settings.
    pub watchers: WatchersConfig,
    /// Disk usage thresholds.
    pub disk: DiskConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Blockchain nodes to report sync status for.
    pub chains: Vec<ChainConfig>,
}

impl DaemonConfig {
    /// Parse from TOML.
    ///
    /// # Errors
    ///
    /// Returns [`DnpError::Config`] on malformed input.
    pub fn from_toml(toml: &str) -> DnpResult<Self> {
        let config: Self = toml::from_str(toml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file. A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> DnpResult<Self> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Reject settings that would make the watchers misbehave.
    fn validate(&self) -> DnpResult<()> {
        let intervals = [
            ("nat.interval_secs", self.nat.interval_secs),
            ("watchers.auto_update_secs", self.watchers.auto_update_secs),
            ("watchers.chains_secs", self.watchers.chains_secs),
            ("watchers.disk_usage_secs", self.watchers.disk_usage_secs),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, secs)| *secs == 0) {
            return Err(DnpError::Config {
                message: format!("{name} must be greater than zero"),
            });
        }
        if self.nat.renew_before_secs >= self.nat.lease_secs {
            return Err(DnpError::Config {
                message: "nat.renew_before_secs must be shorter than nat.lease_secs".to_string(),
            });
        }
        if self.disk.critical_free_percent > self.disk.warning_free_percent {
            return Err(DnpError::Config {
                message: "disk.critical_free_percent must not exceed disk.warning_free_percent"
                    .to_string(),
            });
        }
        Ok(())
    }

    /// Resolved filesystem paths.
    #[must_use]
    pub fn dnp_paths(&self) -> DnpPaths {
        self.paths
            .root
            .as_ref()
            .map_or_else(DnpPaths::new, |root| DnpPaths::with_root(root.clone()))
    }
}

/// Filesystem locations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Data root. Defaults to `$DNP_ROOT` or `/usr/src/dappnode`.
    pub root: Option<PathBuf>,
}

/// NAT renewal settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NatConfig {
    /// Whether the NAT renewal watcher runs at all.
    pub enabled: bool,
    /// Seconds between reconciliation cycles.
    pub interval_secs: u64,
    /// Delay before the first cycle.
    pub initial_delay_secs: u64,
    /// Lease requested for each mapping.
    pub lease_secs: u64,
    /// Renew a mapping once its remaining lease drops to this.
    pub renew_before_secs: u64,
    /// Description tagging the mappings owned by this daemon.
    pub description: String,
    /// Path or name of the miniupnpc binary.
    pub upnpc_binary: String,
    /// Upper bound for a single `upnpc` invocation.
    pub command_timeout_secs: u64,
}

impl Default for NatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60 * 60,
            initial_delay_secs: 10,
            lease_secs: 2 * 60 * 60,
            renew_before_secs: 60 * 60 + 10 * 60,
            description: "DAppNode".to_string(),
            upnpc_binary: "upnpc".to_string(),
            command_timeout_secs: 30,
        }
    }
}

impl NatConfig {
    /// Cycle interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Delay before the first cycle.
    #[must_use]
    pub const fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }

    /// Requested lease.
    #[must_use]
    pub const fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }

    /// Renewal threshold.
    #[must_use]
    pub const fn renew_before(&self) -> Duration {
        Duration::from_secs(self.renew_before_secs)
    }

    /// Timeout of a single gateway command.
    #[must_use]
    pub const fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// Periodic watcher intervals, in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchersConfig {
    /// Auto-update check interval.
    pub auto_update_secs: u64,
    /// Chain sync check interval.
    pub chains_secs: u64,
    /// Disk usage check interval.
    pub disk_usage_secs: u64,
}

impl Default for WatchersConfig {
    fn default() -> Self {
        Self {
            auto_update_secs: 5 * 60,
            chains_secs: 5,
            disk_usage_secs: 60,
        }
    }
}

impl WatchersConfig {
    /// Auto-update check interval.
    #[must_use]
    pub const fn auto_update(&self) -> Duration {
        Duration::from_secs(self.auto_update_secs)
    }

    /// Chain sync check interval.
    #[must_use]
    pub const fn chains(&self) -> Duration {
        Duration::from_secs(self.chains_secs)
    }

    /// Disk usage check interval.
    #[must_use]
    pub const fn disk_usage(&self) -> Duration {
        Duration::from_secs(self.disk_usage_secs)
    }
}

/// Disk usage thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskConfig {
    /// Mount point to monitor.
    pub mount_point: PathBuf,
    /// Warn when free space drops below this percentage.
    pub warning_free_percent: f64,
    /// Raise a critical alert below this percentage.
    pub critical_free_percent: f64,
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            mount_point: PathBuf::from("/"),
            warning_free_percent: 10.0,
            critical_free_percent: 5.0,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = DnpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(DnpError::Config {
                message: format!("Unknown log format: {other}"),
            }),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Output format.
    pub format: LogFormat,
    /// Filter directives used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            filter: "dnpd=info,dnp_nat=info,dnp_watch=info,dnp_compose=info,dnp_common=info"
                .to_string(),
        }
    }
}

/// A blockchain node whose sync status is reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Human readable chain name.
    pub name: String,
    /// Package running the node.
    pub dnp_name: String,
    /// JSON-RPC endpoint.
    pub rpc_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_is_default() {
        let config = DaemonConfig::from_toml("").unwrap();
        assert_eq!(config, DaemonConfig::default());
        assert_eq!(config.nat.description, "DAppNode");
        assert_eq!(config.nat.interval(), Duration::from_secs(3600));
    }

    #[test]
    fn partial_sections() {
        let config = DaemonConfig::from_toml(
            r#"
[paths]
root = "/srv/dnp"

[nat]
interval_secs = 600
lease_secs = 1200
renew_before_secs = 700

[logging]
format = "json"

[[chains]]
name = "Ethereum"
dnp_name = "geth.dnp.dappnode.eth"
rpc_url = "http://geth.dappnode:8545"
"#,
        )
        .unwrap();

        assert_eq!(config.nat.interval_secs, 600);
        assert_eq!(config.nat.description, "DAppNode");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.chains.len(), 1);
        assert_eq!(config.dnp_paths(), DnpPaths::with_root("/srv/dnp"));
    }

    #[test]
    fn renewal_must_fit_in_lease() {
        let err = DaemonConfig::from_toml("[nat]\nlease_secs = 60\nrenew_before_secs = 60\n")
            .unwrap_err();
        assert!(matches!(err, DnpError::Config { .. }));
    }

    #[test]
    fn zero_interval_rejected() {
        let err = DaemonConfig::from_toml("[watchers]\nchains_secs = 0\n").unwrap_err();
        assert!(err.to_string().contains("watchers.chains_secs"));
    }

    #[test]
    fn missing_file_uses_defaults() {
        let temp = tempfile::tempdir().unwrap();
        let config = DaemonConfig::load(&temp.path().join("dnpd.toml")).unwrap();
        assert_eq!(config, DaemonConfig::default());
    }

    #[test]
    fn log_format_from_str() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
