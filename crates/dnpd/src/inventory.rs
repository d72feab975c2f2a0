//! Container inventory read from the docker CLI.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use dnp_common::{
    ContainerInventoryProvider, DnpError, DnpResult, PackageContainer, PortBinding, PortMapping,
    Protocol,
};
use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;

/// Container name prefix of core packages.
pub const CORE_PREFIX: &str = "DAppNodeCore-";
/// Container name prefix of user packages.
pub const PACKAGE_PREFIX: &str = "DAppNodePackage-";

const PORTS_TO_CLOSE_LABEL: &str = "dappnode.dnp.portsToClose";

/// `docker ps` row template, one JSON object per container.
const PS_FORMAT: &str = concat!(
    r#"{"name":{{json .Names}},"state":{{json .State}},"ports":{{json .Ports}},"#,
    r#""version":{{json (.Label "dappnode.dnp.version")}},"#,
    r#""portsToClose":{{json (.Label "dappnode.dnp.portsToClose")}}}"#,
);

/// Docker CLI failures.
#[derive(Error, Debug)]
pub enum InventoryError {
    /// The CLI could not be started.
    #[error("Failed to run `{command}`: {source}")]
    Command {
        /// Command line.
        command: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The CLI did not answer in time.
    #[error("`{command}` timed out after {timeout:?}")]
    Timeout {
        /// Command line.
        command: String,
        /// Applied timeout.
        timeout: Duration,
    },

    /// The CLI exited with an error.
    #[error("`{command}` failed: {stderr}")]
    Failed {
        /// Command line.
        command: String,
        /// Captured stderr.
        stderr: String,
    },

    /// A row could not be decoded.
    #[error("Unexpected docker ps output '{line}': {source}")]
    Parse {
        /// Offending line.
        line: String,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
}

impl From<InventoryError> for DnpError {
    fn from(err: InventoryError) -> Self {
        Self::InventoryUnavailable {
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PsRow {
    name: String,
    state: String,
    #[serde(default)]
    ports: String,
    #[serde(default)]
    version: String,
    #[serde(default)]
    ports_to_close: String,
}

/// Lists package containers with `docker ps`.
#[derive(Debug, Clone)]
pub struct DockerCliInventory {
    binary: String,
    timeout: Duration,
}

impl DockerCliInventory {
    /// Use `binary` as the docker CLI, bounding each call by `timeout`.
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    async fn ps(&self) -> Result<String, InventoryError> {
        let args = ["ps", "--all", "--no-trunc", "--format", PS_FORMAT];
        let command = format!("{} ps --all", self.binary);
        tracing::trace!(%command, "Listing containers");

        let output = tokio::time::timeout(
            self.timeout,
            Command::new(&self.binary)
                .args(args)
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| InventoryError::Timeout {
            command: command.clone(),
            timeout: self.timeout,
        })?
        .map_err(|source| InventoryError::Command {
            command: command.clone(),
            source,
        })?;

        if !output.status.success() {
            return Err(InventoryError::Failed {
                command,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl ContainerInventoryProvider for DockerCliInventory {
    async fn list(&self) -> DnpResult<Vec<PackageContainer>> {
        let output = self.ps().await?;
        let containers = parse_ps(&output)?;
        tracing::debug!(count = containers.len(), "Listed package containers");
        Ok(containers)
    }
}

/// Decode `docker ps` output into package containers, core packages first.
///
/// Containers that do not belong to a package are ignored.
///
/// # Errors
///
/// Returns an error if a line is not a row of the expected shape.
pub fn parse_ps(output: &str) -> Result<Vec<PackageContainer>, InventoryError> {
    let mut containers = Vec::new();
    for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let row: PsRow = serde_json::from_str(line).map_err(|source| InventoryError::Parse {
            line: line.to_string(),
            source,
        })?;
        if let Some(container) = to_container(row) {
            containers.push(container);
        }
    }

    let (core, user): (Vec<_>, Vec<_>) = containers.into_iter().partition(|c| c.is_core);
    Ok(core.into_iter().chain(user).collect())
}

fn to_container(row: PsRow) -> Option<PackageContainer> {
    // `docker ps` lists every name of a container, comma separated
    let name = row.name.split(',').next().unwrap_or_default();
    let (package, is_core) = if let Some(package) = name.strip_prefix(CORE_PREFIX) {
        (package, true)
    } else if let Some(package) = name.strip_prefix(PACKAGE_PREFIX) {
        (package, false)
    } else {
        return None;
    };

    let mut container = PackageContainer::new(package, is_core);
    if row.state == "running" {
        container = container.running_with(parse_ports(&row.ports));
    }
    if !row.version.is_empty() {
        container = container.with_version(row.version);
    }
    if !row.ports_to_close.is_empty() {
        match serde_json::from_str::<Vec<PortMapping>>(&row.ports_to_close) {
            Ok(ports) => container.ports_to_close = ports,
            Err(e) => tracing::warn!(
                package = %container.name,
                label = PORTS_TO_CLOSE_LABEL,
                error = %e,
                "Ignoring malformed label"
            ),
        }
    }
    Some(container)
}

/// Decode the `Ports` column of `docker ps`.
///
/// Only published ports are returned. The same binding reported for both
/// IPv4 and IPv6 appears once.
#[must_use]
pub fn parse_ports(column: &str) -> Vec<PortBinding> {
    let mut seen = HashSet::new();
    let mut bindings = Vec::new();
    for entry in column.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        match parse_port_entry(entry) {
            Some(parsed) => {
                for binding in parsed {
                    if seen.insert((binding.host, binding.container, binding.protocol)) {
                        bindings.push(binding);
                    }
                }
            }
            None => tracing::trace!(entry, "Skipping unpublished port"),
        }
    }
    bindings
}

fn parse_port_entry(entry: &str) -> Option<Vec<PortBinding>> {
    let (host, container) = entry.split_once("->")?;
    let (_, host_ports) = host.rsplit_once(':')?;
    let (container_ports, protocol) = match container.split_once('/') {
        Some((ports, protocol)) => (ports, Protocol::parse_lenient(protocol)),
        None => (container, Protocol::Tcp),
    };

    let host_ports = port_range(host_ports)?;
    let container_ports = port_range(container_ports)?;
    if host_ports.len() != container_ports.len() {
        return None;
    }
    Some(
        host_ports
            .into_iter()
            .zip(container_ports)
            .map(|(host, container)| PortBinding::new(host, container, protocol))
            .collect(),
    )
}

fn port_range(s: &str) -> Option<Vec<u16>> {
    let (start, end) = match s.split_once('-') {
        Some((start, end)) => (start.parse::<u16>().ok()?, end.parse::<u16>().ok()?),
        None => {
            let port = s.parse::<u16>().ok()?;
            (port, port)
        }
    };
    if start == 0 || end < start {
        return None;
    }
    Some((start..=end).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ports_column_variants() {
        let bindings = parse_ports(
            "0.0.0.0:8090->80/tcp, :::8090->80/tcp, 0.0.0.0:30303->30303/udp, [::]:30303->30303/udp, 8545/tcp",
        );
        assert_eq!(
            bindings,
            vec![
                PortBinding::new(8090, 80, Protocol::Tcp),
                PortBinding::new(30303, 30303, Protocol::Udp),
            ]
        );
    }

    #[test]
    fn port_ranges_expand() {
        let bindings = parse_ports("0.0.0.0:4000-4001->5000-5001/udp");
        assert_eq!(
            bindings,
            vec![
                PortBinding::new(4000, 5000, Protocol::Udp),
                PortBinding::new(4001, 5001, Protocol::Udp),
            ]
        );
        assert!(parse_ports("0.0.0.0:4000-4002->5000-5001/udp").is_empty());
    }

    #[test]
    fn empty_column_has_no_ports() {
        assert!(parse_ports("").is_empty());
    }

    #[test]
    fn rows_become_packages_core_first() {
        let output = r#"
{"name":"DAppNodePackage-geth.dnp.dappnode.eth","state":"running","ports":"0.0.0.0:30303->30303/tcp","version":"0.1.2","portsToClose":"[{\"portNumber\":30303,\"protocol\":\"UDP\"}]"}
{"name":"portainer","state":"running","ports":"0.0.0.0:9000->9000/tcp","version":"","portsToClose":""}
{"name":"DAppNodeCore-admin.dnp.dappnode.eth","state":"running","ports":"0.0.0.0:8090->80/tcp","version":"0.2.5","portsToClose":""}
{"name":"DAppNodePackage-ipfs.dnp.dappnode.eth","state":"exited","ports":"","version":"","portsToClose":"oops"}
"#;
        let containers = parse_ps(output).unwrap();
        let names: Vec<&str> = containers.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "admin.dnp.dappnode.eth",
                "geth.dnp.dappnode.eth",
                "ipfs.dnp.dappnode.eth"
            ]
        );

        let admin = &containers[0];
        assert!(admin.is_core && admin.running);
        assert_eq!(admin.version.as_deref(), Some("0.2.5"));

        let geth = &containers[1];
        assert_eq!(geth.ports, vec![PortBinding::new(30303, 30303, Protocol::Tcp)]);
        assert_eq!(geth.ports_to_close, vec![PortMapping::udp(30303)]);

        let ipfs = &containers[2];
        assert!(!ipfs.running);
        assert!(ipfs.ports.is_empty());
        assert!(ipfs.ports_to_close.is_empty());
        assert_eq!(ipfs.version, None);
    }

    #[test]
    fn garbage_output_is_an_error() {
        assert!(matches!(
            parse_ps("CONTAINER ID   IMAGE"),
            Err(InventoryError::Parse { .. })
        ));
    }

    #[tokio::test]
    async fn missing_cli_is_inventory_unavailable() {
        let inventory = DockerCliInventory::new("/nonexistent/docker", Duration::from_secs(5));
        let err = inventory.list().await.unwrap_err();
        assert!(matches!(err, DnpError::InventoryUnavailable { .. }));
    }
}
