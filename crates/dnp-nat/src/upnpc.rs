//! NAT gateway backed by the miniupnpc command line client.
//!
//! Commands used:
//! - `upnpc -s`: discovery and LAN address
//! - `upnpc -l`: list the forwarding table
//! - `upnpc -e <desc> -a <ip> <port> <port> <proto> <lease>`: add or refresh
//! - `upnpc -d <port> <proto>`: delete

use std::time::Duration;

use async_trait::async_trait;
use dnp_common::{PortMapping, Protocol};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use tokio::process::Command;

use crate::gateway::{GatewayError, GatewayInfo, NatGateway, NatMapping};

static MAPPING_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*\d+\s+(TCP|UDP)\s+(\d+)->([0-9.]+):(\d+)\s+'([^']*)'\s+'([^']*)'\s+(\d+)\s*$")
        .expect("mapping line regex is valid")
});

static LAN_ADDRESS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Local LAN ip address\s*:\s*([0-9.]+)").expect("LAN address regex is valid")
});

static CONTROL_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Found valid IGD\s*:\s*(\S+)").expect("control URL regex is valid")
});

static FAILURE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"failed with code\s*:?\s*(.+)").expect("failure regex is valid"));

const NO_IGD: &str = "No IGD UPnP Device found";

/// [`NatGateway`] that shells out to `upnpc`.
#[derive(Debug)]
pub struct UpnpcGateway {
    binary: String,
    timeout: Duration,
    lan_address: Mutex<Option<String>>,
}

impl UpnpcGateway {
    /// Create a gateway using `binary`, bounding every call by `timeout`.
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
            lan_address: Mutex::new(None),
        }
    }

    /// Run `upnpc` and return its stdout.
    async fn run(&self, args: &[&str]) -> Result<String, GatewayError> {
        let command = format!("{} {}", self.binary, args.join(" "));
        tracing::trace!(%command, "Running upnpc");

        let output = tokio::time::timeout(
            self.timeout,
            Command::new(&self.binary)
                .args(args)
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| GatewayError::Timeout {
            command: command.clone(),
            timeout: self.timeout,
        })?
        .map_err(|source| GatewayError::Command {
            command: command.clone(),
            source,
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);

        if stdout.contains(NO_IGD) || stderr.contains(NO_IGD) {
            return Err(GatewayError::Unreachable(NO_IGD.to_string()));
        }
        // upnpc reports rejected requests on stdout, often with a zero exit code
        if let Some(reason) = parse_failure(&stdout) {
            return Err(GatewayError::Protocol(reason));
        }
        if !output.status.success() {
            let detail = stderr.trim();
            return Err(GatewayError::Protocol(format!(
                "`{command}` exited with {}{}",
                output.status,
                if detail.is_empty() {
                    String::new()
                } else {
                    format!(": {detail}")
                }
            )));
        }

        Ok(stdout)
    }

    async fn lan_address(&self) -> Result<String, GatewayError> {
        let cached = self.lan_address.lock().clone();
        match cached {
            Some(address) => Ok(address),
            None => Ok(self.discover().await?.lan_address),
        }
    }
}

#[async_trait]
impl NatGateway for UpnpcGateway {
    async fn discover(&self) -> Result<GatewayInfo, GatewayError> {
        let stdout = self.run(&["-s"]).await?;
        let info = parse_status(&stdout).ok_or_else(|| {
            GatewayError::Protocol("upnpc did not report a LAN address".to_string())
        })?;

        *self.lan_address.lock() = Some(info.lan_address.clone());
        tracing::debug!(lan_address = %info.lan_address, control_url = ?info.control_url, "Discovered gateway");
        Ok(info)
    }

    async fn list(&self) -> Result<Vec<NatMapping>, GatewayError> {
        let stdout = self.run(&["-l"]).await?;
        Ok(parse_mappings(&stdout))
    }

    async fn add(
        &self,
        mapping: &PortMapping,
        description: &str,
        lease: Duration,
    ) -> Result<(), GatewayError> {
        let lan_address = self.lan_address().await?;
        let port = mapping.port_number.to_string();
        let lease = lease.as_secs().max(1).to_string();

        self.run(&[
            "-e",
            description,
            "-a",
            &lan_address,
            &port,
            &port,
            mapping.protocol.as_str(),
            &lease,
        ])
        .await?;
        Ok(())
    }

    async fn remove(&self, mapping: &PortMapping) -> Result<(), GatewayError> {
        let port = mapping.port_number.to_string();
        self.run(&["-d", &port, mapping.protocol.as_str()]).await?;
        Ok(())
    }
}

/// Extract discovery information from `upnpc -s` output.
fn parse_status(stdout: &str) -> Option<GatewayInfo> {
    let lan_address = LAN_ADDRESS.captures(stdout)?.get(1)?.as_str().to_string();
    let control_url = CONTROL_URL
        .captures(stdout)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());
    Some(GatewayInfo {
        lan_address,
        control_url,
    })
}

/// Extract the forwarding table from `upnpc -l` output.
///
/// Lines that do not describe a mapping are ignored. A lease of `0` means
/// the entry never expires.
fn parse_mappings(stdout: &str) -> Vec<NatMapping> {
    stdout
        .lines()
        .filter_map(|line| {
            let caps = MAPPING_LINE.captures(line)?;
            let external: u16 = caps[2].parse().ok()?;
            let internal_port: u16 = caps[4].parse().ok()?;
            let lease: u64 = caps[7].parse().ok()?;
            Some(NatMapping {
                mapping: PortMapping {
                    protocol: Protocol::parse_lenient(&caps[1]),
                    port_number: external,
                },
                internal_client: caps[3].to_string(),
                internal_port,
                description: caps[5].to_string(),
                lease: (lease > 0).then(|| Duration::from_secs(lease)),
            })
        })
        .collect()
}

fn parse_failure(stdout: &str) -> Option<String> {
    FAILURE
        .captures(stdout)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
}
