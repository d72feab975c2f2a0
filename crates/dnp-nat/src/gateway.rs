//! Router protocol boundary.

use std::time::Duration;

use async_trait::async_trait;
use dnp_common::{DnpError, PortMapping};

/// Errors returned by a [`NatGateway`].
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// No gateway answered discovery.
    #[error("No UPnP gateway reachable: {0}")]
    Unreachable(String),
    /// The gateway answered but rejected the request.
    #[error("Gateway rejected the request: {0}")]
    Protocol(String),
    /// The client tool could not be run.
    #[error("Failed to run `{command}`: {source}")]
    Command {
        /// Command line.
        command: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The client tool did not finish in time.
    #[error("`{command}` timed out after {timeout:?}")]
    Timeout {
        /// Command line.
        command: String,
        /// Configured bound.
        timeout: Duration,
    },
}

impl From<GatewayError> for DnpError {
    fn from(err: GatewayError) -> Self {
        DnpError::Gateway {
            message: err.to_string(),
        }
    }
}

/// Result of gateway discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayInfo {
    /// Address of this host on the gateway's LAN.
    pub lan_address: String,
    /// Control URL of the gateway, when reported.
    pub control_url: Option<String>,
}

/// A forwarding entry as reported by the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatMapping {
    /// External port and protocol.
    pub mapping: PortMapping,
    /// LAN host the port forwards to.
    pub internal_client: String,
    /// LAN port the port forwards to.
    pub internal_port: u16,
    /// Free-form description set by whoever added the entry.
    pub description: String,
    /// Remaining lease. `None` for entries that never expire.
    pub lease: Option<Duration>,
}

/// Port forwarding capability of the local router.
///
/// Implementations are responsible for bounding the latency of each call.
#[async_trait]
pub trait NatGateway: Send + Sync {
    /// Locate the gateway.
    async fn discover(&self) -> Result<GatewayInfo, GatewayError>;

    /// Current forwarding table.
    async fn list(&self) -> Result<Vec<NatMapping>, GatewayError>;

    /// Forward `mapping` to this host, or refresh the lease of an existing entry.
    async fn add(
        &self,
        mapping: &PortMapping,
        description: &str,
        lease: Duration,
    ) -> Result<(), GatewayError>;

    /// Delete the forwarding entry for `mapping`.
    async fn remove(&self, mapping: &PortMapping) -> Result<(), GatewayError>;
}
