//! Package and port data model.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Transport protocol of a port mapping.
///
/// Always rendered uppercase. Parsing is lenient: matching is
/// case-insensitive and anything that is not `udp` is treated as TCP.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Protocol {
    /// TCP protocol.
    #[default]
    Tcp,
    /// UDP protocol.
    Udp,
}

impl Protocol {
    /// Get the canonical uppercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
        }
    }

    /// Parse a protocol name, defaulting to TCP for unknown values.
    #[must_use]
    pub fn parse_lenient(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("udp") {
            Protocol::Udp
        } else {
            Protocol::Tcp
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Protocol {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Protocol {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Option::<String>::deserialize(deserializer)?;
        Ok(value.as_deref().map(Protocol::parse_lenient).unwrap_or_default())
    }
}

/// A port that should be (or was) forwarded through the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
    /// Protocol (TCP or UDP).
    #[serde(default)]
    pub protocol: Protocol,
    /// Host port number (1-65535).
    pub port_number: u16,
}

impl PortMapping {
    /// Create a new TCP mapping.
    #[must_use]
    pub const fn tcp(port_number: u16) -> Self {
        Self {
            protocol: Protocol::Tcp,
            port_number,
        }
    }

    /// Create a new UDP mapping.
    #[must_use]
    pub const fn udp(port_number: u16) -> Self {
        Self {
            protocol: Protocol::Udp,
            port_number,
        }
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.port_number, self.protocol)
    }
}

/// A host-to-container port binding, as configured or reported by Docker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortBinding {
    /// Host port.
    pub host: u16,
    /// Container port.
    pub container: u16,
    /// Protocol (TCP or UDP).
    #[serde(default)]
    pub protocol: Protocol,
}

impl PortBinding {
    /// Create a new binding.
    #[must_use]
    pub const fn new(host: u16, container: u16, protocol: Protocol) -> Self {
        Self {
            host,
            container,
            protocol,
        }
    }

    /// The router-facing side of this binding.
    #[must_use]
    pub const fn to_mapping(&self) -> PortMapping {
        PortMapping {
            protocol: self.protocol,
            port_number: self.host,
        }
    }
}

/// Snapshot of one package container, produced fresh by every inventory query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageContainer {
    /// Unique package identifier (e.g. `admin.dnp.dappnode.eth`).
    pub name: String,
    /// Trusted system package.
    #[serde(default)]
    pub is_core: bool,
    /// Whether the container is currently running.
    #[serde(default)]
    pub running: bool,
    /// Live port bindings. Only populated for running containers.
    #[serde(default)]
    pub ports: Vec<PortBinding>,
    /// Ports previously opened for this package.
    #[serde(default)]
    pub ports_to_close: Vec<PortMapping>,
    /// Installed version, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl PackageContainer {
    /// Create a stopped container with no ports.
    pub fn new(name: impl Into<String>, is_core: bool) -> Self {
        Self {
            name: name.into(),
            is_core,
            running: false,
            ports: Vec::new(),
            ports_to_close: Vec::new(),
            version: None,
        }
    }

    /// Mark the container as running with the given live bindings.
    #[must_use]
    pub fn running_with(mut self, ports: Vec<PortBinding>) -> Self {
        self.running = true;
        self.ports = ports;
        self
    }

    /// Set the installed version.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Whether runtime data can be trusted for this container's ports.
    #[must_use]
    pub fn has_live_ports(&self) -> bool {
        self.running && !self.ports.is_empty()
    }
}
