//! Compose port syntax.
//!
//! Supported forms:
//! - short: `"8080"`, `"8080:80"`, `"4001:4001/udp"`, `"127.0.0.1:80:80"`,
//!   `"4000-4001:4000-4001"`
//! - long: `{ target: 80, published: 8080, protocol: udp }`
//!
//! Entries without a host side (`"80"`, `"127.0.0.1::80"`, long syntax
//! without `published`) publish an ephemeral port and yield no binding.

use std::ops::RangeInclusive;

use dnp_common::{PortBinding, Protocol};
use serde::{Deserialize, Serialize};

use crate::spec::ComposeError;

/// One entry of a service's `ports` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortEntry {
    /// Bare container port.
    Number(u64),
    /// Short syntax.
    Short(String),
    /// Long syntax.
    Long(LongPort),
}

/// Long port syntax.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LongPort {
    /// Container port.
    pub target: u16,
    /// Host port.
    #[serde(default)]
    pub published: Option<Published>,
    /// Protocol.
    #[serde(default)]
    pub protocol: Option<String>,
    /// Host IP to bind to.
    #[serde(default)]
    pub host_ip: Option<String>,
}

/// `published` may be written as a number or a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Published {
    /// `published: 8080`
    Number(u16),
    /// `published: "8080"`
    Text(String),
}

impl PortEntry {
    /// Host bindings declared by this entry.
    ///
    /// # Errors
    ///
    /// Returns [`ComposeError::InvalidPort`] for unparsable ports.
    pub fn bindings(&self) -> Result<Vec<PortBinding>, ComposeError> {
        match self {
            PortEntry::Number(_) => Ok(Vec::new()),
            PortEntry::Short(entry) => parse_short(entry),
            PortEntry::Long(long) => long.bindings(),
        }
    }
}

impl LongPort {
    fn bindings(&self) -> Result<Vec<PortBinding>, ComposeError> {
        let protocol = self
            .protocol
            .as_deref()
            .map(Protocol::parse_lenient)
            .unwrap_or_default();
        let host = match &self.published {
            None => return Ok(Vec::new()),
            Some(Published::Number(port)) => *port,
            Some(Published::Text(text)) => {
                let range = parse_range(text, text)?;
                if range.start() != range.end() {
                    return Err(invalid(text, "ranges are not supported in long syntax"));
                }
                *range.start()
            }
        };
        if host == 0 {
            return Err(invalid(&host.to_string(), "port 0 cannot be forwarded"));
        }
        Ok(vec![PortBinding::new(host, self.target, protocol)])
    }
}

/// Parse a short syntax entry.
///
/// # Errors
///
/// Returns [`ComposeError::InvalidPort`] for unparsable ports or ranges of
/// different lengths.
pub fn parse_short(entry: &str) -> Result<Vec<PortBinding>, ComposeError> {
    let (spec, protocol) = match entry.rsplit_once('/') {
        Some((spec, protocol)) => (spec, Protocol::parse_lenient(protocol)),
        None => (entry, Protocol::Tcp),
    };

    // [ip:]host:container, with an optional bracketed IPv6 address
    let mut parts = spec.trim().rsplitn(3, ':');
    let container = parts.next().unwrap_or_default();
    let host = match parts.next() {
        None | Some("") => return Ok(Vec::new()),
        Some(host) => host,
    };

    let hosts = parse_range(host, entry)?;
    let containers = parse_range(container, entry)?;
    if hosts.clone().count() != containers.clone().count() {
        return Err(invalid(entry, "host and container ranges differ in length"));
    }

    Ok(hosts
        .zip(containers)
        .map(|(host, container)| PortBinding::new(host, container, protocol))
        .collect())
}

fn parse_range(value: &str, entry: &str) -> Result<RangeInclusive<u16>, ComposeError> {
    let parse = |s: &str| -> Result<u16, ComposeError> {
        let port: u16 = s
            .trim()
            .parse()
            .map_err(|_| invalid(entry, &format!("{s:?} is not a port number")))?;
        if port == 0 {
            return Err(invalid(entry, "port 0 cannot be forwarded"));
        }
        Ok(port)
    };

    match value.split_once('-') {
        Some((start, end)) => {
            let (start, end) = (parse(start)?, parse(end)?);
            if start > end {
                return Err(invalid(entry, "range start is after its end"));
            }
            Ok(start..=end)
        }
        None => {
            let port = parse(value)?;
            Ok(port..=port)
        }
    }
}

fn invalid(entry: &str, reason: &str) -> ComposeError {
    ComposeError::InvalidPort {
        entry: entry.to_string(),
        reason: reason.to_string(),
    }
}
