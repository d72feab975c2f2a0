//! Ports opened when the package inventory cannot be determined.

use dnp_common::PortMapping;

/// Fallback port set keeping the essential services reachable.
///
/// Returned verbatim, never merged with anything else.
pub const DEFAULT_PORTS_TO_OPEN: &[PortMapping] = &[
    // IPsec VPN
    PortMapping::udp(500),
    PortMapping::udp(4500),
    // OpenVPN
    PortMapping::udp(1194),
    // Administration interface
    PortMapping::tcp(8090),
    // IPFS swarm
    PortMapping::tcp(4001),
    PortMapping::udp(4002),
    // Ethereum p2p
    PortMapping::tcp(30303),
    PortMapping::udp(30303),
];
