//! Port forwarding plan for a passt backed interface.

use std::fmt;

use crate::error::ConfigError;
use crate::vmi::Port;

/// Ports the injected proxy sidecar listens on inside the pod.
///
/// They are excluded from forwarding so the sidecar can bind them while every
/// other port keeps reaching the guest.
pub const ISTIO_RESERVED_PORTS: [u16; 10] = [
    15000, // envoy admin
    15001, // outbound
    15004, // debug
    15006, // inbound
    15008, // HBONE tunnel
    15009, // HBONE secure network
    15020, // merged prometheus telemetry
    15021, // health check
    15053, // DNS
    15090, // envoy prometheus telemetry
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    /// Parses a declared port protocol. Empty means TCP.
    pub fn parse(value: &str) -> Option<Self> {
        if value.is_empty() || value.eq_ignore_ascii_case("tcp") {
            Some(Self::Tcp)
        } else if value.eq_ignore_ascii_case("udp") {
            Some(Self::Udp)
        } else {
            None
        }
    }

    /// Value of the `proto` attribute on `<portForward>`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `<range>` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortRange {
    pub start: u16,
    pub exclude: bool,
}

impl PortRange {
    pub fn forward(start: u16) -> Self {
        Self {
            start,
            exclude: false,
        }
    }

    pub fn exclude(start: u16) -> Self {
        Self {
            start,
            exclude: true,
        }
    }
}

/// All ranges for one protocol, rendered as a single `<portForward>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortForward {
    pub protocol: Protocol,
    pub ranges: Vec<PortRange>,
}

/// Builds the forwarding entries for an interface. TCP comes before UDP, and
/// within TCP the sidecar exclusions come before the declared ports. A declared
/// TCP port the sidecar reserves cannot be forwarded to the guest while
/// injection is enabled.
pub fn plan(
    interface: &str,
    ports: &[Port],
    istio_proxy_injection_enabled: bool,
) -> Result<Vec<PortForward>, ConfigError> {
    let mut tcp = Vec::new();
    let mut udp = Vec::new();

    if istio_proxy_injection_enabled {
        tcp.extend(ISTIO_RESERVED_PORTS.iter().copied().map(PortRange::exclude));
    }

    for port in ports {
        let number = match u16::try_from(port.port) {
            Ok(number) if number != 0 => number,
            _ => {
                return Err(ConfigError::InvalidPort {
                    interface: interface.to_string(),
                    port: port.port,
                })
            }
        };
        let ranges = match Protocol::parse(&port.protocol) {
            Some(Protocol::Tcp) => {
                if istio_proxy_injection_enabled && ISTIO_RESERVED_PORTS.contains(&number) {
                    return Err(ConfigError::ReservedPort {
                        interface: interface.to_string(),
                        port: number,
                    });
                }
                &mut tcp
            }
            Some(Protocol::Udp) => &mut udp,
            None => {
                return Err(ConfigError::UnsupportedProtocol {
                    interface: interface.to_string(),
                    port: port.port,
                    protocol: port.protocol.clone(),
                })
            }
        };
        let range = PortRange::forward(number);
        if !ranges.contains(&range) {
            ranges.push(range);
        }
    }

    let mut forwards = Vec::new();
    if !tcp.is_empty() {
        forwards.push(PortForward {
            protocol: Protocol::Tcp,
            ranges: tcp,
        });
    }
    if !udp.is_empty() {
        forwards.push(PortForward {
            protocol: Protocol::Udp,
            ranges: udp,
        });
    }
    Ok(forwards)
}
