//! Builds the passt wiring for one VMI.
//!
//! A [`PasstNetworkConfigurator`] pairs every passt bound interface with its
//! network and records how the domain interface has to look afterwards. It is
//! validated once on construction and never changes after that.

use std::collections::{HashMap, HashSet};

use crate::error::{ConfigError, Result};
use crate::vmi::{Interface, Network, NetworkSource};

pub mod ports;

pub use ports::{PortForward, PortRange, Protocol};

/// Log file the passt backend writes to; the host collects it.
pub const PASST_LOG_FILE: &str = "/var/run/kubevirt/passt.log";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkConfiguratorOptions {
    pub use_virtio_transitional: bool,
    pub istio_proxy_injection_enabled: bool,
}

/// Whether a network can carry a user-space (passt) backed interface.
///
/// passt terminates guest traffic on the pod's own network namespace, so only
/// the pod network qualifies. Secondary networks come with their own data
/// path and are rejected.
pub fn supports_user_space_networking(source: NetworkSource) -> bool {
    matches!(source, NetworkSource::Pod)
}

/// A passt bound interface resolved against its network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasstBinding {
    pub interface_name: String,
    pub network_name: String,
    pub mac_address: Option<String>,
    pub port_forwards: Vec<PortForward>,
}

#[derive(Debug, Clone)]
pub struct PasstNetworkConfigurator {
    bindings: Vec<PasstBinding>,
    options: NetworkConfiguratorOptions,
}

impl PasstNetworkConfigurator {
    pub fn new(
        interfaces: &[Interface],
        networks: &[Network],
        options: NetworkConfiguratorOptions,
    ) -> Result<Self> {
        let mut seen = HashSet::new();
        for iface in interfaces {
            if !seen.insert(iface.name.as_str()) {
                return Err(ConfigError::DuplicateInterface(iface.name.clone()).into());
            }
        }

        let mut networks_by_name = HashMap::new();
        for network in networks {
            if networks_by_name.insert(network.name.as_str(), network).is_some() {
                return Err(ConfigError::DuplicateNetwork(network.name.clone()).into());
            }
        }

        let mut bindings = Vec::new();
        for iface in interfaces.iter().filter(|iface| iface.is_passt_bound()) {
            let network = networks_by_name.get(iface.name.as_str()).ok_or_else(|| {
                ConfigError::MissingNetwork {
                    interface: iface.name.clone(),
                }
            })?;

            let source = network.source();
            if !supports_user_space_networking(source) {
                return Err(ConfigError::IncompatibleNetwork {
                    interface: iface.name.clone(),
                    network: network.name.clone(),
                    source_kind: source.as_str(),
                }
                .into());
            }

            bindings.push(PasstBinding {
                interface_name: iface.name.clone(),
                network_name: network.name.clone(),
                mac_address: iface.mac_address.clone().filter(|mac| !mac.is_empty()),
                port_forwards: ports::plan(
                    &iface.name,
                    &iface.ports,
                    options.istio_proxy_injection_enabled,
                )?,
            });
        }

        Ok(Self { bindings, options })
    }

    pub fn bindings(&self) -> &[PasstBinding] {
        &self.bindings
    }

    pub fn options(&self) -> NetworkConfiguratorOptions {
        self.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::vmi::{MultusNetwork, PluginBinding, PodNetwork, Port};

    fn passt_iface(name: &str) -> Interface {
        Interface {
            name: name.into(),
            binding: Some(PluginBinding {
                name: "passt".into(),
            }),
            ..Default::default()
        }
    }

    fn pod_network(name: &str) -> Network {
        Network {
            name: name.into(),
            pod: Some(PodNetwork::default()),
            multus: None,
        }
    }

    fn multus_network(name: &str) -> Network {
        Network {
            name: name.into(),
            pod: None,
            multus: Some(MultusNetwork {
                network_name: format!("{name}-nad"),
                default: false,
            }),
        }
    }

    fn config_err(result: Result<PasstNetworkConfigurator>) -> ConfigError {
        match result {
            Err(Error::Configuration(err)) => err,
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn resolves_one_binding_per_passt_interface() {
        let bridge = Interface {
            name: "blue".into(),
            ..Default::default()
        };
        let configurator = PasstNetworkConfigurator::new(
            &[passt_iface("default"), bridge],
            &[pod_network("default"), multus_network("blue")],
            NetworkConfiguratorOptions::default(),
        )
        .unwrap();

        assert_eq!(configurator.bindings().len(), 1);
        let binding = &configurator.bindings()[0];
        assert_eq!(binding.interface_name, "default");
        assert_eq!(binding.network_name, "default");
        assert!(binding.port_forwards.is_empty());
    }

    #[test]
    fn no_passt_interfaces_is_valid() {
        let configurator = PasstNetworkConfigurator::new(
            &[],
            &[pod_network("default")],
            NetworkConfiguratorOptions::default(),
        )
        .unwrap();
        assert!(configurator.bindings().is_empty());
    }

    #[test]
    fn missing_network_is_rejected() {
        let err = config_err(PasstNetworkConfigurator::new(
            &[passt_iface("eth0")],
            &[pod_network("net0")],
            NetworkConfiguratorOptions::default(),
        ));
        assert_eq!(
            err,
            ConfigError::MissingNetwork {
                interface: "eth0".into()
            }
        );
    }

    #[test]
    fn duplicate_interface_is_rejected() {
        let err = config_err(PasstNetworkConfigurator::new(
            &[passt_iface("default"), passt_iface("default")],
            &[pod_network("default")],
            NetworkConfiguratorOptions::default(),
        ));
        assert_eq!(err, ConfigError::DuplicateInterface("default".into()));
    }

    #[test]
    fn duplicate_network_is_rejected() {
        let err = config_err(PasstNetworkConfigurator::new(
            &[passt_iface("default")],
            &[pod_network("default"), pod_network("default")],
            NetworkConfiguratorOptions::default(),
        ));
        assert_eq!(err, ConfigError::DuplicateNetwork("default".into()));
    }

    #[test]
    fn secondary_network_is_incompatible() {
        let err = config_err(PasstNetworkConfigurator::new(
            &[passt_iface("blue")],
            &[multus_network("blue")],
            NetworkConfiguratorOptions::default(),
        ));
        assert_eq!(
            err,
            ConfigError::IncompatibleNetwork {
                interface: "blue".into(),
                network: "blue".into(),
                source_kind: "multus",
            }
        );
    }

    #[test]
    fn bad_port_protocol_is_rejected() {
        let mut iface = passt_iface("default");
        iface.ports.push(Port {
            name: "sctp".into(),
            protocol: "SCTP".into(),
            port: 5000,
        });
        let err = config_err(PasstNetworkConfigurator::new(
            &[iface],
            &[pod_network("default")],
            NetworkConfiguratorOptions::default(),
        ));
        assert!(matches!(err, ConfigError::UnsupportedProtocol { port: 5000, .. }));
    }

    #[test]
    fn carries_options_and_mac() {
        let mut iface = passt_iface("default");
        iface.mac_address = Some("02:00:00:00:00:2a".into());
        let options = NetworkConfiguratorOptions {
            use_virtio_transitional: true,
            istio_proxy_injection_enabled: true,
        };
        let configurator =
            PasstNetworkConfigurator::new(&[iface], &[pod_network("default")], options).unwrap();

        assert_eq!(configurator.options(), options);
        let binding = &configurator.bindings()[0];
        assert_eq!(binding.mac_address.as_deref(), Some("02:00:00:00:00:2a"));
        assert_eq!(binding.port_forwards.len(), 1);
        assert_eq!(binding.port_forwards[0].protocol, Protocol::Tcp);
    }
}
