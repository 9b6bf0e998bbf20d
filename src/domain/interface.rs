//! Rewrites host generated `<interface>` elements to use the passt backend.

use crate::domain::{DomainDocument, Element};
use crate::error::{Error, Result};
use crate::passt::{PasstBinding, PasstNetworkConfigurator, PortForward, PortRange, PASST_LOG_FILE};

/// Prefix the host puts in front of user supplied interface names in `<alias>`.
pub const USER_ALIAS_PREFIX: &str = "ua-";

pub const TRANSITIONAL_MODEL: &str = "virtio-transitional";

const NETWORK_BACKEND_ELEMENTS: [&str; 3] = ["source", "target", "backend"];

/// Produces a new domain description with every passt binding of
/// `configurator` applied. Nothing is returned unless all of them succeed.
pub fn apply(raw_domain_xml: &[u8], configurator: &PasstNetworkConfigurator) -> Result<Vec<u8>> {
    let mut document = DomainDocument::parse(raw_domain_xml)?;
    let options = configurator.options();

    for binding in configurator.bindings() {
        let iface = find_interface_mut(&mut document, &binding.interface_name).ok_or_else(|| {
            Error::ElementNotFound {
                interface: binding.interface_name.clone(),
            }
        })?;

        use_passt_backend(iface);
        ensure_mac(iface, binding);
        if options.use_virtio_transitional {
            use_transitional_model(iface);
        }
        append_port_forwards(iface, &binding.port_forwards);
    }

    document.to_bytes()
}

/// Finds `<devices>/<interface>` whose alias is `name` or `ua-<name>`.
pub fn find_interface_mut<'a>(
    document: &'a mut DomainDocument,
    name: &str,
) -> Option<&'a mut Element> {
    document
        .root_mut()
        .child_mut("devices")?
        .children_named_mut("interface")
        .find(|iface| alias_matches(iface, name))
}

fn alias_matches(iface: &Element, name: &str) -> bool {
    iface
        .child("alias")
        .and_then(|alias| alias.attribute("name"))
        .map(|alias| alias.strip_prefix(USER_ALIAS_PREFIX).unwrap_or(alias) == name)
        .unwrap_or(false)
}

fn use_passt_backend(iface: &mut Element) {
    iface.set_attribute("type", "user");
    let backend = Element::new("backend")
        .with_attribute("type", "passt")
        .with_attribute("logFile", PASST_LOG_FILE);
    iface.replace_children(
        |child| NETWORK_BACKEND_ELEMENTS.contains(&child.name.as_str()),
        backend,
    );
}

fn ensure_mac(iface: &mut Element, binding: &PasstBinding) {
    if iface.child("mac").is_some() {
        return;
    }
    if let Some(mac) = &binding.mac_address {
        iface.push_child(Element::new("mac").with_attribute("address", mac.as_str()));
    }
}

fn is_virtio_model(model: Option<&str>) -> bool {
    matches!(
        model,
        None | Some("virtio") | Some("virtio-non-transitional") | Some(TRANSITIONAL_MODEL)
    )
}

fn use_transitional_model(iface: &mut Element) {
    if let Some(model) = iface.child_mut("model") {
        if is_virtio_model(model.attribute("type")) {
            model.set_attribute("type", TRANSITIONAL_MODEL);
        }
        return;
    }
    iface.push_child(Element::new("model").with_attribute("type", TRANSITIONAL_MODEL));
}

fn append_port_forwards(iface: &mut Element, forwards: &[PortForward]) {
    for forward in forwards {
        let proto = forward.protocol.as_str();
        let missing: Vec<PortRange> = forward
            .ranges
            .iter()
            .filter(|range| !has_range(iface, proto, range))
            .copied()
            .collect();
        if missing.is_empty() {
            continue;
        }

        if let Some(existing) = iface
            .children_named_mut("portForward")
            .find(|port_forward| is_plain_port_forward(port_forward, proto))
        {
            for range in &missing {
                existing.push_child(range_element(range));
            }
            continue;
        }

        let mut port_forward = Element::new("portForward").with_attribute("proto", proto);
        for range in &missing {
            port_forward.push_child(range_element(range));
        }
        iface.push_child(port_forward);
    }
}

/// A `<portForward>` for `proto` that is not bound to a specific host address or device.
fn is_plain_port_forward(port_forward: &Element, proto: &str) -> bool {
    port_forward.attribute("proto") == Some(proto)
        && port_forward.attribute("address").is_none()
        && port_forward.attribute("dev").is_none()
}

fn has_range(iface: &Element, proto: &str, wanted: &PortRange) -> bool {
    iface
        .children_named("portForward")
        .filter(|port_forward| port_forward.attribute("proto") == Some(proto))
        .flat_map(|port_forward| port_forward.children_named("range"))
        .any(|range| {
            let start = range.attribute("start").and_then(|s| s.parse::<u16>().ok());
            let single = range
                .attribute("end")
                .map_or(true, |end| end.parse::<u16>().ok() == start);
            let exclude = range.attribute("exclude") == Some("yes");
            start == Some(wanted.start) && single && exclude == wanted.exclude
        })
}

fn range_element(range: &PortRange) -> Element {
    let element = Element::new("range").with_attribute("start", range.start.to_string());
    if range.exclude {
        element.with_attribute("exclude", "yes")
    } else {
        element
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::passt::NetworkConfiguratorOptions;
    use crate::vmi::{Interface, Network, PluginBinding, PodNetwork, Port};

    fn configurator(
        ports: Vec<Port>,
        mac: Option<&str>,
        options: NetworkConfiguratorOptions,
    ) -> PasstNetworkConfigurator {
        let iface = Interface {
            name: "default".into(),
            binding: Some(PluginBinding {
                name: "passt".into(),
            }),
            mac_address: mac.map(str::to_string),
            ports,
            ..Default::default()
        };
        let network = Network {
            name: "default".into(),
            pod: Some(PodNetwork::default()),
            multus: None,
        };
        PasstNetworkConfigurator::new(&[iface], &[network], options).unwrap()
    }

    fn apply_str(xml: &str, configurator: &PasstNetworkConfigurator) -> Result<String> {
        apply(xml.as_bytes(), configurator).map(|bytes| String::from_utf8(bytes).unwrap())
    }

    const ETHERNET_IFACE: &str = "<domain><devices><interface type=\"ethernet\"><source dev=\"tap0\"/><target dev=\"tap0\" managed=\"no\"/><model type=\"virtio-non-transitional\"/><mac address=\"02:00:00:00:00:01\"/><alias name=\"ua-default\"/></interface></devices></domain>";

    #[test]
    fn swaps_backend_and_keeps_identity() {
        let out = apply_str(
            ETHERNET_IFACE,
            &configurator(vec![], None, NetworkConfiguratorOptions::default()),
        )
        .unwrap();
        assert_eq!(
            out,
            "<domain><devices><interface type=\"user\"><backend type=\"passt\" logFile=\"/var/run/kubevirt/passt.log\"/><model type=\"virtio-non-transitional\"/><mac address=\"02:00:00:00:00:01\"/><alias name=\"ua-default\"/></interface></devices></domain>"
        );
    }

    #[test]
    fn matches_alias_without_prefix() {
        let xml = "<domain><devices><interface type=\"ethernet\"><alias name=\"default\"/></interface></devices></domain>";
        let out = apply_str(
            xml,
            &configurator(vec![], None, NetworkConfiguratorOptions::default()),
        )
        .unwrap();
        assert!(out.contains("<backend type=\"passt\""));
    }

    #[test]
    fn missing_interface_is_element_not_found() {
        let xml = "<domain><devices><interface type=\"ethernet\"><alias name=\"ua-other\"/></interface></devices></domain>";
        let err = apply_str(
            xml,
            &configurator(vec![], None, NetworkConfiguratorOptions::default()),
        )
        .unwrap_err();
        assert!(matches!(err, Error::ElementNotFound { interface } if interface == "default"));

        let err = apply_str(
            "<domain/>",
            &configurator(vec![], None, NetworkConfiguratorOptions::default()),
        )
        .unwrap_err();
        assert!(matches!(err, Error::ElementNotFound { .. }));
    }

    #[test]
    fn adds_declared_mac_only_when_absent() {
        let xml = "<domain><devices><interface type=\"ethernet\"><alias name=\"ua-default\"/></interface></devices></domain>";
        let cfg = configurator(vec![], Some("02:00:00:00:00:2a"), NetworkConfiguratorOptions::default());
        let out = apply_str(xml, &cfg).unwrap();
        assert!(out.contains("<mac address=\"02:00:00:00:00:2a\"/>"));

        let out = apply_str(ETHERNET_IFACE, &cfg).unwrap();
        assert!(out.contains("<mac address=\"02:00:00:00:00:01\"/>"));
        assert!(!out.contains("02:00:00:00:00:2a"));
    }

    #[test]
    fn transitional_rewrites_virtio_models() {
        let options = NetworkConfiguratorOptions {
            use_virtio_transitional: true,
            istio_proxy_injection_enabled: false,
        };
        let out = apply_str(ETHERNET_IFACE, &configurator(vec![], None, options)).unwrap();
        assert!(out.contains("<model type=\"virtio-transitional\"/>"));
        assert!(!out.contains("virtio-non-transitional"));

        let xml = "<domain><devices><interface type=\"ethernet\"><alias name=\"ua-default\"/></interface></devices></domain>";
        let out = apply_str(xml, &configurator(vec![], None, options)).unwrap();
        assert!(out.contains("<model type=\"virtio-transitional\"/>"));

        let xml = "<domain><devices><interface type=\"ethernet\"><model type=\"e1000\"/><alias name=\"ua-default\"/></interface></devices></domain>";
        let out = apply_str(xml, &configurator(vec![], None, options)).unwrap();
        assert!(out.contains("<model type=\"e1000\"/>"));
    }

    #[test]
    fn declared_ports_become_port_forwards() {
        let ports = vec![
            Port {
                name: "http".into(),
                protocol: "TCP".into(),
                port: 80,
            },
            Port {
                name: "dns".into(),
                protocol: "UDP".into(),
                port: 53,
            },
        ];
        let out = apply_str(
            ETHERNET_IFACE,
            &configurator(ports, None, NetworkConfiguratorOptions::default()),
        )
        .unwrap();
        assert!(out.contains(
            "<portForward proto=\"tcp\"><range start=\"80\"/></portForward><portForward proto=\"udp\"><range start=\"53\"/></portForward>"
        ));
    }

    #[test]
    fn istio_extends_existing_port_forward() {
        let xml = "<domain><devices><interface type=\"user\"><alias name=\"ua-default\"/><portForward proto=\"tcp\"><range start=\"15000\" exclude=\"yes\"/><range start=\"22\"/></portForward></interface></devices></domain>";
        let options = NetworkConfiguratorOptions {
            use_virtio_transitional: false,
            istio_proxy_injection_enabled: true,
        };
        let out = apply_str(xml, &configurator(vec![], None, options)).unwrap();

        assert_eq!(out.matches("<portForward").count(), 1);
        assert_eq!(out.matches("start=\"15000\"").count(), 1);
        assert!(out.contains("<range start=\"22\"/>"));
        assert!(out.contains("<range start=\"15090\" exclude=\"yes\"/>"));
    }

    #[test]
    fn address_bound_port_forward_is_left_alone() {
        let xml = "<domain><devices><interface type=\"user\"><alias name=\"ua-default\"/><portForward proto=\"tcp\" address=\"10.0.0.1\"><range start=\"22\"/></portForward></interface></devices></domain>";
        let options = NetworkConfiguratorOptions {
            use_virtio_transitional: false,
            istio_proxy_injection_enabled: true,
        };
        let out = apply_str(xml, &configurator(vec![], None, options)).unwrap();
        assert!(out.contains(
            "<portForward proto=\"tcp\" address=\"10.0.0.1\"><range start=\"22\"/></portForward>"
        ));
        assert_eq!(out.matches("<portForward").count(), 2);
    }

    #[test]
    fn reapplying_is_a_no_op() {
        let options = NetworkConfiguratorOptions {
            use_virtio_transitional: true,
            istio_proxy_injection_enabled: true,
        };
        let ports = vec![Port {
            name: "http".into(),
            protocol: String::new(),
            port: 8080,
        }];
        let cfg = configurator(ports, Some("02:00:00:00:00:2a"), options);
        let once = apply_str(ETHERNET_IFACE, &cfg).unwrap();
        let twice = apply_str(&once, &cfg).unwrap();
        assert_eq!(once, twice);
    }
}
