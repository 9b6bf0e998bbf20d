//! Read-only view of the VirtualMachineInstance fields the passt binding
//! cares about.
//!
//! The host hands the instance over as JSON. Only the fields below are
//! decoded; everything else in the payload is ignored.

use std::collections::HashMap;

use serde::de::IgnoredAny;
use serde::Deserialize;

use crate::error::Result;
use crate::passt::NetworkConfiguratorOptions;

/// Annotation that turns on sidecar proxy injection for the pod.
pub const ISTIO_INJECT_ANNOTATION: &str = "sidecar.istio.io/inject";

/// Name a network binding plugin must be registered under to be handled here.
pub const PASST_PLUGIN_NAME: &str = "passt";

#[derive(Debug, Clone, Deserialize)]
pub struct VirtualMachineInstance {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: VmiSpec,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VmiSpec {
    #[serde(default)]
    pub domain: DomainSpec,
    #[serde(default)]
    pub networks: Vec<Network>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DomainSpec {
    #[serde(default)]
    pub devices: Devices,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Devices {
    #[serde(default)]
    pub interfaces: Vec<Interface>,
    #[serde(default)]
    pub use_virtio_transitional: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interface {
    pub name: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub mac_address: Option<String>,
    #[serde(default)]
    pub ports: Vec<Port>,
    #[serde(default)]
    pub binding: Option<PluginBinding>,
    #[serde(default)]
    pub passt: Option<IgnoredAny>,
    #[serde(default)]
    pub masquerade: Option<IgnoredAny>,
    #[serde(default)]
    pub bridge: Option<IgnoredAny>,
    #[serde(default)]
    pub slirp: Option<IgnoredAny>,
    #[serde(default)]
    pub sriov: Option<IgnoredAny>,
}

/// Network binding plugin reference, `binding: {name: passt}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PluginBinding {
    pub name: String,
}

/// Port exposed by the guest on an interface.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct Port {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub protocol: String,
    /// Range checked when the port plan is built.
    pub port: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingMethod {
    /// Bound through the `passt` network binding plugin.
    PasstPlugin,
    /// Legacy core `passt: {}` binding.
    PasstCore,
    /// Some other plugin, by name.
    Plugin,
    /// masquerade, bridge, sriov, slirp or nothing at all.
    Other,
}

impl Interface {
    pub fn binding_method(&self) -> BindingMethod {
        match (&self.binding, &self.passt) {
            (Some(plugin), _) if plugin.name == PASST_PLUGIN_NAME => BindingMethod::PasstPlugin,
            (Some(_), _) => BindingMethod::Plugin,
            (None, Some(_)) => BindingMethod::PasstCore,
            (None, None) => BindingMethod::Other,
        }
    }

    pub fn is_passt_bound(&self) -> bool {
        matches!(
            self.binding_method(),
            BindingMethod::PasstPlugin | BindingMethod::PasstCore
        )
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Network {
    pub name: String,
    #[serde(default)]
    pub pod: Option<PodNetwork>,
    #[serde(default)]
    pub multus: Option<MultusNetwork>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodNetwork {
    #[serde(default, rename = "vmNetworkCIDR")]
    pub vm_network_cidr: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultusNetwork {
    #[serde(default)]
    pub network_name: String,
    #[serde(default)]
    pub default: bool,
}

/// Where a network's traffic comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkSource {
    Pod,
    Multus,
    Unspecified,
}

impl NetworkSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pod => "pod",
            Self::Multus => "multus",
            Self::Unspecified => "unspecified",
        }
    }
}

impl std::fmt::Display for NetworkSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Network {
    pub fn source(&self) -> NetworkSource {
        match (&self.pod, &self.multus) {
            (Some(_), _) => NetworkSource::Pod,
            (None, Some(_)) => NetworkSource::Multus,
            (None, None) => NetworkSource::Unspecified,
        }
    }
}

/// The slice of a VMI the configurator is built from.
#[derive(Debug, Clone, Default)]
pub struct VmSpec {
    pub name: String,
    pub namespace: String,
    pub interfaces: Vec<Interface>,
    pub networks: Vec<Network>,
    pub use_virtio_transitional: bool,
    pub annotations: HashMap<String, String>,
}

impl VmSpec {
    /// Decodes a JSON encoded VirtualMachineInstance.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let vmi: VirtualMachineInstance = serde_json::from_slice(payload)?;
        Ok(vmi.into())
    }

    /// True iff the sidecar injection annotation is set to "true", ignoring case.
    pub fn istio_proxy_injection_enabled(&self) -> bool {
        self.annotations
            .get(ISTIO_INJECT_ANNOTATION)
            .map(|value| value.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    pub fn options(&self) -> NetworkConfiguratorOptions {
        NetworkConfiguratorOptions {
            use_virtio_transitional: self.use_virtio_transitional,
            istio_proxy_injection_enabled: self.istio_proxy_injection_enabled(),
        }
    }
}

impl From<VirtualMachineInstance> for VmSpec {
    fn from(vmi: VirtualMachineInstance) -> Self {
        let VirtualMachineInstance { metadata, spec } = vmi;
        Self {
            name: metadata.name,
            namespace: metadata.namespace,
            interfaces: spec.domain.devices.interfaces,
            networks: spec.networks,
            use_virtio_transitional: spec.domain.devices.use_virtio_transitional.unwrap_or(false),
            annotations: metadata.annotations,
        }
    }
}
