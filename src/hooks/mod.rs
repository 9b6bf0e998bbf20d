//! The hook contract the virtualization host calls into.
//!
//! [`HookSidecar`] is transport independent; [`grpc`] exposes any
//! implementation over the host's gRPC socket protocol.

use tracing::debug;

use crate::domain;
use crate::error::Result;
use crate::passt::PasstNetworkConfigurator;
use crate::vmi::VmSpec;

pub mod grpc;

pub const HOOK_NAME: &str = "network-passt-binding";
pub const DEFAULT_HOOK_VERSION: &str = "v1alpha2";
pub const ON_DEFINE_DOMAIN_HOOK_POINT: &str = "OnDefineDomain";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookPoint {
    pub name: String,
    /// Lower values run earlier.
    pub priority: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookInfo {
    pub name: String,
    pub versions: Vec<String>,
    pub hook_points: Vec<HookPoint>,
}

pub trait HookSidecar: Send + Sync + 'static {
    /// Announces the implementation name, versions and handled hook points.
    fn info(&self) -> HookInfo;

    /// Returns the domain XML the host should define instead of `domain_xml`.
    fn on_define_domain(&self, domain_xml: &[u8], vmi: &[u8]) -> Result<Vec<u8>>;

    fn pre_cloud_init_iso(&self, cloud_init_data: Vec<u8>, _vmi: &[u8]) -> Vec<u8> {
        cloud_init_data
    }
}

/// Rewires pod network interfaces bound to the `passt` plugin.
#[derive(Debug, Clone)]
pub struct PasstHookSidecar {
    version: String,
}

impl PasstHookSidecar {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }
}

impl Default for PasstHookSidecar {
    fn default() -> Self {
        Self::new(DEFAULT_HOOK_VERSION)
    }
}

impl HookSidecar for PasstHookSidecar {
    fn info(&self) -> HookInfo {
        HookInfo {
            name: HOOK_NAME.to_string(),
            versions: vec![self.version.clone()],
            hook_points: vec![HookPoint {
                name: ON_DEFINE_DOMAIN_HOOK_POINT.to_string(),
                priority: 0,
            }],
        }
    }

    fn on_define_domain(&self, domain_xml: &[u8], vmi: &[u8]) -> Result<Vec<u8>> {
        let spec = VmSpec::decode(vmi)?;
        let configurator =
            PasstNetworkConfigurator::new(&spec.interfaces, &spec.networks, spec.options())?;
        debug!(
            vmi = %spec.name,
            namespace = %spec.namespace,
            bindings = configurator.bindings().len(),
            "applying passt bindings"
        );
        domain::apply(domain_xml, &configurator)
    }
}
